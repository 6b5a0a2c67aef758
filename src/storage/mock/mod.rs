//! Storage wrapper that records commit protocol calls for tests.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::interfaces::storage::{Result, SharedOperator, Storage, StoreError};
use crate::message::{Control, OperatorKey};

/// One recorded storage operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageCall {
    /// `None` for `get`.
    pub control: Option<Control>,
    pub key: OperatorKey,
    pub transaction_id: String,
}

/// Delegates to an inner store and records every call.
pub struct RecordingStorage {
    inner: Arc<dyn Storage>,
    calls: RwLock<Vec<StorageCall>>,
    fail_prepare_for: RwLock<Option<OperatorKey>>,
}

impl RecordingStorage {
    pub fn new(inner: Arc<dyn Storage>) -> Self {
        Self {
            inner,
            calls: RwLock::new(Vec::new()),
            fail_prepare_for: RwLock::new(None),
        }
    }

    /// Make every prepare of `key` fail with `AlreadyPrepared`.
    pub async fn set_fail_prepare_for(&self, key: Option<OperatorKey>) {
        *self.fail_prepare_for.write().await = key;
    }

    pub async fn calls(&self) -> Vec<StorageCall> {
        self.calls.read().await.clone()
    }

    /// Keys that received `control` within `transaction_id`, sorted.
    pub async fn keys_for(&self, control: Control, transaction_id: &str) -> Vec<OperatorKey> {
        let mut keys: Vec<OperatorKey> = self
            .calls
            .read()
            .await
            .iter()
            .filter(|c| c.control == Some(control) && c.transaction_id == transaction_id)
            .map(|c| c.key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Distinct transaction ids seen, in first-seen order.
    pub async fn transaction_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for call in self.calls.read().await.iter() {
            if !ids.contains(&call.transaction_id) {
                ids.push(call.transaction_id.clone());
            }
        }
        ids
    }

    async fn record(&self, control: Option<Control>, key: &OperatorKey, transaction_id: &str) {
        self.calls.write().await.push(StorageCall {
            control,
            key: key.clone(),
            transaction_id: transaction_id.to_string(),
        });
    }
}

#[async_trait]
impl Storage for RecordingStorage {
    async fn get(&self, key: &OperatorKey, transaction_id: &str) -> Result<SharedOperator> {
        self.record(None, key, transaction_id).await;
        self.inner.get(key, transaction_id).await
    }

    async fn prepare(&self, key: &OperatorKey, transaction_id: &str) -> Result<()> {
        self.record(Some(Control::Prepare), key, transaction_id).await;
        if self.fail_prepare_for.read().await.as_ref() == Some(key) {
            return Err(StoreError::AlreadyPrepared {
                key: key.to_string(),
                holder: "injected".to_string(),
            });
        }
        self.inner.prepare(key, transaction_id).await
    }

    async fn commit(&self, key: &OperatorKey, transaction_id: &str) -> Result<()> {
        self.record(Some(Control::Commit), key, transaction_id).await;
        self.inner.commit(key, transaction_id).await
    }

    async fn rollback(&self, key: &OperatorKey, transaction_id: &str) -> Result<()> {
        self.record(Some(Control::Rollback), key, transaction_id).await;
        self.inner.rollback(key, transaction_id).await
    }
}
