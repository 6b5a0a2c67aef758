//! In-process runtime.
//!
//! Wires N partitions (each a `MemoryStore`, a `Coordinator` and a channel
//! consumer) behind one shared `Client`. Requests are routed to partitions by
//! operator key, so each store owns a disjoint set of operators.

mod builder;

use std::sync::Arc;

use tracing::info;

use crate::bus::{partition_for, ConsumerHandle};
use crate::client::Client;
use crate::interfaces::operator::Operator;
use crate::message::OperatorKey;
use crate::storage::MemoryStore;

pub use builder::RuntimeBuilder;

/// Errors building a runtime.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("No operators registered")]
    NoOperators,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Running in-process runtime.
pub struct Runtime {
    client: Client,
    stores: Vec<Arc<MemoryStore>>,
    consumers: Vec<ConsumerHandle>,
}

impl Runtime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Client for issuing calls from outside any transaction.
    pub fn client(&self) -> Client {
        self.client.clone()
    }

    pub fn partitions(&self) -> usize {
        self.stores.len()
    }

    pub fn store(&self, partition: usize) -> Option<&Arc<MemoryStore>> {
        self.stores.get(partition)
    }

    /// Store owning `key`.
    pub fn store_for(&self, key: &OperatorKey) -> Option<&Arc<MemoryStore>> {
        self.store(partition_for(key, self.stores.len()))
    }

    /// Committed state of `key`, if the operator was ever committed or read.
    pub async fn committed<T>(&self, key: &OperatorKey) -> Option<T>
    where
        T: Operator + Clone,
    {
        self.store_for(key)?.committed::<T>(key).await
    }

    /// Live transaction-local snapshots across all partitions.
    pub fn snapshot_count(&self) -> usize {
        self.stores.iter().map(|s| s.snapshot_count()).sum()
    }

    /// Stop every consumer loop.
    pub async fn shutdown(self) {
        for consumer in self.consumers {
            consumer.stop().await;
        }
        info!("Runtime stopped");
    }
}
