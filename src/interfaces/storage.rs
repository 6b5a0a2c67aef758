//! Versioned operator storage interface.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::interfaces::operator::Operator;
use crate::message::OperatorKey;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Transaction-local operator state. The lock is the single write-owner slot.
pub type SharedOperator = Arc<Mutex<Box<dyn Operator>>>;

/// Errors that can occur during storage operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Operator type not found: {type_name}")]
    OperatorNotFound { type_name: String },

    #[error("Outdated version of {key}: a newer version was committed")]
    OutdatedVersion { key: String },

    #[error("Base outdated for {key}: baseline moved since the snapshot was taken")]
    BaseOutdated { key: String },

    #[error("Already prepared: {key} is held by {holder}")]
    AlreadyPrepared { key: String, holder: String },

    #[error("Not prepared by this transaction: {key} (held by {holder:?})")]
    NotPreparedByThisTransaction {
        key: String,
        holder: Option<String>,
    },
}

/// Interface for per-transaction snapshot isolation of operator state.
///
/// Every operation is keyed by operator key and transaction id. Operations on
/// different operator keys never block each other.
///
/// Implementations:
/// - `MemoryStore`: lock-free-per-key in-memory versions
/// - `RecordingStorage`: records calls for coordinator tests
#[async_trait]
pub trait Storage: Send + Sync {
    /// Return the transaction-local snapshot, cloning the committed state on
    /// first access.
    ///
    /// Fails with `OutdatedVersion` if the snapshot exists but the committed
    /// baseline moved since it was taken.
    async fn get(&self, key: &OperatorKey, transaction_id: &str) -> Result<SharedOperator>;

    /// Claim the exclusive pending-commit slot for this transaction's snapshot.
    async fn prepare(&self, key: &OperatorKey, transaction_id: &str) -> Result<()>;

    /// Promote the prepared snapshot to the committed baseline.
    async fn commit(&self, key: &OperatorKey, transaction_id: &str) -> Result<()>;

    /// Discard the snapshot and release the slot if held. Always succeeds.
    async fn rollback(&self, key: &OperatorKey, transaction_id: &str) -> Result<()>;
}
