//! In-memory versioned operator store.
//!
//! Two tables:
//! - baselines, keyed by operator key (`Type.id`): the committed version key,
//!   the committed state object and the pending-commit claim.
//! - snapshots, keyed by version key (`Type.id.tx`): transaction-local clones
//!   and the baseline version they were cloned from.
//!
//! Every baseline transition is a compare-and-swap against the record the
//! caller observed. Losers re-read and re-evaluate their own operation.
//! Superseded state objects are dropped with the record that referenced them.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::sharded::{ShardedMap, DEFAULT_SHARDS};
use crate::interfaces::operator::Operator;
use crate::interfaces::storage::{Result, SharedOperator, Storage, StoreError};
use crate::message::OperatorKey;
use crate::registry::OperatorRegistry;

/// Committed version of an operator.
#[derive(Clone)]
struct Baseline {
    /// Version key whose state is currently committed.
    key: String,
    /// Snapshot holding the exclusive pending-commit claim.
    prepared: Option<String>,
    state: SharedOperator,
}

impl PartialEq for Baseline {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
            && self.prepared == other.prepared
            && Arc::ptr_eq(&self.state, &other.state)
    }
}

/// Transaction-local version of an operator.
#[derive(Clone)]
struct Snapshot {
    /// Baseline version key this snapshot was cloned from.
    base: String,
    state: SharedOperator,
    /// Prepared without claiming the slot because nothing changed.
    unchanged: bool,
}

impl PartialEq for Snapshot {
    fn eq(&self, other: &Self) -> bool {
        self.base == other.base
            && self.unchanged == other.unchanged
            && Arc::ptr_eq(&self.state, &other.state)
    }
}

/// Version key of a transaction-local snapshot.
fn version_key(operator_key: &str, transaction_id: &str) -> String {
    format!("{}.{}", operator_key, transaction_id)
}

/// In-memory store giving each transaction a copy-on-write snapshot.
pub struct MemoryStore {
    registry: OperatorRegistry,
    baselines: ShardedMap<Baseline>,
    snapshots: ShardedMap<Snapshot>,
}

impl MemoryStore {
    pub fn new(registry: OperatorRegistry) -> Self {
        Self::with_shards(registry, DEFAULT_SHARDS)
    }

    pub fn with_shards(registry: OperatorRegistry, shards: usize) -> Self {
        Self {
            registry,
            baselines: ShardedMap::new(shards),
            snapshots: ShardedMap::new(shards),
        }
    }

    /// Version key currently committed for `key`, if it was ever accessed.
    pub fn committed_version(&self, key: &OperatorKey) -> Option<String> {
        self.baselines.get(&key.to_string()).map(|b| b.key)
    }

    /// Snapshot currently holding the pending-commit claim on `key`.
    pub fn prepared_by(&self, key: &OperatorKey) -> Option<String> {
        self.baselines
            .get(&key.to_string())
            .and_then(|b| b.prepared)
    }

    pub fn has_snapshot(&self, key: &OperatorKey, transaction_id: &str) -> bool {
        self.snapshots
            .get(&version_key(&key.to_string(), transaction_id))
            .is_some()
    }

    /// Number of live transaction-local snapshots.
    pub fn snapshot_count(&self) -> usize {
        self.snapshots.len()
    }

    /// Copy of the committed state of `key`, downcast to its concrete type.
    pub async fn committed<T>(&self, key: &OperatorKey) -> Option<T>
    where
        T: Operator + Clone,
    {
        let baseline = self.baselines.get(&key.to_string())?;
        let state = baseline.state.lock().await;
        state.as_any().downcast_ref::<T>().cloned()
    }

    /// Load the baseline, creating it from the registry on first access.
    fn baseline(&self, key: &OperatorKey, operator_key: &str) -> Result<Baseline> {
        if let Some(baseline) = self.baselines.get(operator_key) {
            return Ok(baseline);
        }

        let factory = self
            .registry
            .factory(&key.type_name)
            .ok_or_else(|| StoreError::OperatorNotFound {
                type_name: key.type_name.clone(),
            })?;

        Ok(self.baselines.get_or_insert_with(operator_key, || {
            debug!(operator = %operator_key, "Creating operator");
            Baseline {
                key: operator_key.to_string(),
                prepared: None,
                state: Arc::new(Mutex::new(factory(&key.instance_id))),
            }
        }))
    }

    /// Clear the pending-commit claim of `local_key`, if it holds one.
    fn release_claim(&self, operator_key: &str, local_key: &str) {
        while let Some(baseline) = self.baselines.get(operator_key) {
            if baseline.prepared.as_deref() != Some(local_key) {
                return;
            }
            let released = Baseline {
                prepared: None,
                ..baseline.clone()
            };
            if self
                .baselines
                .compare_and_swap(operator_key, &baseline, released)
            {
                debug!(snapshot = %local_key, "Released prepare claim");
                return;
            }
        }
    }

    /// Check a freshly taken claim against its snapshot.
    ///
    /// A rollback removes the snapshot before it looks at the claim, and
    /// prepare takes the claim before it looks at the snapshot, so one of
    /// the two always sees the other. Returns `false` if the snapshot was
    /// already gone and the claim was released again.
    fn keep_claim(&self, operator_key: &str, local_key: &str) -> bool {
        if self.snapshots.get(local_key).is_some() {
            return true;
        }
        warn!(snapshot = %local_key, "Snapshot rolled back while preparing, releasing claim");
        self.release_claim(operator_key, local_key);
        false
    }

    /// Whether the snapshot state equals the committed state.
    ///
    /// A state that is locked by a running handler counts as changed.
    fn is_unchanged(snapshot: &Snapshot, baseline: &Baseline) -> bool {
        match (snapshot.state.try_lock(), baseline.state.try_lock()) {
            (Ok(local), Ok(committed)) => (**local).same_state(&**committed),
            _ => false,
        }
    }
}

#[async_trait]
impl Storage for MemoryStore {
    #[tracing::instrument(name = "store.get", skip_all, fields(operator = %key, transaction_id = %transaction_id))]
    async fn get(&self, key: &OperatorKey, transaction_id: &str) -> Result<SharedOperator> {
        let operator_key = key.to_string();
        let local_key = version_key(&operator_key, transaction_id);

        if let Some(snapshot) = self.snapshots.get(&local_key) {
            let committed = self.baselines.get(&operator_key).map(|b| b.key);
            if committed.as_deref() != Some(snapshot.base.as_str()) {
                warn!(base = %snapshot.base, committed = ?committed, "Snapshot outdated");
                return Err(StoreError::OutdatedVersion { key: local_key });
            }
            return Ok(snapshot.state);
        }

        let baseline = self.baseline(key, &operator_key)?;
        let state = {
            let committed = baseline.state.lock().await;
            committed.clone_state()
        };

        let (stored, inserted) = self.snapshots.insert_if_absent(
            &local_key,
            Snapshot {
                base: baseline.key.clone(),
                state: Arc::new(Mutex::new(state)),
                unchanged: false,
            },
        );
        if inserted {
            debug!(base = %baseline.key, "Cloned committed state");
        } else if stored.base != baseline.key {
            return Err(StoreError::OutdatedVersion { key: local_key });
        }

        Ok(stored.state)
    }

    #[tracing::instrument(name = "store.prepare", skip_all, fields(operator = %key, transaction_id = %transaction_id))]
    async fn prepare(&self, key: &OperatorKey, transaction_id: &str) -> Result<()> {
        let operator_key = key.to_string();
        let local_key = version_key(&operator_key, transaction_id);

        loop {
            let Some(snapshot) = self.snapshots.get(&local_key) else {
                debug!("No snapshot, nothing to prepare");
                return Ok(());
            };
            let Some(baseline) = self.baselines.get(&operator_key) else {
                return Err(StoreError::BaseOutdated { key: local_key });
            };

            if baseline.prepared.as_deref() == Some(local_key.as_str()) {
                return Ok(());
            }

            if snapshot.base != baseline.key {
                debug!(base = %snapshot.base, committed = %baseline.key, "Base outdated");
                return Err(StoreError::BaseOutdated { key: local_key });
            }

            // Pure reads also yield to a pending commit.
            if let Some(holder) = &baseline.prepared {
                debug!(holder = %holder, "Already prepared by another transaction");
                return Err(StoreError::AlreadyPrepared {
                    key: operator_key,
                    holder: holder.clone(),
                });
            }

            if Self::is_unchanged(&snapshot, &baseline) {
                let marked = Snapshot {
                    unchanged: true,
                    ..snapshot.clone()
                };
                if self.snapshots.compare_and_swap(&local_key, &snapshot, marked) {
                    debug!("Snapshot unchanged, prepared without claim");
                    return Ok(());
                }
                continue;
            }

            let claimed = Baseline {
                prepared: Some(local_key.clone()),
                ..baseline.clone()
            };
            if self
                .baselines
                .compare_and_swap(&operator_key, &baseline, claimed)
            {
                if self.keep_claim(&operator_key, &local_key) {
                    debug!("Prepared");
                }
                return Ok(());
            }
            debug!("Lost prepare race, re-reading baseline");
        }
    }

    #[tracing::instrument(name = "store.commit", skip_all, fields(operator = %key, transaction_id = %transaction_id))]
    async fn commit(&self, key: &OperatorKey, transaction_id: &str) -> Result<()> {
        let operator_key = key.to_string();
        let local_key = version_key(&operator_key, transaction_id);

        let Some(snapshot) = self.snapshots.get(&local_key) else {
            debug!("No snapshot, nothing to commit");
            return Ok(());
        };

        if snapshot.unchanged {
            self.snapshots.remove(&local_key);
            debug!("Dropped unchanged snapshot");
            return Ok(());
        }

        loop {
            let Some(baseline) = self.baselines.get(&operator_key) else {
                return Err(StoreError::NotPreparedByThisTransaction {
                    key: local_key,
                    holder: None,
                });
            };

            if baseline.prepared.as_deref() != Some(local_key.as_str()) {
                tracing::error!(holder = ?baseline.prepared, "Commit without prepare claim");
                return Err(StoreError::NotPreparedByThisTransaction {
                    key: local_key,
                    holder: baseline.prepared,
                });
            }

            let committed = Baseline {
                key: local_key.clone(),
                prepared: None,
                state: snapshot.state.clone(),
            };
            if self
                .baselines
                .compare_and_swap(&operator_key, &baseline, committed)
            {
                break;
            }
        }

        self.snapshots.remove(&local_key);
        debug!("Committed");
        Ok(())
    }

    #[tracing::instrument(name = "store.rollback", skip_all, fields(operator = %key, transaction_id = %transaction_id))]
    async fn rollback(&self, key: &OperatorKey, transaction_id: &str) -> Result<()> {
        let operator_key = key.to_string();
        let local_key = version_key(&operator_key, transaction_id);

        self.snapshots.remove(&local_key);
        self.release_claim(&operator_key, &local_key);

        debug!("Rolled back");
        Ok(())
    }
}

#[cfg(test)]
mod tests;
