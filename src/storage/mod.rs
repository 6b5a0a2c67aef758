//! Versioned operator storage.
//!
//! This module contains:
//! - `Storage` trait (re-exported from `interfaces`)
//! - `MemoryStore`: sharded in-memory store with copy-on-write snapshots
//! - `RecordingStorage`: test wrapper that records protocol calls

use std::sync::Arc;

pub mod memory;
pub mod mock;
pub mod sharded;

pub use crate::config::{StorageType, StoreConfig};
pub use crate::interfaces::storage::{Result, SharedOperator, Storage, StoreError};
pub use memory::MemoryStore;
pub use mock::{RecordingStorage, StorageCall};

use crate::registry::OperatorRegistry;

/// Create the store selected by `config`.
pub fn init_storage(config: &StoreConfig, registry: OperatorRegistry) -> Arc<MemoryStore> {
    match config.storage_type {
        StorageType::Memory => {
            tracing::info!(shards = config.shards, "Using in-memory operator store");
            Arc::new(MemoryStore::with_shards(registry, config.shards))
        }
    }
}
