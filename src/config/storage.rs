//! Store configuration types.

use serde::Deserialize;

use crate::storage::sharded::DEFAULT_SHARDS;

/// Storage type discriminator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    #[default]
    Memory,
}

/// Versioned store configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    #[serde(rename = "type")]
    pub storage_type: StorageType,
    /// Lock shards per table. Rounded up to a power of two.
    pub shards: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            storage_type: StorageType::Memory,
            shards: DEFAULT_SHARDS,
        }
    }
}
