//! Transaction coordinator configuration.

use std::time::Duration;

use serde::Deserialize;

use crate::message::REQUEST_ID_LEN;

/// Default deadline for executing one call, nested calls included.
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 5_000;

/// Default deadline for each prepare/commit/rollback broadcast.
pub const DEFAULT_BROADCAST_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub call_timeout_ms: u64,
    pub broadcast_timeout_ms: u64,
    /// Retries after the first attempt. `None` retries until commit.
    pub max_retries: Option<u32>,
    /// Length retry transaction ids are truncated to.
    pub transaction_id_len: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
            broadcast_timeout_ms: DEFAULT_BROADCAST_TIMEOUT_MS,
            max_retries: None,
            transaction_id_len: REQUEST_ID_LEN,
        }
    }
}

impl CoordinatorConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn broadcast_timeout(&self) -> Duration {
        Duration::from_millis(self.broadcast_timeout_ms)
    }

    /// Whether another attempt is allowed after `retries` retries.
    pub fn may_retry(&self, retries: u32) -> bool {
        self.max_retries.is_none_or(|max| retries < max)
    }
}
