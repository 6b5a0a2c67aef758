//! Request bus for async dispatch to coordinators.
//!
//! This module contains:
//! - `Publisher` / `RequestHandler` traits (re-exported from `interfaces`)
//! - Transport configuration
//! - Implementations: in-process channel, key-partitioned router

use serde::Deserialize;

pub mod channel;
pub mod partitioned;

pub use crate::interfaces::transport::{Publisher, RequestHandler, Result, TransportError};
pub use channel::{channel_pair, ChannelConsumer, ChannelPublisher, ConsumerHandle};
pub use partitioned::{partition_for, PartitionedPublisher};

/// Default capacity of each request channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Transport configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Buffered requests per partition before `publish` waits.
    pub channel_capacity: usize,
    /// Number of independent store/coordinator partitions.
    pub partitions: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            partitions: 1,
        }
    }
}
