//! Routes requests across several publishers by operator key.
//!
//! Every request for a given operator lands on the same partition, so one
//! store owns each operator's versions.

use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::oneshot;

use crate::interfaces::transport::{Publisher, Result, TransportError};
use crate::message::{OperatorKey, Request, Response};

/// Stable partition index of `key` among `partitions`.
///
/// Uses the first eight bytes of SHA-256 over `Type.id`, so the mapping is
/// identical across processes and releases.
pub fn partition_for(key: &OperatorKey, partitions: usize) -> usize {
    if partitions <= 1 {
        return 0;
    }
    let digest = Sha256::digest(key.to_string().as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % partitions as u64) as usize
}

/// Publisher fanning out to one inner publisher per partition.
pub struct PartitionedPublisher {
    partitions: Vec<Arc<dyn Publisher>>,
}

impl PartitionedPublisher {
    pub fn new(partitions: Vec<Arc<dyn Publisher>>) -> Self {
        Self { partitions }
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    fn route(&self, request: &Request) -> Result<&Arc<dyn Publisher>> {
        let index = partition_for(&request.key(), self.partitions.len());
        self.partitions
            .get(index)
            .ok_or_else(|| TransportError::Unroutable(request.to_string()))
    }
}

#[async_trait]
impl Publisher for PartitionedPublisher {
    async fn publish(&self, request: Request) -> Result<oneshot::Receiver<Response>> {
        self.route(&request)?.publish(request).await
    }

    fn abandon(&self, request: &Request) {
        if let Ok(publisher) = self.route(request) {
            publisher.abandon(request);
        }
    }
}
