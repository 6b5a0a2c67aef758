//! Request transport interfaces.

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::message::{Request, Response};

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors that can occur while delivering requests.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Transport closed")]
    Closed,

    #[error("Timed out waiting for response to {0}")]
    Timeout(String),

    #[error("No route for request: {0}")]
    Unroutable(String),
}

/// Sends requests to whichever consumer owns the target operator.
///
/// Implementations:
/// - `ChannelPublisher`: in-process tokio channels
/// - `PartitionedPublisher`: routes across several publishers by operator key
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Send a request; the receiver resolves with the correlated response.
    async fn publish(&self, request: Request) -> Result<oneshot::Receiver<Response>>;

    /// Forget the pending correlation for a request whose caller gave up.
    fn abandon(&self, request: &Request);
}

/// Handles requests delivered by a consumer.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: Request) -> Response;
}
