//! In-memory channel-based request bus.
//!
//! Requests travel over a tokio `mpsc` channel to a single consumer, which
//! spawns one task per request. Responses are routed back to the waiting
//! caller through a correlation table keyed by request id.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::interfaces::transport::{Publisher, RequestHandler, Result, TransportError};
use crate::message::{Request, Response};

/// Callers waiting for a response, keyed by request id.
#[derive(Default)]
struct Pending {
    waiting: Mutex<HashMap<String, oneshot::Sender<Response>>>,
}

impl Pending {
    fn register(&self, request_id: &str) -> oneshot::Receiver<Response> {
        let (tx, rx) = oneshot::channel();
        self.waiting.lock().insert(request_id.to_string(), tx);
        rx
    }

    fn remove(&self, request_id: &str) -> Option<oneshot::Sender<Response>> {
        self.waiting.lock().remove(request_id)
    }

    fn complete(&self, response: Response) {
        match self.remove(&response.request_id) {
            Some(waiter) => {
                if waiter.send(response).is_err() {
                    debug!("Caller dropped before response arrived");
                }
            }
            None => {
                warn!(request_id = %response.request_id, "Response for unknown request");
            }
        }
    }
}

/// Create a connected publisher/consumer pair.
pub fn channel_pair(capacity: usize) -> (ChannelPublisher, ChannelConsumer) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    let pending = Arc::new(Pending::default());
    (
        ChannelPublisher {
            sender,
            pending: pending.clone(),
        },
        ChannelConsumer { receiver, pending },
    )
}

/// Publishing half of an in-memory channel.
#[derive(Clone)]
pub struct ChannelPublisher {
    sender: mpsc::Sender<Request>,
    pending: Arc<Pending>,
}

#[async_trait]
impl Publisher for ChannelPublisher {
    #[tracing::instrument(name = "bus.publish", skip_all, fields(request_id = %request.request_id, method = %request.method))]
    async fn publish(&self, request: Request) -> Result<oneshot::Receiver<Response>> {
        let request_id = request.request_id.clone();
        let receiver = self.pending.register(&request_id);

        if self.sender.send(request).await.is_err() {
            self.pending.remove(&request_id);
            return Err(TransportError::Closed);
        }

        debug!("Published request to channel");
        Ok(receiver)
    }

    fn abandon(&self, request: &Request) {
        if self.pending.remove(&request.request_id).is_some() {
            debug!(request_id = %request.request_id, "Abandoned pending request");
        }
    }
}

/// Consuming half of an in-memory channel.
pub struct ChannelConsumer {
    receiver: mpsc::Receiver<Request>,
    pending: Arc<Pending>,
}

impl ChannelConsumer {
    #[cfg(test)]
    pub(crate) fn try_recv(&mut self) -> Option<Request> {
        self.receiver.try_recv().ok()
    }

    /// Start delivering requests to `handler`, one task per request.
    pub fn start(self, handler: Arc<dyn RequestHandler>) -> ConsumerHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let Self {
            mut receiver,
            pending,
        } = self;

        let task = tokio::spawn(async move {
            loop {
                let request = tokio::select! {
                    _ = &mut shutdown_rx => {
                        info!("Channel consumer shutting down");
                        break;
                    }
                    request = receiver.recv() => match request {
                        Some(request) => request,
                        None => {
                            info!("Channel closed, stopping consumer");
                            break;
                        }
                    },
                };

                let handler = handler.clone();
                let pending = pending.clone();
                tokio::spawn(async move {
                    let response = handler.handle(request).await;
                    pending.complete(response);
                });
            }
        });

        info!("Channel consumer started");
        ConsumerHandle {
            shutdown: Some(shutdown_tx),
            task,
        }
    }
}

/// Running consumer loop. Dropping the handle also stops it.
pub struct ConsumerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ConsumerHandle {
    /// Stop accepting requests. Requests already being handled run to completion.
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Err(e) = (&mut self.task).await {
            warn!(error = %e, "Channel consumer task failed");
        }
    }
}
