//! Operator client: issues nested and external calls through a publisher.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use crate::context::CallContext;
use crate::error::{CallError, Result};
use crate::interfaces::operator::{OperatorClient, OperatorRef};
use crate::interfaces::transport::{Publisher, TransportError};
use crate::message::{new_request_id, Control, OperatorKey, Request, Response};
use crate::registry::OperatorRegistry;

/// Client for calling operators.
///
/// Cheap to clone; all clones share the publisher.
#[derive(Clone)]
pub struct Client {
    publisher: Arc<dyn Publisher>,
    types: Arc<HashSet<String>>,
}

impl Client {
    pub fn new(publisher: Arc<dyn Publisher>, registry: &OperatorRegistry) -> Self {
        Self {
            publisher,
            types: Arc::new(registry.type_names().map(str::to_string).collect()),
        }
    }

    /// Start a new transaction for `request` and wait until it committed.
    pub async fn invoke(&self, request: Request) -> Result<Vec<u8>> {
        self.call(&CallContext::detached(), request).await
    }

    /// Send a commit protocol message for `key` within `transaction_id`.
    pub(crate) async fn control(
        &self,
        control: Control,
        key: &OperatorKey,
        transaction_id: &str,
        timeout: Duration,
    ) -> Result<()> {
        let mut request = Request::control(control, key, transaction_id);
        request.request_id = new_request_id();
        request.budget_ms = Some(millis(timeout));

        self.dispatch(request, Some(Instant::now() + timeout))
            .await?
            .into_result()
            .map(|_| ())
    }

    /// Publish and wait for the correlated response until `deadline`.
    async fn dispatch(&self, request: Request, deadline: Option<Instant>) -> Result<Response> {
        let receiver = self.publisher.publish(request.clone()).await?;

        let received = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, receiver).await {
                Ok(received) => received,
                Err(_) => {
                    self.publisher.abandon(&request);
                    return Err(TransportError::Timeout(request.to_string()).into());
                }
            },
            None => receiver.await,
        };

        received.map_err(|_| CallError::from(TransportError::Closed))
    }
}

#[async_trait]
impl OperatorClient for Client {
    async fn call(&self, ctx: &CallContext, mut request: Request) -> Result<Vec<u8>> {
        let key = request.key();
        if !self.types.contains(&key.type_name) {
            return Err(CallError::not_found(format!(
                "operator '{}' not found",
                key.type_name
            )));
        }

        let request_id = new_request_id();
        request.transaction_id = ctx
            .transaction_id()
            .map(str::to_string)
            .unwrap_or_else(|| request_id.clone());
        request.request_id = request_id;
        request.trail = ctx.trail().to_vec();
        request.budget_ms = ctx.remaining().map(millis);

        debug!(
            transaction_id = %request.transaction_id,
            request_id = %request.request_id,
            operator = %key,
            method = %request.method,
            "Client.call"
        );

        // Record the target before dispatch so a timed-out call still gets
        // rolled back by the outermost coordinator.
        if ctx.transaction_id().is_some() {
            ctx.involve(&key);
        }

        let response = self.dispatch(request, ctx.deadline()).await?;
        ctx.merge(&response.involved);
        response.into_result()
    }

    fn resolve(&self, type_name: &str, instance_id: &str) -> Result<OperatorRef> {
        if !self.types.contains(type_name) {
            return Err(CallError::not_found(format!(
                "operator '{}' not found",
                type_name
            )));
        }
        Ok(OperatorRef::new(OperatorKey::new(type_name, instance_id)))
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
