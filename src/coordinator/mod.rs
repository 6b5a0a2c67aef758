//! Transaction coordinator.
//!
//! Handles every request delivered for the operators of one store:
//! - control messages (`__PREPARE__`, `__COMMIT__`, `__ROLLBACK__`) go straight
//!   to the store
//! - nested business calls execute once inside the caller's transaction
//! - root business calls execute, then drive prepare/commit across every
//!   operator the call touched, retrying under a new transaction id on
//!   conflict

mod broadcast;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::client::Client;
use crate::config::CoordinatorConfig;
use crate::context::CallContext;
use crate::error::{CallError, ErrorKind, Result};
use crate::interfaces::storage::Storage;
use crate::interfaces::transport::RequestHandler;
use crate::message::{Control, InvolvedOperators, Request, Response};
use crate::utils::retry::retry_transaction_id;

use broadcast::broadcast;

/// Executes requests against a store and coordinates their commit.
pub struct Coordinator {
    storage: Arc<dyn Storage>,
    client: Client,
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(storage: Arc<dyn Storage>, client: Client, config: CoordinatorConfig) -> Self {
        Self {
            storage,
            client,
            config,
        }
    }

    /// Apply a control message to the local store.
    async fn control(&self, control: Control, request: &Request) -> Result<()> {
        let key = request.key();
        let tx = &request.transaction_id;
        let result = match control {
            Control::Prepare => self.storage.prepare(&key, tx).await,
            Control::Commit => self.storage.commit(&key, tx).await,
            Control::Rollback => self.storage.rollback(&key, tx).await,
        };
        result.map_err(CallError::from)
    }

    /// Run the handler once against the transaction's snapshot, bounded by
    /// the call timeout and by `caller_deadline`.
    ///
    /// Returns every operator touched, including through nested calls, even
    /// when the attempt failed.
    async fn attempt(
        &self,
        request: &Request,
        caller_deadline: Option<Instant>,
    ) -> (InvolvedOperators, Result<Vec<u8>>) {
        let deadline = earliest(Instant::now() + self.config.call_timeout(), caller_deadline);
        let ctx = CallContext::for_request(request, deadline);

        let result = match tokio::time::timeout_at(deadline, self.execute(&ctx, request)).await {
            Ok(result) => result,
            Err(_) => Err(CallError::timeout(format!(
                "{} did not finish in time",
                request
            ))),
        };

        (ctx.involved(), result)
    }

    async fn execute(&self, ctx: &CallContext, request: &Request) -> Result<Vec<u8>> {
        let key = request.key();
        let state = self.storage.get(&key, &request.transaction_id).await?;
        let mut operator = state.lock().await;
        operator.handle(ctx, &self.client, request).await
    }

    /// Prepare everywhere, then commit everywhere. Rolls back on failure.
    ///
    /// Nothing is committed once `caller_deadline` has passed.
    async fn finalize(
        &self,
        transaction_id: &str,
        involved: &InvolvedOperators,
        caller_deadline: Option<Instant>,
    ) -> Result<()> {
        if expired(caller_deadline) {
            return Err(self.abandon(transaction_id, involved, "prepare").await);
        }

        let timeout = self.config.broadcast_timeout();
        let prepare_timeout = caller_deadline.map_or(timeout, |deadline| {
            timeout.min(deadline.saturating_duration_since(Instant::now()))
        });

        let prepared = broadcast(
            &self.client,
            Control::Prepare,
            transaction_id,
            involved,
            prepare_timeout,
        )
        .await;
        if let Some(err) = prepared.first_error() {
            let err = err.clone();
            warn!(
                transaction_id = %transaction_id,
                failed = prepared.failed(),
                error = %err,
                "Prepare failed, rolling back"
            );
            self.rollback(transaction_id, involved).await;
            return Err(err);
        }

        if expired(caller_deadline) {
            return Err(self.abandon(transaction_id, involved, "commit").await);
        }

        let committed = broadcast(
            &self.client,
            Control::Commit,
            transaction_id,
            involved,
            timeout,
        )
        .await;
        if let Some(err) = committed.first_error() {
            error!(
                transaction_id = %transaction_id,
                failed = committed.failed(),
                error = %err,
                "Commit failed after successful prepare"
            );
            let err = CallError::internal(err.message.clone()).context("commit");
            self.rollback(transaction_id, involved).await;
            return Err(err);
        }

        debug!(transaction_id = %transaction_id, operators = involved.len(), "Committed");
        Ok(())
    }

    /// Roll back a transaction whose caller deadline passed before `phase`.
    async fn abandon(
        &self,
        transaction_id: &str,
        involved: &InvolvedOperators,
        phase: &str,
    ) -> CallError {
        warn!(transaction_id = %transaction_id, phase, "Caller deadline passed, rolling back");
        self.rollback(transaction_id, involved).await;
        CallError::timeout(format!(
            "caller deadline passed before {} of transaction {}",
            phase, transaction_id
        ))
    }

    async fn rollback(&self, transaction_id: &str, involved: &InvolvedOperators) {
        let outcome = broadcast(
            &self.client,
            Control::Rollback,
            transaction_id,
            involved,
            self.config.broadcast_timeout(),
        )
        .await;
        if outcome.failed() > 0 {
            warn!(
                transaction_id = %transaction_id,
                failed = outcome.failed(),
                "Rollback did not reach every operator"
            );
        }
    }

    /// Execute a root call until it commits, fails terminally, runs out of
    /// retries, or the caller's deadline passes.
    ///
    /// The caller's budget covers every attempt together.
    async fn run_transaction(&self, request: &Request) -> Response {
        let original = request.request_id.as_str();
        let caller_deadline = request.budget().map(|budget| Instant::now() + budget);
        let mut current = request.clone();
        let mut retries = 0u32;

        loop {
            let tx = current.transaction_id.clone();
            let (involved, result) = self.attempt(&current, caller_deadline).await;

            let outcome = match result {
                Ok(values) => self
                    .finalize(&tx, &involved, caller_deadline)
                    .await
                    .map(|()| values),
                Err(err) => {
                    self.rollback(&tx, &involved).await;
                    Err(err)
                }
            };

            let err = match outcome {
                Ok(values) => {
                    info!(
                        transaction_id = %tx,
                        request_id = %original,
                        attempt = retries + 1,
                        "Transaction committed"
                    );
                    return request.respond(involved, Ok(values));
                }
                Err(err) if err.is_retryable() => err,
                Err(err) => {
                    debug!(transaction_id = %tx, error = %err, "Transaction failed");
                    return request.respond(involved, Err(err));
                }
            };

            if expired(caller_deadline) {
                warn!(
                    request_id = %original,
                    attempts = retries + 1,
                    error = %err,
                    "Caller deadline passed, not retrying"
                );
                let timeout = CallError::timeout(format!(
                    "deadline passed after {} attempts: {}",
                    retries + 1,
                    err
                ));
                return request.respond(involved, Err(timeout));
            }

            if !self.config.may_retry(retries) {
                warn!(
                    request_id = %original,
                    retries,
                    error = %err,
                    "Retry limit reached"
                );
                let exhausted = CallError::new(
                    ErrorKind::Exhausted,
                    format!("gave up after {} retries: {}", retries, err),
                );
                return request.respond(involved, Err(exhausted));
            }

            retries += 1;
            let retry_id = retry_transaction_id(original, retries, self.config.transaction_id_len);
            warn!(
                transaction_id = %tx,
                retry_transaction_id = %retry_id,
                attempt = retries + 1,
                error = %err,
                "Retrying transaction"
            );
            current.transaction_id = retry_id.clone();
            current.request_id = retry_id;
            tokio::task::yield_now().await;
        }
    }
}

#[async_trait]
impl RequestHandler for Coordinator {
    async fn handle(&self, request: Request) -> Response {
        if let Some(control) = request.as_control() {
            let result = self.control(control, &request).await;
            return request.respond(InvolvedOperators::new(), result.map(|()| Vec::new()));
        }

        let key = request.key();
        if request.trail.contains(&key) {
            warn!(operator = %key, transaction_id = %request.transaction_id, "Re-entrant call");
            return request.respond(
                InvolvedOperators::new(),
                Err(CallError::new(
                    ErrorKind::Reentrant,
                    format!("{} is already executing in this call chain", key),
                )),
            );
        }

        if request.is_root() {
            return self.run_transaction(&request).await;
        }

        debug!(
            transaction_id = %request.transaction_id,
            request_id = %request.request_id,
            operator = %key,
            method = %request.method,
            "Nested call"
        );
        let caller_deadline = request.budget().map(|budget| Instant::now() + budget);
        let (involved, result) = self.attempt(&request, caller_deadline).await;
        request.respond(involved, result)
    }
}

fn earliest(deadline: Instant, other: Option<Instant>) -> Instant {
    other.map_or(deadline, |other| deadline.min(other))
}

fn expired(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|deadline| Instant::now() >= deadline)
}
