//! Call context shared by a call and everything it transitively invokes.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::message::{InvolvedOperators, OperatorKey, Request};

/// Transaction identity and involved-operator accumulator for one call.
///
/// Cloning shares the accumulator: every clone records into the same set.
/// A detached context has no transaction; calls issued from it start one.
#[derive(Debug, Clone)]
pub struct CallContext {
    transaction_id: Option<String>,
    request_id: String,
    involved: Arc<Mutex<InvolvedOperators>>,
    trail: Vec<OperatorKey>,
    deadline: Option<Instant>,
}

impl CallContext {
    /// Context for an external caller outside any transaction.
    pub fn detached() -> Self {
        Self {
            transaction_id: None,
            request_id: String::new(),
            involved: Arc::default(),
            trail: Vec::new(),
            deadline: None,
        }
    }

    /// Context for executing `request`, recording its target as involved.
    pub(crate) fn for_request(request: &Request, deadline: Instant) -> Self {
        let key = request.key();
        let mut involved = InvolvedOperators::new();
        involved.insert(&key);

        let mut trail = request.trail.clone();
        trail.push(key);

        Self {
            transaction_id: Some(request.transaction_id.clone()),
            request_id: request.request_id.clone(),
            involved: Arc::new(Mutex::new(involved)),
            trail,
            deadline: Some(deadline),
        }
    }

    /// Bound every call issued from this context by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn transaction_id(&self) -> Option<&str> {
        self.transaction_id.as_deref()
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Operators executing in the current call chain, outermost first.
    pub fn trail(&self) -> &[OperatorKey] {
        &self.trail
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` if unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn involve(&self, key: &OperatorKey) {
        self.involved.lock().insert(key);
    }

    pub fn merge(&self, other: &InvolvedOperators) {
        self.involved.lock().merge(other);
    }

    /// Snapshot of the operators recorded so far.
    pub fn involved(&self) -> InvolvedOperators {
        self.involved.lock().clone()
    }
}
