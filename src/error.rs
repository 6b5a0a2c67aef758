//! Errors that cross call boundaries.
//!
//! `CallError` is the only error type that travels inside a `Response`, so it
//! is a plain serializable value: a kind used for retry decisions plus a
//! human-readable message. Layer-specific errors (`StoreError`,
//! `TransportError`) convert into it at the boundary.

use serde::{Deserialize, Serialize};

use crate::interfaces::storage::StoreError;
use crate::interfaces::transport::TransportError;

/// Result type for operator calls.
pub type Result<T> = std::result::Result<T, CallError>;

/// Classification of a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Unknown operator type name.
    NotFound,
    /// Optimistic concurrency conflict (outdated snapshot, prepare lost).
    Conflict,
    /// Failure raised by operator business logic.
    Business,
    /// Operator reached again through its own call chain.
    Reentrant,
    /// Deadline expired before a response arrived.
    Timeout,
    /// Transport could not deliver the request.
    Transport,
    /// Commit protocol invariant violated.
    Internal,
    /// Retry limit reached without a successful commit.
    Exhausted,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Business => "business",
            Self::Reentrant => "reentrant",
            Self::Timeout => "timeout",
            Self::Transport => "transport",
            Self::Internal => "internal",
            Self::Exhausted => "exhausted",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by an operator call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct CallError {
    pub kind: ErrorKind,
    pub message: String,
}

impl CallError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Business-logic failure (validation, insufficient funds, ...).
    pub fn business(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Business, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// Prefix the message with context, keeping the kind.
    pub fn context(self, context: impl std::fmt::Display) -> Self {
        Self {
            kind: self.kind,
            message: format!("{}: {}", context, self.message),
        }
    }

    /// Whether the whole transaction should be restarted under a new id.
    ///
    /// Only concurrency conflicts and timeouts qualify. Business errors are
    /// deterministic and would fail again on every retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, ErrorKind::Conflict | ErrorKind::Timeout)
    }
}

impl From<StoreError> for CallError {
    fn from(err: StoreError) -> Self {
        let kind = match &err {
            StoreError::OperatorNotFound { .. } => ErrorKind::NotFound,
            StoreError::OutdatedVersion { .. }
            | StoreError::BaseOutdated { .. }
            | StoreError::AlreadyPrepared { .. } => ErrorKind::Conflict,
            StoreError::NotPreparedByThisTransaction { .. } => ErrorKind::Internal,
        };
        Self::new(kind, err.to_string())
    }
}

impl From<TransportError> for CallError {
    fn from(err: TransportError) -> Self {
        let kind = match &err {
            TransportError::Timeout(_) => ErrorKind::Timeout,
            TransportError::Closed | TransportError::Unroutable(_) => ErrorKind::Transport,
        };
        Self::new(kind, err.to_string())
    }
}

impl From<serde_json::Error> for CallError {
    fn from(err: serde_json::Error) -> Self {
        Self::business(format!("invalid payload: {}", err))
    }
}
