//! Operant - transactional stateful operators.
//!
//! Callers invoke methods on named, stateful operators as if they were local
//! objects. Execution happens behind an async request bus; every call runs
//! against copy-on-write snapshots and commits atomically across all
//! operators it touched, retrying under a fresh transaction id on conflict.

pub mod bank;
pub mod bus;
pub mod client;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod interfaces;
pub mod message;
pub mod registry;
pub mod runtime;
pub mod storage;
pub mod utils;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use client::Client;
pub use context::CallContext;
pub use error::{CallError, ErrorKind, Result};
pub use interfaces::operator::{Operator, OperatorClient, OperatorClientExt, OperatorRef, Proxy};
pub use message::{OperatorKey, Request, Response};
pub use registry::OperatorRegistry;
pub use runtime::{Runtime, RuntimeBuilder};
