//! Abstract interfaces for operant components.
//!
//! These traits define the contracts for:
//! - Operators (opaque business logic behind an operator key)
//! - Operator clients (nested and external calls)
//! - Versioned storage (snapshot isolation, prepare/commit/rollback)
//! - Transport (request publishing and handling)

pub mod operator;
pub mod storage;
pub mod transport;

pub use operator::{
    Operator, OperatorClient, OperatorClientExt, OperatorFactory, OperatorRef, OperatorState,
    Proxy,
};
pub use storage::{SharedOperator, Storage, StoreError};
pub use transport::{Publisher, RequestHandler, TransportError};
