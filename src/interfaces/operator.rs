//! Operator and client interfaces.
//!
//! Operators hold the business logic behind an operator key. The runtime
//! never looks inside them: it only clones them into transaction-local
//! snapshots, compares snapshots against the committed baseline, and invokes
//! `handle`.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::CallContext;
use crate::error::{CallError, Result};
use crate::message::{OperatorKey, Request};

/// Deep copy and structural equality for operator state.
///
/// Implemented automatically for every `Operator` that is `Clone + PartialEq`.
pub trait OperatorState: Send + Sync + 'static {
    /// Deep copy into a new transaction-local snapshot.
    fn clone_state(&self) -> Box<dyn Operator>;

    /// Whether `other` holds exactly the same state.
    fn same_state(&self, other: &dyn Operator) -> bool;

    fn as_any(&self) -> &dyn Any;
}

impl<T> OperatorState for T
where
    T: Operator + Clone + PartialEq + Send + Sync + 'static,
{
    fn clone_state(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }

    fn same_state(&self, other: &dyn Operator) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| other == self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Business logic for one operator instance.
///
/// `handle` runs against a transaction-local snapshot; mutations become
/// visible to other transactions only after the commit protocol succeeds.
/// Nested calls go through `client` with the same `ctx` so they join the
/// transaction.
///
/// # Example
///
/// ```ignore
/// #[derive(Clone, PartialEq)]
/// struct Counter { value: i64 }
///
/// #[async_trait]
/// impl Operator for Counter {
///     async fn handle(&mut self, _ctx: &CallContext, _client: &dyn OperatorClient, request: &Request) -> Result<Vec<u8>> {
///         self.value += 1;
///         Ok(serde_json::to_vec(&self.value)?)
///     }
/// }
/// ```
#[async_trait]
pub trait Operator: OperatorState {
    async fn handle(
        &mut self,
        ctx: &CallContext,
        client: &dyn OperatorClient,
        request: &Request,
    ) -> Result<Vec<u8>>;
}

/// Constructs the default state of an operator instance.
pub type OperatorFactory = Arc<dyn Fn(&str) -> Box<dyn Operator> + Send + Sync>;

/// Outbound calls to other operators.
#[async_trait]
pub trait OperatorClient: Send + Sync {
    /// Invoke a business method and wait for its result.
    ///
    /// Calls from a transactional context join that transaction; calls from a
    /// detached context start a new one and return after it committed.
    async fn call(&self, ctx: &CallContext, request: Request) -> Result<Vec<u8>>;

    /// Resolve an operator reference, failing if the type is unknown.
    fn resolve(&self, type_name: &str, instance_id: &str) -> Result<OperatorRef>;
}

/// Untyped handle to a resolved operator instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperatorRef {
    key: OperatorKey,
}

impl OperatorRef {
    pub(crate) fn new(key: OperatorKey) -> Self {
        Self { key }
    }

    pub fn key(&self) -> &OperatorKey {
        &self.key
    }

    pub fn id(&self) -> &str {
        &self.key.instance_id
    }

    /// Invoke `method` with JSON-encoded `args`, decoding the JSON result.
    pub async fn call<A, R>(
        &self,
        ctx: &CallContext,
        client: &dyn OperatorClient,
        method: &str,
        args: &A,
    ) -> Result<R>
    where
        A: serde::Serialize + Sync,
        R: serde::de::DeserializeOwned,
    {
        let args = serde_json::to_vec(args)?;
        let request = Request::call(
            self.key.type_name.clone(),
            self.key.instance_id.clone(),
            method,
            args,
        );
        let values = client.call(ctx, request).await?;
        if values.is_empty() {
            return serde_json::from_slice(b"null").map_err(CallError::from);
        }
        Ok(serde_json::from_slice(&values)?)
    }
}

/// Typed client-side handle for an operator type.
pub trait Proxy: Sized {
    /// Registered type name of the operator behind this proxy.
    const TYPE_NAME: &'static str;

    fn bind(target: OperatorRef) -> Self;
}

/// Typed lookup on top of `OperatorClient::resolve`.
pub trait OperatorClientExt {
    fn find<P: Proxy>(&self, instance_id: &str) -> Result<P>;
}

impl<C: OperatorClient + ?Sized> OperatorClientExt for C {
    fn find<P: Proxy>(&self, instance_id: &str) -> Result<P> {
        self.resolve(P::TYPE_NAME, instance_id).map(P::bind)
    }
}
