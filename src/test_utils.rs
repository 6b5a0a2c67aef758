//! Test utilities and fixture operators.
//!
//! This module provides small operators and helpers for exercising the
//! store, coordinator and runtime without a real business domain.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::bank::{Account, ACCOUNT_TYPE};
use crate::config::Config;
use crate::context::CallContext;
use crate::error::{CallError, ErrorKind, Result};
use crate::interfaces::operator::{Operator, OperatorClient, OperatorRef};
use crate::message::{OperatorKey, Request};
use crate::registry::OperatorRegistry;
use crate::runtime::{Runtime, RuntimeBuilder};

/// Type name of the `Counter` fixture operator.
pub const COUNTER_TYPE: &str = "Counter";

/// Arguments for `Counter.Chain`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChainArgs {
    /// Counters to call next, in order. The first one receives the rest.
    pub path: Vec<String>,
    pub amount: i64,
}

/// Integer counter operator.
///
/// Methods (JSON args):
/// - `Add(i64)` adds and returns the new value
/// - `Get` returns the value
/// - `Fail(i64)` adds, then fails with a business error
/// - `Chain(ChainArgs)` adds, then forwards the rest of the path
/// - `Slow(u64)` sleeps for the given milliseconds, then adds 1
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Counter {
    pub id: String,
    pub value: i64,
}

impl Counter {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            value: 0,
        }
    }

    pub fn key(id: &str) -> OperatorKey {
        OperatorKey::new(COUNTER_TYPE, id)
    }
}

#[async_trait]
impl Operator for Counter {
    async fn handle(
        &mut self,
        ctx: &CallContext,
        client: &dyn OperatorClient,
        request: &Request,
    ) -> Result<Vec<u8>> {
        match request.method.as_str() {
            "Add" => {
                let amount: i64 = serde_json::from_slice(&request.args)?;
                self.value += amount;
            }
            "Get" => {}
            "Fail" => {
                let amount: i64 = serde_json::from_slice(&request.args)?;
                self.value += amount;
                return Err(CallError::business(format!("counter {} refused", self.id)));
            }
            "Chain" => {
                let args: ChainArgs = serde_json::from_slice(&request.args)?;
                self.value += args.amount;
                if let Some((next, rest)) = args.path.split_first() {
                    let target: OperatorRef = client.resolve(COUNTER_TYPE, next)?;
                    let forwarded = ChainArgs {
                        path: rest.to_vec(),
                        amount: args.amount,
                    };
                    let _: i64 = target.call(ctx, client, "Chain", &forwarded).await?;
                }
            }
            "Slow" => {
                let millis: u64 = serde_json::from_slice(&request.args)?;
                tokio::time::sleep(Duration::from_millis(millis)).await;
                self.value += 1;
            }
            other => {
                return Err(CallError::business(format!("unknown method {}", other)));
            }
        }
        Ok(serde_json::to_vec(&self.value)?)
    }
}

/// Client for tests that drive an operator directly; every call fails.
pub struct NullClient;

#[async_trait]
impl OperatorClient for NullClient {
    async fn call(&self, _ctx: &CallContext, request: Request) -> Result<Vec<u8>> {
        Err(CallError::new(
            ErrorKind::Transport,
            format!("no transport for {}", request),
        ))
    }

    fn resolve(&self, type_name: &str, instance_id: &str) -> Result<OperatorRef> {
        Ok(OperatorRef::new(OperatorKey::new(type_name, instance_id)))
    }
}

/// Registry with the fixture operators and the bank account.
pub fn test_registry() -> OperatorRegistry {
    let mut registry = OperatorRegistry::new();
    registry
        .register(COUNTER_TYPE, |id| Box::new(Counter::new(id)))
        .register(ACCOUNT_TYPE, |id| Box::new(Account::new(id)));
    registry
}

/// In-process runtime over `test_registry` with short timeouts.
pub async fn test_runtime(partitions: usize) -> Runtime {
    let mut config = Config::for_test();
    config.transport.partitions = partitions;
    match RuntimeBuilder::new()
        .with_registry(test_registry())
        .with_config(config)
        .build()
        .await
    {
        Ok(runtime) => runtime,
        Err(e) => panic!("test runtime failed to build: {}", e),
    }
}

/// Build a `Counter.Add` request inside `transaction_id`.
pub fn add_request(id: &str, transaction_id: &str, amount: i64) -> Request {
    Request {
        transaction_id: transaction_id.to_string(),
        request_id: transaction_id.to_string(),
        type_name: COUNTER_TYPE.to_string(),
        instance_id: id.to_string(),
        method: "Add".to_string(),
        args: amount.to_string().into_bytes(),
        ..Default::default()
    }
}

/// Encode `value` as JSON call arguments.
pub fn json_args<T: Serialize>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).unwrap_or_default()
}
