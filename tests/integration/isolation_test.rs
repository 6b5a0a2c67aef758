//! Snapshot isolation and atomic multi-operator commit.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use operant::message::OperatorKey;
use operant::storage::{MemoryStore, Storage};
use operant::test_utils::{json_args, test_registry, test_runtime, Counter, COUNTER_TYPE};
use operant::{CallContext, CallError, Operator, OperatorClient, Request, RuntimeBuilder};

/// Moves one unit from `a` to `b` with a pause between the two writes.
#[derive(Debug, Clone, PartialEq)]
struct SlowMover;

#[async_trait]
impl Operator for SlowMover {
    async fn handle(
        &mut self,
        ctx: &CallContext,
        client: &dyn OperatorClient,
        _request: &Request,
    ) -> operant::Result<Vec<u8>> {
        let a = client.resolve(COUNTER_TYPE, "a")?;
        let b = client.resolve(COUNTER_TYPE, "b")?;
        let _: i64 = a.call(ctx, client, "Add", &-1i64).await?;
        tokio::time::sleep(Duration::from_millis(20)).await;
        let _: i64 = b.call(ctx, client, "Add", &1i64).await?;
        Ok(Vec::new())
    }
}

/// Reads `a` and `b` inside a transaction and returns their sum.
#[derive(Debug, Clone, PartialEq)]
struct Auditor;

#[async_trait]
impl Operator for Auditor {
    async fn handle(
        &mut self,
        ctx: &CallContext,
        client: &dyn OperatorClient,
        _request: &Request,
    ) -> operant::Result<Vec<u8>> {
        let a: i64 = client
            .resolve(COUNTER_TYPE, "a")?
            .call(ctx, client, "Get", &())
            .await?;
        let b: i64 = client
            .resolve(COUNTER_TYPE, "b")?
            .call(ctx, client, "Get", &())
            .await?;
        Ok(serde_json::to_vec(&(a + b))?)
    }
}

async fn committed_value(store: &MemoryStore, id: &str) -> i64 {
    store
        .committed::<Counter>(&Counter::key(id))
        .await
        .map(|c| c.value)
        .unwrap_or_default()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reader_never_sees_half_a_transfer() {
    let mut registry = test_registry();
    registry
        .register("Mover", |_| Box::new(SlowMover))
        .register("Auditor", |_| Box::new(Auditor));
    let runtime = RuntimeBuilder::new()
        .with_registry(registry)
        .with_config(operant::config::Config::for_test())
        .max_retries(None)
        .build()
        .await
        .unwrap();
    let client = runtime.client();

    let movers: Vec<_> = (0..10)
        .map(|i| {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .invoke(Request::call("Mover", format!("m{}", i), "Move", Vec::new()))
                    .await
            })
        })
        .collect();

    let auditor = {
        let client = client.clone();
        tokio::spawn(async move {
            for i in 0..20 {
                let sum = client
                    .invoke(Request::call("Auditor", format!("q{}", i), "Audit", Vec::new()))
                    .await
                    .unwrap();
                assert_eq!(sum, b"0");
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
    };

    for mover in movers {
        mover.await.unwrap().unwrap();
    }
    auditor.await.unwrap();

    let store = runtime.store(0).unwrap();
    assert_eq!(committed_value(store, "a").await, -10);
    assert_eq!(committed_value(store, "b").await, 10);
    assert_eq!(runtime.snapshot_count(), 0);
    runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_writers_apply_every_update() {
    let runtime = test_runtime(1).await;
    let client = runtime.client();

    let writers: Vec<_> = (1..=25)
        .map(|amount| {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .invoke(Request::call(COUNTER_TYPE, "shared", "Add", json_args(&amount)))
                    .await
            })
        })
        .collect();
    for writer in writers {
        writer.await.unwrap().unwrap();
    }

    let committed = runtime
        .committed::<Counter>(&Counter::key("shared"))
        .await
        .map(|c| c.value);
    assert_eq!(committed, Some((1..=25).sum::<i64>()));
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_failed_call_leaves_no_trace() {
    let runtime = test_runtime(2).await;
    let client = runtime.client();

    let err: CallError = client
        .invoke(Request::call(COUNTER_TYPE, "x", "Fail", json_args(&9)))
        .await
        .unwrap_err();
    assert_eq!(err.kind, operant::ErrorKind::Business);

    let key = OperatorKey::new(COUNTER_TYPE, "x");
    let store = runtime.store_for(&key).unwrap();
    assert!(store.prepared_by(&key).is_none());
    assert_eq!(runtime.snapshot_count(), 0);
    assert_eq!(
        runtime.committed::<Counter>(&key).await.map(|c| c.value),
        Some(0)
    );

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_store_rejects_stale_snapshot_directly() {
    let store = Arc::new(MemoryStore::new(test_registry()));
    let key = Counter::key("a");

    let _first = store.get(&key, "t1").await.unwrap();
    let _second = store.get(&key, "t2").await.unwrap();
    {
        let state = store.get(&key, "t1").await.unwrap();
        let mut counter = state.lock().await;
        counter
            .handle(
                &CallContext::detached(),
                &operant::test_utils::NullClient,
                &operant::test_utils::add_request("a", "t1", 1),
            )
            .await
            .unwrap();
    }
    store.prepare(&key, "t1").await.unwrap();
    store.commit(&key, "t1").await.unwrap();

    assert!(store.get(&key, "t2").await.is_err());
    store.rollback(&key, "t2").await.unwrap();
    store.rollback(&key, "t2").await.unwrap();
    assert_eq!(store.snapshot_count(), 0);
}
