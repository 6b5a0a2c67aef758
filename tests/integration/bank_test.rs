//! Randomized transfer load across partitions.

use std::collections::HashMap;

use rand::Rng;

use operant::bank::{AccountProxy, INITIAL_BALANCE};
use operant::test_utils::test_runtime;
use operant::{CallContext, ErrorKind, OperatorClientExt};

const ACCOUNTS: usize = 8;

fn account_ids() -> Vec<String> {
    (0..ACCOUNTS).map(|i| format!("user{}", i)).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_random_transfers_conserve_total_balance() {
    let runtime = test_runtime(4).await;
    let client = runtime.client();
    let ids = account_ids();

    let plan: Vec<(usize, usize, i64)> = {
        let mut rng = rand::rng();
        (0..100)
            .map(|_| {
                let from = rng.random_range(0..ACCOUNTS);
                let to = (from + rng.random_range(1..ACCOUNTS)) % ACCOUNTS;
                (from, to, rng.random_range(1..=4))
            })
            .collect()
    };

    let tasks: Vec<_> = plan
        .into_iter()
        .map(|(from, to, amount)| {
            let client = client.clone();
            let from = ids[from].clone();
            let to = ids[to].clone();
            tokio::spawn(async move {
                let ctx = CallContext::detached();
                let from: AccountProxy = client.find(&from).unwrap();
                let to: AccountProxy = client.find(&to).unwrap();
                from.transfer_balance(&ctx, &client, &to, amount).await
            })
        })
        .collect();

    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => {}
            Err(e) => assert_eq!(e.kind, ErrorKind::Business, "{}", e),
        }
    }

    let ctx = CallContext::detached();
    let mut total = 0;
    for id in &ids {
        let account: AccountProxy = client.find(id).unwrap();
        let balance = account.balance(&ctx, &client).await.unwrap();
        assert!(balance >= 0, "{} went negative: {}", id, balance);
        total += balance;
    }
    assert_eq!(total, INITIAL_BALANCE * ACCOUNTS as i64);
    assert_eq!(runtime.snapshot_count(), 0);

    runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_round_trip_transfers_restore_every_balance() {
    let runtime = test_runtime(2).await;
    let client = runtime.client();
    let ids = account_ids();

    let pairs: Vec<(String, String)> = {
        let mut rng = rand::rng();
        (0..40)
            .map(|_| {
                let a = rng.random_range(0..ACCOUNTS);
                let b = (a + rng.random_range(1..ACCOUNTS)) % ACCOUNTS;
                (ids[a].clone(), ids[b].clone())
            })
            .collect()
    };

    // Each task sends 1 and gets 1 back, so every balance ends where it began.
    let tasks: Vec<_> = pairs
        .into_iter()
        .map(|(a, b)| {
            let client = client.clone();
            tokio::spawn(async move {
                let ctx = CallContext::detached();
                let a: AccountProxy = client.find(&a).unwrap();
                let b: AccountProxy = client.find(&b).unwrap();
                loop {
                    match a.transfer_balance(&ctx, &client, &b, 1).await {
                        Ok(_) => break,
                        Err(e) if e.kind == ErrorKind::Business => tokio::task::yield_now().await,
                        Err(e) => panic!("{}", e),
                    }
                }
                loop {
                    match b.transfer_balance(&ctx, &client, &a, 1).await {
                        Ok(_) => break,
                        Err(e) if e.kind == ErrorKind::Business => tokio::task::yield_now().await,
                        Err(e) => panic!("{}", e),
                    }
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    let ctx = CallContext::detached();
    let mut balances = HashMap::new();
    for id in &ids {
        let account: AccountProxy = client.find(id).unwrap();
        balances.insert(id.clone(), account.balance(&ctx, &client).await.unwrap());
    }
    assert!(
        balances.values().all(|b| *b == INITIAL_BALANCE),
        "{:?}",
        balances
    );

    runtime.shutdown().await;
}
