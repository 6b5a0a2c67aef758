use super::*;
use crate::context::CallContext;
use crate::test_utils::{add_request, test_registry, Counter, NullClient};

fn store() -> MemoryStore {
    MemoryStore::new(test_registry())
}

/// Get the snapshot for `tx` and run `Counter.Add(amount)` on it.
async fn add(store: &MemoryStore, id: &str, tx: &str, amount: i64) {
    let key = Counter::key(id);
    let state = store.get(&key, tx).await.unwrap();
    let request = add_request(id, tx, amount);
    let mut operator = state.lock().await;
    operator
        .handle(&CallContext::detached(), &NullClient, &request)
        .await
        .unwrap();
}

async fn committed_value(store: &MemoryStore, id: &str) -> i64 {
    store
        .committed::<Counter>(&Counter::key(id))
        .await
        .map(|c| c.value)
        .unwrap()
}

#[tokio::test]
async fn test_get_prepare_commit_advances_baseline() {
    let store = store();
    let key = Counter::key("a");

    add(&store, "a", "tx1", 5).await;
    assert_eq!(store.committed_version(&key).as_deref(), Some("Counter.a"));
    assert!(store.has_snapshot(&key, "tx1"));

    store.prepare(&key, "tx1").await.unwrap();
    assert_eq!(store.prepared_by(&key).as_deref(), Some("Counter.a.tx1"));

    store.commit(&key, "tx1").await.unwrap();
    assert_eq!(
        store.committed_version(&key).as_deref(),
        Some("Counter.a.tx1")
    );
    assert!(store.prepared_by(&key).is_none());
    assert!(!store.has_snapshot(&key, "tx1"));
    assert_eq!(store.snapshot_count(), 0);
    assert_eq!(committed_value(&store, "a").await, 5);
}

#[tokio::test]
async fn test_snapshot_is_isolated_until_commit() {
    let store = store();
    add(&store, "a", "tx1", 5).await;

    // A second transaction clones the committed state, not tx1's snapshot.
    let other = store.get(&Counter::key("a"), "tx2").await.unwrap();
    assert_eq!(
        other
            .lock()
            .await
            .as_any()
            .downcast_ref::<Counter>()
            .unwrap()
            .value,
        0
    );
    assert_eq!(committed_value(&store, "a").await, 0);
}

#[tokio::test]
async fn test_get_returns_same_snapshot_within_transaction() {
    let store = store();
    let key = Counter::key("a");
    let first = store.get(&key, "tx1").await.unwrap();
    let second = store.get(&key, "tx1").await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn test_prepare_fails_with_base_outdated_after_intervening_commit() {
    let store = store();
    let key = Counter::key("a");

    add(&store, "a", "tx1", 1).await;
    add(&store, "a", "tx2", 2).await;

    store.prepare(&key, "tx1").await.unwrap();
    store.commit(&key, "tx1").await.unwrap();

    let err = store.prepare(&key, "tx2").await.unwrap_err();
    assert!(matches!(err, StoreError::BaseOutdated { .. }));
    assert_eq!(committed_value(&store, "a").await, 1);
}

#[tokio::test]
async fn test_get_fails_with_outdated_version_after_intervening_commit() {
    let store = store();
    let key = Counter::key("a");

    add(&store, "a", "tx1", 1).await;
    add(&store, "a", "tx2", 2).await;
    store.prepare(&key, "tx1").await.unwrap();
    store.commit(&key, "tx1").await.unwrap();

    let err = store.get(&key, "tx2").await.err().unwrap();
    assert!(matches!(err, StoreError::OutdatedVersion { .. }));
}

#[tokio::test]
async fn test_second_prepare_fails_with_already_prepared() {
    let store = store();
    let key = Counter::key("a");

    add(&store, "a", "tx1", 1).await;
    add(&store, "a", "tx2", 1).await;

    store.prepare(&key, "tx1").await.unwrap();
    let err = store.prepare(&key, "tx2").await.unwrap_err();
    assert!(matches!(err, StoreError::AlreadyPrepared { ref holder, .. } if holder == "Counter.a.tx1"));
}

#[tokio::test]
async fn test_concurrent_prepares_have_single_winner() {
    let store = Arc::new(store());
    let key = Counter::key("a");
    let transactions: Vec<String> = (0..16).map(|i| format!("tx{}", i)).collect();

    for tx in &transactions {
        add(&store, "a", tx, 1).await;
    }

    let handles: Vec<_> = transactions
        .iter()
        .cloned()
        .map(|tx| {
            let store = store.clone();
            let key = key.clone();
            tokio::spawn(async move { store.prepare(&key, &tx).await })
        })
        .collect();

    let mut won = 0;
    let mut lost = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => won += 1,
            Err(StoreError::AlreadyPrepared { .. }) => lost += 1,
            Err(other) => panic!("unexpected error: {}", other),
        }
    }
    assert_eq!(won, 1);
    assert_eq!(lost, 15);
}

#[tokio::test]
async fn test_prepare_is_idempotent_for_holder() {
    let store = store();
    let key = Counter::key("a");
    add(&store, "a", "tx1", 1).await;

    store.prepare(&key, "tx1").await.unwrap();
    store.prepare(&key, "tx1").await.unwrap();
    assert_eq!(store.prepared_by(&key).as_deref(), Some("Counter.a.tx1"));
}

#[tokio::test]
async fn test_unchanged_snapshots_prepare_without_claim() {
    let store = store();
    let key = Counter::key("a");

    add(&store, "a", "r1", 0).await;
    add(&store, "a", "r2", 0).await;

    // Readers do not exclude each other.
    store.prepare(&key, "r1").await.unwrap();
    store.prepare(&key, "r2").await.unwrap();
    assert!(store.prepared_by(&key).is_none());

    // Committing a read-only snapshot only drops it.
    store.commit(&key, "r1").await.unwrap();
    store.commit(&key, "r2").await.unwrap();
    assert_eq!(store.snapshot_count(), 0);
    assert_eq!(store.committed_version(&key).as_deref(), Some("Counter.a"));
}

#[tokio::test]
async fn test_unchanged_snapshot_waits_for_pending_commit() {
    let store = store();
    let key = Counter::key("a");

    add(&store, "a", "tx1", 1).await;
    add(&store, "a", "r1", 0).await;

    store.prepare(&key, "tx1").await.unwrap();
    let err = store.prepare(&key, "r1").await.unwrap_err();
    assert!(matches!(err, StoreError::AlreadyPrepared { .. }));

    store.commit(&key, "tx1").await.unwrap();
    assert_eq!(committed_value(&store, "a").await, 1);
}

#[tokio::test]
async fn test_unchanged_snapshot_still_requires_current_base() {
    let store = store();
    let key = Counter::key("a");

    add(&store, "a", "tx1", 1).await;
    add(&store, "a", "tx2", 0).await;
    store.prepare(&key, "tx1").await.unwrap();
    store.commit(&key, "tx1").await.unwrap();

    let err = store.prepare(&key, "tx2").await.unwrap_err();
    assert!(matches!(err, StoreError::BaseOutdated { .. }));
}

#[tokio::test]
async fn test_commit_without_prepare_fails() {
    let store = store();
    let key = Counter::key("a");
    add(&store, "a", "tx1", 1).await;

    let err = store.commit(&key, "tx1").await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::NotPreparedByThisTransaction { holder: None, .. }
    ));
    assert!(store.has_snapshot(&key, "tx1"));
}

#[tokio::test]
async fn test_commit_while_other_holds_claim_fails() {
    let store = store();
    let key = Counter::key("a");
    add(&store, "a", "tx1", 1).await;
    add(&store, "a", "tx2", 1).await;
    store.prepare(&key, "tx1").await.unwrap();

    let err = store.commit(&key, "tx2").await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::NotPreparedByThisTransaction { holder: Some(ref h), .. } if h == "Counter.a.tx1"
    ));
}

#[tokio::test]
async fn test_rollback_releases_claim_and_is_idempotent() {
    let store = store();
    let key = Counter::key("a");
    add(&store, "a", "tx1", 1).await;
    add(&store, "a", "tx2", 2).await;

    store.prepare(&key, "tx1").await.unwrap();
    store.rollback(&key, "tx1").await.unwrap();
    store.rollback(&key, "tx1").await.unwrap();

    assert!(store.prepared_by(&key).is_none());
    assert!(!store.has_snapshot(&key, "tx1"));

    store.prepare(&key, "tx2").await.unwrap();
    store.commit(&key, "tx2").await.unwrap();
    assert_eq!(committed_value(&store, "a").await, 2);
}

#[tokio::test]
async fn test_rollback_of_unknown_operator_succeeds() {
    let store = store();
    store
        .rollback(&Counter::key("never-seen"), "tx1")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_untouched_operator_prepares_and_commits_as_noop() {
    let store = store();
    let key = Counter::key("a");
    store.prepare(&key, "tx1").await.unwrap();
    store.commit(&key, "tx1").await.unwrap();
    assert!(store.committed_version(&key).is_none());
}

#[tokio::test]
async fn test_unknown_type_is_not_found() {
    let store = store();
    let err = store
        .get(&OperatorKey::new("Missing", "a"), "tx1")
        .await
        .err()
        .unwrap();
    assert!(matches!(err, StoreError::OperatorNotFound { ref type_name } if type_name == "Missing"));
}

#[tokio::test]
async fn test_serial_commits_accumulate() {
    let store = store();
    let key = Counter::key("a");
    for i in 0..5 {
        let tx = format!("tx{}", i);
        add(&store, "a", &tx, 2).await;
        store.prepare(&key, &tx).await.unwrap();
        store.commit(&key, &tx).await.unwrap();
    }
    assert_eq!(committed_value(&store, "a").await, 10);
    assert_eq!(store.committed_version(&key).as_deref(), Some("Counter.a.tx4"));
}

#[tokio::test]
async fn test_claim_without_snapshot_is_released() {
    let store = store();
    let key = Counter::key("a");
    add(&store, "a", "tx1", 1).await;
    store.prepare(&key, "tx1").await.unwrap();

    // Rollback dropped the snapshot after prepare read it, then saw no claim.
    store.snapshots.remove("Counter.a.tx1");
    assert!(!store.keep_claim("Counter.a", "Counter.a.tx1"));
    assert!(store.prepared_by(&key).is_none());

    add(&store, "a", "tx2", 2).await;
    store.prepare(&key, "tx2").await.unwrap();
    store.commit(&key, "tx2").await.unwrap();
    assert_eq!(committed_value(&store, "a").await, 2);
}

#[tokio::test]
async fn test_claim_with_snapshot_is_kept() {
    let store = store();
    let key = Counter::key("a");
    add(&store, "a", "tx1", 1).await;
    store.prepare(&key, "tx1").await.unwrap();

    assert!(store.keep_claim("Counter.a", "Counter.a.tx1"));
    assert_eq!(store.prepared_by(&key).as_deref(), Some("Counter.a.tx1"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_prepare_and_rollback_leave_no_claim() {
    let store = Arc::new(store());

    for round in 0..200 {
        let id = format!("k{}", round % 8);
        let tx = format!("tx{}", round);
        let key = Counter::key(&id);
        add(&store, &id, &tx, 1).await;

        let prepare = {
            let (store, key, tx) = (store.clone(), key.clone(), tx.clone());
            tokio::spawn(async move { store.prepare(&key, &tx).await })
        };
        let rollback = {
            let (store, key, tx) = (store.clone(), key.clone(), tx.clone());
            tokio::spawn(async move { store.rollback(&key, &tx).await })
        };
        rollback.await.unwrap().unwrap();
        prepare.await.unwrap().unwrap();

        // Whichever ran second, the slot is free once both are done.
        assert!(store.prepared_by(&key).is_none(), "round {}", round);
    }
    assert_eq!(store.snapshot_count(), 0);
}
