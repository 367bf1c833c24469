//! Contract tests run against every `RunStateStore` implementation.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use ghsum_state::fakes::MemoryRunStateStore;
use ghsum_state::{JsonRunStateStore, RunStateStore, StateError};

fn ts(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 2, day, 12, 0, 0).unwrap()
}

async fn check_get_after_set(store: &dyn RunStateStore) {
    assert_eq!(store.get("octo/one").await.unwrap(), None);
    store.set("octo/one", ts(1)).await.unwrap();
    assert_eq!(store.get("octo/one").await.unwrap(), Some(ts(1)));
    store.set("octo/one", ts(2)).await.unwrap();
    assert_eq!(store.get("octo/one").await.unwrap(), Some(ts(2)));
}

async fn check_set_many(store: &dyn RunStateStore) {
    store
        .set_many(&[("octo/a".to_string(), ts(3)), ("octo/b".to_string(), ts(4))])
        .await
        .unwrap();
    let snap = store.snapshot().await.unwrap();
    assert_eq!(snap.get("octo/a"), Some(&ts(3)));
    assert_eq!(snap.get("octo/b"), Some(&ts(4)));
}

async fn check_disjoint_concurrent_writes(store: Arc<dyn RunStateStore>) {
    let mut set = tokio::task::JoinSet::new();
    for i in 0..10u32 {
        let store = Arc::clone(&store);
        set.spawn(async move { store.set(&format!("fleet/r{i}"), ts(i + 1)).await });
    }
    while let Some(res) = set.join_next().await {
        res.unwrap().unwrap();
    }
    let snap = store.snapshot().await.unwrap();
    for i in 0..10u32 {
        assert_eq!(snap.get(&format!("fleet/r{i}")), Some(&ts(i + 1)));
    }
}

#[tokio::test]
async fn memory_store_contract() {
    check_get_after_set(&MemoryRunStateStore::new()).await;
    check_set_many(&MemoryRunStateStore::new()).await;
    check_disjoint_concurrent_writes(Arc::new(MemoryRunStateStore::new())).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn json_store_contract() {
    let dir = tempfile::tempdir().unwrap();
    check_get_after_set(&JsonRunStateStore::new(dir.path().join("a.json"))).await;
    check_set_many(&JsonRunStateStore::new(dir.path().join("b.json"))).await;
    check_disjoint_concurrent_writes(Arc::new(JsonRunStateStore::new(dir.path().join("c.json"))))
        .await;
}

#[tokio::test]
async fn json_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("log").join("last_run_times.json");
    JsonRunStateStore::new(&path).set("octo/one", ts(5)).await.unwrap();

    let reopened = JsonRunStateStore::new(&path);
    assert_eq!(reopened.get("octo/one").await.unwrap(), Some(ts(5)));
}

#[tokio::test]
async fn memory_store_rejection_leaves_state_untouched() {
    let store = MemoryRunStateStore::new().with_entry("octo/one", ts(1));
    store.reject_writes_for("octo/one");

    let err = store.set("octo/one", ts(9)).await.unwrap_err();
    assert!(matches!(err, StateError::WriteRejected(_)));
    assert_eq!(store.peek("octo/one"), Some(ts(1)));
    assert_eq!(store.set_calls(), 1);

    store.set("octo/two", ts(2)).await.unwrap();
    assert_eq!(store.peek("octo/two"), Some(ts(2)));
}
