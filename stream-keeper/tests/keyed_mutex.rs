//! Per-key mutual exclusion across tasks.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use stream_keeper::sync::KeyedMutex;

#[tokio::test]
async fn test_distinct_keys_never_block_each_other() {
    let locks = Arc::new(KeyedMutex::new());
    let _a = locks.acquire("a").await;

    let other = {
        let locks = locks.clone();
        tokio::spawn(async move {
            let guard = locks.acquire("b").await;
            guard.key().to_string()
        })
    };
    let key = tokio::time::timeout(Duration::from_secs(1), other)
        .await
        .expect("acquiring another key must not wait")
        .unwrap();
    assert_eq!(key, "b");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_key_is_strictly_serialized() {
    let locks = Arc::new(KeyedMutex::new());
    let holders = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..24 {
        let locks = locks.clone();
        let holders = holders.clone();
        let max_seen = max_seen.clone();
        tasks.push(tokio::spawn(async move {
            let _guard = locks.acquire("source").await;
            let now = holders.fetch_add(1, Ordering::SeqCst) + 1;
            max_seen.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(2)).await;
            holders.fetch_sub(1, Ordering::SeqCst);
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    assert_eq!(locks.len(), 1);
    assert!(!locks.is_held("source"));
}

#[tokio::test]
async fn test_release_on_every_exit_path() {
    let locks = Arc::new(KeyedMutex::new());

    let failing = {
        let locks = locks.clone();
        tokio::spawn(async move {
            let _guard = locks.acquire("x").await;
            panic!("supervisor blew up while holding the lock");
        })
    };
    assert!(failing.await.is_err());

    tokio::time::timeout(Duration::from_secs(1), locks.acquire("x"))
        .await
        .expect("lock must be released after a panic");
}
