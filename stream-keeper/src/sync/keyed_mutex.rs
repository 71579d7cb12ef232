//! Mutual exclusion keyed by an arbitrary string.
//!
//! Locks are created lazily on first use and kept for the life of the
//! process. The key space is the set of configured sources, so the table
//! stays small.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

/// A table of async mutexes, one per key.
///
/// Acquiring different keys never contends beyond the table's shard lock,
/// which is only held for the get-or-create step and never across an await.
#[derive(Debug, Default)]
pub struct KeyedMutex {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

/// Exclusive hold on one key. Dropping the guard releases the key.
#[derive(Debug)]
pub struct KeyedGuard {
    key: String,
    _guard: OwnedMutexGuard<()>,
}

impl KeyedGuard {
    /// The key this guard holds.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        trace!(key = %self.key, "Released keyed lock");
    }
}

impl KeyedMutex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until the caller is the exclusive holder of `key`.
    ///
    /// The returned guard releases the key on drop, on every exit path.
    /// Cancel-safe: dropping the future before it resolves acquires nothing.
    pub async fn acquire(&self, key: &str) -> KeyedGuard {
        let lock = self.lock_for(key);
        let guard = lock.lock_owned().await;
        trace!(key = %key, "Acquired keyed lock");
        KeyedGuard {
            key: key.to_string(),
            _guard: guard,
        }
    }

    /// Take `key` only if nobody holds it right now.
    pub fn try_acquire(&self, key: &str) -> Option<KeyedGuard> {
        let lock = self.lock_for(key);
        lock.try_lock_owned().ok().map(|guard| KeyedGuard {
            key: key.to_string(),
            _guard: guard,
        })
    }

    /// Whether some task currently holds `key`.
    pub fn is_held(&self, key: &str) -> bool {
        self.locks
            .get(key)
            .is_some_and(|lock| lock.try_lock().is_err())
    }

    /// Number of keys ever seen.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Get-or-create the lock for `key`.
    ///
    /// The fast path only takes a shard read lock; creation goes through the
    /// entry API so two racing callers always end up with the same lock.
    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.get(key) {
            return lock.clone();
        }
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_distinct_keys_do_not_block() {
        let locks = KeyedMutex::new();
        let _a = locks.acquire("a").await;

        let b = tokio::time::timeout(Duration::from_millis(100), locks.acquire("b")).await;
        assert!(b.is_ok(), "acquiring a different key must not block");
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks = KeyedMutex::new();
        let guard = locks.acquire("a").await;

        assert!(locks.try_acquire("a").is_none());
        assert!(locks.is_held("a"));

        drop(guard);
        assert!(!locks.is_held("a"));
        assert!(locks.try_acquire("a").is_some());
    }

    #[tokio::test]
    async fn test_guard_reports_key() {
        let locks = KeyedMutex::new();
        let guard = locks.acquire("twitch").await;
        assert_eq!(guard.key(), "twitch");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_holders_are_serialized() {
        let locks = Arc::new(KeyedMutex::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_inside = max_inside.clone();
            tasks.push(tokio::spawn(async move {
                let _guard = locks.acquire("shared").await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert_eq!(locks.len(), 1);
    }

    #[tokio::test]
    async fn test_dropped_acquire_future_takes_nothing() {
        let locks = KeyedMutex::new();
        let guard = locks.acquire("a").await;

        let waited = tokio::time::timeout(Duration::from_millis(20), locks.acquire("a")).await;
        assert!(waited.is_err());

        drop(guard);
        assert!(locks.try_acquire("a").is_some());
    }
}
