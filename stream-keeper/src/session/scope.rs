//! Structured cancellation: one token, a tracker of the tasks started under it.

use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// A cancellation scope that knows which tasks it started.
///
/// Once cancelled the scope refuses new tasks, and [`TaskScope::cancel_and_join`]
/// only returns after every task spawned in it has finished.
#[derive(Debug, Clone)]
pub struct TaskScope {
    token: CancellationToken,
    tracker: TaskTracker,
}

impl TaskScope {
    /// A root scope.
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    /// A scope that is also cancelled when `parent` is.
    pub fn child_of(parent: &CancellationToken) -> Self {
        Self::with_token(parent.child_token())
    }

    fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            tracker: TaskTracker::new(),
        }
    }

    /// The scope's token, for tasks to watch.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Number of spawned tasks that have not finished yet.
    pub fn active(&self) -> usize {
        self.tracker.len()
    }

    /// Spawn `task` in this scope. Returns `None` once the scope is cancelled.
    pub fn spawn<F>(&self, task: F) -> Option<JoinHandle<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        if self.token.is_cancelled() || self.tracker.is_closed() {
            return None;
        }
        Some(self.tracker.spawn(task))
    }

    /// Cancel the scope.
    pub fn cancel(&self) {
        self.token.cancel();
        self.tracker.close();
    }

    /// Cancel the scope and wait for every task spawned in it.
    pub async fn cancel_and_join(&self) {
        self.cancel();
        self.tracker.wait().await;
    }
}

impl Default for TaskScope {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_and_join_waits_for_children() {
        let scope = TaskScope::new();
        let finished = Arc::new(AtomicBool::new(false));

        let token = scope.token().clone();
        let flag = finished.clone();
        scope
            .spawn(async move {
                token.cancelled().await;
                // Simulate a flush after observing cancellation.
                tokio::time::sleep(Duration::from_millis(20)).await;
                flag.store(true, Ordering::SeqCst);
            })
            .unwrap();

        assert_eq!(scope.active(), 1);
        scope.cancel_and_join().await;
        assert!(finished.load(Ordering::SeqCst));
        assert_eq!(scope.active(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_scope_refuses_spawn() {
        let scope = TaskScope::new();
        scope.cancel();
        assert!(scope.spawn(async {}).is_none());
    }

    #[tokio::test]
    async fn test_child_scope_follows_parent() {
        let parent = CancellationToken::new();
        let scope = TaskScope::child_of(&parent);
        parent.cancel();
        assert!(scope.is_cancelled());
        assert!(scope.spawn(async {}).is_none());
    }
}
