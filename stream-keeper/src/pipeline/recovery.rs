//! Startup sweep for captures that never got converted.
//!
//! Captures left behind by a crash or by a shutdown that discarded queued
//! jobs are re-queued from here.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::job::ConversionJob;
use super::retry_queue::RetryQueue;
use crate::Result;
use crate::utils::fs::find_files_with_extension;
use crate::utils::output::CAPTURE_EXTENSION;

/// List leftover raw captures under `root`.
///
/// Must run before any session starts, or a capture in progress would be
/// picked up as leftover.
pub async fn find_pending(root: &Path) -> Result<Vec<PathBuf>> {
    find_files_with_extension(root, CAPTURE_EXTENSION).await
}

/// Submit previously found captures. Returns the number of jobs submitted.
pub async fn submit_pending(pending: Vec<PathBuf>, queue: &RetryQueue) -> usize {
    if pending.is_empty() {
        return 0;
    }
    info!(count = pending.len(), "Re-queueing unconverted captures");

    let mut submitted = 0;
    for path in pending {
        match queue.submit(ConversionJob::new(path.clone())).await {
            Ok(()) => submitted += 1,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to re-queue capture");
                break;
            }
        }
    }
    submitted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::RetryQueueConfig;

    #[tokio::test]
    async fn test_sweep_submits_only_captures() {
        let tmp = tempfile::tempdir().unwrap();
        let folder = tmp.path().join("foo");
        std::fs::create_dir_all(&folder).unwrap();
        std::fs::write(folder.join("a.ts"), b"").unwrap();
        std::fs::write(folder.join("b.ts"), b"").unwrap();
        std::fs::write(folder.join("b.webm"), b"").unwrap();
        std::fs::write(folder.join("c.ts.bak"), b"").unwrap();

        let queue = RetryQueue::with_config(RetryQueueConfig {
            capacity: 10,
            workers: 1,
            max_attempts: 5,
        });
        let pending = find_pending(tmp.path()).await.unwrap();
        assert_eq!(pending.len(), 2);
        let submitted = submit_pending(pending, &queue).await;

        assert_eq!(submitted, 2);
        assert_eq!(queue.admitted(), 2);
    }

    #[tokio::test]
    async fn test_submit_pending_stops_at_closed_queue() {
        let queue = RetryQueue::with_config(RetryQueueConfig {
            capacity: 10,
            workers: 1,
            max_attempts: 5,
        });
        queue.stop().await;

        let pending = vec![PathBuf::from("/srv/a.ts"), PathBuf::from("/srv/b.ts")];
        assert_eq!(submit_pending(pending, &queue).await, 0);
    }

    #[tokio::test]
    async fn test_find_pending_missing_root_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(find_pending(&tmp.path().join("missing")).await.is_err());
    }
}
