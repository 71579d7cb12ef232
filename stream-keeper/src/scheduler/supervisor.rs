//! The per-source polling loop.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::SourceTarget;
use crate::pipeline::{ConversionJob, RetryQueue};
use crate::session::{Session, SessionEffects, SessionReport};
use crate::sync::KeyedMutex;
use crate::utils::allocate_output_paths;
use crate::utils::fs::ensure_dir_all;

/// Settings shared by every supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub check_interval: Duration,
    /// Each source records into `<output_root>/<slug>`.
    pub output_root: PathBuf,
}

/// What a supervisor did before it exited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SupervisorOutcome {
    pub source: String,
    pub sessions: usize,
    pub jobs_submitted: usize,
}

/// Watches one source until cancelled: poll, capture while live, queue the
/// recording for conversion, repeat.
pub struct SessionSupervisor {
    target: SourceTarget,
    config: SupervisorConfig,
    effects: SessionEffects,
    locks: Arc<KeyedMutex>,
    queue: Arc<RetryQueue>,
    cancel: CancellationToken,
}

impl SessionSupervisor {
    pub fn new(
        target: SourceTarget,
        config: SupervisorConfig,
        effects: SessionEffects,
        locks: Arc<KeyedMutex>,
        queue: Arc<RetryQueue>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            target,
            config,
            effects,
            locks,
            queue,
            cancel,
        }
    }

    pub fn target(&self) -> &SourceTarget {
        &self.target
    }

    /// Run until the cancellation token fires.
    ///
    /// Holds the source's lock for the whole run. A session in progress when
    /// cancellation arrives is ended and joined before this returns.
    pub async fn run(self) -> SupervisorOutcome {
        let mut outcome = SupervisorOutcome {
            source: self.target.slug().to_string(),
            ..Default::default()
        };

        let _guard = tokio::select! {
            _ = self.cancel.cancelled() => {
                debug!(source = %self.target, "Cancelled while waiting for source lock");
                return outcome;
            }
            guard = self.locks.acquire(self.target.slug()) => guard,
        };
        info!(source = %self.target, interval = ?self.config.check_interval, "Supervisor started");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.check_interval) => {}
            }

            let Some(report) = self.tick().await else {
                continue;
            };
            outcome.sessions += 1;
            if self.submit(&report).await {
                outcome.jobs_submitted += 1;
            }
        }

        info!(
            source = %self.target,
            sessions = outcome.sessions,
            jobs = outcome.jobs_submitted,
            "Supervisor stopped"
        );
        outcome
    }

    /// One poll. Returns the session report when the source was captured.
    async fn tick(&self) -> Option<SessionReport> {
        let live = tokio::select! {
            _ = self.cancel.cancelled() => return None,
            live = self.effects.liveness.check_live(&self.target) => live,
        };
        match live {
            Ok(true) => {}
            Ok(false) => {
                debug!(source = %self.target, "Source offline");
                return None;
            }
            Err(e) => {
                warn!(source = %self.target, phase = "liveness", error = %e, "Liveness check failed");
                return None;
            }
        }

        let folder = self.target.output_folder(&self.config.output_root);
        if let Err(e) = ensure_dir_all(&folder).await {
            warn!(source = %self.target, phase = "setup", error = %e, "Cannot create output folder");
            return None;
        }
        let paths = match allocate_output_paths(&folder, Local::now()).await {
            Ok(paths) => paths,
            Err(e) => {
                warn!(source = %self.target, phase = "setup", error = %e, "Cannot allocate output paths");
                return None;
            }
        };

        let session = Session::new(self.target.clone(), paths, &self.cancel);
        Some(session.run(&self.effects).await)
    }

    /// Hand the recording to the conversion queue.
    ///
    /// Blocks under backpressure. Cancellation while blocked leaves the file
    /// on disk for the startup sweep.
    async fn submit(&self, report: &SessionReport) -> bool {
        let path = report.paths.video.clone();
        let job = ConversionJob::new(path.clone());
        tokio::select! {
            biased;
            submitted = self.queue.submit(job) => match submitted {
                Ok(()) => {
                    debug!(source = %self.target, path = %path.display(), "Queued recording for conversion");
                    true
                }
                Err(e) => {
                    warn!(source = %self.target, phase = "submit", path = %path.display(), error = %e, "Failed to queue recording");
                    false
                }
            },
            _ = self.cancel.cancelled() => {
                warn!(
                    source = %self.target,
                    phase = "submit",
                    path = %path.display(),
                    "Cancelled while the conversion queue was full; the next startup sweep will pick the file up"
                );
                false
            }
        }
    }
}
