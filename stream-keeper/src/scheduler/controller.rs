//! Owns the running set of supervisors and swaps it on reload.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::supervisor::{SessionSupervisor, SupervisorConfig, SupervisorOutcome};
use crate::domain::SourceTarget;
use crate::pipeline::RetryQueue;
use crate::session::SessionEffects;
use crate::sync::KeyedMutex;

/// Result of [`SourceSetController::reload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// The old set was stopped and the new one started.
    Applied { stopped: usize, started: usize },
    /// Another reload was in progress; this one was dropped.
    Coalesced,
}

/// Summary of stopping the running set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopReport {
    pub stopped: usize,
    pub sessions: usize,
    pub jobs_submitted: usize,
    /// Supervisors whose task panicked.
    pub crashed: usize,
}

/// One started set of supervisors sharing a cancellation token.
struct Generation {
    token: CancellationToken,
    tasks: JoinSet<SupervisorOutcome>,
    targets: Vec<SourceTarget>,
}

pub struct SourceSetController {
    config: SupervisorConfig,
    effects: SessionEffects,
    locks: Arc<KeyedMutex>,
    queue: Arc<RetryQueue>,
    shutdown: CancellationToken,
    current: Mutex<Option<Generation>>,
    reload_gate: Mutex<()>,
}

impl SourceSetController {
    /// Every supervisor token is a child of `shutdown`.
    pub fn new(
        config: SupervisorConfig,
        effects: SessionEffects,
        locks: Arc<KeyedMutex>,
        queue: Arc<RetryQueue>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            effects,
            locks,
            queue,
            shutdown,
            current: Mutex::new(None),
            reload_gate: Mutex::new(()),
        }
    }

    /// Spawn one supervisor per target, stopping any set already running.
    pub async fn start(&self, targets: Vec<SourceTarget>) -> usize {
        let mut current = self.current.lock().await;
        if let Some(previous) = current.take() {
            Self::stop_generation(previous).await;
        }

        let token = self.shutdown.child_token();
        let mut tasks = JoinSet::new();
        for target in &targets {
            let supervisor = SessionSupervisor::new(
                target.clone(),
                self.config.clone(),
                self.effects.clone(),
                self.locks.clone(),
                self.queue.clone(),
                token.child_token(),
            );
            tasks.spawn(supervisor.run());
        }

        let started = tasks.len();
        info!(count = started, "Started supervisors");
        *current = Some(Generation {
            token,
            tasks,
            targets,
        });
        started
    }

    /// Cancel every supervisor and wait until all of them have exited.
    pub async fn stop_all(&self) -> StopReport {
        let generation = self.current.lock().await.take();
        match generation {
            Some(generation) => Self::stop_generation(generation).await,
            None => StopReport::default(),
        }
    }

    async fn stop_generation(mut generation: Generation) -> StopReport {
        debug!(count = generation.tasks.len(), "Stopping supervisors");
        generation.token.cancel();

        let mut report = StopReport::default();
        while let Some(result) = generation.tasks.join_next().await {
            report.stopped += 1;
            match result {
                Ok(outcome) => {
                    report.sessions += outcome.sessions;
                    report.jobs_submitted += outcome.jobs_submitted;
                }
                Err(e) => {
                    report.crashed += 1;
                    error!(error = %e, "Supervisor task failed");
                }
            }
        }

        info!(
            stopped = report.stopped,
            sessions = report.sessions,
            jobs = report.jobs_submitted,
            "Supervisors stopped"
        );
        report
    }

    /// Replace the running set with one supervisor per `targets`.
    ///
    /// At most one reload runs at a time; a call that arrives while another
    /// is in progress returns [`ReloadOutcome::Coalesced`] without effect.
    pub async fn reload(&self, targets: Vec<SourceTarget>) -> ReloadOutcome {
        let Ok(_gate) = self.reload_gate.try_lock() else {
            debug!("Reload already in progress, coalescing");
            return ReloadOutcome::Coalesced;
        };

        info!(targets = targets.len(), "Reloading source set");
        let stopped = self.stop_all().await.stopped;
        let started = self.start(targets).await;
        ReloadOutcome::Applied { stopped, started }
    }

    /// Cancel the shutdown token and stop every supervisor.
    pub async fn shutdown(&self) -> StopReport {
        self.shutdown.cancel();
        self.stop_all().await
    }

    /// Supervisors in the current set that have not exited yet.
    pub async fn running_count(&self) -> usize {
        self.current
            .lock()
            .await
            .as_ref()
            .map_or(0, |generation| generation.tasks.len())
    }

    /// Targets of the current set.
    pub async fn targets(&self) -> Vec<SourceTarget> {
        self.current
            .lock()
            .await
            .as_ref()
            .map(|generation| generation.targets.clone())
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for SourceSetController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceSetController")
            .field("config", &self.config)
            .field("shutdown", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}
