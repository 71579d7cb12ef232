//! The session state machine.
//!
//! `Created -> Running -> Ending -> Ended`. The capture effect finishing is the
//! only thing that moves a session out of `Running`; side-task failures are
//! logged and otherwise ignored.

use std::fmt;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::effects::{SessionContext, SessionEffects};
use super::scope::TaskScope;
use crate::Result;
use crate::domain::SourceTarget;
use crate::utils::OutputPaths;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    /// Paths computed and scope allocated.
    Created,
    /// Capture and side tasks started.
    Running,
    /// Capture finished; the scope is being cancelled.
    Ending,
    /// Every task in the scope has returned.
    Ended,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Created => "created",
            SessionState::Running => "running",
            SessionState::Ending => "ending",
            SessionState::Ended => "ended",
        };
        f.write_str(name)
    }
}

/// Summary of a finished session.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: String,
    pub paths: OutputPaths,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// Error reported by the capture effect, if any.
    pub capture_error: Option<String>,
    /// Whether the session ended because its scope was cancelled from outside.
    pub cancelled: bool,
}

/// One live capture and the side tasks bound to it.
pub struct Session {
    id: String,
    source: SourceTarget,
    paths: OutputPaths,
    started_at: DateTime<Utc>,
    scope: TaskScope,
    state: watch::Sender<SessionState>,
}

impl Session {
    /// Create a session whose scope is cancelled together with `parent`.
    pub fn new(source: SourceTarget, paths: OutputPaths, parent: &CancellationToken) -> Self {
        let (state, _) = watch::channel(SessionState::Created);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source,
            paths,
            started_at: Utc::now(),
            scope: TaskScope::child_of(parent),
            state,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn paths(&self) -> &OutputPaths {
        &self.paths
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// The session's cancellation scope.
    pub fn scope(&self) -> &TaskScope {
        &self.scope
    }

    fn transition(&self, next: SessionState) {
        debug!(source = %self.source, session_id = %self.id, state = %next, "Session state change");
        self.state.send_replace(next);
    }

    /// Run the session to completion.
    ///
    /// Returns only after the capture effect has finished and every side task
    /// has observed cancellation and returned.
    pub async fn run(self, effects: &SessionEffects) -> SessionReport {
        let ctx = SessionContext {
            session_id: self.id.clone(),
            source: self.source.clone(),
            paths: self.paths.clone(),
        };

        self.transition(SessionState::Running);
        info!(
            source = %self.source,
            session_id = %self.id,
            path = %self.paths.video.display(),
            "Session started"
        );

        if let Some(chat) = &effects.chat {
            let chat = chat.clone();
            let ctx = ctx.clone();
            let token = self.scope.token().clone();
            self.spawn_side_task("chat", async move { chat.log_chat(ctx, token).await });
        }
        if let Some(metadata) = &effects.metadata {
            let metadata = metadata.clone();
            let ctx = ctx.clone();
            let token = self.scope.token().clone();
            self.spawn_side_task("metadata", async move { metadata.gather(ctx, token).await });
        }

        let capture = effects
            .capture
            .capture(&self.source, &self.paths.video, self.scope.token())
            .await;
        let cancelled = self.scope.is_cancelled();

        let capture_error = match capture {
            Ok(()) => None,
            Err(e) => {
                warn!(source = %self.source, session_id = %self.id, phase = "capture", error = %e, "Capture failed");
                Some(e.to_string())
            }
        };

        self.transition(SessionState::Ending);
        self.scope.cancel_and_join().await;
        self.transition(SessionState::Ended);

        let ended_at = Utc::now();
        info!(
            source = %self.source,
            session_id = %self.id,
            cancelled,
            duration_secs = (ended_at - self.started_at).num_seconds(),
            "Session ended"
        );

        SessionReport {
            session_id: self.id,
            paths: self.paths,
            started_at: self.started_at,
            ended_at,
            capture_error,
            cancelled,
        }
    }

    fn spawn_side_task<F>(&self, phase: &'static str, task: F)
    where
        F: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        let source = self.source.to_string();
        let session_id = self.id.clone();
        let spawned = self.scope.spawn(async move {
            match task.await {
                Ok(()) => debug!(source = %source, session_id = %session_id, phase, "Side task finished"),
                Err(e) => warn!(source = %source, session_id = %session_id, phase, error = %e, "Side task failed"),
            }
        });
        if spawned.is_none() {
            debug!(source = %self.source, session_id = %self.id, phase, "Scope already cancelled, side task not started");
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("source", &self.source.slug())
            .field("state", &self.state())
            .finish()
    }
}
