//! The external effects a session depends on.
//!
//! Each trait is a narrow seam: the core only observes "done, maybe with an
//! error", never partial progress. Every long-running effect receives the
//! session's cancellation token and must return promptly once it fires.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::domain::SourceTarget;
use crate::utils::OutputPaths;

/// Liveness probe for a source.
#[async_trait]
pub trait LivenessChecker: Send + Sync + 'static {
    /// Whether the source is live right now.
    async fn check_live(&self, target: &SourceTarget) -> Result<bool>;
}

/// The capture process that records a live source to a file.
#[async_trait]
pub trait CaptureEngine: Send + Sync + 'static {
    /// Record `target` to `output` until the stream ends or `cancel` fires.
    ///
    /// Must not return while anything it started can still write to `output`.
    async fn capture(
        &self,
        target: &SourceTarget,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<()>;
}

/// Everything a side task needs to know about the session it belongs to.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: String,
    pub source: SourceTarget,
    pub paths: OutputPaths,
}

/// Best-effort chat transcript writer.
#[async_trait]
pub trait ChatLogger: Send + Sync + 'static {
    /// Log chat into `ctx.paths.chat` until `cancel` fires.
    ///
    /// The transcript must be flushed and closed before this returns.
    async fn log_chat(&self, ctx: SessionContext, cancel: CancellationToken) -> Result<()>;
}

/// Periodic metadata snapshot writer.
#[async_trait]
pub trait MetadataGatherer: Send + Sync + 'static {
    /// Write snapshots to `ctx.paths.metadata` until `cancel` fires.
    async fn gather(&self, ctx: SessionContext, cancel: CancellationToken) -> Result<()>;
}

/// The effect implementations shared by every supervisor.
#[derive(Clone)]
pub struct SessionEffects {
    pub liveness: Arc<dyn LivenessChecker>,
    pub capture: Arc<dyn CaptureEngine>,
    pub chat: Option<Arc<dyn ChatLogger>>,
    pub metadata: Option<Arc<dyn MetadataGatherer>>,
}

impl SessionEffects {
    /// Effects with only the mandatory liveness probe and capture engine.
    pub fn new(liveness: Arc<dyn LivenessChecker>, capture: Arc<dyn CaptureEngine>) -> Self {
        Self {
            liveness,
            capture,
            chat: None,
            metadata: None,
        }
    }

    pub fn with_chat(mut self, chat: Arc<dyn ChatLogger>) -> Self {
        self.chat = Some(chat);
        self
    }

    pub fn with_metadata(mut self, metadata: Arc<dyn MetadataGatherer>) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

impl std::fmt::Debug for SessionEffects {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEffects")
            .field("chat", &self.chat.is_some())
            .field("metadata", &self.metadata.is_some())
            .finish_non_exhaustive()
    }
}
