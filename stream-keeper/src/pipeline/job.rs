//! Conversion jobs and the events the queue reports about them.

use std::path::{Path, PathBuf};

/// A captured file waiting to be converted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionJob {
    pub path: PathBuf,
    /// Zero-based number of the next conversion attempt.
    pub attempt: u32,
}

impl ConversionJob {
    /// A job that has not been attempted yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            attempt: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The same job, one attempt later.
    pub(crate) fn next_attempt(&self) -> Self {
        Self {
            path: self.path.clone(),
            attempt: self.attempt + 1,
        }
    }
}

/// Lifecycle events broadcast by the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    /// A worker invoked the converter for this attempt.
    Started { path: PathBuf, attempt: u32 },
    /// The attempt failed and the job was re-enqueued as `next_attempt`.
    Retrying {
        path: PathBuf,
        attempt: u32,
        next_attempt: u32,
        error: String,
    },
    /// The attempt succeeded.
    Converted { path: PathBuf, attempt: u32 },
    /// The job ran out of attempts and was dropped.
    Exhausted {
        path: PathBuf,
        attempts: u32,
        error: String,
    },
}

impl JobEvent {
    pub fn path(&self) -> &Path {
        match self {
            JobEvent::Started { path, .. }
            | JobEvent::Retrying { path, .. }
            | JobEvent::Converted { path, .. }
            | JobEvent::Exhausted { path, .. } => path,
        }
    }

    /// True for events after which the job is gone from the queue.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobEvent::Converted { .. } | JobEvent::Exhausted { .. })
    }
}
