//! Stream list loading.
//!
//! One source URL per line. Blank lines and `#` comments are ignored, and a
//! URL whose slug was already seen is dropped.

use std::collections::HashSet;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::warn;

use crate::Result;
use crate::domain::SourceTarget;
use crate::utils::fs::io_error;

/// Source of the current target list.
#[async_trait]
pub trait TargetLoader: Send + Sync + 'static {
    async fn load(&self) -> Result<Vec<SourceTarget>>;
}

/// Parse stream list text, keeping the first occurrence of each slug.
pub fn parse_stream_list(text: &str) -> Vec<SourceTarget> {
    let mut seen = HashSet::new();
    let mut targets = Vec::new();

    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match SourceTarget::parse(line) {
            Ok(target) => {
                if seen.insert(target.slug().to_string()) {
                    targets.push(target);
                } else {
                    warn!(line = index + 1, url = line, slug = target.slug(), "Duplicate source in stream list, ignoring");
                }
            }
            Err(e) => warn!(line = index + 1, error = %e, "Invalid stream list entry"),
        }
    }
    targets
}

/// Loads targets from a stream list file.
#[derive(Debug, Clone)]
pub struct StreamListLoader {
    path: PathBuf,
}

impl StreamListLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TargetLoader for StreamListLoader {
    async fn load(&self) -> Result<Vec<SourceTarget>> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| io_error("reading stream list", &self.path, e))?;
        Ok(parse_stream_list(&text))
    }
}
