//! Output file naming for capture sessions.

use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone};

use crate::Result;
use crate::utils::fs::io_error;

/// Extension of raw capture files; the recovery sweep looks for these.
pub const CAPTURE_EXTENSION: &str = "ts";

const STEM_FORMAT: &str = "%Y-%m-%d_%H-%M-%S-%3f";

/// All files written by one capture session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    /// Shared file stem, e.g. `2024-03-01_20-15-03-120`.
    pub stem: String,
    /// Raw capture written by the capture process.
    pub video: PathBuf,
    /// Gzip-compressed JSON-lines chat transcript.
    pub chat: PathBuf,
    /// Periodic metadata snapshot.
    pub metadata: PathBuf,
}

impl OutputPaths {
    fn in_folder(folder: &Path, stem: String) -> Self {
        Self {
            video: folder.join(format!("{stem}.{CAPTURE_EXTENSION}")),
            chat: folder.join(format!("{stem}.chat.jsonl.gz")),
            metadata: folder.join(format!("{stem}.info.json")),
            stem,
        }
    }

    fn all(&self) -> [&Path; 3] {
        [&self.video, &self.chat, &self.metadata]
    }
}

/// Pick a fresh set of output paths in `folder` for a session starting at `now`.
///
/// The stem has millisecond resolution; if any of the derived files already
/// exists a `-N` suffix is appended until none do, so a source that flaps
/// faster than the clock resolution still never reuses a path.
pub async fn allocate_output_paths<Tz>(folder: &Path, now: DateTime<Tz>) -> Result<OutputPaths>
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let base = now.format(STEM_FORMAT).to_string();
    let mut candidate = OutputPaths::in_folder(folder, base.clone());
    let mut counter = 0u32;

    loop {
        let mut taken = false;
        for path in candidate.all() {
            if tokio::fs::try_exists(path)
                .await
                .map_err(|e| io_error("probing", path, e))?
            {
                taken = true;
                break;
            }
        }
        if !taken {
            return Ok(candidate);
        }
        counter += 1;
        candidate = OutputPaths::in_folder(folder, format!("{base}-{counter}"));
    }
}
