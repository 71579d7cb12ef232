//! Filesystem helpers shared across modules.
//!
//! These helpers attach the operation and path to IO errors so every failure
//! log says what was being done to which file.

use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Convert an IO error into an application error with operation + path context.
pub fn io_error(op: &'static str, path: &Path, source: std::io::Error) -> Error {
    Error::io_path(op, path, source)
}

/// Ensure a directory exists, creating it (recursively) if needed.
///
/// On unix newly created directories are private to the owner.
pub async fn ensure_dir_all(path: &Path) -> Result<()> {
    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o700);
    builder
        .create(path)
        .await
        .map_err(|e| io_error("creating directory", path, e))
}

/// Ensure the parent directory of a file path exists.
pub async fn ensure_parent_dir(path: &Path) -> Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    ensure_dir_all(parent).await
}

/// Write `bytes` to `path` through a sibling temp file and a rename, so
/// readers only ever see a complete file.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| io_error("writing", &tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| io_error("renaming", &tmp, e))
}

/// Recursively collect every file under `root` whose extension equals `ext`.
///
/// Unreadable subdirectories are skipped; an unreadable root is an error.
pub async fn find_files_with_extension(root: &Path, ext: &str) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    let mut is_root = true;

    while let Some(dir) = pending.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if is_root => return Err(io_error("reading directory", &dir, e)),
            Err(e) => {
                tracing::warn!(path = %dir.display(), error = %e, "Skipping unreadable directory");
                continue;
            }
        };
        is_root = false;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error("reading directory", &dir, e))?
        {
            let path = entry.path();
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| io_error("inspecting", &path, e))?;
            if file_type.is_dir() {
                pending.push(path);
            } else if path.extension().is_some_and(|e| e == ext) {
                found.push(path);
            }
        }
    }

    found.sort();
    Ok(found)
}
