//! Stream list change notifications.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Keeps the underlying file watcher alive. Dropping it ends the signal stream.
pub struct StreamListWatcher {
    _watcher: RecommendedWatcher,
}

/// Watch `path` and emit one reload signal per burst of changes.
///
/// The parent directory is watched so editors that replace the file by
/// renaming keep triggering. Events within `debounce` of the first one are
/// folded into a single signal.
pub fn watch_stream_list(
    path: &Path,
    debounce: Duration,
    cancel: CancellationToken,
) -> Result<(StreamListWatcher, mpsc::Receiver<()>)> {
    let file_name = path
        .file_name()
        .map(OsString::from)
        .ok_or_else(|| Error::config(format!("stream list path has no file name: {}", path.display())))?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let (raw_tx, raw_rx) = mpsc::unbounded_channel();
    let mut watcher = RecommendedWatcher::new(
        move |res: std::result::Result<Event, notify::Error>| match res {
            Ok(event) => {
                if is_relevant(&event, &file_name) {
                    let _ = raw_tx.send(());
                }
            }
            Err(e) => warn!(error = %e, "Stream list watcher error"),
        },
        Config::default(),
    )?;
    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    debug!(path = %path.display(), "Watching stream list");

    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(debounce_signals(raw_rx, tx, debounce, cancel));

    Ok((StreamListWatcher { _watcher: watcher }, rx))
}

fn is_relevant(event: &Event, file_name: &OsString) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) && event
        .paths
        .iter()
        .any(|p| p.file_name() == Some(file_name.as_os_str()))
}

/// Fold bursts of raw events into single signals.
///
/// A signal that cannot be delivered because one is already pending is
/// dropped; the pending one covers it.
async fn debounce_signals(
    mut raw: mpsc::UnboundedReceiver<()>,
    tx: mpsc::Sender<()>,
    window: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = raw.recv() => {
                if event.is_none() {
                    break;
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(window) => {}
        }
        while raw.try_recv().is_ok() {}

        match tx.try_send(()) {
            Ok(()) => debug!("Stream list changed"),
            Err(mpsc::error::TrySendError::Full(())) => debug!("Reload already pending"),
            Err(mpsc::error::TrySendError::Closed(())) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_burst_collapses_into_one_signal() {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (tx, mut rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(debounce_signals(raw_rx, tx, Duration::from_millis(500), cancel.clone()));

        for _ in 0..5 {
            raw_tx.send(()).unwrap();
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(rx.try_recv(), Ok(()));
        assert!(rx.try_recv().is_err());

        raw_tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(rx.try_recv(), Ok(()));

        cancel.cancel();
        task.await.unwrap();
    }

    #[test]
    fn test_only_stream_list_events_are_relevant() {
        let name = OsString::from("streamlist");
        let modify = EventKind::Modify(notify::event::ModifyKind::Any);
        let hit = Event::new(modify).add_path(PathBuf::from("/srv/streams/streamlist"));
        let miss = Event::new(modify).add_path(PathBuf::from("/srv/streams/other"));
        let access = Event::new(EventKind::Access(notify::event::AccessKind::Any))
            .add_path(PathBuf::from("/srv/streams/streamlist"));

        assert!(is_relevant(&hit, &name));
        assert!(!is_relevant(&miss, &name));
        assert!(!is_relevant(&access, &name));
    }

    #[tokio::test]
    async fn test_watching_missing_directory_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nope").join("streamlist");
        let result = watch_stream_list(&path, Duration::from_millis(10), CancellationToken::new());
        assert!(result.is_err());
    }
}
