//! Fakes shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use stream_keeper::domain::SourceTarget;
use stream_keeper::session::{
    CaptureEngine, ChatLogger, LivenessChecker, MetadataGatherer, SessionContext, SessionEffects,
};
use stream_keeper::utils::OutputPaths;
use stream_keeper::{Error, Result};

/// Counts tasks that are currently inside an effect.
#[derive(Debug, Clone, Default)]
pub struct LiveCounter(Arc<AtomicUsize>);

impl LiveCounter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    pub fn enter(&self) -> LiveGuard {
        self.0.fetch_add(1, Ordering::SeqCst);
        LiveGuard(self.0.clone())
    }
}

pub struct LiveGuard(Arc<AtomicUsize>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Timestamps of every write a fake writer made.
#[derive(Debug, Clone, Default)]
pub struct WriteLog(Arc<Mutex<Vec<Instant>>>);

impl WriteLog {
    pub fn record(&self) {
        self.0.lock().push(Instant::now());
    }

    pub fn count(&self) -> usize {
        self.0.lock().len()
    }

    pub fn last(&self) -> Option<Instant> {
        self.0.lock().last().copied()
    }
}

/// Live for the slugs in the set, offline otherwise.
#[derive(Debug, Default)]
pub struct SetLiveness {
    live: Mutex<HashSet<String>>,
    pub calls: AtomicUsize,
}

impl SetLiveness {
    pub fn new(live: &[&str]) -> Self {
        Self {
            live: Mutex::new(live.iter().map(|s| s.to_string()).collect()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_live(&self, slug: &str, live: bool) {
        let mut set = self.live.lock();
        if live {
            set.insert(slug.to_string());
        } else {
            set.remove(slug);
        }
    }
}

#[async_trait]
impl LivenessChecker for SetLiveness {
    async fn check_live(&self, target: &SourceTarget) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.live.lock().contains(target.slug()))
    }
}

/// Live until a fixed instant.
#[derive(Debug)]
pub struct LiveUntil {
    pub until: Instant,
    pub calls: AtomicUsize,
}

#[async_trait]
impl LivenessChecker for LiveUntil {
    async fn check_live(&self, _target: &SourceTarget) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Instant::now() < self.until)
    }
}

/// Always fails.
#[derive(Debug, Default)]
pub struct BrokenLiveness {
    pub calls: AtomicUsize,
}

#[async_trait]
impl LivenessChecker for BrokenLiveness {
    async fn check_live(&self, _target: &SourceTarget) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(Error::process("streamlink", "connection refused"))
    }
}

/// How a fake capture decides it is done.
#[derive(Debug, Clone, Copy)]
pub enum CaptureEnd {
    /// Runs until cancelled.
    Cancelled,
    /// Runs until the instant or cancellation.
    At(Instant),
}

/// Writes into a log every few milliseconds until it ends.
#[derive(Debug, Clone)]
pub struct FakeCapture {
    pub end: CaptureEnd,
    pub live: LiveCounter,
    pub writes: WriteLog,
    pub started: Arc<AtomicUsize>,
    pub cancelled: Arc<AtomicUsize>,
}

impl FakeCapture {
    pub fn new(end: CaptureEnd, live: LiveCounter) -> Self {
        Self {
            end,
            live,
            writes: WriteLog::default(),
            started: Arc::new(AtomicUsize::new(0)),
            cancelled: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl CaptureEngine for FakeCapture {
    async fn capture(
        &self,
        _target: &SourceTarget,
        _output: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let _live = self.live.enter();
        self.started.fetch_add(1, Ordering::SeqCst);
        let deadline = match self.end {
            CaptureEnd::Cancelled => None,
            CaptureEnd::At(at) => Some(at),
        };
        loop {
            self.writes.record();
            if deadline.is_some_and(|at| Instant::now() >= at) {
                return Ok(());
            }
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.cancelled.fetch_add(1, Ordering::SeqCst);
                    return Ok(());
                }
                _ = tokio::time::sleep(Duration::from_millis(5)) => {}
            }
        }
    }
}

/// Side task that writes until cancelled, then flushes once more.
#[derive(Debug, Clone)]
pub struct FakeWriter {
    pub live: LiveCounter,
    pub writes: WriteLog,
}

impl FakeWriter {
    pub fn new(live: LiveCounter) -> Self {
        Self {
            live,
            writes: WriteLog::default(),
        }
    }

    async fn write_until_cancelled(&self, cancel: CancellationToken) -> Result<()> {
        let _live = self.live.enter();
        loop {
            self.writes.record();
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_millis(3)) => {}
            }
        }
        // Closing write, like a gzip trailer.
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.writes.record();
        Ok(())
    }
}

#[async_trait]
impl ChatLogger for FakeWriter {
    async fn log_chat(&self, _ctx: SessionContext, cancel: CancellationToken) -> Result<()> {
        self.write_until_cancelled(cancel).await
    }
}

#[async_trait]
impl MetadataGatherer for FakeWriter {
    async fn gather(&self, _ctx: SessionContext, cancel: CancellationToken) -> Result<()> {
        self.write_until_cancelled(cancel).await
    }
}

/// Effects built from one capture and fresh chat/metadata writers sharing `live`.
pub fn effects(
    liveness: Arc<dyn LivenessChecker>,
    capture: FakeCapture,
) -> (SessionEffects, FakeWriter, FakeWriter) {
    let chat = FakeWriter::new(capture.live.clone());
    let metadata = FakeWriter::new(capture.live.clone());
    let effects = SessionEffects::new(liveness, Arc::new(capture))
        .with_chat(Arc::new(chat.clone()))
        .with_metadata(Arc::new(metadata.clone()));
    (effects, chat, metadata)
}

pub fn twitch(name: &str) -> SourceTarget {
    SourceTarget::parse(&format!("https://www.twitch.tv/{name}")).unwrap()
}

pub fn paths_in(dir: &Path, stem: &str) -> OutputPaths {
    OutputPaths {
        stem: stem.to_string(),
        video: dir.join(format!("{stem}.ts")),
        chat: dir.join(format!("{stem}.chat.jsonl.gz")),
        metadata: dir.join(format!("{stem}.info.json")),
    }
}

pub fn path(name: &str) -> PathBuf {
    PathBuf::from(format!("/recordings/{name}.ts"))
}
