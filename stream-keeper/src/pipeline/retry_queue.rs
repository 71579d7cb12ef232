//! Bounded conversion queue with a fixed worker pool and bounded retries.
//!
//! Every admitted job holds one capacity slot until it is either converted or
//! dropped. A failed attempt is re-enqueued together with its slot, so a
//! worker's retry never waits on producers and the queue cannot fill up
//! against its own workers. Producers calling [`RetryQueue::submit`] wait while
//! all slots are taken.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore, TryAcquireError, broadcast, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::convert::Converter;
use super::job::{ConversionJob, JobEvent};
use crate::{Error, Result};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Configuration for the retry queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryQueueConfig {
    /// Maximum number of jobs admitted and not yet finished.
    pub capacity: usize,
    /// Number of worker tasks.
    pub workers: usize,
    /// Converter invocations per job before it is dropped.
    pub max_attempts: u32,
}

impl Default for RetryQueueConfig {
    fn default() -> Self {
        Self {
            capacity: 50,
            workers: 2,
            max_attempts: 5,
        }
    }
}

/// A job together with the capacity slot it occupies.
struct Admitted {
    job: ConversionJob,
    slot: OwnedSemaphorePermit,
}

type SharedReceiver = Arc<Mutex<mpsc::UnboundedReceiver<Admitted>>>;

/// In-memory conversion queue serviced by a fixed pool of workers.
pub struct RetryQueue {
    config: RetryQueueConfig,
    slots: Arc<Semaphore>,
    tx: mpsc::UnboundedSender<Admitted>,
    rx: SharedReceiver,
    events: broadcast::Sender<JobEvent>,
    in_flight: Arc<AtomicUsize>,
    started: AtomicBool,
    cancellation_token: CancellationToken,
    tasks: parking_lot::Mutex<Option<JoinSet<()>>>,
}

impl RetryQueue {
    /// Create a queue with the default configuration.
    pub fn new() -> Self {
        Self::with_config(RetryQueueConfig::default())
    }

    /// Create a queue with a custom configuration.
    ///
    /// Zero capacity or zero workers would make every submit wait forever, so
    /// both are clamped to one.
    pub fn with_config(mut config: RetryQueueConfig) -> Self {
        config.capacity = config.capacity.max(1);
        config.workers = config.workers.max(1);

        let (tx, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            slots: Arc::new(Semaphore::new(config.capacity)),
            config,
            tx,
            rx: Arc::new(Mutex::new(rx)),
            events,
            in_flight: Arc::new(AtomicUsize::new(0)),
            started: AtomicBool::new(false),
            cancellation_token: CancellationToken::new(),
            tasks: parking_lot::Mutex::new(Some(JoinSet::new())),
        }
    }

    pub fn config(&self) -> &RetryQueueConfig {
        &self.config
    }

    /// Subscribe to job lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Jobs admitted and not yet finished (queued plus in flight).
    pub fn admitted(&self) -> usize {
        self.config.capacity - self.slots.available_permits()
    }

    /// Jobs a worker is converting right now.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Check if the queue accepts jobs.
    pub fn is_running(&self) -> bool {
        !self.cancellation_token.is_cancelled()
    }

    /// Submit a job, waiting while the queue is at capacity.
    ///
    /// Cancel-safe: if the future is dropped while waiting, nothing is
    /// enqueued.
    pub async fn submit(&self, job: ConversionJob) -> Result<()> {
        if !self.is_running() {
            return Err(Error::QueueClosed);
        }
        let slot = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::QueueClosed)?;
        self.enqueue(job, slot)
    }

    /// Submit a job only if a slot is free right now.
    pub fn try_submit(&self, job: ConversionJob) -> Result<()> {
        if !self.is_running() {
            return Err(Error::QueueClosed);
        }
        let slot = match self.slots.clone().try_acquire_owned() {
            Ok(slot) => slot,
            Err(TryAcquireError::NoPermits) => return Err(Error::QueueFull),
            Err(TryAcquireError::Closed) => return Err(Error::QueueClosed),
        };
        self.enqueue(job, slot)
    }

    fn enqueue(&self, job: ConversionJob, slot: OwnedSemaphorePermit) -> Result<()> {
        debug!(path = %job.path.display(), attempt = job.attempt, "Conversion job queued");
        self.tx
            .send(Admitted { job, slot })
            .map_err(|_| Error::QueueClosed)
    }

    /// Start the worker pool. Calling this more than once has no effect.
    pub fn start(&self, converter: Arc<dyn Converter>) {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Retry queue already started");
            return;
        }

        info!(
            workers = self.config.workers,
            capacity = self.config.capacity,
            max_attempts = self.config.max_attempts,
            "Starting conversion workers"
        );

        let mut tasks = self.tasks.lock();
        let Some(join_set) = tasks.as_mut() else {
            warn!("Retry queue already stopped");
            return;
        };

        for id in 0..self.config.workers {
            let worker = Worker {
                id,
                max_attempts: self.config.max_attempts,
                converter: converter.clone(),
                rx: self.rx.clone(),
                tx: self.tx.clone(),
                events: self.events.clone(),
                in_flight: self.in_flight.clone(),
                cancellation_token: self.cancellation_token.clone(),
            };
            join_set.spawn(worker.run());
        }
    }

    /// Stop accepting jobs, wait for the workers, and discard what is left.
    ///
    /// A conversion already in progress is allowed to finish.
    pub async fn stop(&self) {
        info!("Stopping conversion workers");
        self.cancellation_token.cancel();
        self.slots.close();

        let join_set = {
            let mut tasks = self.tasks.lock();
            tasks.take()
        };
        if let Some(mut join_set) = join_set {
            while join_set.join_next().await.is_some() {}
        }

        let mut discarded = 0usize;
        let mut rx = self.rx.lock().await;
        while let Ok(admitted) = rx.try_recv() {
            warn!(
                path = %admitted.job.path.display(),
                attempt = admitted.job.attempt,
                "Discarding queued conversion job on shutdown"
            );
            discarded += 1;
        }

        info!(discarded, "Conversion workers stopped");
    }
}

impl Default for RetryQueue {
    fn default() -> Self {
        Self::new()
    }
}

struct Worker {
    id: usize,
    max_attempts: u32,
    converter: Arc<dyn Converter>,
    rx: SharedReceiver,
    tx: mpsc::UnboundedSender<Admitted>,
    events: broadcast::Sender<JobEvent>,
    in_flight: Arc<AtomicUsize>,
    cancellation_token: CancellationToken,
}

impl Worker {
    async fn run(self) {
        debug!(worker = self.id, "Conversion worker started");

        loop {
            let next = {
                let mut rx = self.rx.lock().await;
                tokio::select! {
                    biased;
                    _ = self.cancellation_token.cancelled() => None,
                    admitted = rx.recv() => admitted,
                }
            };

            let Some(admitted) = next else {
                break;
            };
            self.process(admitted).await;
        }

        debug!(worker = self.id, "Conversion worker shutting down");
    }

    async fn process(&self, admitted: Admitted) {
        let Admitted { job, slot } = admitted;

        if job.attempt >= self.max_attempts {
            self.exhaust(&job, job.attempt, "attempt budget already spent");
            return;
        }

        let _ = self.events.send(JobEvent::Started {
            path: job.path.clone(),
            attempt: job.attempt,
        });
        info!(
            worker = self.id,
            path = %job.path.display(),
            attempt = job.attempt,
            "Converting"
        );

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let result = AssertUnwindSafe(self.converter.convert(&job.path))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(Error::Other("converter panicked".to_string())));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match result {
            Ok(()) => {
                info!(path = %job.path.display(), attempt = job.attempt, "Conversion finished");
                let _ = self.events.send(JobEvent::Converted {
                    path: job.path.clone(),
                    attempt: job.attempt,
                });
            }
            Err(e) => {
                let retry = job.next_attempt();
                if retry.attempt < self.max_attempts {
                    warn!(
                        path = %job.path.display(),
                        attempt = job.attempt,
                        error = %e,
                        "Conversion failed, retrying"
                    );
                    let _ = self.events.send(JobEvent::Retrying {
                        path: job.path.clone(),
                        attempt: job.attempt,
                        next_attempt: retry.attempt,
                        error: e.to_string(),
                    });
                    if let Err(mpsc::error::SendError(lost)) =
                        self.tx.send(Admitted { job: retry, slot })
                    {
                        error!(path = %lost.job.path.display(), "Conversion queue closed, dropping retry");
                    }
                } else {
                    self.exhaust(&job, retry.attempt, &e.to_string());
                }
            }
        }
    }

    fn exhaust(&self, job: &ConversionJob, attempts: u32, error: &str) {
        error!(
            path = %job.path.display(),
            attempts,
            error = %error,
            "Conversion permanently failed, giving up"
        );
        let _ = self.events.send(JobEvent::Exhausted {
            path: job.path.clone(),
            attempts,
            error: error.to_string(),
        });
    }
}
