//! Retry and backpressure behavior of the conversion queue.

mod common;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use stream_keeper::pipeline::{ConversionJob, Converter, JobEvent, RetryQueue, RetryQueueConfig};
use stream_keeper::{Error, Result};

use common::path;

/// Fails the first `failures` calls per path, then succeeds.
#[derive(Default)]
struct FlakyConverter {
    failures: usize,
    calls: Mutex<HashMap<PathBuf, usize>>,
}

impl FlakyConverter {
    fn failing(failures: usize) -> Self {
        Self {
            failures,
            ..Default::default()
        }
    }

    fn calls(&self, path: &Path) -> usize {
        self.calls.lock().get(path).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Converter for FlakyConverter {
    async fn convert(&self, path: &Path) -> Result<()> {
        let call = {
            let mut calls = self.calls.lock();
            let count = calls.entry(path.to_path_buf()).or_default();
            *count += 1;
            *count
        };
        if call <= self.failures {
            Err(Error::process("ffmpeg", format!("call {call} failed")))
        } else {
            Ok(())
        }
    }
}

fn queue(capacity: usize, workers: usize, max_attempts: u32) -> RetryQueue {
    RetryQueue::with_config(RetryQueueConfig {
        capacity,
        workers,
        max_attempts,
    })
}

async fn events_until_terminal(
    events: &mut tokio::sync::broadcast::Receiver<JobEvent>,
    job: &Path,
) -> Vec<JobEvent> {
    let mut seen = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("queue went quiet")
            .unwrap();
        if event.path() != job {
            continue;
        }
        let terminal = event.is_terminal();
        seen.push(event);
        if terminal {
            return seen;
        }
    }
}

#[tokio::test]
async fn test_permanent_failure_is_attempted_exactly_max_times() {
    let converter = Arc::new(FlakyConverter::failing(usize::MAX));
    let queue = queue(4, 2, 5);
    let mut events = queue.subscribe();
    queue.start(converter.clone());

    let job = path("broken");
    queue.submit(ConversionJob::new(job.clone())).await.unwrap();
    let seen = events_until_terminal(&mut events, &job).await;

    assert!(matches!(
        seen.last(),
        Some(JobEvent::Exhausted { attempts: 5, .. })
    ));
    assert_eq!(converter.calls(&job), 5);
    let started: Vec<u32> = seen
        .iter()
        .filter_map(|e| match e {
            JobEvent::Started { attempt, .. } => Some(*attempt),
            _ => None,
        })
        .collect();
    assert_eq!(started, [0, 1, 2, 3, 4]);

    // Dropped for good: no sixth invocation shows up later.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(converter.calls(&job), 5);
    assert_eq!(queue.admitted(), 0);
    queue.stop().await;
}

#[tokio::test]
async fn test_fail_twice_then_succeed_on_third_attempt() {
    let converter = Arc::new(FlakyConverter::failing(2));
    let queue = queue(4, 1, 5);
    let mut events = queue.subscribe();
    queue.start(converter.clone());

    let job = path("flaky");
    queue.submit(ConversionJob::new(job.clone())).await.unwrap();
    let seen = events_until_terminal(&mut events, &job).await;

    let attempts: Vec<u32> = seen
        .iter()
        .filter_map(|e| match e {
            JobEvent::Started { attempt, .. } => Some(*attempt),
            _ => None,
        })
        .collect();
    assert_eq!(attempts, [0, 1, 2]);
    assert!(matches!(seen.last(), Some(JobEvent::Converted { attempt: 2, .. })));
    assert_eq!(converter.calls(&job), 3);
    queue.stop().await;
}

#[tokio::test]
async fn test_full_queue_does_not_deadlock_its_own_retries() {
    let converter = Arc::new(FlakyConverter::failing(1));
    let queue = Arc::new(queue(2, 1, 3));
    let mut events = queue.subscribe();
    queue.start(converter.clone());

    queue.submit(ConversionJob::new(path("a"))).await.unwrap();
    queue.submit(ConversionJob::new(path("b"))).await.unwrap();

    let mut converted = 0;
    while converted < 2 {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("queue stalled")
            .unwrap();
        if matches!(event, JobEvent::Converted { .. }) {
            converted += 1;
        }
    }
    assert_eq!(converter.calls(&path("a")), 2);
    assert_eq!(converter.calls(&path("b")), 2);
    queue.stop().await;
}

/// Blocks every conversion until released, recording when each one finished.
#[derive(Default)]
struct GatedConverter {
    gate: Notify,
    finished: Mutex<Vec<Instant>>,
}

#[async_trait]
impl Converter for GatedConverter {
    async fn convert(&self, _path: &Path) -> Result<()> {
        self.gate.notified().await;
        self.finished.lock().push(Instant::now());
        Ok(())
    }
}

#[tokio::test]
async fn test_second_submit_waits_for_first_conversion() {
    let converter = Arc::new(GatedConverter::default());
    let queue = Arc::new(queue(1, 1, 5));
    let mut events = queue.subscribe();
    queue.start(converter.clone());

    // Two independent producers, as two supervisors would be.
    let submit = |name: &'static str| {
        let queue = queue.clone();
        tokio::spawn(async move {
            queue.submit(ConversionJob::new(path(name))).await.unwrap();
            Instant::now()
        })
    };

    let first = submit("first");
    let first_done = first.await.unwrap();
    assert!(matches!(events.recv().await.unwrap(), JobEvent::Started { .. }));

    let second = submit("second");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!second.is_finished(), "second submit must block while the first converts");
    assert_eq!(queue.admitted(), 1);
    assert_eq!(queue.in_flight(), 1);

    converter.gate.notify_one();
    let second_done = tokio::time::timeout(Duration::from_secs(1), second)
        .await
        .expect("second submit should be admitted once the first finishes")
        .unwrap();

    let first_finished = converter.finished.lock()[0];
    assert!(first_done <= first_finished);
    assert!(second_done >= first_finished);

    converter.gate.notify_one();
    queue.stop().await;
}
