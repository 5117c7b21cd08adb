//! # Log Sink Module
//!
//! Persists accepted readings to the partitioned text tree.
//!
//! This module handles:
//! - Formatting and appending records ([`writer`])
//! - A background task that performs the writes strictly in submission order
//! - Bounding how long the acquisition worker may wait on a slow disk
//! - Tracking write failures without touching session or buffer state

pub mod writer;

use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::error::LogError;
use crate::reading::ReadingVector;

/// Default number of records that may wait for the disk
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

/// Default bound on handing one record to the sink
pub const DEFAULT_ENQUEUE_TIMEOUT: Duration = Duration::from_millis(500);

pub(crate) enum LogJob {
    Write {
        base: Arc<PathBuf>,
        reading: ReadingVector,
    },
    Flush(oneshot::Sender<()>),
}

/// Write counters and the most recent failure
#[derive(Debug, Default)]
pub struct LogHealth {
    written: AtomicU64,
    failed: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl LogHealth {
    pub fn records_written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    pub fn write_failures(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    pub fn record_error(&self, err: &LogError) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        *self.last_error.lock() = Some(err.to_string());
    }

    fn record_written(&self) {
        self.written.fetch_add(1, Ordering::Relaxed);
    }
}

/// Handle for submitting records to the background log task
#[derive(Clone)]
pub struct LogSink {
    tx: mpsc::Sender<LogJob>,
    enqueue_timeout: Duration,
    health: Arc<LogHealth>,
    // Submitters hold it shared; flush takes it exclusively before queueing
    // its barrier
    admission: Arc<RwLock<()>>,
}

impl std::fmt::Debug for LogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSink")
            .field("enqueue_timeout", &self.enqueue_timeout)
            .field("health", &self.health)
            .finish_non_exhaustive()
    }
}

impl LogSink {
    /// Start the log task on the current runtime
    ///
    /// # Arguments
    ///
    /// * `queue_depth` - Records that may be pending before submitters wait
    /// * `enqueue_timeout` - How long [`submit`](Self::submit) waits for room
    pub fn spawn(queue_depth: usize, enqueue_timeout: Duration) -> (Self, JoinHandle<()>) {
        let (sink, rx) = Self::unstarted(queue_depth, enqueue_timeout);
        let handle = tokio::spawn(run(rx, Arc::clone(&sink.health)));
        (sink, handle)
    }

    /// Sink plus the job queue it feeds, with no task draining it yet
    pub(crate) fn unstarted(
        queue_depth: usize,
        enqueue_timeout: Duration,
    ) -> (Self, mpsc::Receiver<LogJob>) {
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        let sink = Self {
            tx,
            enqueue_timeout,
            health: Arc::new(LogHealth::default()),
            admission: Arc::new(RwLock::new(())),
        };
        (sink, rx)
    }

    /// Queue `reading` under the base `active_base` returns, if any
    ///
    /// The base is looked up after admission, so a [`flush`](Self::flush)
    /// that starts once logging has been switched off also covers any record
    /// submitted while it was still on. Returns whether a record was queued.
    ///
    /// # Errors
    ///
    /// - `QueueStalled`: the record could not be queued within the enqueue
    ///   timeout and was dropped
    /// - `SinkClosed`: the log task has stopped
    pub async fn submit(
        &self,
        reading: ReadingVector,
        active_base: impl FnOnce() -> Option<Arc<PathBuf>>,
    ) -> Result<bool, LogError> {
        let queued = async {
            let _admitted = self.admission.read().await;
            match active_base() {
                Some(base) => self
                    .tx
                    .send(LogJob::Write { base, reading })
                    .await
                    .map(|()| true)
                    .map_err(|_| LogError::SinkClosed),
                None => Ok(false),
            }
        };

        tokio::time::timeout(self.enqueue_timeout, queued)
            .await
            .map_err(|_| LogError::QueueStalled(self.enqueue_timeout))?
    }

    /// Wait until every record submitted so far has been written (or failed)
    pub async fn flush(&self) -> Result<(), LogError> {
        let (tx, rx) = oneshot::channel();
        {
            let _barrier = self.admission.write().await;
            self.tx
                .send(LogJob::Flush(tx))
                .await
                .map_err(|_| LogError::SinkClosed)?;
        }
        rx.await.map_err(|_| LogError::SinkClosed)
    }

    pub fn health(&self) -> &LogHealth {
        &self.health
    }
}

async fn run(mut rx: mpsc::Receiver<LogJob>, health: Arc<LogHealth>) {
    while let Some(job) = rx.recv().await {
        match job {
            LogJob::Write { base, reading } => {
                let result =
                    tokio::task::spawn_blocking(move || writer::append_reading(&base, &reading)).await;

                match result {
                    Ok(Ok(path)) => {
                        health.record_written();
                        debug!("Logged reading to {}", path.display());
                    }
                    Ok(Err(e)) => {
                        error!("Log write failed: {}", e);
                        health.record_error(&e);
                    }
                    Err(e) => {
                        error!("Log write task failed: {}", e);
                        health.record_error(&LogError::SinkClosed);
                    }
                }
            }
            LogJob::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("Log sink stopped");
}
