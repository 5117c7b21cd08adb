//! # Session Controller Module
//!
//! The handle the presentation layer talks to.
//!
//! This module handles:
//! - Spawning the sampler, acquisition worker and log sink tasks
//! - The connect sequence (open, settle, identify) and disconnect
//! - Starting and stopping logging
//! - Buffer snapshots and status queries
//!
//! Link operations are forwarded to the acquisition worker, so the serial
//! port only ever has one user. Controller operations are serialized with an
//! async mutex.

pub mod state;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::acquisition::sampler::{spawn_sampler, DEFAULT_PERIOD};
use crate::acquisition::worker::{AcquisitionWorker, LinkCommand};
use crate::acquisition::{AcquisitionCounters, AcquisitionStats, DEFAULT_FAILURE_ALARM_THRESHOLD};
use crate::buffer::{ChannelBufferStore, Snapshot, DEFAULT_CAPACITY};
use crate::config::Config;
use crate::device::protocol::EXPECTED_IDENTITY;
use crate::device::Instrument;
use crate::error::{DaqError, LinkError, LogError, UsageError};
use crate::logger::{LogHealth, LogSink, DEFAULT_ENQUEUE_TIMEOUT, DEFAULT_QUEUE_DEPTH};
use crate::reading::{ChannelId, ReadingVector};
pub use state::{LoggingState, SessionState, SharedState, Transition};

/// Default wait between opening the port and identifying (the controller
/// board resets when the port opens)
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(1500);

/// Tuning for one acquisition session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Name the device must answer the identify command with
    pub identity: String,
    pub settle_delay: Duration,
    pub sample_period: Duration,
    pub buffer_capacity: usize,
    pub failure_alarm_threshold: u64,
    pub log_queue_depth: usize,
    pub log_enqueue_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            identity: EXPECTED_IDENTITY.to_string(),
            settle_delay: DEFAULT_SETTLE_DELAY,
            sample_period: DEFAULT_PERIOD,
            buffer_capacity: DEFAULT_CAPACITY,
            failure_alarm_threshold: DEFAULT_FAILURE_ALARM_THRESHOLD,
            log_queue_depth: DEFAULT_QUEUE_DEPTH,
            log_enqueue_timeout: DEFAULT_ENQUEUE_TIMEOUT,
        }
    }
}

impl From<&Config> for SessionConfig {
    fn from(config: &Config) -> Self {
        Self {
            identity: config.device.identity.clone(),
            settle_delay: Duration::from_millis(config.serial.settle_ms),
            sample_period: Duration::from_millis(config.acquisition.period_ms),
            buffer_capacity: config.acquisition.buffer_capacity,
            failure_alarm_threshold: config.acquisition.failure_alarm_threshold,
            log_queue_depth: config.logging.queue_depth,
            log_enqueue_timeout: Duration::from_millis(config.logging.enqueue_timeout_ms),
        }
    }
}

/// A running acquisition session
///
/// Dropping the session stops its tasks and closes the link.
pub struct Session {
    state: Arc<SharedState>,
    store: Arc<ChannelBufferStore>,
    counters: Arc<AcquisitionCounters>,
    sink: LogSink,
    commands: mpsc::Sender<LinkCommand>,
    op_lock: Mutex<()>,
    identity: String,
    settle_delay: Duration,
    tasks: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_state", &self.session_state())
            .field("logging_state", &self.logging_state())
            .field("buffered", &self.store.len())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Start the sampler, worker and log tasks on the current runtime
    ///
    /// The session starts `Disconnected` and `Idle`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use magnetometer_daq::device::{LinkSettings, MagnetometerLink};
    /// use magnetometer_daq::session::{Session, SessionConfig};
    ///
    /// #[tokio::main]
    /// async fn main() -> anyhow::Result<()> {
    ///     let link = MagnetometerLink::new(LinkSettings::default());
    ///     let session = Session::spawn(SessionConfig::default(), link);
    ///
    ///     session.connect("/dev/ttyACM0").await?;
    ///     session.start_logging("./logs")?;
    ///
    ///     let snapshot = session.get_snapshot(&[1, 2, 3])?;
    ///     println!("{} samples buffered", snapshot.len());
    ///     Ok(())
    /// }
    /// ```
    pub fn spawn<I: Instrument + 'static>(config: SessionConfig, link: I) -> Self {
        let state = Arc::new(SharedState::new());
        let store = Arc::new(ChannelBufferStore::new(config.buffer_capacity));
        let counters = Arc::new(AcquisitionCounters::default());

        let (sink, sink_task) = LogSink::spawn(config.log_queue_depth, config.log_enqueue_timeout);
        let (ticks, sampler_task) = spawn_sampler(config.sample_period);
        let (commands, command_rx) = mpsc::channel(8);

        let worker = AcquisitionWorker::new(
            link,
            Arc::clone(&store),
            Arc::clone(&state),
            sink.clone(),
            Arc::clone(&counters),
            config.failure_alarm_threshold,
        );
        let worker_task = tokio::spawn(worker.run(ticks, command_rx));

        info!(
            "Session started (period {:?}, {} samples retained)",
            config.sample_period,
            store.capacity()
        );

        Self {
            state,
            store,
            counters,
            sink,
            commands,
            op_lock: Mutex::new(()),
            identity: config.identity,
            settle_delay: config.settle_delay,
            tasks: vec![sampler_task, worker_task, sink_task],
        }
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> LinkCommand) -> Result<T, LinkError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| LinkError::WorkerGone)?;
        rx.await.map_err(|_| LinkError::WorkerGone)
    }

    /// Open `port`, wait for the device to settle and check its identity
    ///
    /// Any open link is closed first.
    ///
    /// # Errors
    ///
    /// Leaves the session `Failed` and returns:
    /// - `Open`: the port could not be opened
    /// - `Timeout`/`Io`: the identify exchange failed
    /// - `WrongIdentity`: a different device answered
    pub async fn connect(&self, port: &str) -> Result<(), LinkError> {
        let _guard = self.op_lock.lock().await;

        // Leave Connected before the link changes so no tick reads the new port early
        self.state.set_session_state(SessionState::Connecting);
        info!("Connecting to {}", port);

        let opened = self
            .request(|reply| LinkCommand::Connect {
                port: port.to_string(),
                reply,
            })
            .await
            .and_then(|result| result);
        if let Err(e) = opened {
            warn!("Failed to open {}: {}", port, e);
            self.state.set_session_state(SessionState::Failed);
            return Err(e);
        }

        tokio::time::sleep(self.settle_delay).await;

        let identified = self
            .request(|reply| LinkCommand::Identify { reply })
            .await
            .and_then(|result| result)
            .and_then(|name| {
                if name == self.identity {
                    Ok(name)
                } else {
                    Err(LinkError::WrongIdentity {
                        expected: self.identity.clone(),
                        got: name,
                    })
                }
            });

        match identified {
            Ok(name) => {
                self.state.set_session_state(SessionState::Connected);
                info!("Connected to {} on {}", name, port);
                Ok(())
            }
            Err(e) => {
                warn!("Identification on {} failed: {}", port, e);
                self.state.set_session_state(SessionState::Failed);
                let _ = self.request(|reply| LinkCommand::Disconnect { reply }).await;
                Err(e)
            }
        }
    }

    /// Close the link from any state and stop logging
    pub async fn disconnect(&self) {
        let _guard = self.op_lock.lock().await;

        let previous = self.state.set_session_state(SessionState::Disconnected);
        if self.state.stop_logging() == Transition::Changed {
            info!("Logging stopped by disconnect");
        }
        if self.request(|reply| LinkCommand::Disconnect { reply }).await.is_err() {
            debug!("Worker already stopped; nothing to close");
        }

        if previous != SessionState::Disconnected {
            info!("Disconnected (was {})", previous);
        }
    }

    /// Start writing accepted readings under `base`
    ///
    /// # Errors
    ///
    /// - `Usage(InvalidPath)`: `base` is empty
    /// - `Log(InvalidBase)`: `base` is not an existing directory
    pub fn start_logging(&self, base: impl AsRef<Path>) -> Result<Transition, DaqError> {
        let base = base.as_ref();
        if base.as_os_str().is_empty() {
            return Err(UsageError::InvalidPath(String::new()).into());
        }
        if !base.is_dir() {
            return Err(LogError::InvalidBase(base.to_path_buf()).into());
        }

        let transition = self.state.start_logging(base);
        match transition {
            Transition::Changed => info!("Logging to {}", base.display()),
            Transition::Unchanged => debug!("Logging already active"),
        }
        Ok(transition)
    }

    /// Stop logging and wait for queued records to reach the disk
    pub async fn stop_logging(&self) -> Transition {
        let transition = self.state.stop_logging();
        if transition == Transition::Changed {
            if let Err(e) = self.sink.flush().await {
                warn!("Could not flush log sink: {}", e);
            }
            info!("Logging stopped");
        }
        transition
    }

    /// Timestamps plus the values of the given 1-based channels
    ///
    /// # Errors
    ///
    /// Returns `InvalidChannel` for any id outside `1..=12`
    pub fn get_snapshot(&self, channel_ids: &[usize]) -> Result<Snapshot, UsageError> {
        let ids = ChannelId::parse_list(channel_ids)?;
        Ok(self.store.snapshot(&ids))
    }

    /// Snapshot for already validated channel ids
    pub fn snapshot(&self, channel_ids: &[ChannelId]) -> Snapshot {
        self.store.snapshot(channel_ids)
    }

    /// Most recent buffered reading
    pub fn latest(&self) -> Option<ReadingVector> {
        self.store.latest()
    }

    pub fn session_state(&self) -> SessionState {
        self.state.session_state()
    }

    pub fn logging_state(&self) -> LoggingState {
        self.state.logging_state()
    }

    /// Base directory of the current or most recent logging run
    pub fn logging_base(&self) -> Option<PathBuf> {
        self.state.logging_base().map(|base| base.as_ref().clone())
    }

    pub fn stats(&self) -> AcquisitionStats {
        self.counters.snapshot()
    }

    pub fn log_health(&self) -> &LogHealth {
        self.sink.health()
    }

    /// Last log write failure, if any
    pub fn last_log_error(&self) -> Option<String> {
        self.sink.health().last_error()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
