//! # Acquisition Worker
//!
//! The one task that touches the device link. It waits on two inputs:
//!
//! - link commands from the session controller (connect, identify,
//!   disconnect), each answered on a `oneshot` reply channel
//! - the sampler's tick signal
//!
//! Because both are handled by the same loop, a connect or disconnect can
//! never overlap an in-flight read.
//!
//! Per tick: if the session is not `Connected` the tick is discarded.
//! Otherwise one vector is read. A successful read is appended to the buffer
//! store, unless the session left `Connected` while the read was in flight,
//! and, while logging, handed to the log sink. A failed read skips the
//! cycle; the next tick drives the next attempt.

use chrono::{DateTime, Local};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::sampler::TickReceiver;
use super::AcquisitionCounters;
use crate::buffer::ChannelBufferStore;
use crate::device::Instrument;
use crate::error::LinkError;
use crate::logger::LogSink;
use crate::reading::ReadingVector;
use crate::session::state::{SessionState, SharedState};

/// Requests the controller sends to the worker
#[derive(Debug)]
pub enum LinkCommand {
    Connect {
        port: String,
        reply: oneshot::Sender<Result<(), LinkError>>,
    },
    Identify {
        reply: oneshot::Sender<Result<String, LinkError>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
}

/// What one tick amounted to
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CycleOutcome {
    /// Not connected; nothing was read
    Discarded,
    /// A reading was appended
    Sampled(ReadingVector),
    /// The device read failed; nothing was appended
    Skipped,
}

/// Owner of the device link and sole writer of the buffer store
pub struct AcquisitionWorker<I: Instrument> {
    link: I,
    store: Arc<ChannelBufferStore>,
    state: Arc<SharedState>,
    sink: LogSink,
    counters: Arc<AcquisitionCounters>,
    alarm_threshold: u64,
}

impl<I: Instrument> AcquisitionWorker<I> {
    pub fn new(
        link: I,
        store: Arc<ChannelBufferStore>,
        state: Arc<SharedState>,
        sink: LogSink,
        counters: Arc<AcquisitionCounters>,
        alarm_threshold: u64,
    ) -> Self {
        Self {
            link,
            store,
            state,
            sink,
            counters,
            alarm_threshold: alarm_threshold.max(1),
        }
    }

    /// Serve commands and ticks until both sources are gone
    ///
    /// Commands are served first when both are ready.
    pub async fn run(mut self, mut ticks: TickReceiver, mut commands: mpsc::Receiver<LinkCommand>) {
        info!("Acquisition worker started");

        loop {
            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },

                changed = ticks.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let stamp = *ticks.borrow_and_update();
                    if let Some(stamp) = stamp {
                        self.on_tick(stamp).await;
                    }
                }
            }
        }

        self.link.disconnect().await;
        info!("Acquisition worker stopped");
    }

    /// Execute one controller request and send its reply
    pub async fn handle_command(&mut self, command: LinkCommand) {
        match command {
            LinkCommand::Connect { port, reply } => {
                let result = self.link.connect(&port).await;
                if result.is_ok() {
                    self.counters.reset_streak();
                }
                let _ = reply.send(result);
            }
            LinkCommand::Identify { reply } => {
                let _ = reply.send(self.link.identify().await);
            }
            LinkCommand::Disconnect { reply } => {
                self.link.disconnect().await;
                let _ = reply.send(());
            }
        }
    }

    /// Run one sampling cycle for a tick stamped `stamp`
    pub async fn on_tick(&mut self, stamp: DateTime<Local>) -> CycleOutcome {
        if self.state.session_state() != SessionState::Connected {
            return CycleOutcome::Discarded;
        }

        let values = match self.link.read_vector().await {
            Ok(values) => values,
            Err(e) => {
                self.report_failure(&e);
                return CycleOutcome::Skipped;
            }
        };

        let reading = ReadingVector::new(stamp, values);
        if self.state.while_connected(|| self.store.append(&reading)).is_none() {
            debug!("Dropped reading at {}: link closed during read", stamp.format("%H:%M:%S"));
            return CycleOutcome::Discarded;
        }
        self.counters.record_success();
        debug!("Sampled {} ({} missing)", stamp.format("%H:%M:%S"), reading.missing_count());

        let state = &self.state;
        if let Err(e) = self.sink.submit(reading, || state.active_log_base()).await {
            error!("Reading at {} not logged: {}", stamp.format("%H:%M:%S"), e);
            self.sink.health().record_error(&e);
        }

        CycleOutcome::Sampled(reading)
    }

    fn report_failure(&self, err: &LinkError) {
        let streak = self.counters.record_failure();
        warn!("Skipped sampling cycle: {}", err);

        if streak == self.alarm_threshold {
            error!(
                "Device read failed {} cycles in a row; buffers are not being updated",
                streak
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MockInstrument;
    use crate::logger::{writer, DEFAULT_ENQUEUE_TIMEOUT, DEFAULT_QUEUE_DEPTH};
    use crate::reading::{ChannelId, ChannelValues, CHANNEL_COUNT};
    use chrono::{Duration as ChronoDuration, TimeZone};
    use mockall::Sequence;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::watch;

    struct Fixture {
        store: Arc<ChannelBufferStore>,
        state: Arc<SharedState>,
        sink: LogSink,
        counters: Arc<AcquisitionCounters>,
    }

    impl Fixture {
        fn new() -> Self {
            let (sink, _handle) = LogSink::spawn(DEFAULT_QUEUE_DEPTH, DEFAULT_ENQUEUE_TIMEOUT);
            Self::with_sink(sink)
        }

        fn with_sink(sink: LogSink) -> Self {
            Self {
                store: Arc::new(ChannelBufferStore::new(100)),
                state: Arc::new(SharedState::new()),
                sink,
                counters: Arc::new(AcquisitionCounters::default()),
            }
        }

        fn worker(&self, link: MockInstrument) -> AcquisitionWorker<MockInstrument> {
            AcquisitionWorker::new(
                link,
                Arc::clone(&self.store),
                Arc::clone(&self.state),
                self.sink.clone(),
                Arc::clone(&self.counters),
                3,
            )
        }
    }

    fn stamp(second: i64) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 9, 12, 15, 30, 0).unwrap()
            + ChronoDuration::seconds(second)
            + ChronoDuration::microseconds(123_456)
    }

    fn ramp() -> ChannelValues {
        let mut values = [0.0; CHANNEL_COUNT];
        for (i, v) in values.iter_mut().enumerate() {
            *v = (i + 1) as f64 / 100.0;
        }
        values
    }

    #[tokio::test]
    async fn test_ticks_discarded_while_not_connected() {
        let fx = Fixture::new();
        let mut link = MockInstrument::new();
        link.expect_read_vector().times(0);
        let mut worker = fx.worker(link);

        for state in [SessionState::Disconnected, SessionState::Connecting, SessionState::Failed] {
            fx.state.set_session_state(state);
            for s in 0..5 {
                assert_eq!(worker.on_tick(stamp(s)).await, CycleOutcome::Discarded);
            }
        }
        assert!(fx.store.is_empty());
        assert_eq!(fx.counters.snapshot(), Default::default());
    }

    #[tokio::test]
    async fn test_connected_tick_appends_with_tick_timestamp() {
        let fx = Fixture::new();
        let mut link = MockInstrument::new();
        link.expect_read_vector().times(1).returning(|| Ok(ramp()));
        let mut worker = fx.worker(link);
        fx.state.set_session_state(SessionState::Connected);

        let outcome = worker.on_tick(stamp(0)).await;
        assert_eq!(outcome, CycleOutcome::Sampled(ReadingVector::new(stamp(0), ramp())));
        assert_eq!(fx.store.latest(), Some(ReadingVector::new(stamp(0), ramp())));
        assert_eq!(fx.counters.snapshot().samples, 1);
    }

    #[tokio::test]
    async fn test_link_error_skips_cycle_and_loop_continues() {
        let fx = Fixture::new();
        let mut link = MockInstrument::new();
        let mut seq = Sequence::new();
        link.expect_read_vector()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Err(LinkError::Timeout(Duration::from_secs(1))));
        link.expect_read_vector()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Err(LinkError::TokenCount { expected: 12, got: 4 }));
        link.expect_read_vector()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(ramp()));
        let mut worker = fx.worker(link);
        fx.state.set_session_state(SessionState::Connected);

        assert_eq!(worker.on_tick(stamp(0)).await, CycleOutcome::Skipped);
        assert_eq!(worker.on_tick(stamp(1)).await, CycleOutcome::Skipped);
        assert!(fx.store.is_empty());
        assert_eq!(fx.counters.snapshot().consecutive_failures, 2);

        assert!(matches!(worker.on_tick(stamp(2)).await, CycleOutcome::Sampled(_)));
        let stats = fx.counters.snapshot();
        assert_eq!(stats.samples, 1);
        assert_eq!(stats.skipped_cycles, 2);
        assert_eq!(stats.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_no_log_line_when_idle() {
        let dir = TempDir::new().unwrap();
        let fx = Fixture::new();
        let mut link = MockInstrument::new();
        link.expect_read_vector().returning(|| Ok(ramp()));
        let mut worker = fx.worker(link);
        fx.state.set_session_state(SessionState::Connected);

        fx.state.start_logging(dir.path());
        fx.state.stop_logging();
        worker.on_tick(stamp(0)).await;
        fx.sink.flush().await.unwrap();

        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
        assert_eq!(fx.store.len(), 1);
    }

    #[tokio::test]
    async fn test_sentinel_scenario_buffers_and_logs() {
        let dir = TempDir::new().unwrap();
        let fx = Fixture::new();
        let mut link = MockInstrument::new();
        let mut seq = Sequence::new();
        link.expect_read_vector()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(ramp()));
        link.expect_read_vector()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| {
                let mut values = ramp();
                values[0] = f64::NAN;
                values[1] = 0.2;
                Ok(values)
            });
        let mut worker = fx.worker(link);
        fx.state.set_session_state(SessionState::Connected);
        fx.state.start_logging(dir.path());

        worker.on_tick(stamp(0)).await;
        worker.on_tick(stamp(1)).await;
        fx.sink.flush().await.unwrap();

        let ch1 = ChannelId::new(1).unwrap();
        let snap = fx.store.snapshot(&[ch1]);
        let values = snap.channel(ch1).unwrap();
        assert_eq!(values[0], 0.01);
        assert!(values[1].is_nan());

        let path = writer::partition_path(dir.path(), &stamp(0));
        let contents = fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with('#'));

        let first: Vec<&str> = lines[1].split('\t').collect();
        assert_eq!(first[0], "15:30:00:123456");
        let expected: Vec<String> = ramp().iter().map(|v| format!("{:.6}", v)).collect();
        assert_eq!(&first[1..], expected.as_slice());

        let second: Vec<&str> = lines[2].split('\t').collect();
        assert_eq!(second[0], "15:30:01:123456");
        assert_eq!(second[1], "nan");
        assert_eq!(second[2], "0.200000");
    }

    #[tokio::test]
    async fn test_failed_read_writes_no_log_line() {
        let dir = TempDir::new().unwrap();
        let fx = Fixture::new();
        let mut link = MockInstrument::new();
        link.expect_read_vector()
            .returning(|| Err(LinkError::Timeout(Duration::from_secs(1))));
        let mut worker = fx.worker(link);
        fx.state.set_session_state(SessionState::Connected);
        fx.state.start_logging(dir.path());

        worker.on_tick(stamp(0)).await;
        fx.sink.flush().await.unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_log_queue_bounds_cycle_and_keeps_reading() {
        let dir = TempDir::new().unwrap();
        let enqueue_timeout = Duration::from_millis(500);
        // Nothing drains the queue, as with a disk that stopped answering
        let (sink, _queue) = LogSink::unstarted(1, enqueue_timeout);
        let fx = Fixture::with_sink(sink);
        let mut link = MockInstrument::new();
        link.expect_read_vector().times(2).returning(|| Ok(ramp()));
        let mut worker = fx.worker(link);
        fx.state.set_session_state(SessionState::Connected);
        fx.state.start_logging(dir.path());

        assert!(matches!(worker.on_tick(stamp(0)).await, CycleOutcome::Sampled(_)));
        assert_eq!(fx.sink.health().write_failures(), 0);

        let started = tokio::time::Instant::now();
        assert!(matches!(worker.on_tick(stamp(1)).await, CycleOutcome::Sampled(_)));
        let waited = started.elapsed();
        assert!(waited >= enqueue_timeout && waited < enqueue_timeout + Duration::from_millis(10));

        assert_eq!(fx.store.len(), 2);
        assert_eq!(fx.store.latest().unwrap().timestamp, stamp(1));
        assert_eq!(fx.sink.health().write_failures(), 1);
        assert!(fx.sink.health().last_error().unwrap().contains("stalled"));
    }

    #[tokio::test]
    async fn test_commands_are_forwarded_to_link() {
        let fx = Fixture::new();
        let mut link = MockInstrument::new();
        link.expect_connect()
            .withf(|port| port == "/dev/ttyACM0")
            .times(1)
            .returning(|_| Ok(()));
        link.expect_identify()
            .times(1)
            .returning(|| Ok("Magnetometer Controller".to_string()));
        link.expect_disconnect().times(1).returning(|| ());
        let mut worker = fx.worker(link);

        let (tx, rx) = oneshot::channel();
        worker
            .handle_command(LinkCommand::Connect { port: "/dev/ttyACM0".into(), reply: tx })
            .await;
        assert!(rx.await.unwrap().is_ok());

        let (tx, rx) = oneshot::channel();
        worker.handle_command(LinkCommand::Identify { reply: tx }).await;
        assert_eq!(rx.await.unwrap().unwrap(), "Magnetometer Controller");

        let (tx, rx) = oneshot::channel();
        worker.handle_command(LinkCommand::Disconnect { reply: tx }).await;
        rx.await.unwrap();
    }

    #[tokio::test]
    async fn test_run_loop_samples_on_signal_and_stops() {
        let fx = Fixture::new();
        let mut link = MockInstrument::new();
        link.expect_read_vector().times(2).returning(|| Ok(ramp()));
        link.expect_disconnect().times(1).returning(|| ());
        let worker = fx.worker(link);
        fx.state.set_session_state(SessionState::Connected);

        let (tick_tx, tick_rx) = watch::channel(None);
        let (cmd_tx, cmd_rx) = mpsc::channel(4);
        let handle = tokio::spawn(worker.run(tick_rx, cmd_rx));

        for s in 0..2 {
            tick_tx.send(Some(stamp(s))).unwrap();
            while fx.store.len() < (s + 1) as usize {
                tokio::task::yield_now().await;
            }
        }

        drop(cmd_tx);
        handle.await.unwrap();
        assert_eq!(fx.store.len(), 2);
        let snap = fx.store.snapshot(&[]);
        assert_eq!(snap.timestamps, vec![stamp(0), stamp(1)]);
    }
}
