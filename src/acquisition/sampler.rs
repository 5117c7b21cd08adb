//! # Sampler
//!
//! Fixed-period ticker that tells the acquisition worker a cycle is due.
//!
//! The tick signal is a `watch` channel holding the latest tick time. A
//! `watch` keeps one "changed" flag, not a queue: if the worker is still
//! busy when further ticks fire, it sees a single pending cycle stamped with
//! the most recent tick. A slow device therefore drops cycles instead of
//! building a backlog.

use chrono::{DateTime, Local};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::trace;

/// Default sampling period
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(1);

/// Shortest period the ticker runs at
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Worker side of the tick signal
pub type TickReceiver = watch::Receiver<Option<DateTime<Local>>>;

/// Start the ticker on the current runtime
///
/// The first tick fires one full period after the call. Periods below
/// [`MIN_PERIOD`] are raised to it. The task ends once every receiver is
/// dropped.
///
/// # Examples
///
/// ```no_run
/// use magnetometer_daq::acquisition::sampler::{spawn_sampler, DEFAULT_PERIOD};
///
/// #[tokio::main]
/// async fn main() {
///     let (mut ticks, _task) = spawn_sampler(DEFAULT_PERIOD);
///     ticks.changed().await.unwrap();
///     println!("tick at {:?}", *ticks.borrow_and_update());
/// }
/// ```
pub fn spawn_sampler(period: Duration) -> (TickReceiver, JoinHandle<()>) {
    let (tx, rx) = watch::channel(None);
    let handle = tokio::spawn(run(period.max(MIN_PERIOD), tx));
    (rx, handle)
}

async fn run(period: Duration, tx: watch::Sender<Option<DateTime<Local>>>) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // interval() completes its first tick immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let now = Local::now();
        if tx.send(Some(now)).is_err() {
            break;
        }
        trace!("tick {}", now.format("%H:%M:%S:%6f"));
    }
}
