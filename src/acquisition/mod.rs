//! # Acquisition Module
//!
//! The sampling loop: a fixed-period [`sampler`] raising a tick signal and a
//! single [`worker`] task that owns the device link, reads one vector per
//! tick while connected, fills the buffer store and feeds the log sink.

pub mod sampler;
pub mod worker;

use std::sync::atomic::{AtomicU64, Ordering};

/// Default number of consecutive failed cycles before an alarm is raised
pub const DEFAULT_FAILURE_ALARM_THRESHOLD: u64 = 5;

/// Cycle counters, updated by the worker and read by anyone
#[derive(Debug, Default)]
pub struct AcquisitionCounters {
    samples: AtomicU64,
    skipped: AtomicU64,
    consecutive_failures: AtomicU64,
}

/// Point-in-time copy of [`AcquisitionCounters`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AcquisitionStats {
    /// Cycles that appended a reading
    pub samples: u64,
    /// Cycles dropped because the device read failed
    pub skipped_cycles: u64,
    /// Failed cycles since the last successful one
    pub consecutive_failures: u64,
}

impl AcquisitionCounters {
    pub(crate) fn record_success(&self) {
        self.samples.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    /// Count a skipped cycle, returning the length of the failure streak
    pub(crate) fn record_failure(&self) -> u64 {
        self.skipped.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn reset_streak(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> AcquisitionStats {
        AcquisitionStats {
            samples: self.samples.load(Ordering::Relaxed),
            skipped_cycles: self.skipped.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
        }
    }
}
