//! Session and logging state shared between the controller and the
//! acquisition worker.
//!
//! The controller is the only writer; the worker and status readers only
//! read. Both fields sit behind their own lock so a reader never blocks on
//! the other concern.

use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Link lifecycle as seen by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Whether accepted readings are written to disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoggingState {
    #[default]
    Idle,
    Logging,
}

/// Outcome of a request that may already be satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Changed,
    Unchanged,
}

#[derive(Debug, Default)]
struct LoggingStatus {
    state: LoggingState,
    base: Option<Arc<PathBuf>>,
}

/// State read by the acquisition worker on every cycle
#[derive(Debug, Default)]
pub struct SharedState {
    session: RwLock<SessionState>,
    logging: RwLock<LoggingStatus>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_state(&self) -> SessionState {
        *self.session.read()
    }

    /// Set the session state, returning the previous one
    pub fn set_session_state(&self, next: SessionState) -> SessionState {
        std::mem::replace(&mut *self.session.write(), next)
    }

    pub fn logging_state(&self) -> LoggingState {
        self.logging.read().state
    }

    /// Base directory of the current or most recent logging run
    pub fn logging_base(&self) -> Option<Arc<PathBuf>> {
        self.logging.read().base.clone()
    }

    /// Run `accept` only while the session is `Connected`
    ///
    /// The session state cannot change until `accept` returns, so anything it
    /// does happens strictly before a concurrent disconnect completes its
    /// state change. `accept` must not read the session state itself.
    pub fn while_connected<R>(&self, accept: impl FnOnce() -> R) -> Option<R> {
        let session = self.session.read();
        (*session == SessionState::Connected).then(accept)
    }

    /// Base directory to log to, only while logging
    pub fn active_log_base(&self) -> Option<Arc<PathBuf>> {
        let logging = self.logging.read();
        match logging.state {
            LoggingState::Logging => logging.base.clone(),
            LoggingState::Idle => None,
        }
    }

    /// Switch to `Logging` under `base`; unchanged if already logging
    pub fn start_logging(&self, base: &Path) -> Transition {
        let mut logging = self.logging.write();
        if logging.state == LoggingState::Logging {
            return Transition::Unchanged;
        }
        logging.state = LoggingState::Logging;
        logging.base = Some(Arc::new(base.to_path_buf()));
        Transition::Changed
    }

    /// Switch to `Idle`; unchanged if already idle
    pub fn stop_logging(&self) -> Transition {
        let mut logging = self.logging.write();
        if logging.state == LoggingState::Idle {
            return Transition::Unchanged;
        }
        logging.state = LoggingState::Idle;
        Transition::Changed
    }
}
