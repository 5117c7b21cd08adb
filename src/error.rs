//! # Error Types
//!
//! Error taxonomy for the acquisition core using `thiserror`.
//!
//! - [`LinkError`]: serial link failures (open, timeout, malformed reply, identity)
//! - [`LogError`]: log tree failures (bad base path, directory or file I/O)
//! - [`UsageError`]: caller mistakes caught before they reach the core
//!
//! Every error here is recoverable: any session can return to
//! `Disconnected`/`Idle`.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Serial link and wire protocol errors
#[derive(Debug, Error)]
pub enum LinkError {
    /// The OS or driver refused to open the port
    #[error("failed to open {port}: {reason}")]
    Open { port: String, reason: String },

    /// Read or write on an open port failed
    #[error("serial I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No complete line arrived within the read timeout
    #[error("no reply within {0:?}")]
    Timeout(Duration),

    /// A reply token could not be parsed as a float
    #[error("malformed reply token {token:?} in line {line:?}")]
    Malformed { token: String, line: String },

    /// A reading reply carried the wrong number of values
    #[error("expected {expected} values, got {got}")]
    TokenCount { expected: usize, got: usize },

    /// The device answered the identify command with an unexpected name
    #[error("unexpected device identity {got:?} (expected {expected:?})")]
    WrongIdentity { expected: String, got: String },

    /// A command was issued while no port is open
    #[error("link is not connected")]
    NotConnected,

    /// The acquisition worker task is no longer running
    #[error("acquisition worker is not running")]
    WorkerGone,
}

/// Log tree errors
#[derive(Debug, Error)]
pub enum LogError {
    /// The requested base directory does not exist or is not a directory
    #[error("log base {0:?} is not an existing directory")]
    InvalidBase(PathBuf),

    /// A partition directory could not be created
    #[error("failed to create {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Opening or appending to a day file failed
    #[error("failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The log sink did not accept a record in time and it was dropped
    #[error("log queue stalled for {0:?}, record dropped")]
    QueueStalled(Duration),

    /// The log sink task is no longer running
    #[error("log sink is not running")]
    SinkClosed,
}

/// Caller mistakes
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UsageError {
    /// Channel ids are 1-based and limited to the instrument's channel count
    #[error("channel {0} is out of range (1..={})", crate::reading::CHANNEL_COUNT)]
    InvalidChannel(usize),

    /// A path argument was empty or otherwise unusable
    #[error("invalid path argument: {0:?}")]
    InvalidPath(String),
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing failed
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of its valid range
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Umbrella error for the crate
#[derive(Debug, Error)]
pub enum DaqError {
    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Log(#[from] LogError),

    #[error(transparent)]
    Usage(#[from] UsageError),

}
