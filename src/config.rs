//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::device::LinkSettings;
use crate::error::ConfigError;

/// Main configuration structure
#[derive(Debug, Default, Deserialize, Clone, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
}

/// Serial port configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Wait after opening before the identify command
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    #[serde(default)]
    pub auto_connect: bool,
}

/// Instrument configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct DeviceConfig {
    #[serde(default = "default_identity")]
    pub identity: String,
}

/// Sampling configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct AcquisitionConfig {
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,

    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    #[serde(default = "default_failure_alarm_threshold")]
    pub failure_alarm_threshold: u64,
}

/// Reading log configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LoggingConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_base_dir")]
    pub base_dir: String,

    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    #[serde(default = "default_enqueue_timeout_ms")]
    pub enqueue_timeout_ms: u64,
}

/// Process diagnostics configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct DiagnosticsConfig {
    /// Directory for daily-rolling diagnostic logs; console only when unset
    #[serde(default)]
    pub log_dir: Option<String>,

    #[serde(default = "default_status_interval_s")]
    pub status_interval_s: u64,
}

// Default value functions
fn default_serial_port() -> String { "/dev/ttyACM0".to_string() }
fn default_baud_rate() -> u32 { 115200 }
fn default_timeout_ms() -> u64 { 1000 }
fn default_settle_ms() -> u64 { 1500 }

fn default_identity() -> String { "Magnetometer Controller".to_string() }

fn default_period_ms() -> u64 { 1000 }
fn default_buffer_capacity() -> usize { 36000 }
fn default_failure_alarm_threshold() -> u64 { 5 }

fn default_base_dir() -> String { "./logs".to_string() }
fn default_queue_depth() -> usize { 64 }
fn default_enqueue_timeout_ms() -> u64 { 500 }

fn default_status_interval_s() -> u64 { 10 }

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud_rate: default_baud_rate(),
            timeout_ms: default_timeout_ms(),
            settle_ms: default_settle_ms(),
            auto_connect: false,
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self { identity: default_identity() }
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            period_ms: default_period_ms(),
            buffer_capacity: default_buffer_capacity(),
            failure_alarm_threshold: default_failure_alarm_threshold(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_dir: default_base_dir(),
            queue_depth: default_queue_depth(),
            enqueue_timeout_ms: default_enqueue_timeout_ms(),
        }
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            log_dir: None,
            status_interval_s: default_status_interval_s(),
        }
    }
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use magnetometer_daq::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Serial parameters for the device link
    pub fn link_settings(&self) -> LinkSettings {
        LinkSettings {
            baud_rate: self.serial.baud_rate,
            timeout: Duration::from_millis(self.serial.timeout_ms),
        }
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.serial.port.is_empty() {
            return Err(invalid("serial port cannot be empty"));
        }

        if ![9600, 19200, 38400, 57600, 115200].contains(&self.serial.baud_rate) {
            return Err(invalid("baud_rate must be one of: 9600, 19200, 38400, 57600, 115200"));
        }

        if self.serial.timeout_ms == 0 || self.serial.timeout_ms > 10000 {
            return Err(invalid("timeout_ms must be between 1 and 10000"));
        }

        if self.serial.settle_ms > 10000 {
            return Err(invalid("settle_ms must be between 0 and 10000"));
        }

        if self.device.identity.trim().is_empty() {
            return Err(invalid("device identity cannot be empty"));
        }

        if self.acquisition.period_ms < 10 || self.acquisition.period_ms > 60000 {
            return Err(invalid("period_ms must be between 10 and 60000"));
        }

        if self.serial.timeout_ms > self.acquisition.period_ms {
            return Err(invalid("timeout_ms must not exceed period_ms"));
        }

        if self.acquisition.buffer_capacity == 0 || self.acquisition.buffer_capacity > 1_000_000 {
            return Err(invalid("buffer_capacity must be between 1 and 1000000"));
        }

        if self.acquisition.failure_alarm_threshold == 0 {
            return Err(invalid("failure_alarm_threshold must be greater than 0"));
        }

        if self.logging.enabled && self.logging.base_dir.is_empty() {
            return Err(invalid("logging base_dir cannot be empty when enabled"));
        }

        if self.logging.queue_depth == 0 {
            return Err(invalid("queue_depth must be greater than 0"));
        }

        if self.logging.enqueue_timeout_ms == 0 || self.logging.enqueue_timeout_ms > 60000 {
            return Err(invalid("enqueue_timeout_ms must be between 1 and 60000"));
        }

        if matches!(&self.diagnostics.log_dir, Some(dir) if dir.is_empty()) {
            return Err(invalid("diagnostics log_dir cannot be empty when set"));
        }

        if self.diagnostics.status_interval_s == 0 {
            return Err(invalid("status_interval_s must be greater than 0"));
        }

        Ok(())
    }
}
