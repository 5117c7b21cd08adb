//! # Magnetometer DAQ
//!
//! Headless acquisition daemon for a 12-channel magnetometer controller.
//!
//! Samples the controller once per period over USB serial, keeps a rolling
//! window of readings in memory and optionally appends every reading to a
//! date-partitioned text log.

use anyhow::{Context, Result};
use std::path::Path;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use magnetometer_daq::config::Config;
use magnetometer_daq::device::MagnetometerLink;
use magnetometer_daq::session::{Session, SessionConfig};

/// Configuration file used when no path is given on the command line
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// File name prefix for rolling diagnostic logs
const DIAGNOSTIC_LOG_PREFIX: &str = "magnetometer-daq.log";

/// Main entry point for the Magnetometer DAQ daemon
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load configuration (first argument, or `config/default.toml`)
///    - Set up logging with tracing subscriber
///    - Spawn the acquisition session
///    - Connect and start logging if configured to
///
/// 2. **Main Loop**
///    - Log the latest reading and cycle counters every status interval
///    - Handle Ctrl+C for graceful shutdown
///
/// 3. **Graceful Shutdown**
///    - Stop logging and drain queued records
///    - Close the device link
///
/// # Errors
///
/// Returns error if the configuration file exists but is invalid, or the
/// log directory cannot be created.
///
/// # Examples
///
/// ```bash
/// cargo run --release -- config/default.toml
/// ```
///
/// Expected output:
/// ```text
/// INFO magnetometer_daq: Magnetometer DAQ v0.1.0 starting...
/// INFO magnetometer_daq::session: Connected to Magnetometer Controller on /dev/ttyACM0
/// INFO magnetometer_daq: 10 samples, 0 skipped, latest at 12:00:10
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let (config, config_missing) = if Path::new(&config_path).exists() {
        let config = Config::load(&config_path)
            .with_context(|| format!("Failed to load configuration from {}", config_path))?;
        (config, false)
    } else {
        (Config::default(), true)
    };

    let _guard = init_tracing(&config)?;

    info!("Magnetometer DAQ v{} starting...", env!("CARGO_PKG_VERSION"));
    if config_missing {
        warn!("Configuration file {} not found, using defaults", config_path);
    } else {
        info!("Loaded configuration from {}", config_path);
    }

    let link = MagnetometerLink::new(config.link_settings());
    let session = Session::spawn(SessionConfig::from(&config), link);

    if config.serial.auto_connect {
        if let Err(e) = session.connect(&config.serial.port).await {
            error!("Failed to connect to {}: {}", config.serial.port, e);
        }
    }

    if config.logging.enabled {
        std::fs::create_dir_all(&config.logging.base_dir).with_context(|| {
            format!("Failed to create log directory {}", config.logging.base_dir)
        })?;
        session.start_logging(&config.logging.base_dir)?;
        info!("Logging readings under {}", config.logging.base_dir);
    }

    let mut status_interval = interval(Duration::from_secs(config.diagnostics.status_interval_s));
    status_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!("Press Ctrl+C to exit");

    loop {
        tokio::select! {
            _ = status_interval.tick() => {
                log_status(&session);
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                session.stop_logging().await;
                session.disconnect().await;
                let stats = session.stats();
                info!(
                    "Total samples: {}, skipped cycles: {}, log records written: {}",
                    stats.samples,
                    stats.skipped_cycles,
                    session.log_health().records_written()
                );
                break;
            }
        }
    }

    Ok(())
}

/// Console logging, plus daily rolling files when a diagnostics directory is
/// configured. The returned guard must outlive the runtime.
fn init_tracing(config: &Config) -> Result<Option<WorkerGuard>> {
    let filter = || EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());

    match &config.diagnostics.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create diagnostics directory {}", dir))?;
            let appender = tracing_appender::rolling::daily(dir, DIAGNOSTIC_LOG_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter()).init();
            Ok(None)
        }
    }
}

fn log_status(session: &Session) {
    let stats = session.stats();
    let state = session.session_state();
    match session.latest() {
        Some(reading) => info!(
            "[{}] {} samples, {} skipped, latest at {}",
            state,
            stats.samples,
            stats.skipped_cycles,
            reading.timestamp.format("%H:%M:%S")
        ),
        None => info!("[{}] no readings yet", state),
    }

    if let Some(err) = session.last_log_error() {
        warn!("Last log write error: {}", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_path() {
        assert_eq!(DEFAULT_CONFIG_PATH, "config/default.toml");
    }

    #[test]
    fn test_shipped_config_is_valid() {
        let contents = include_str!("../config/default.toml");
        let config = Config::from_toml(contents).expect("shipped config should parse");
        assert_eq!(config.serial.baud_rate, 115_200);
        assert_eq!(config.acquisition.period_ms, 1000);
    }
}
