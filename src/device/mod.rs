//! # Device Link Module
//!
//! Handles the serial link to the magnetometer controller.
//!
//! This module handles:
//! - Opening the serial port (115200 baud, 8N1 by default)
//! - The `I` identify and `R` read request/response exchanges
//! - Bounding every reply with a read timeout
//! - Discarding stale input before each command
//!
//! All link operations are driven by the acquisition worker, which is the
//! only owner of the port.

pub mod port_trait;
pub mod protocol;

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::error::LinkError;
use crate::reading::ChannelValues;
use port_trait::{PortOpener, SerialOpener, SerialPortIO};
use protocol::{parse_identity_line, parse_reading_line, CMD_IDENTIFY, CMD_READ, DEFAULT_BAUD_RATE};

/// Default reply timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Serial parameters for a link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSettings {
    pub baud_rate: u32,
    /// Upper bound on waiting for one reply line
    pub timeout: Duration,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Request/response access to one instrument
///
/// Implementations are not shared: exactly one task drives an instrument.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Instrument: Send {
    /// Open the link on `port`, replacing any open one
    async fn connect(&mut self, port: &str) -> Result<(), LinkError>;

    /// Ask the instrument for its name
    async fn identify(&mut self) -> Result<String, LinkError>;

    /// Read all channels once
    async fn read_vector(&mut self) -> Result<ChannelValues, LinkError>;

    /// Release the link; safe to call when already closed
    async fn disconnect(&mut self);

    /// Whether a port is currently open
    fn is_open(&self) -> bool;
}

/// Serial link to the magnetometer controller
pub struct MagnetometerLink {
    opener: Box<dyn PortOpener>,
    settings: LinkSettings,
    port: Option<Box<dyn SerialPortIO>>,
    device_path: Option<String>,
}

impl std::fmt::Debug for MagnetometerLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MagnetometerLink")
            .field("settings", &self.settings)
            .field("device_path", &self.device_path)
            .finish_non_exhaustive()
    }
}

impl MagnetometerLink {
    /// Create a closed link that opens real serial devices
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use magnetometer_daq::device::{Instrument, LinkSettings, MagnetometerLink};
    ///
    /// #[tokio::main]
    /// async fn main() -> anyhow::Result<()> {
    ///     let mut link = MagnetometerLink::new(LinkSettings::default());
    ///     link.connect("/dev/ttyACM0").await?;
    ///     println!("{}", link.identify().await?);
    ///     Ok(())
    /// }
    /// ```
    pub fn new(settings: LinkSettings) -> Self {
        Self::with_opener(settings, Box::new(SerialOpener))
    }

    /// Create a closed link with a custom port opener
    pub fn with_opener(settings: LinkSettings, opener: Box<dyn PortOpener>) -> Self {
        Self {
            opener,
            settings,
            port: None,
            device_path: None,
        }
    }

    /// Path of the open port, if any
    pub fn device_path(&self) -> Option<&str> {
        self.device_path.as_deref()
    }

    /// Send one command byte and wait for one reply line
    async fn exchange(&mut self, command: u8) -> Result<String, LinkError> {
        let timeout = self.settings.timeout;
        let port = self.port.as_mut().ok_or(LinkError::NotConnected)?;

        port.discard_input()?;
        port.write_all(&[command]).await?;
        port.flush().await?;
        debug!("Sent command {:?}", command as char);

        let line = tokio::time::timeout(timeout, port.read_line())
            .await
            .map_err(|_| LinkError::Timeout(timeout))??;

        debug!("Received reply ({} bytes)", line.len());
        Ok(line)
    }
}

#[async_trait]
impl Instrument for MagnetometerLink {
    async fn connect(&mut self, port: &str) -> Result<(), LinkError> {
        self.disconnect().await;

        debug!("Opening serial port {} at {} baud", port, self.settings.baud_rate);
        let handle = self.opener.open(port, &self.settings)?;
        self.port = Some(handle);
        self.device_path = Some(port.to_string());
        info!("Opened serial port {}", port);
        Ok(())
    }

    async fn identify(&mut self) -> Result<String, LinkError> {
        let line = self.exchange(CMD_IDENTIFY).await?;
        Ok(parse_identity_line(&line).to_string())
    }

    async fn read_vector(&mut self) -> Result<ChannelValues, LinkError> {
        let line = self.exchange(CMD_READ).await?;
        parse_reading_line(&line)
    }

    async fn disconnect(&mut self) {
        if self.port.take().is_some() {
            if let Some(path) = self.device_path.take() {
                info!("Closed serial port {}", path);
            }
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }
}
