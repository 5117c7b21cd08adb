//! Trait abstraction for serial port operations to enable testing

use async_trait::async_trait;
use bytes::BytesMut;
use std::io;
use tokio_serial::SerialPortBuilderExt;

use super::LinkSettings;
use crate::error::LinkError;

/// Trait for line-oriented serial port I/O
#[async_trait]
pub trait SerialPortIO: Send {
    /// Write all data to the port
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Flush the output buffer
    async fn flush(&mut self) -> io::Result<()>;

    /// Read up to and including the next `\n`
    ///
    /// Must be cancel safe: bytes received before a cancelled call are kept
    /// for the next call (or dropped by [`discard_input`](Self::discard_input)).
    async fn read_line(&mut self) -> io::Result<String>;

    /// Drop everything received but not yet read
    fn discard_input(&mut self) -> io::Result<()>;
}

/// Opens ports for the link, so tests can hand out mocks instead of devices
pub trait PortOpener: Send + Sync {
    fn open(&self, path: &str, settings: &LinkSettings) -> Result<Box<dyn SerialPortIO>, LinkError>;
}

/// Opens real serial devices with `tokio-serial` at 8N1, no flow control
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialOpener;

impl PortOpener for SerialOpener {
    fn open(&self, path: &str, settings: &LinkSettings) -> Result<Box<dyn SerialPortIO>, LinkError> {
        let port = tokio_serial::new(path, settings.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .timeout(settings.timeout)
            .open_native_async()
            .map_err(|e| LinkError::Open {
                port: path.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Box::new(TokioSerialPort::new(port)))
    }
}

/// Wrapper around tokio_serial::SerialStream that implements SerialPortIO
pub struct TokioSerialPort {
    port: tokio_serial::SerialStream,
    pending: BytesMut,
}

impl TokioSerialPort {
    pub fn new(port: tokio_serial::SerialStream) -> Self {
        Self {
            port,
            pending: BytesMut::with_capacity(256),
        }
    }
}

#[async_trait]
impl SerialPortIO for TokioSerialPort {
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        use tokio::io::AsyncWriteExt;
        self.port.write_all(data).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        use tokio::io::AsyncWriteExt;
        self.port.flush().await
    }

    async fn read_line(&mut self) -> io::Result<String> {
        use tokio::io::AsyncReadExt;

        loop {
            if let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
                let line = self.pending.split_to(pos + 1);
                return Ok(String::from_utf8_lossy(&line).into_owned());
            }

            self.pending.reserve(256);
            if self.port.read_buf(&mut self.pending).await? == 0 {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "serial port closed"));
            }
        }
    }

    fn discard_input(&mut self) -> io::Result<()> {
        use tokio_serial::SerialPort;

        self.pending.clear();
        self.port
            .clear(tokio_serial::ClearBuffer::Input)
            .map_err(io::Error::from)
    }
}
