//! Serial port transport for device communication.
//!
//! This module provides [`SerialTransport`], which implements the
//! [`Transport`] trait for USB virtual COM ports and physical RS-232 lines
//! to rigs and hardware keyers.
//!
//! Port names are checked before anything is opened: `COMn` (or the
//! `\\.\COMn` form) on Windows, an absolute `/dev/...` path elsewhere.
//!
//! # Example
//!
//! ```no_run
//! use shackctl_core::{SerialSettings, Transport};
//! use shackctl_transport::{ControlLines, SerialTransport};
//! use std::time::Duration;
//!
//! # async fn example() -> shackctl_core::Result<()> {
//! let settings = SerialSettings { baud_rate: 38400, ..Default::default() };
//! let mut transport =
//!     SerialTransport::open("/dev/ttyUSB0", &settings, ControlLines::Deassert).await?;
//! transport.send(b"FA;", Duration::from_millis(200)).await?;
//!
//! let mut buf = [0u8; 64];
//! let n = transport.receive(&mut buf, Duration::from_secs(1)).await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use shackctl_core::error::{Error, Result};
use shackctl_core::transport::Transport;
use shackctl_core::types::{DataBits, FlowControl, Parity, SerialSettings, StopBits};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialStream};

/// What to do with DTR and RTS right after the port opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlLines {
    /// Drive both lines low.
    ///
    /// Many transceivers route DTR/RTS to CW key and PTT inputs; if the OS
    /// asserts DTR on open the radio keys up.
    Deassert,
    /// Leave the lines as the OS set them (the line is shared with other
    /// hardware).
    Leave,
}

/// Check that `name` looks like a serial port on this platform.
pub fn validate_port_name(name: &str) -> Result<()> {
    if is_valid_port_name(name, cfg!(windows)) {
        Ok(())
    } else {
        Err(Error::InvalidPort(name.to_string()))
    }
}

fn is_valid_port_name(name: &str, windows: bool) -> bool {
    if windows {
        let bare = name.strip_prefix(r"\\.\").unwrap_or(name);
        let upper = bare.to_ascii_uppercase();
        match upper.strip_prefix("COM") {
            Some(digits) => {
                !digits.is_empty()
                    && digits.chars().all(|c| c.is_ascii_digit())
                    && digits.parse::<u16>().is_ok_and(|n| n >= 1)
            }
            None => false,
        }
    } else {
        match name.strip_prefix("/dev/") {
            Some(rest) => !rest.is_empty() && !rest.ends_with('/') && !rest.contains(char::is_whitespace),
            None => false,
        }
    }
}

fn to_data_bits(bits: DataBits) -> tokio_serial::DataBits {
    match bits {
        DataBits::Five => tokio_serial::DataBits::Five,
        DataBits::Six => tokio_serial::DataBits::Six,
        DataBits::Seven => tokio_serial::DataBits::Seven,
        DataBits::Eight => tokio_serial::DataBits::Eight,
    }
}

fn to_stop_bits(bits: StopBits) -> tokio_serial::StopBits {
    match bits {
        StopBits::One => tokio_serial::StopBits::One,
        StopBits::Two => tokio_serial::StopBits::Two,
    }
}

/// Mark and space parity have no counterpart in the serial driver.
fn to_parity(parity: Parity) -> Result<tokio_serial::Parity> {
    match parity {
        Parity::None => Ok(tokio_serial::Parity::None),
        Parity::Odd => Ok(tokio_serial::Parity::Odd),
        Parity::Even => Ok(tokio_serial::Parity::Even),
        Parity::Mark | Parity::Space => Err(Error::Configuration(format!(
            "{parity:?} parity is not supported by the serial driver"
        ))),
    }
}

fn to_flow_control(flow: FlowControl) -> tokio_serial::FlowControl {
    match flow {
        FlowControl::None => tokio_serial::FlowControl::None,
        FlowControl::Software => tokio_serial::FlowControl::Software,
        FlowControl::Hardware => tokio_serial::FlowControl::Hardware,
    }
}

fn map_io_error(e: std::io::Error) -> Error {
    match e.kind() {
        std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::NotConnected => Error::ConnectionLost,
        _ => Error::Io(e),
    }
}

/// Serial port transport.
pub struct SerialTransport {
    /// The underlying serial port stream, `None` after close or a
    /// timed-out write.
    port: Option<SerialStream>,
    /// Port name for logging/debugging
    port_name: String,
}

impl SerialTransport {
    /// Validate `port` and `settings`, then open the port.
    pub async fn open(port: &str, settings: &SerialSettings, lines: ControlLines) -> Result<Self> {
        validate_port_name(port)?;
        settings.validate().map_err(Error::Configuration)?;
        let parity = to_parity(settings.parity)?;

        tracing::debug!(
            port = %port,
            baud_rate = settings.baud_rate,
            data_bits = ?settings.data_bits,
            stop_bits = ?settings.stop_bits,
            parity = ?settings.parity,
            flow_control = ?settings.flow_control,
            "Opening serial port"
        );

        let mut stream = tokio_serial::new(port, settings.baud_rate)
            .data_bits(to_data_bits(settings.data_bits))
            .stop_bits(to_stop_bits(settings.stop_bits))
            .parity(parity)
            .flow_control(to_flow_control(settings.flow_control))
            .open_native_async()
            .map_err(|e| {
                tracing::error!(port = %port, error = %e, "Failed to open serial port");
                Error::Initialization(format!("cannot open serial port {port}: {e}"))
            })?;

        if lines == ControlLines::Deassert {
            if let Err(e) = stream.write_data_terminal_ready(false) {
                tracing::warn!(port = %port, error = %e, "Failed to de-assert DTR");
            }
            if let Err(e) = stream.write_request_to_send(false) {
                tracing::warn!(port = %port, error = %e, "Failed to de-assert RTS");
            }
        }

        tracing::info!(port = %port, baud_rate = settings.baud_rate, "Serial port opened");

        Ok(Self {
            port: Some(stream),
            port_name: port.to_string(),
        })
    }

    /// Get the name of the serial port.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn send(&mut self, data: &[u8], timeout: Duration) -> Result<()> {
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;

        tracing::trace!(
            port = %self.port_name,
            bytes = data.len(),
            data = ?data,
            "Sending data"
        );

        let write = async {
            port.write_all(data).await?;
            port.flush().await
        };

        match tokio::time::timeout(timeout, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                tracing::error!(port = %self.port_name, error = %e, "Failed to send data");
                Err(map_io_error(e))
            }
            Err(_) => {
                // A partial frame may be on the wire; the port cannot be
                // trusted for the next command.
                tracing::warn!(
                    port = %self.port_name,
                    timeout_ms = timeout.as_millis(),
                    "Write timed out, dropping port"
                );
                self.port = None;
                Err(Error::Timeout)
            }
        }
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;

        match tokio::time::timeout(timeout, port.read(buf)).await {
            Ok(Ok(n)) => {
                tracing::trace!(
                    port = %self.port_name,
                    bytes = n,
                    data = ?&buf[..n],
                    "Received data"
                );
                Ok(n)
            }
            Ok(Err(e)) => {
                tracing::error!(port = %self.port_name, error = %e, "Failed to receive data");
                Err(map_io_error(e))
            }
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut port) = self.port.take() {
            if let Err(e) = port.flush().await {
                tracing::warn!(
                    port = %self.port_name,
                    error = %e,
                    "Failed to flush before closing (continuing anyway)"
                );
            }
            tracing::info!(port = %self.port_name, "Serial port closed");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    async fn set_dtr(&mut self, on: bool) -> Result<()> {
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;
        tracing::debug!(port = %self.port_name, on, "Setting DTR");
        port.write_data_terminal_ready(on)
            .map_err(|e| Error::Io(std::io::Error::other(e)))
    }

    async fn set_rts(&mut self, on: bool) -> Result<()> {
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;
        tracing::debug!(port = %self.port_name, on, "Setting RTS");
        port.write_request_to_send(on)
            .map_err(|e| Error::Io(std::io::Error::other(e)))
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        if self.port.is_some() {
            tracing::debug!(port = %self.port_name, "SerialTransport dropped, closing port");
        }
    }
}
