//! WinKey serial keyer.
//!
//! The keyer speaks a binary command set at 1200 baud. Everything the host
//! sends is either a command byte (below 0x20) with its parameters, or
//! printable ASCII to be keyed. Everything the keyer sends back is one byte:
//!
//! | Byte        | Meaning                              |
//! |-------------|--------------------------------------|
//! | `0x00-0x7F` | echo of a character as it is keyed   |
//! | `0x80-0xBF` | speed pot position                   |
//! | `0xC0-0xC7` | status (XOFF, break-in, busy, ...)   |
//!
//! Nothing on the serial line reveals whether the keyer is still attached,
//! so every command first checks that host mode was opened successfully
//! and fails with [`Error::KeyerNotConnected`] otherwise.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use shackctl_core::capability::Capabilities;
use shackctl_core::driver::DeviceDriver;
use shackctl_core::error::{Error, Result};
use shackctl_core::events::DeviceEvent;
use shackctl_core::profile::{DeviceProfile, LinkSettings, MAX_WPM, MIN_WPM};
use shackctl_core::transport::Transport;
use shackctl_core::types::{BackendKind, KeyerMode};
use shackctl_transport::{ControlLines, SerialTransport};

/// Admin command prefix.
const ADMIN: u8 = 0x00;
const ADMIN_HOST_OPEN: u8 = 0x02;
const ADMIN_HOST_CLOSE: u8 = 0x03;
const SET_SPEED: u8 = 0x02;
const CLEAR_BUFFER: u8 = 0x0A;
const SET_MODE: u8 = 0x0E;
const SET_PTT: u8 = 0x18;

/// Mode register bits.
pub mod mode_bits {
    pub const PADDLE_ECHO: u8 = 0x40;
    pub const IAMBIC_A: u8 = 0x10;
    pub const ULTIMATIC: u8 = 0x20;
    pub const BUG: u8 = 0x30;
    pub const PADDLE_SWAP: u8 = 0x08;
    pub const SERIAL_ECHO: u8 = 0x04;
}

/// Status byte bits (low five bits of `0xC0-0xDF`).
pub mod status_bits {
    pub const XOFF: u8 = 0x01;
    pub const BREAKIN: u8 = 0x02;
    pub const BUSY: u8 = 0x04;
}

/// Characters the keyer will send. Anything else is dropped from text.
const SENDABLE_PUNCTUATION: &str = "/?.,=+-'():\"@";

/// Text bytes per write. The keyer buffer holds 128.
const CHUNK: usize = 32;
const XOFF_POLLS: u32 = 40;
const XOFF_WAIT: Duration = Duration::from_millis(50);

/// One byte from the keyer, classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Incoming {
    Echo(char),
    Pot(u8),
    Status(u8),
}

pub fn classify(byte: u8) -> Incoming {
    match byte {
        0xC0..=0xFF => Incoming::Status(byte & 0x1F),
        0x80..=0xBF => Incoming::Pot(byte & 0x3F),
        _ => Incoming::Echo(char::from(byte)),
    }
}

/// Mode register value for the configured keyer mode.
pub fn mode_register(mode: KeyerMode, swap_paddles: bool) -> u8 {
    let mut reg = mode_bits::PADDLE_ECHO | mode_bits::SERIAL_ECHO;
    reg |= match mode {
        KeyerMode::IambicB => 0,
        KeyerMode::IambicA => mode_bits::IAMBIC_A,
        KeyerMode::Ultimate => mode_bits::ULTIMATIC,
        KeyerMode::SinglePaddle => mode_bits::BUG,
    };
    if swap_paddles {
        reg |= mode_bits::PADDLE_SWAP;
    }
    reg
}

/// Uppercase `text` and drop characters the keyer cannot send.
pub fn keyable(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| c.to_ascii_uppercase())
        .filter(|c| c.is_ascii_alphanumeric() || *c == ' ' || SENDABLE_PUNCTUATION.contains(*c))
        .map(|c| c as u8)
        .collect()
}

/// Driver for a WinKey-compatible keyer on a serial port.
pub struct WinKeyDriver {
    transport: Option<Box<dyn Transport>>,
    events: broadcast::Sender<DeviceEvent>,
    host_open: bool,
    version: Option<u8>,
    wpm: u8,
    status: u8,
    timeout: Duration,
}

impl WinKeyDriver {
    /// Echoed characters are published on `events`.
    pub fn new(events: broadcast::Sender<DeviceEvent>) -> Self {
        Self {
            transport: None,
            events,
            host_open: false,
            version: None,
            wpm: 0,
            status: 0,
            timeout: Duration::from_secs(1),
        }
    }

    pub fn with_transport(transport: Box<dyn Transport>, events: broadcast::Sender<DeviceEvent>) -> Self {
        Self {
            transport: Some(transport),
            ..Self::new(events)
        }
    }

    /// Firmware version reported at host open.
    pub fn version(&self) -> Option<u8> {
        self.version
    }

    fn link(&mut self) -> Result<&mut Box<dyn Transport>> {
        if !self.host_open {
            return Err(Error::KeyerNotConnected);
        }
        self.transport.as_mut().ok_or(Error::KeyerNotConnected)
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let timeout = self.timeout;
        trace!(bytes = ?bytes, "WinKey write");
        self.link()?.send(bytes, timeout).await
    }

    /// Read whatever the keyer has sent, publishing echoed text.
    async fn pump(&mut self) -> Result<()> {
        let mut received = Vec::new();
        let mut chunk = [0u8; 64];
        let transport = self.link()?;
        loop {
            match transport.receive(&mut chunk, Duration::ZERO).await {
                Ok(0) | Err(Error::Timeout) => break,
                Ok(n) => received.extend_from_slice(&chunk[..n]),
                Err(e) => return Err(e),
            }
        }

        let mut echoed = String::new();
        for byte in received {
            match classify(byte) {
                Incoming::Echo(c) => echoed.push(c),
                Incoming::Pot(pos) => debug!(pos, "speed pot moved"),
                Incoming::Status(bits) => self.status = bits,
            }
        }
        if !echoed.is_empty() {
            trace!(text = %echoed, "keyer echo");
            let _ = self.events.send(DeviceEvent::KeyerEcho { text: echoed });
        }
        Ok(())
    }

    /// Wait for the keyer to clear XOFF.
    async fn wait_for_room(&mut self) -> Result<()> {
        for _ in 0..XOFF_POLLS {
            self.pump().await?;
            if self.status & status_bits::XOFF == 0 {
                return Ok(());
            }
            tokio::time::sleep(XOFF_WAIT).await;
        }
        Err(Error::CannotSendText("keyer buffer stays full".into()))
    }

    async fn open_host(&mut self) -> Result<u8> {
        let timeout = self.timeout;
        let transport = self.transport.as_mut().ok_or(Error::KeyerNotConnected)?;
        // Stale echo from a previous session.
        transport.discard_input().await?;
        transport.send(&[ADMIN, ADMIN_HOST_OPEN], timeout).await?;

        let mut byte = [0u8; 1];
        match transport.receive(&mut byte, timeout).await {
            Ok(1) => Ok(byte[0]),
            Ok(_) | Err(Error::Timeout) => Err(Error::Initialization(
                "keyer did not answer host open".into(),
            )),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl DeviceDriver for WinKeyDriver {
    fn backend(&self) -> BackendKind {
        BackendKind::KeyerHardware
    }

    async fn initialize(&mut self, profile: &DeviceProfile) -> Result<Capabilities> {
        self.timeout = profile.command_timeout();
        self.host_open = false;

        if self.transport.is_none() {
            let LinkSettings::Serial { port, serial } = &profile.link else {
                return Err(Error::Configuration(format!(
                    "WinKey needs a serial link, got {:?}",
                    profile.link
                )));
            };
            let transport = SerialTransport::open(port, serial, ControlLines::Deassert).await?;
            self.transport = Some(Box::new(transport));
        }

        let version = self.open_host().await?;
        self.version = Some(version);
        self.host_open = true;

        let keyer = &profile.keyer;
        let reg = mode_register(keyer.mode, keyer.swap_paddles);
        self.write(&[SET_MODE, reg]).await?;
        self.set_keyer_speed(keyer.default_wpm).await?;

        info!(
            version,
            mode = ?keyer.mode,
            swap_paddles = keyer.swap_paddles,
            wpm = keyer.default_wpm,
            "WinKey host mode open"
        );
        Ok(Capabilities::SEND_MORSE
            | Capabilities::STOP_MORSE
            | Capabilities::KEYER_SPEED
            | Capabilities::SET_PTT)
    }

    async fn shutdown(&mut self) -> Result<()> {
        if self.host_open {
            if let Err(e) = self.write(&[ADMIN, ADMIN_HOST_CLOSE]).await {
                warn!(error = %e, "WinKey host close failed");
            }
            self.host_open = false;
        }
        if let Some(mut transport) = self.transport.take() {
            transport.close().await?;
        }
        Ok(())
    }

    async fn resync(&mut self) -> Result<()> {
        self.pump().await
    }

    async fn send_morse(&mut self, text: &str) -> Result<()> {
        self.link()?;
        let bytes = keyable(text);
        if bytes.is_empty() {
            return Ok(());
        }
        for (i, chunk) in bytes.chunks(CHUNK).enumerate() {
            if i > 0 {
                self.wait_for_room().await?;
            }
            self.write(chunk).await?;
        }
        debug!(chars = bytes.len(), "text queued on keyer");
        Ok(())
    }

    async fn set_keyer_speed(&mut self, wpm: u8) -> Result<()> {
        self.link()?;
        if !(MIN_WPM..=MAX_WPM).contains(&wpm) {
            return Err(Error::Configuration(format!(
                "keyer speed must be {MIN_WPM}-{MAX_WPM} WPM, got {wpm}"
            )));
        }
        self.write(&[SET_SPEED, wpm]).await?;
        self.wpm = wpm;
        Ok(())
    }

    /// The speed last set by the host. Reading also collects pending echo.
    async fn get_keyer_speed(&mut self) -> Result<u8> {
        self.pump().await?;
        Ok(self.wpm)
    }

    async fn stop_sending(&mut self) -> Result<()> {
        self.write(&[CLEAR_BUFFER]).await
    }

    /// Key the transmitter through the keyer's PTT output.
    async fn set_ptt(&mut self, on: bool) -> Result<()> {
        self.write(&[SET_PTT, u8::from(on)]).await
    }
}
