//! cwdaemon UDP keyer.
//!
//! The daemon takes one datagram per request: plain text is keyed, and
//! `ESC` followed by a command letter changes a setting. Nothing is
//! acknowledged, so a request counts as delivered once the datagram left
//! within the command timeout.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use shackctl_core::capability::Capabilities;
use shackctl_core::driver::DeviceDriver;
use shackctl_core::error::{Error, Result};
use shackctl_core::profile::{DeviceProfile, LinkSettings, MAX_WPM, MIN_WPM};
use shackctl_core::transport::Transport;
use shackctl_core::types::BackendKind;
use shackctl_transport::UdpTransport;

const ESC: u8 = 0x1B;

/// Default daemon port.
pub const DEFAULT_PORT: u16 = 6789;

/// `ESC 0`: reset to defaults.
pub fn reset() -> Vec<u8> {
    vec![ESC, b'0']
}

/// `ESC 2 <wpm>`: set speed.
pub fn speed(wpm: u8) -> Vec<u8> {
    let mut cmd = vec![ESC, b'2'];
    cmd.extend_from_slice(wpm.to_string().as_bytes());
    cmd
}

/// `ESC 4`: abort the message being keyed.
pub fn abort() -> Vec<u8> {
    vec![ESC, b'4']
}

/// Driver for a keyer daemon reached over UDP.
pub struct CwDaemonDriver {
    transport: Option<Box<dyn Transport>>,
    connected: bool,
    timeout: Duration,
}

impl Default for CwDaemonDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl CwDaemonDriver {
    pub fn new() -> Self {
        Self {
            transport: None,
            connected: false,
            timeout: Duration::from_millis(500),
        }
    }

    pub fn with_transport(transport: Box<dyn Transport>) -> Self {
        Self {
            transport: Some(transport),
            ..Self::new()
        }
    }

    async fn post(&mut self, datagram: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(Error::KeyerNotConnected);
        }
        let timeout = self.timeout;
        let transport = self.transport.as_mut().ok_or(Error::KeyerNotConnected)?;
        transport.send(datagram, timeout).await
    }
}

#[async_trait]
impl DeviceDriver for CwDaemonDriver {
    fn backend(&self) -> BackendKind {
        BackendKind::KeyerDaemon
    }

    async fn initialize(&mut self, profile: &DeviceProfile) -> Result<Capabilities> {
        self.timeout = profile.command_timeout();
        self.connected = false;

        if self.transport.is_none() {
            let LinkSettings::Udp {
                host,
                port,
                local_address,
                local_port,
            } = &profile.link
            else {
                return Err(Error::Configuration(format!(
                    "keyer daemon needs a UDP link, got {:?}",
                    profile.link
                )));
            };
            let mut udp = UdpTransport::bind_local(local_address.as_deref(), *local_port).await?;
            udp.connect(host, *port).await?;
            info!(local = %udp.local_addr(), peer = ?udp.peer(), "keyer daemon link ready");
            self.transport = Some(Box::new(udp));
        }

        self.connected = true;
        let wpm = profile.keyer.default_wpm;
        self.set_keyer_speed(wpm).await?;
        Ok(Capabilities::SEND_MORSE | Capabilities::STOP_MORSE | Capabilities::SET_KEYER_SPEED)
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.connected = false;
        if let Some(mut transport) = self.transport.take() {
            transport.close().await?;
        }
        Ok(())
    }

    async fn send_morse(&mut self, text: &str) -> Result<()> {
        let text = text.trim_end_matches(['\r', '\n']);
        if text.is_empty() {
            return Ok(());
        }
        match self.post(text.as_bytes()).await {
            Ok(()) => {
                debug!(chars = text.len(), "text sent to keyer daemon");
                Ok(())
            }
            Err(Error::KeyerNotConnected) => Err(Error::KeyerNotConnected),
            Err(e) => Err(Error::CannotSendText(e.to_string())),
        }
    }

    async fn set_keyer_speed(&mut self, wpm: u8) -> Result<()> {
        if !(MIN_WPM..=MAX_WPM).contains(&wpm) {
            return Err(Error::Configuration(format!(
                "keyer speed must be {MIN_WPM}-{MAX_WPM} WPM, got {wpm}"
            )));
        }
        self.post(&speed(wpm)).await
    }

    async fn stop_sending(&mut self) -> Result<()> {
        match self.post(&abort()).await {
            Ok(()) => Ok(()),
            Err(Error::KeyerNotConnected) => Err(Error::KeyerNotConnected),
            Err(e) => Err(Error::CannotStopSending(e.to_string())),
        }
    }
}
