//! GenericCAT backend driver.
//!
//! One command at a time over a byte stream: send a frame, then read until
//! the reply with the matching prefix arrives. Unrelated frames that show up
//! in between (a rig with auto-information left on) are skipped. Setters
//! expect no reply; the driver only drains briefly to catch a `?;` reject.
//!
//! PTT is configured independently of frequency and mode control: a rig
//! can be tuned over CAT and keyed through the DTR or RTS line of the same
//! port.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use tokio::time::Instant;
use tracing::{debug, info, trace};

use shackctl_core::capability::Capabilities;
use shackctl_core::driver::DeviceDriver;
use shackctl_core::error::{Error, Result};
use shackctl_core::profile::{DeviceProfile, LinkSettings, MIN_WPM};
use shackctl_core::transport::Transport;
use shackctl_core::types::{BackendKind, FlowControl, Mode, PttShare, PttType, Vfo};
use shackctl_transport::{ControlLines, SerialTransport, TcpTransport};

use crate::dialect::{CatDialect, Clarifier, Kenwood, dialect_for};
use crate::protocol::{self, DecodeResult, Frame};

/// Bytes buffered before the reply is declared garbage.
const MAX_BUF: usize = 8192;

/// How long a setter listens for a `?;` reject.
const SET_DRAIN: Duration = Duration::from_millis(50);

/// Highest keyer speed the rigs' `KS` command accepts.
const RIG_MAX_WPM: u8 = 60;

/// Buffer-status polls before a long CW message is abandoned.
const MORSE_BUFFER_POLLS: u32 = 20;
const MORSE_BUFFER_WAIT: Duration = Duration::from_millis(100);

/// Driver for rigs controlled by Kenwood- or Yaesu-style text CAT.
pub struct GenericCatDriver {
    dialect: Box<dyn CatDialect>,
    transport: Option<Box<dyn Transport>>,
    buf: BytesMut,
    timeout: Duration,
    ptt_type: PttType,
    ptt_share: PttShare,
    /// Last VFO the rig reported as active.
    active_vfo: Option<Vfo>,
}

impl GenericCatDriver {
    /// A driver that opens the profile's link at initialize.
    pub fn new() -> Self {
        GenericCatDriver {
            dialect: Box::new(Kenwood),
            transport: None,
            buf: BytesMut::with_capacity(256),
            timeout: Duration::from_secs(1),
            ptt_type: PttType::Cat,
            ptt_share: PttShare::None,
            active_vfo: None,
        }
    }

    /// A driver over an already open transport.
    pub fn with_transport(transport: Box<dyn Transport>) -> Self {
        GenericCatDriver {
            transport: Some(transport),
            ..Self::new()
        }
    }

    /// The dialect in use (chosen from the profile at initialize).
    pub fn dialect(&self) -> &dyn CatDialect {
        &*self.dialect
    }

    async fn open_link(profile: &DeviceProfile) -> Result<Box<dyn Transport>> {
        match &profile.link {
            LinkSettings::Serial { port, serial } => {
                let lines = if profile.ptt_share == PttShare::Hardware {
                    ControlLines::Leave
                } else {
                    ControlLines::Deassert
                };
                Ok(Box::new(SerialTransport::open(port, serial, lines).await?))
            }
            LinkSettings::Network { host, port } => Ok(Box::new(
                TcpTransport::connect_with_timeout(host, *port, profile.command_timeout()).await?,
            )),
            other => Err(Error::Configuration(format!(
                "generic CAT needs a serial or network link, got {other:?}"
            ))),
        }
    }

    fn transport(&mut self) -> Result<&mut Box<dyn Transport>> {
        self.transport.as_mut().ok_or(Error::NotConnected)
    }

    /// Send a query and wait for the reply carrying the same prefix.
    async fn query(&mut self, cmd: Vec<u8>) -> Result<Frame> {
        let dsp = self.dialect.digit_suffix_prefixes();
        let expected = protocol::extract_command_prefix(&cmd, dsp);
        let timeout = self.timeout;
        let transport = self.transport.as_mut().ok_or(Error::NotConnected)?;

        trace!(cmd = %String::from_utf8_lossy(&cmd), "CAT query");
        transport.send(&cmd, timeout).await?;

        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; 256];
        loop {
            while let Some(frame) = take_frame(&mut self.buf, dsp)? {
                if frame.prefix == expected {
                    trace!(prefix = %frame.prefix, data = %frame.data, "CAT reply");
                    return Ok(frame);
                }
                debug!(
                    prefix = %frame.prefix,
                    data = %frame.data,
                    expected = %expected,
                    "skipping unexpected response"
                );
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout);
            }
            let n = transport.receive(&mut chunk, remaining).await?;
            self.buf.extend_from_slice(&chunk[..n]);
            if self.buf.len() > MAX_BUF {
                tracing::warn!(len = self.buf.len(), "response buffer overflow, clearing");
                self.buf.clear();
                return Err(Error::Protocol("response buffer overflow".into()));
            }
        }
    }

    /// Send a setter and listen briefly for a reject.
    async fn set(&mut self, cmd: Vec<u8>) -> Result<()> {
        let dsp = self.dialect.digit_suffix_prefixes();
        let timeout = self.timeout;
        let transport = self.transport.as_mut().ok_or(Error::NotConnected)?;

        trace!(cmd = %String::from_utf8_lossy(&cmd), "CAT set");
        transport.send(&cmd, timeout).await?;

        let deadline = Instant::now() + SET_DRAIN;
        let mut chunk = [0u8; 256];
        loop {
            while let Some(frame) = take_frame(&mut self.buf, dsp)? {
                debug!(prefix = %frame.prefix, "ignoring frame after set");
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(());
            }
            match transport.receive(&mut chunk, remaining).await {
                Ok(n) if n > 0 => {
                    self.buf.extend_from_slice(&chunk[..n]);
                    if self.buf.len() > MAX_BUF {
                        self.buf.clear();
                        return Ok(());
                    }
                }
                Ok(_) | Err(Error::Timeout) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    async fn resolve_vfo(&mut self, vfo: Vfo) -> Result<Vfo> {
        match vfo {
            Vfo::Current => match self.active_vfo {
                Some(active) => Ok(active),
                None => self.get_vfo().await,
            },
            other => Ok(other),
        }
    }

    async fn set_line(&mut self, on: bool) -> Result<()> {
        let ptt_type = self.ptt_type;
        let transport = self.transport()?;
        match ptt_type {
            PttType::Dtr => transport.set_dtr(on).await,
            PttType::Rts => transport.set_rts(on).await,
            PttType::Cat | PttType::None => Ok(()),
        }
    }

    fn uses_line(&self) -> bool {
        matches!(self.ptt_type, PttType::Dtr | PttType::Rts)
    }

    async fn wait_morse_buffer(&mut self) -> Result<()> {
        for _ in 0..MORSE_BUFFER_POLLS {
            let frame = self.query(self.dialect.read_morse_buffer()).await?;
            if self.dialect.parse_morse_buffer_ready(&frame.data)? {
                return Ok(());
            }
            tokio::time::sleep(MORSE_BUFFER_WAIT).await;
        }
        Err(Error::CannotSendText("rig CW buffer stayed full".into()))
    }
}

impl Default for GenericCatDriver {
    fn default() -> Self {
        Self::new()
    }
}

fn take_frame(buf: &mut BytesMut, digit_suffix_prefixes: &[&str]) -> Result<Option<Frame>> {
    match protocol::decode_response(buf, digit_suffix_prefixes) {
        DecodeResult::Response { frame, consumed } => {
            buf.advance(consumed);
            Ok(Some(frame))
        }
        DecodeResult::Error(consumed) => {
            buf.advance(consumed);
            Err(Error::Protocol("rig returned error response (?;)".into()))
        }
        DecodeResult::Incomplete => Ok(None),
    }
}

/// Reject PTT type/share combinations the link cannot honour.
fn check_ptt(profile: &DeviceProfile) -> Result<()> {
    let line = matches!(profile.ptt_type, PttType::Dtr | PttType::Rts);
    if profile.ptt_share != PttShare::None && !line {
        return Err(Error::Initialization(format!(
            "cannot set PTT share: {:?} sharing needs a DTR or RTS PTT line, PTT type is {:?}",
            profile.ptt_share, profile.ptt_type
        )));
    }
    match &profile.link {
        LinkSettings::Serial { serial, .. }
            if profile.ptt_type == PttType::Rts
                && serial.flow_control == FlowControl::Hardware =>
        {
            Err(Error::Initialization(
                "cannot set PTT type: RTS is used by hardware flow control".into(),
            ))
        }
        LinkSettings::Network { .. } if line => Err(Error::Initialization(format!(
            "cannot set PTT type: {:?} needs a serial port",
            profile.ptt_type
        ))),
        _ => Ok(()),
    }
}

#[async_trait]
impl DeviceDriver for GenericCatDriver {
    fn backend(&self) -> BackendKind {
        BackendKind::GenericCat
    }

    async fn initialize(&mut self, profile: &DeviceProfile) -> Result<Capabilities> {
        self.dialect = dialect_for(profile.model.as_deref())?;
        check_ptt(profile)?;
        self.ptt_type = profile.ptt_type;
        self.ptt_share = profile.ptt_share;
        self.timeout = profile.command_timeout();
        self.active_vfo = None;
        self.buf.clear();

        if self.transport.is_none() {
            self.transport = Some(Self::open_link(profile).await?);
        }

        if self.uses_line() && self.ptt_share != PttShare::Hardware {
            self.set_line(false)
                .await
                .map_err(|e| Error::Initialization(format!("cannot set PTT type: {e}")))?;
        }

        // The rig must answer before it counts as open.
        let probe = self.dialect.read_frequency(Vfo::A);
        let frame = self
            .query(probe)
            .await
            .map_err(|e| Error::Initialization(format!("rig not responding: {e}")))?;
        self.dialect.parse_frequency(&frame.data)?;

        let mut caps = Capabilities::FREQ
            | Capabilities::MODE
            | Capabilities::GET_VFO
            | Capabilities::GET_PTT
            | Capabilities::POWER
            | Capabilities::RIT
            | Capabilities::XIT
            | Capabilities::KEYER_SPEED
            | Capabilities::SEND_MORSE
            | Capabilities::STOP_MORSE;
        caps.set(Capabilities::SET_PTT, profile.ptt_type != PttType::None);

        info!(
            device = %profile.name,
            dialect = self.dialect.name(),
            ptt = ?profile.ptt_type,
            "CAT rig initialized"
        );
        Ok(caps)
    }

    async fn shutdown(&mut self) -> Result<()> {
        if self.uses_line()
            && self.ptt_share != PttShare::Hardware
            && let Err(e) = self.set_line(false).await
        {
            debug!(error = %e, "could not release PTT line");
        }
        if let Some(mut transport) = self.transport.take() {
            transport.close().await?;
        }
        Ok(())
    }

    async fn resync(&mut self) -> Result<()> {
        self.buf.clear();
        let dropped = self.transport()?.discard_input().await?;
        if dropped > 0 {
            tracing::warn!(bytes = dropped, "discarded late CAT data");
        }
        Ok(())
    }

    async fn set_frequency(&mut self, vfo: Vfo, hz: u64) -> Result<()> {
        let max = self.dialect.max_frequency_hz();
        if hz == 0 || hz > max {
            return Err(Error::Configuration(format!(
                "frequency {hz} Hz outside 1-{max} Hz"
            )));
        }
        let vfo = self.resolve_vfo(vfo).await?;
        self.set(self.dialect.set_frequency(vfo, hz)).await
    }

    async fn get_frequency(&mut self, vfo: Vfo) -> Result<u64> {
        let vfo = self.resolve_vfo(vfo).await?;
        let frame = self.query(self.dialect.read_frequency(vfo)).await?;
        self.dialect.parse_frequency(&frame.data)
    }

    async fn set_mode(&mut self, mode: Mode) -> Result<()> {
        self.set(self.dialect.set_mode(mode)).await
    }

    async fn get_mode(&mut self) -> Result<Mode> {
        let frame = self.query(self.dialect.read_mode()).await?;
        self.dialect.parse_mode_code(&frame.data)
    }

    async fn get_vfo(&mut self) -> Result<Vfo> {
        let frame = self.query(self.dialect.read_vfo()).await?;
        let vfo = self.dialect.parse_vfo(&frame.data)?;
        self.active_vfo = Some(vfo);
        Ok(vfo)
    }

    async fn set_ptt(&mut self, on: bool) -> Result<()> {
        match self.ptt_type {
            PttType::None => Err(Error::unsupported("set PTT")),
            PttType::Cat => self.set(self.dialect.set_ptt(on)).await,
            PttType::Dtr | PttType::Rts => self.set_line(on).await,
        }
    }

    async fn get_ptt(&mut self) -> Result<bool> {
        let frame = self.query(self.dialect.read_ptt()).await?;
        self.dialect.parse_ptt(&frame.data)
    }

    async fn set_power(&mut self, watts: f32) -> Result<()> {
        if !watts.is_finite() || !(0.0..=999.0).contains(&watts) {
            return Err(Error::Configuration(format!(
                "power {watts} W outside 0-999 W"
            )));
        }
        self.set(self.dialect.set_power(watts.round() as u16)).await
    }

    async fn get_power(&mut self) -> Result<f32> {
        let frame = self.query(self.dialect.read_power()).await?;
        self.dialect.parse_power(&frame.data)
    }

    async fn set_rit(&mut self, hz: i32) -> Result<()> {
        for cmd in self.dialect.set_clarifier(Clarifier::Rit, hz)? {
            self.set(cmd).await?;
        }
        Ok(())
    }

    async fn get_rit(&mut self) -> Result<i32> {
        let frame = self.query(self.dialect.read_info()).await?;
        self.dialect.parse_clarifier(&frame.data, Clarifier::Rit)
    }

    async fn set_xit(&mut self, hz: i32) -> Result<()> {
        for cmd in self.dialect.set_clarifier(Clarifier::Xit, hz)? {
            self.set(cmd).await?;
        }
        Ok(())
    }

    async fn get_xit(&mut self) -> Result<i32> {
        let frame = self.query(self.dialect.read_info()).await?;
        self.dialect.parse_clarifier(&frame.data, Clarifier::Xit)
    }

    async fn send_morse(&mut self, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Ok(());
        }
        for (i, frame) in self.dialect.send_morse(text).into_iter().enumerate() {
            if i > 0 {
                self.wait_morse_buffer().await?;
            }
            self.set(frame).await?;
        }
        Ok(())
    }

    async fn set_keyer_speed(&mut self, wpm: u8) -> Result<()> {
        if !(MIN_WPM..=RIG_MAX_WPM).contains(&wpm) {
            return Err(Error::Configuration(format!(
                "rig keyer speed {wpm} outside {MIN_WPM}-{RIG_MAX_WPM} WPM"
            )));
        }
        self.set(self.dialect.set_keyer_speed(wpm)).await
    }

    async fn get_keyer_speed(&mut self) -> Result<u8> {
        let frame = self.query(self.dialect.read_keyer_speed()).await?;
        self.dialect.parse_keyer_speed(&frame.data)
    }

    async fn stop_sending(&mut self) -> Result<()> {
        self.set(self.dialect.stop_morse()).await
    }
}
