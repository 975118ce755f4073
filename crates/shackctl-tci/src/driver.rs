//! Network text protocol driver.
//!
//! A persistent TCP session to an SDR server. After connecting, the server
//! announces itself and then sends `ready;`; the session is usable only
//! after that. Every request is answered by a broadcast of the resulting
//! state, so queries and setters both wait for the matching broadcast.
//! CW macros are the exception: the server does not echo them.
//!
//! Socket failures surface unchanged from [`TcpTransport`]: connection
//! refused, host not found, host closed and timeout stay distinct.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use tokio::time::Instant;
use tracing::{debug, info, trace};

use shackctl_core::capability::Capabilities;
use shackctl_core::driver::DeviceDriver;
use shackctl_core::error::{Error, Result};
use shackctl_core::profile::{DeviceProfile, LinkSettings, MAX_WPM, MIN_WPM};
use shackctl_core::transport::Transport;
use shackctl_core::types::{BackendKind, Mode, Vfo};
use shackctl_transport::TcpTransport;

use crate::codec::{self, Message};
use crate::state::TrxState;

/// How long the server may take to send `ready;` after connecting.
pub const READY_TIMEOUT: Duration = Duration::from_secs(5);

const MAX_BUF: usize = 16 * 1024;

/// Driver for one receiver of a network SDR server.
pub struct TciDriver {
    transport: Option<Box<dyn Transport>>,
    buf: BytesMut,
    state: TrxState,
    /// Receiver index addressed by every command.
    rx: u8,
    timeout: Duration,
    ready_timeout: Duration,
}

impl Default for TciDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl TciDriver {
    pub fn new() -> Self {
        Self {
            transport: None,
            buf: BytesMut::with_capacity(1024),
            state: TrxState::default(),
            rx: 0,
            timeout: Duration::from_secs(1),
            ready_timeout: READY_TIMEOUT,
        }
    }

    /// A driver over an already connected transport.
    pub fn with_transport(transport: Box<dyn Transport>) -> Self {
        Self {
            transport: Some(transport),
            ..Self::new()
        }
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// What the server has announced so far.
    pub fn trx_state(&self) -> &TrxState {
        &self.state
    }

    fn rx_arg(&self) -> String {
        self.rx.to_string()
    }

    /// Read messages until one satisfies `done`, folding all of them into
    /// the state.
    async fn read_until(
        &mut self,
        timeout: Duration,
        mut done: impl FnMut(&Message) -> bool,
    ) -> Result<Message> {
        let transport = self.transport.as_mut().ok_or(Error::NotConnected)?;
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; 1024];
        loop {
            while let Some((msg, used)) = codec::decode(&self.buf)? {
                self.buf.advance(used);
                if msg.name.is_empty() {
                    continue;
                }
                trace!(name = %msg.name, args = ?msg.args, "server message");
                self.state.apply(&msg);
                if done(&msg) {
                    return Ok(msg);
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout);
            }
            let n = transport.receive(&mut chunk, remaining).await?;
            self.buf.extend_from_slice(&chunk[..n]);
            if self.buf.len() > MAX_BUF {
                tracing::warn!(len = self.buf.len(), "message buffer overflow, clearing");
                self.buf.clear();
                return Err(Error::Protocol("message buffer overflow".into()));
            }
        }
    }

    /// Send `name:args;` and wait for the broadcast answering it.
    ///
    /// `key` is how many leading arguments identify the answer (receiver
    /// index, sub-VFO index).
    async fn exchange(&mut self, name: &str, args: Vec<String>, key: usize) -> Result<Message> {
        let cmd = codec::encode(name, &args);
        let timeout = self.timeout;
        let transport = self.transport.as_mut().ok_or(Error::NotConnected)?;
        debug!(cmd = %String::from_utf8_lossy(&cmd), "TCI request");
        transport.send(&cmd, timeout).await?;

        let prefix: Vec<String> = args.into_iter().take(key).collect();
        self.read_until(timeout, |msg| msg.answers(name, &prefix)).await
    }

    /// Send without waiting for an answer.
    async fn post(&mut self, name: &str, args: Vec<String>) -> Result<()> {
        let cmd = codec::encode(name, &args);
        let timeout = self.timeout;
        let transport = self.transport.as_mut().ok_or(Error::NotConnected)?;
        debug!(cmd = %String::from_utf8_lossy(&cmd), "TCI post");
        transport.send(&cmd, timeout).await
    }

    async fn query(&mut self, name: &str, key_args: Vec<String>) -> Result<Message> {
        let key = key_args.len();
        self.exchange(name, key_args, key).await
    }

    async fn set(&mut self, name: &str, args: Vec<String>, key: usize) -> Result<()> {
        self.exchange(name, args, key).await.map(|_| ())
    }

    async fn set_clarifier(&mut self, prefix: &str, hz: i32) -> Result<()> {
        let rx = self.rx_arg();
        let enable = format!("{prefix}_enable");
        if hz != 0 {
            let offset = format!("{prefix}_offset");
            self.set(&offset, vec![rx.clone(), hz.to_string()], 1).await?;
        }
        self.set(&enable, vec![rx, codec::format_bool(hz != 0)], 1).await
    }

    async fn get_clarifier(&mut self, prefix: &str) -> Result<i32> {
        let rx = self.rx_arg();
        let enabled = self
            .query(&format!("{prefix}_enable"), vec![rx.clone()])
            .await?
            .flag(1)?;
        if !enabled {
            return Ok(0);
        }
        self.query(&format!("{prefix}_offset"), vec![rx])
            .await?
            .number(1)
    }
}

fn sub_vfo(vfo: Vfo) -> &'static str {
    match vfo {
        Vfo::B => "1",
        Vfo::A | Vfo::Current => "0",
    }
}

#[async_trait]
impl DeviceDriver for TciDriver {
    fn backend(&self) -> BackendKind {
        BackendKind::NetworkText
    }

    async fn initialize(&mut self, profile: &DeviceProfile) -> Result<Capabilities> {
        self.timeout = profile.command_timeout();
        self.rx = match profile.model.as_deref() {
            Some(model) => model.trim().parse().map_err(|_| {
                Error::Configuration(format!("receiver index must be a number, got {model:?}"))
            })?,
            None => 0,
        };
        self.state = TrxState::default();
        self.buf.clear();

        if self.transport.is_none() {
            let LinkSettings::Network { host, port } = &profile.link else {
                return Err(Error::Configuration(format!(
                    "network text protocol needs a network link, got {:?}",
                    profile.link
                )));
            };
            let transport = TcpTransport::connect_with_timeout(host, *port, self.timeout).await?;
            self.transport = Some(Box::new(transport));
        }

        let ready_timeout = self.ready_timeout;
        match self.read_until(ready_timeout, |msg| msg.name == "ready").await {
            Ok(_) => {}
            Err(Error::Timeout) => {
                return Err(Error::Initialization(
                    "server did not send ready after connecting".into(),
                ));
            }
            Err(e) => return Err(e),
        }

        if let Some(count) = self.state.trx_count
            && self.rx >= count
        {
            return Err(Error::Configuration(format!(
                "receiver {} does not exist, server has {count}",
                self.rx
            )));
        }

        let caps = Capabilities::FREQ
            | Capabilities::MODE
            | Capabilities::PTT
            | Capabilities::POWER
            | Capabilities::RIT
            | Capabilities::XIT
            | Capabilities::KEYER_SPEED
            | Capabilities::SEND_MORSE
            | Capabilities::STOP_MORSE;
        info!(
            device = self.state.device.as_deref().unwrap_or("unknown"),
            protocol = self.state.protocol.as_deref().unwrap_or("unknown"),
            rx = self.rx,
            "TCI session ready"
        );
        Ok(caps)
    }

    async fn shutdown(&mut self) -> Result<()> {
        if let Some(mut transport) = self.transport.take() {
            transport.close().await?;
            info!("TCI session closed");
        }
        Ok(())
    }

    async fn resync(&mut self) -> Result<()> {
        // Late answers are state broadcasts; fold them in rather than drop.
        let pending = self.buf.len();
        while let Some((msg, used)) = codec::decode(&self.buf)? {
            self.buf.advance(used);
            self.state.apply(&msg);
        }
        if pending > 0 {
            debug!(bytes = pending, "folded pending broadcasts after timeout");
        }
        Ok(())
    }

    async fn set_frequency(&mut self, vfo: Vfo, hz: u64) -> Result<()> {
        if let Some((low, high)) = self.state.vfo_limits
            && !(low..=high).contains(&hz)
        {
            return Err(Error::Configuration(format!(
                "{hz} Hz is outside the server's range {low}-{high} Hz"
            )));
        }
        let args = vec![self.rx_arg(), sub_vfo(vfo).to_string(), hz.to_string()];
        self.set("vfo", args, 2).await
    }

    async fn get_frequency(&mut self, vfo: Vfo) -> Result<u64> {
        let args = vec![self.rx_arg(), sub_vfo(vfo).to_string()];
        self.query("vfo", args).await?.number(2)
    }

    async fn set_mode(&mut self, mode: Mode) -> Result<()> {
        let name = codec::modulation_name(mode)
            .ok_or_else(|| Error::unsupported(format!("mode {mode} over TCI")))?;
        self.set("modulation", vec![self.rx_arg(), name.to_string()], 1)
            .await
    }

    async fn get_mode(&mut self) -> Result<Mode> {
        let msg = self.query("modulation", vec![self.rx_arg()]).await?;
        let name = msg.arg(1)?;
        codec::parse_modulation(name)
            .ok_or_else(|| Error::Protocol(format!("unknown modulation {name:?}")))
    }

    async fn set_ptt(&mut self, on: bool) -> Result<()> {
        self.set("trx", vec![self.rx_arg(), codec::format_bool(on)], 1)
            .await
    }

    async fn get_ptt(&mut self) -> Result<bool> {
        self.query("trx", vec![self.rx_arg()]).await?.flag(1)
    }

    /// Drive level in percent; the server has no notion of watts.
    async fn set_power(&mut self, watts: f32) -> Result<()> {
        if !watts.is_finite() || !(0.0..=100.0).contains(&watts) {
            return Err(Error::Configuration(format!(
                "drive must be 0-100 %, got {watts}"
            )));
        }
        let percent = watts.round() as u8;
        self.set("drive", vec![self.rx_arg(), percent.to_string()], 1)
            .await
    }

    async fn get_power(&mut self) -> Result<f32> {
        let drive: u8 = self.query("drive", vec![self.rx_arg()]).await?.number(1)?;
        Ok(f32::from(drive))
    }

    async fn set_rit(&mut self, hz: i32) -> Result<()> {
        self.set_clarifier("rit", hz).await
    }

    async fn get_rit(&mut self) -> Result<i32> {
        self.get_clarifier("rit").await
    }

    async fn set_xit(&mut self, hz: i32) -> Result<()> {
        self.set_clarifier("xit", hz).await
    }

    async fn get_xit(&mut self) -> Result<i32> {
        self.get_clarifier("xit").await
    }

    async fn send_morse(&mut self, text: &str) -> Result<()> {
        let text = codec::sanitize_cw(text);
        if text.trim().is_empty() {
            return Ok(());
        }
        self.post("cw_macros", vec![self.rx_arg(), text]).await
    }

    async fn set_keyer_speed(&mut self, wpm: u8) -> Result<()> {
        if !(MIN_WPM..=MAX_WPM).contains(&wpm) {
            return Err(Error::Configuration(format!(
                "keyer speed must be {MIN_WPM}-{MAX_WPM} WPM, got {wpm}"
            )));
        }
        self.set("cw_macros_speed", vec![wpm.to_string()], 0).await
    }

    async fn get_keyer_speed(&mut self) -> Result<u8> {
        let msg = self.query("cw_macros_speed", Vec::new()).await?;
        let raw = msg.last()?;
        raw.trim()
            .parse()
            .map_err(|_| Error::Protocol(format!("bad keyer speed {raw:?}")))
    }

    async fn stop_sending(&mut self) -> Result<()> {
        self.post("cw_macros_stop", Vec::new()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shackctl_test_harness::{MockTcpServer, MockTransport};

    const GREETING: &[u8] = b"VFO_LIMITS:10000,30000000;TRX_COUNT:2;DEVICE:SunSDR2DX;\
        PROTOCOL:ExpertSDR3,1.9;VFO:0,0,14000000;TRX:0,false;READY;";

    fn profile(port: u16) -> DeviceProfile {
        DeviceProfile::new(
            "sdr",
            BackendKind::NetworkText,
            LinkSettings::Network {
                host: "127.0.0.1".into(),
                port,
            },
        )
    }

    async fn spawn_server(script: &[(&str, &str)]) -> MockTcpServer {
        let mut server = MockTcpServer::new().await.unwrap();
        server.greet(GREETING);
        for (req, resp) in script {
            server.expect(req.as_bytes(), resp.as_bytes());
        }
        server.start();
        server
    }

    #[tokio::test]
    async fn waits_for_ready_and_keeps_the_greeting() {
        let server = spawn_server(&[]).await;
        let mut d = TciDriver::new();
        let caps = d.initialize(&profile(server.port())).await.unwrap();

        assert!(caps.contains(Capabilities::FREQ | Capabilities::SEND_MORSE | Capabilities::XIT));
        assert!(!caps.contains(Capabilities::GET_VFO));
        assert_eq!(d.trx_state().device.as_deref(), Some("SunSDR2DX"));
        assert_eq!(d.trx_state().vfo_limits, Some((10_000, 30_000_000)));

        d.shutdown().await.unwrap();
        server.wait().await.unwrap();
    }

    #[tokio::test]
    async fn frequency_and_mode() {
        let server = spawn_server(&[
            ("vfo:0,0,7074000;", "vfo:0,0,7074000;"),
            ("vfo:0,1;", "trx:0,false;vfo:0,1,7076000;"),
            ("modulation:0,digu;", "MODULATION:0,DIGU;"),
            ("modulation:0;", "modulation:0,digu;"),
        ])
        .await;
        let mut d = TciDriver::new();
        d.initialize(&profile(server.port())).await.unwrap();

        d.set_frequency(Vfo::A, 7_074_000).await.unwrap();
        assert_eq!(d.get_frequency(Vfo::B).await.unwrap(), 7_076_000);
        d.set_mode(Mode::DataUSB).await.unwrap();
        assert_eq!(d.get_mode().await.unwrap(), Mode::DataUSB);

        let err = d.set_mode(Mode::RTTY).await.unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
        let err = d.set_frequency(Vfo::A, 50_000_000).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));

        d.shutdown().await.unwrap();
        server.wait().await.unwrap();
    }

    #[tokio::test]
    async fn ptt_drive_and_clarifiers() {
        let server = spawn_server(&[
            ("trx:0,true;", "trx:0,True;"),
            ("trx:0;", "trx:0,True;"),
            ("drive:0,40;", "drive:0,40;"),
            ("drive:0;", "drive:0,40;"),
            ("rit_offset:0,-120;", "rit_offset:0,-120;"),
            ("rit_enable:0,true;", "rit_enable:0,true;"),
            ("rit_enable:0;", "rit_enable:0,true;"),
            ("rit_offset:0;", "rit_offset:0,-120;"),
            ("xit_enable:0,false;", "xit_enable:0,false;"),
            ("xit_enable:0;", "xit_enable:0,false;"),
        ])
        .await;
        let mut d = TciDriver::new();
        d.initialize(&profile(server.port())).await.unwrap();

        d.set_ptt(true).await.unwrap();
        assert!(d.get_ptt().await.unwrap());
        d.set_power(40.0).await.unwrap();
        assert_eq!(d.get_power().await.unwrap(), 40.0);
        d.set_rit(-120).await.unwrap();
        assert_eq!(d.get_rit().await.unwrap(), -120);
        d.set_xit(0).await.unwrap();
        assert_eq!(d.get_xit().await.unwrap(), 0);
        assert!(d.set_power(150.0).await.is_err());

        d.shutdown().await.unwrap();
        server.wait().await.unwrap();
    }

    #[tokio::test]
    async fn cw_macros() {
        let server = spawn_server(&[
            ("cw_macros_speed:28;", "cw_macros_speed:28;"),
            ("cw_macros_speed;", "cw_macros_speed:0,28;"),
            ("cw_macros:0,CQ TEST DE N0CALL;", ""),
            ("cw_macros_stop;", ""),
        ])
        .await;
        let mut d = TciDriver::new();
        d.initialize(&profile(server.port())).await.unwrap();

        d.set_keyer_speed(28).await.unwrap();
        assert_eq!(d.get_keyer_speed().await.unwrap(), 28);
        d.send_morse("cq test de n0call").await.unwrap();
        d.send_morse("  ").await.unwrap();
        d.stop_sending().await.unwrap();
        assert!(d.set_keyer_speed(3).await.is_err());

        d.shutdown().await.unwrap();
        server.wait().await.unwrap();
    }

    #[tokio::test]
    async fn silent_server_is_an_initialization_error() {
        let mock = MockTransport::new();
        mock.push_incoming(b"DEVICE:SunSDR2DX;");
        let mut d = TciDriver::with_transport(Box::new(mock))
            .with_ready_timeout(Duration::from_millis(50));
        let err = d.initialize(&profile(1)).await.unwrap_err();
        assert!(matches!(err, Error::Initialization(_)), "{err}");
    }

    #[tokio::test]
    async fn host_closing_is_reported() {
        let mut server = MockTcpServer::new().await.unwrap();
        server.greet(GREETING);
        server.expect(b"trx:0;", b"");
        server.close_when_done();
        server.start();

        let mut d = TciDriver::new();
        d.initialize(&profile(server.port())).await.unwrap();
        let err = d.get_ptt().await.unwrap_err();
        assert!(matches!(err, Error::HostClosed), "{err}");
        server.wait().await.unwrap();
    }

    #[tokio::test]
    async fn refused_connection_is_distinct() {
        // Bind then drop to get a port nobody listens on.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut d = TciDriver::new();
        let err = d.initialize(&profile(port)).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionRefused(_)), "{err}");
    }

    #[tokio::test]
    async fn receiver_index_from_model() {
        let server = spawn_server(&[("trx:1;", "trx:1,false;")]).await;
        let mut p = profile(server.port());
        p.model = Some("1".into());
        let mut d = TciDriver::new();
        d.initialize(&p).await.unwrap();
        assert!(!d.get_ptt().await.unwrap());
        d.shutdown().await.unwrap();
        server.wait().await.unwrap();

        let server = spawn_server(&[]).await;
        let mut p = profile(server.port());
        p.model = Some("2".into());
        let err = TciDriver::new().initialize(&p).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
