use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use shackctl_core::capability::Capabilities;
use shackctl_core::driver::DeviceDriver;
use shackctl_core::error::{Error, Result};
use shackctl_core::profile::{DeviceProfile, LinkSettings};
use shackctl_core::transport::Transport;
use shackctl_core::types::BackendKind;
use shackctl_transport::UdpTransport;

use crate::protocol::{self, Reading};

/// Rotator controller reached over UDP.
///
/// The local endpoint is bound before anything is sent. With no local port
/// configured, replies are expected on the command port plus one, which is
/// where the controller answers by default.
pub struct PstRotatorDriver {
    transport: Option<Box<dyn Transport>>,
    timeout: Duration,
    elevation: f64,
}

impl Default for PstRotatorDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl PstRotatorDriver {
    pub fn new() -> Self {
        Self {
            transport: None,
            timeout: Duration::from_millis(1000),
            elevation: 0.0,
        }
    }

    pub fn with_transport(transport: Box<dyn Transport>) -> Self {
        Self {
            transport: Some(transport),
            ..Self::new()
        }
    }

    fn link(&mut self) -> Result<&mut Box<dyn Transport>> {
        match self.transport.as_mut() {
            Some(t) if t.is_connected() => Ok(t),
            _ => Err(Error::NotConnected),
        }
    }

    async fn post(&mut self, message: &str) -> Result<()> {
        let timeout = self.timeout;
        self.link()?.send(message.as_bytes(), timeout).await
    }
}

#[async_trait]
impl DeviceDriver for PstRotatorDriver {
    fn backend(&self) -> BackendKind {
        BackendKind::RotatorUdp
    }

    async fn initialize(&mut self, profile: &DeviceProfile) -> Result<Capabilities> {
        self.timeout = profile.command_timeout();

        if self.transport.is_none() {
            let LinkSettings::Udp {
                host,
                port,
                local_address,
                local_port,
            } = &profile.link
            else {
                return Err(Error::Configuration(format!(
                    "rotator needs a UDP link, got {:?}",
                    profile.link
                )));
            };
            let reply_port = local_port.unwrap_or_else(|| port.wrapping_add(1));
            let mut udp = UdpTransport::bind_local(local_address.as_deref(), Some(reply_port)).await?;
            udp.connect(host, *port).await?;
            info!(local = %udp.local_addr(), peer = ?udp.peer(), "rotator link ready");
            self.transport = Some(Box::new(udp));
        }

        Ok(Capabilities::POSITION)
    }

    async fn shutdown(&mut self) -> Result<()> {
        if let Some(mut transport) = self.transport.take() {
            transport.close().await?;
        }
        Ok(())
    }

    async fn resync(&mut self) -> Result<()> {
        if let Some(t) = self.transport.as_mut() {
            t.discard_input().await?;
        }
        Ok(())
    }

    async fn set_position(&mut self, azimuth: f64, elevation: f64) -> Result<()> {
        if !(0.0..=360.0).contains(&azimuth) {
            return Err(Error::Configuration(format!(
                "azimuth must be 0-360 degrees, got {azimuth}"
            )));
        }
        if !(0.0..=90.0).contains(&elevation) {
            return Err(Error::Configuration(format!(
                "elevation must be 0-90 degrees, got {elevation}"
            )));
        }
        self.post(&protocol::set_azimuth(azimuth)).await?;
        if elevation != self.elevation {
            self.post(&protocol::set_elevation(elevation)).await?;
            self.elevation = elevation;
        }
        debug!(azimuth, elevation, "rotator commanded");
        Ok(())
    }

    async fn get_position(&mut self) -> Result<(f64, f64)> {
        let timeout = self.timeout;
        let deadline = Instant::now() + timeout;
        let link = self.link()?;
        link.discard_input().await?;
        link.send(protocol::query_azimuth().as_bytes(), timeout).await?;

        let mut buf = [0u8; 128];
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return Err(Error::Timeout);
            }
            let n = self.link()?.receive(&mut buf, left).await?;
            match protocol::parse(&buf[..n]) {
                Ok(Reading::Azimuth(az)) => return Ok((az, self.elevation)),
                Ok(Reading::Elevation(el)) => self.elevation = el,
                Err(e) => warn!(error = %e, "ignoring rotator datagram"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shackctl_test_harness::MockTransport;
    use tokio::net::UdpSocket;

    fn profile(port: u16) -> DeviceProfile {
        DeviceProfile::new(
            "rotator",
            BackendKind::RotatorUdp,
            LinkSettings::Udp {
                host: "127.0.0.1".into(),
                port,
                local_address: Some("127.0.0.1".into()),
                local_port: Some(0),
            },
        )
    }

    #[tokio::test]
    async fn turns_and_reads_back_over_udp() {
        let controller = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = controller.local_addr().unwrap().port();

        let mut d = PstRotatorDriver::new();
        let caps = d.initialize(&profile(port)).await.unwrap();
        assert!(caps.contains(Capabilities::POSITION));

        d.set_position(245.0, 0.0).await.unwrap();
        let mut buf = [0u8; 128];
        let (n, _) = controller.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"<PST><AZIMUTH>245</AZIMUTH></PST>");

        let peer = tokio::spawn(async move {
            let mut buf = [0u8; 128];
            let (n, from) = controller.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"<PST>AZ?</PST>");
            controller.send_to(b"EL:10", from).await.unwrap();
            controller.send_to(b"AZ:244", from).await.unwrap();
        });
        assert_eq!(d.get_position().await.unwrap(), (244.0, 10.0));
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn local_port_in_use_is_distinct() {
        let taken = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut p = profile(protocol::DEFAULT_PORT);
        p.link = LinkSettings::Udp {
            host: "127.0.0.1".into(),
            port: protocol::DEFAULT_PORT,
            local_address: Some("127.0.0.1".into()),
            local_port: Some(taken.local_addr().unwrap().port()),
        };
        let err = PstRotatorDriver::new().initialize(&p).await.unwrap_err();
        assert!(matches!(err, Error::AddressInUse(_)), "{err}");
    }

    #[tokio::test]
    async fn out_of_range_bearing_sends_nothing() {
        let mock = MockTransport::new();
        let mut d = PstRotatorDriver::with_transport(Box::new(mock.clone()));
        d.initialize(&profile(protocol::DEFAULT_PORT)).await.unwrap();
        assert!(matches!(
            d.set_position(400.0, 0.0).await,
            Err(Error::Configuration(_))
        ));
        assert_eq!(mock.send_count(), 0);
    }

    #[tokio::test]
    async fn elevation_is_sent_only_when_it_changes() {
        let mock = MockTransport::new();
        mock.expect_no_reply(b"<PST><AZIMUTH>90</AZIMUTH></PST>");
        mock.expect_no_reply(b"<PST><AZIMUTH>90</AZIMUTH></PST>");
        mock.expect_no_reply(b"<PST><ELEVATION>30</ELEVATION></PST>");
        mock.expect_no_reply(b"<PST><AZIMUTH>180</AZIMUTH></PST>");
        mock.expect_no_reply(b"<PST><ELEVATION>0</ELEVATION></PST>");
        let mut d = PstRotatorDriver::with_transport(Box::new(mock.clone()));
        d.initialize(&profile(protocol::DEFAULT_PORT)).await.unwrap();

        d.set_position(90.0, 0.0).await.unwrap();
        d.set_position(90.0, 30.0).await.unwrap();
        d.set_position(180.0, 0.0).await.unwrap();
        assert_eq!(mock.send_count(), 5);
        assert_eq!(mock.remaining_expectations(), 0);
    }

    #[tokio::test]
    async fn silent_controller_times_out() {
        let mock = MockTransport::new();
        mock.expect(b"<PST>AZ?</PST>", b"");
        let mut d = PstRotatorDriver::with_transport(Box::new(mock.clone()));
        d.initialize(&profile(protocol::DEFAULT_PORT)).await.unwrap();
        assert!(matches!(d.get_position().await, Err(Error::Timeout)));
    }
}
