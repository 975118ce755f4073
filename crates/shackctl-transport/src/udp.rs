//! UDP transport for keyer daemons and rotator controllers.
//!
//! [`UdpTransport`] binds a local IPv4 endpoint and, once
//! [`connect`](UdpTransport::connect)ed to a peer, implements [`Transport`]
//! with one datagram per `send` and one datagram per `receive`.
//!
//! Binding reports two distinct failures: a local address or host name with
//! no IPv4 address ([`Error::NoIpv4Address`]) and a local port that is
//! already taken ([`Error::AddressInUse`]).
//!
//! # Example
//!
//! ```no_run
//! use shackctl_core::Transport;
//! use shackctl_transport::UdpTransport;
//! use std::time::Duration;
//!
//! # async fn example() -> shackctl_core::Result<()> {
//! let mut transport = UdpTransport::bind_local(None, None).await?;
//! transport.connect("127.0.0.1", 6789).await?;
//! transport.send(b"CQ TEST", Duration::from_millis(200)).await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use shackctl_core::error::{Error, Result};
use shackctl_core::transport::Transport;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::{UdpSocket, lookup_host};

/// UDP transport for datagram-based device communication.
#[derive(Debug)]
pub struct UdpTransport {
    /// The underlying UDP socket, `None` after `close()`.
    socket: Option<UdpSocket>,
    /// The local address the socket is bound to.
    local_addr: SocketAddr,
    /// The peer set by [`connect`](Self::connect).
    peer: Option<SocketAddr>,
}

impl UdpTransport {
    /// Bind to a literal local address such as `"0.0.0.0:0"`.
    pub async fn bind(addr: &str) -> Result<Self> {
        tracing::debug!(addr = %addr, "Binding UDP socket");

        let socket = UdpSocket::bind(addr).await.map_err(|e| {
            tracing::error!(addr = %addr, error = %e, "Failed to bind UDP socket");
            map_bind_error(e, addr)
        })?;

        let local_addr = socket.local_addr().map_err(|e| {
            tracing::error!(error = %e, "Failed to get local address");
            Error::Io(e)
        })?;

        tracing::debug!(local_addr = %local_addr, "UDP socket bound");

        Ok(Self {
            socket: Some(socket),
            local_addr,
            peer: None,
        })
    }

    /// Bind the configured local endpoint.
    ///
    /// `local_address` may be an IP literal or a host name; only its IPv4
    /// addresses are considered. With no address the socket binds every
    /// IPv4 interface, and with no port an ephemeral port is chosen.
    pub async fn bind_local(local_address: Option<&str>, local_port: Option<u16>) -> Result<Self> {
        let port = local_port.unwrap_or(0);
        let ip = match local_address {
            None => Ipv4Addr::UNSPECIFIED,
            Some(name) => first_ipv4(name, port).await?,
        };
        Self::bind(&SocketAddr::from((ip, port)).to_string()).await
    }

    /// Fix the peer for [`Transport`] use.
    ///
    /// Resolves `host` and picks its first IPv4 address.
    pub async fn connect(&mut self, host: &str, port: u16) -> Result<()> {
        let socket = self.socket.as_ref().ok_or(Error::NotConnected)?;
        let peer = SocketAddr::from((first_ipv4(host, port).await?, port));
        socket.connect(peer).await.map_err(|e| {
            tracing::error!(peer = %peer, error = %e, "Failed to connect UDP socket");
            Error::Io(e)
        })?;
        tracing::info!(local = %self.local_addr, peer = %peer, "UDP peer set");
        self.peer = Some(peer);
        Ok(())
    }

    /// Get the local address this socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The connected peer, if any.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Send a datagram to the specified address.
    pub async fn send_to(&self, data: &[u8], addr: SocketAddr) -> Result<()> {
        let socket = self.socket.as_ref().ok_or(Error::NotConnected)?;

        tracing::trace!(
            local = %self.local_addr,
            remote = %addr,
            bytes = data.len(),
            "Sending datagram"
        );

        socket.send_to(data, addr).await.map_err(|e| {
            tracing::error!(
                local = %self.local_addr,
                remote = %addr,
                error = %e,
                "Failed to send datagram"
            );
            map_io_error(e, &addr.to_string())
        })?;
        Ok(())
    }

    /// Receive a datagram with timeout. Returns `(bytes_read, source_addr)`.
    pub async fn recv_from(
        &self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<(usize, SocketAddr)> {
        let socket = self.socket.as_ref().ok_or(Error::NotConnected)?;

        match tokio::time::timeout(timeout, socket.recv_from(buf)).await {
            Ok(Ok((n, src))) => {
                tracing::trace!(
                    local = %self.local_addr,
                    remote = %src,
                    bytes = n,
                    "Received datagram"
                );
                Ok((n, src))
            }
            Ok(Err(e)) => {
                tracing::error!(
                    local = %self.local_addr,
                    error = %e,
                    "Failed to receive datagram"
                );
                Err(map_io_error(e, &self.local_addr.to_string()))
            }
            Err(_) => Err(Error::Timeout),
        }
    }

    fn peer_label(&self) -> String {
        self.peer
            .map(|p| p.to_string())
            .unwrap_or_else(|| "unconnected".to_string())
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send(&mut self, data: &[u8], timeout: Duration) -> Result<()> {
        let socket = self.socket.as_ref().ok_or(Error::NotConnected)?;
        if self.peer.is_none() {
            return Err(Error::NotConnected);
        }

        tracing::trace!(
            local = %self.local_addr,
            peer = %self.peer_label(),
            bytes = data.len(),
            "Sending datagram"
        );

        match tokio::time::timeout(timeout, socket.send(data)).await {
            Ok(Ok(n)) if n == data.len() => Ok(()),
            Ok(Ok(n)) => Err(Error::Protocol(format!(
                "datagram truncated: sent {n} of {} bytes",
                data.len()
            ))),
            Ok(Err(e)) => Err(map_io_error(e, &self.peer_label())),
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let socket = self.socket.as_ref().ok_or(Error::NotConnected)?;
        if self.peer.is_none() {
            return Err(Error::NotConnected);
        }

        match tokio::time::timeout(timeout, socket.recv(buf)).await {
            Ok(Ok(n)) => {
                tracing::trace!(
                    local = %self.local_addr,
                    bytes = n,
                    data = ?&buf[..n],
                    "Received datagram"
                );
                Ok(n)
            }
            Ok(Err(e)) => Err(map_io_error(e, &self.peer_label())),
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.socket.take().is_some() {
            tracing::debug!(local = %self.local_addr, "UDP socket closed");
        }
        self.peer = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.socket.is_some() && self.peer.is_some()
    }
}

/// First IPv4 address `name` resolves to.
async fn first_ipv4(name: &str, port: u16) -> Result<Ipv4Addr> {
    let addrs = lookup_host((name, port)).await.map_err(|e| {
        tracing::error!(host = %name, error = %e, "Host lookup failed");
        Error::HostNotFound(name.to_string())
    })?;
    addrs
        .filter_map(|a| match a {
            SocketAddr::V4(v4) => Some(*v4.ip()),
            SocketAddr::V6(_) => None,
        })
        .next()
        .ok_or_else(|| Error::NoIpv4Address(name.to_string()))
}

fn map_bind_error(e: std::io::Error, addr: &str) -> Error {
    match e.kind() {
        std::io::ErrorKind::AddrInUse => Error::AddressInUse(addr.to_string()),
        std::io::ErrorKind::AddrNotAvailable => Error::NoIpv4Address(addr.to_string()),
        _ => Error::Io(e),
    }
}

/// On a connected socket an ICMP port-unreachable surfaces as
/// `ConnectionRefused` on the next send or receive.
fn map_io_error(e: std::io::Error, peer: &str) -> Error {
    match e.kind() {
        std::io::ErrorKind::ConnectionRefused => Error::ConnectionRefused(peer.to_string()),
        _ => Error::Io(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn bind_any_port() {
        let t = UdpTransport::bind_local(None, None).await.unwrap();
        assert!(t.local_addr().is_ipv4());
        assert_ne!(t.local_addr().port(), 0);
        assert!(!t.is_connected());
    }

    #[tokio::test]
    async fn bind_by_loopback_name() {
        let t = UdpTransport::bind_local(Some("127.0.0.1"), None).await.unwrap();
        assert_eq!(t.local_addr().ip().to_string(), "127.0.0.1");
    }

    #[tokio::test]
    async fn ipv6_only_address_has_no_ipv4() {
        let err = UdpTransport::bind_local(Some("::1"), None).await.unwrap_err();
        assert!(matches!(err, Error::NoIpv4Address(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn port_in_use() {
        let first = UdpTransport::bind_local(Some("127.0.0.1"), None).await.unwrap();
        let port = first.local_addr().port();
        let err = UdpTransport::bind_local(Some("127.0.0.1"), Some(port))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AddressInUse(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn connected_send_and_receive() {
        let server = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let server_port = server.local_addr().port();

        let mut client = UdpTransport::bind_local(Some("127.0.0.1"), None).await.unwrap();
        client.connect("127.0.0.1", server_port).await.unwrap();
        assert!(client.is_connected());

        client.send(b"<PST>AZ?</PST>", WAIT).await.unwrap();

        let mut buf = [0u8; 64];
        let (n, src) = server.recv_from(&mut buf, WAIT).await.unwrap();
        assert_eq!(&buf[..n], b"<PST>AZ?</PST>");

        server.send_to(b"AZ:123", src).await.unwrap();
        let n = client.receive(&mut buf, WAIT).await.unwrap();
        assert_eq!(&buf[..n], b"AZ:123");
    }

    #[tokio::test]
    async fn unconnected_send_fails() {
        let mut t = UdpTransport::bind_local(None, None).await.unwrap();
        let err = t.send(b"x", WAIT).await.unwrap_err();
        assert!(matches!(err, Error::NotConnected));
    }

    #[tokio::test]
    async fn receive_timeout() {
        let peer = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let mut t = UdpTransport::bind_local(Some("127.0.0.1"), None).await.unwrap();
        t.connect("127.0.0.1", peer.local_addr().port()).await.unwrap();
        let mut buf = [0u8; 16];
        let err = t
            .receive(&mut buf, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout));
    }

    #[tokio::test]
    async fn close_then_send() {
        let peer = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let mut t = UdpTransport::bind_local(Some("127.0.0.1"), None).await.unwrap();
        t.connect("127.0.0.1", peer.local_addr().port()).await.unwrap();
        t.close().await.unwrap();
        assert!(!t.is_connected());
        assert!(matches!(t.send(b"x", WAIT).await, Err(Error::NotConnected)));
    }
}
