//! TCP transport for network-attached transceivers.
//!
//! [`TcpTransport`] carries the `cmd:args;` text protocol of network
//! transceivers and any other CAT stream exposed on a TCP port.
//!
//! Socket failures are reported as distinct errors so that the operator
//! sees what actually went wrong:
//!
//! | Situation                         | Error                      |
//! |-----------------------------------|----------------------------|
//! | name does not resolve             | [`Error::HostNotFound`]    |
//! | peer actively refused             | [`Error::ConnectionRefused`] |
//! | peer closed an open session       | [`Error::HostClosed`]      |
//! | connect, send or read took too long | [`Error::Timeout`]       |
//!
//! # Example
//!
//! ```no_run
//! use shackctl_core::Transport;
//! use shackctl_transport::TcpTransport;
//! use std::time::Duration;
//!
//! # async fn example() -> shackctl_core::Result<()> {
//! let mut transport = TcpTransport::connect("192.168.1.20", 40001).await?;
//! transport.send(b"vfo:0,0;", Duration::from_millis(500)).await?;
//!
//! let mut buf = [0u8; 4096];
//! let n = transport.receive(&mut buf, Duration::from_secs(2)).await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use shackctl_core::error::{Error, Result};
use shackctl_core::transport::Transport;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, lookup_host};

/// Default connection timeout (5 seconds).
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// TCP transport for device communication.
#[derive(Debug)]
pub struct TcpTransport {
    /// The underlying TCP stream, `None` after `close()` or a broken session.
    stream: Option<TcpStream>,
    /// The address string for logging/debugging.
    addr: String,
}

impl TcpTransport {
    /// Connect to `host:port` using the default timeout.
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        Self::connect_with_timeout(host, port, DEFAULT_CONNECT_TIMEOUT).await
    }

    /// Resolve `host`, then connect to the first address that accepts
    /// within `timeout`.
    pub async fn connect_with_timeout(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let addr = format!("{host}:{port}");
        tracing::debug!(
            addr = %addr,
            timeout_ms = timeout.as_millis(),
            "Connecting to TCP endpoint"
        );

        let candidates = resolve(host, port).await?;

        let mut last_err = Error::HostNotFound(host.to_string());
        for candidate in candidates {
            match tokio::time::timeout(timeout, TcpStream::connect(candidate)).await {
                Ok(Ok(stream)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::warn!(
                            addr = %addr,
                            error = %e,
                            "Failed to set TCP_NODELAY (continuing anyway)"
                        );
                    }
                    tracing::info!(addr = %addr, peer = %candidate, "TCP connection established");
                    return Ok(Self {
                        stream: Some(stream),
                        addr,
                    });
                }
                Ok(Err(e)) => {
                    tracing::debug!(peer = %candidate, error = %e, "TCP connect attempt failed");
                    last_err = map_connect_error(e, &addr);
                }
                Err(_) => {
                    tracing::debug!(peer = %candidate, "TCP connect attempt timed out");
                    last_err = Error::Timeout;
                }
            }
        }

        tracing::error!(addr = %addr, error = %last_err, "TCP connection failed");
        Err(last_err)
    }

    /// Wrap an existing `TcpStream` (accepted from a listener in tests).
    pub fn from_stream(stream: TcpStream, addr: String) -> Self {
        tracing::debug!(addr = %addr, "Wrapping existing TCP stream");
        Self {
            stream: Some(stream),
            addr,
        }
    }

    /// Get the address string this transport was connected to.
    pub fn addr(&self) -> &str {
        &self.addr
    }
}

async fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>> {
    let addrs: Vec<SocketAddr> = lookup_host((host, port))
        .await
        .map_err(|e| {
            tracing::error!(host = %host, error = %e, "Host lookup failed");
            Error::HostNotFound(host.to_string())
        })?
        .collect();
    if addrs.is_empty() {
        return Err(Error::HostNotFound(host.to_string()));
    }
    Ok(addrs)
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&mut self, data: &[u8], timeout: Duration) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;

        tracing::trace!(
            addr = %self.addr,
            bytes = data.len(),
            data = ?data,
            "Sending data"
        );

        let write = async {
            stream.write_all(data).await?;
            stream.flush().await
        };

        match tokio::time::timeout(timeout, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                tracing::error!(addr = %self.addr, error = %e, "Failed to send data");
                let err = map_io_error(e);
                if matches!(err, Error::HostClosed) {
                    self.stream = None;
                }
                Err(err)
            }
            Err(_) => {
                tracing::warn!(
                    addr = %self.addr,
                    timeout_ms = timeout.as_millis(),
                    "Write timed out, dropping connection"
                );
                self.stream = None;
                Err(Error::Timeout)
            }
        }
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;

        let result = tokio::time::timeout(timeout, stream.read(buf)).await;

        match result {
            Ok(Ok(0)) => {
                tracing::warn!(addr = %self.addr, "Peer closed connection (0 bytes read)");
                self.stream = None;
                Err(Error::HostClosed)
            }
            Ok(Ok(n)) => {
                tracing::trace!(
                    addr = %self.addr,
                    bytes = n,
                    data = ?&buf[..n],
                    "Received data"
                );
                Ok(n)
            }
            Ok(Err(e)) => {
                tracing::error!(addr = %self.addr, error = %e, "Failed to receive data");
                let err = map_io_error(e);
                if matches!(err, Error::HostClosed) {
                    self.stream = None;
                }
                Err(err)
            }
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            tracing::debug!(addr = %self.addr, "Closing TCP connection");
            if let Err(e) = stream.shutdown().await {
                tracing::warn!(
                    addr = %self.addr,
                    error = %e,
                    "Failed to shutdown TCP stream (continuing anyway)"
                );
            }
            tracing::info!(addr = %self.addr, "TCP connection closed");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        if self.stream.is_some() {
            tracing::debug!(addr = %self.addr, "TcpTransport dropped, closing connection");
        }
    }
}

/// Map a connection-time I/O error to the appropriate [`Error`] variant.
fn map_connect_error(e: std::io::Error, addr: &str) -> Error {
    match e.kind() {
        std::io::ErrorKind::ConnectionRefused => Error::ConnectionRefused(addr.to_string()),
        std::io::ErrorKind::TimedOut => Error::Timeout,
        _ => Error::Io(e),
    }
}

/// Map a data-path I/O error to the appropriate [`Error`] variant.
fn map_io_error(e: std::io::Error) -> Error {
    match e.kind() {
        std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::UnexpectedEof => Error::HostClosed,
        _ => Error::Io(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    const SEND: Duration = Duration::from_secs(1);

    async fn test_listener() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    #[tokio::test]
    async fn connect_send_receive() {
        let (listener, port) = test_listener().await;

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 256];
            let n = stream.read(&mut buf).await.unwrap();
            stream.write_all(&buf[..n]).await.unwrap();
            stream.flush().await.unwrap();
        });

        let mut transport = TcpTransport::connect("127.0.0.1", port).await.unwrap();
        assert!(transport.is_connected());
        assert_eq!(transport.addr(), format!("127.0.0.1:{port}"));

        transport.send(b"trx:0,true;", SEND).await.unwrap();

        let mut buf = [0u8; 256];
        let n = transport
            .receive(&mut buf, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(&buf[..n], b"trx:0,true;");

        transport.close().await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn connect_refused() {
        let (listener, port) = test_listener().await;
        drop(listener);

        let err = TcpTransport::connect("127.0.0.1", port).await.unwrap_err();
        assert!(
            matches!(err, Error::ConnectionRefused(_)),
            "expected ConnectionRefused, got: {err:?}"
        );
    }

    #[tokio::test]
    async fn unknown_host() {
        let err = TcpTransport::connect("no-such-host.invalid", 40001)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::HostNotFound(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn connect_timeout_to_blackhole() {
        // 192.0.2.0/24 is TEST-NET-1. Most networks drop it; sandboxes
        // may refuse it or have no route at all.
        let result =
            TcpTransport::connect_with_timeout("192.0.2.1", 12345, Duration::from_millis(100)).await;
        let err = result.unwrap_err();
        assert!(
            matches!(
                err,
                Error::Timeout | Error::Io(_) | Error::ConnectionRefused(_) | Error::HostNotFound(_)
            ),
            "expected a connect failure, got: {err:?}"
        );
    }

    #[tokio::test]
    async fn peer_close_is_host_closed() {
        let (listener, port) = test_listener().await;

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let mut transport = TcpTransport::connect("127.0.0.1", port).await.unwrap();
        server.await.unwrap();

        let mut buf = [0u8; 64];
        let err = transport
            .receive(&mut buf, Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::HostClosed), "got: {err:?}");
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn receive_timeout() {
        let (listener, port) = test_listener().await;

        let server = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
        });

        let mut transport = TcpTransport::connect("127.0.0.1", port).await.unwrap();
        let mut buf = [0u8; 64];
        let err = transport
            .receive(&mut buf, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout));
        assert!(transport.is_connected());

        server.abort();
    }

    #[tokio::test]
    async fn operations_after_close() {
        let (listener, port) = test_listener().await;
        let server = tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let mut transport = TcpTransport::connect("127.0.0.1", port).await.unwrap();
        transport.close().await.unwrap();
        assert!(!transport.is_connected());

        assert!(matches!(
            transport.send(b"x", SEND).await,
            Err(Error::NotConnected)
        ));
        let mut buf = [0u8; 8];
        assert!(matches!(
            transport.receive(&mut buf, SEND).await,
            Err(Error::NotConnected)
        ));

        server.await.unwrap();
    }
}
