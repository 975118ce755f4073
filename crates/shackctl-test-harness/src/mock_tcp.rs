//! Mock TCP server for protocol-level testing.
//!
//! [`MockTcpServer`] provides a lightweight TCP listener pre-loaded with
//! scripted responses, enabling deterministic testing of network
//! transceiver sessions without real hardware.
//!
//! # Example
//!
//! ```
//! use shackctl_test_harness::MockTcpServer;
//!
//! # async fn example() -> shackctl_core::Result<()> {
//! let mut server = MockTcpServer::new().await?;
//! server.greet(b"ready;");
//! server.expect(b"vfo:0,0;", b"vfo:0,0,14074000;");
//! server.start();
//! let port = server.port();
//! // ... connect and test ...
//! # Ok(())
//! # }
//! ```

use shackctl_core::error::{Error, Result};
use std::collections::VecDeque;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// A pre-loaded request/response pair for the mock TCP server.
#[derive(Debug, Clone)]
struct TcpExpectation {
    /// The exact bytes we expect the client to send.
    request: Vec<u8>,
    /// The bytes to send back when the matching request is received.
    response: Vec<u8>,
}

/// A mock TCP server for testing protocol engines over the network.
///
/// The server listens on a random available port on localhost. Once
/// [`start`](MockTcpServer::start) is called, it accepts a single
/// connection, writes the greeting, and processes expectations in order.
///
/// After the last expectation the server either hangs up (see
/// [`close_when_done`](MockTcpServer::close_when_done)) or keeps the
/// session open until the client disconnects.
pub struct MockTcpServer {
    listener: Option<TcpListener>,
    addr: SocketAddr,
    greeting: Vec<u8>,
    expectations: VecDeque<TcpExpectation>,
    close_when_done: bool,
    server_handle: Option<JoinHandle<std::result::Result<(), String>>>,
}

impl MockTcpServer {
    /// Create a new mock TCP server listening on a random port.
    ///
    /// The listener is bound immediately, so a client may connect as soon
    /// as [`start`](MockTcpServer::start) has been called.
    pub async fn new() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await.map_err(|e| {
            Error::Initialization(format!("failed to bind mock TCP server: {e}"))
        })?;
        let addr = listener.local_addr().map_err(Error::Io)?;
        Ok(Self {
            listener: Some(listener),
            addr,
            greeting: Vec::new(),
            expectations: VecDeque::new(),
            close_when_done: false,
            server_handle: None,
        })
    }

    /// Bytes written as soon as the client connects.
    pub fn greet(&mut self, greeting: &[u8]) {
        self.greeting = greeting.to_vec();
    }

    /// Add an expected request/response pair.
    ///
    /// Expectations are consumed in order. When the connected client sends
    /// bytes matching `request`, the server replies with `response`.
    pub fn expect(&mut self, request: &[u8], response: &[u8]) {
        self.expectations.push_back(TcpExpectation {
            request: request.to_vec(),
            response: response.to_vec(),
        });
    }

    /// Hang up right after the last expectation.
    pub fn close_when_done(&mut self) {
        self.close_when_done = true;
    }

    /// Get the address the server is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Port of the listener.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Start the server task.
    ///
    /// Call [`wait`](MockTcpServer::wait) afterwards to check that every
    /// expectation was met.
    pub fn start(&mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        let greeting = std::mem::take(&mut self.greeting);
        let expectations: Vec<TcpExpectation> = self.expectations.drain(..).collect();
        let close_when_done = self.close_when_done;

        let handle = tokio::spawn(async move {
            let (mut stream, peer) = listener
                .accept()
                .await
                .map_err(|e| format!("failed to accept connection: {e}"))?;
            debug!(%peer, "mock server accepted connection");

            if !greeting.is_empty() {
                stream
                    .write_all(&greeting)
                    .await
                    .map_err(|e| format!("greeting write error: {e}"))?;
            }

            for (i, expectation) in expectations.iter().enumerate() {
                let mut buf = vec![0u8; expectation.request.len()];
                let mut total_read = 0;

                while total_read < expectation.request.len() {
                    let n = stream
                        .read(&mut buf[total_read..])
                        .await
                        .map_err(|e| format!("expectation {i}: read error: {e}"))?;
                    if n == 0 {
                        return Err(format!(
                            "expectation {i}: client disconnected after {total_read} bytes (expected {})",
                            expectation.request.len()
                        ));
                    }
                    total_read += n;
                }

                trace!(expectation = i, request = %String::from_utf8_lossy(&buf), "mock server read");
                if buf != expectation.request {
                    return Err(format!(
                        "expectation {i}: request mismatch: expected {:?}, got {:?}",
                        String::from_utf8_lossy(&expectation.request),
                        String::from_utf8_lossy(&buf)
                    ));
                }

                stream
                    .write_all(&expectation.response)
                    .await
                    .map_err(|e| format!("expectation {i}: write error: {e}"))?;
                stream
                    .flush()
                    .await
                    .map_err(|e| format!("expectation {i}: flush error: {e}"))?;
            }

            if close_when_done {
                return Ok(());
            }

            let mut buf = [0u8; 256];
            loop {
                match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => return Ok(()),
                    Ok(n) => {
                        return Err(format!(
                            "unexpected data after last expectation: {:?}",
                            String::from_utf8_lossy(&buf[..n])
                        ));
                    }
                }
            }
        });

        self.server_handle = Some(handle);
    }

    /// Wait for the server task to complete and return any errors.
    pub async fn wait(self) -> std::result::Result<(), String> {
        if let Some(handle) = self.server_handle {
            handle
                .await
                .map_err(|e| format!("server task panicked: {e}"))?
        } else {
            Ok(())
        }
    }
}
