//! Mock transport for deterministic testing of protocol engines.
//!
//! [`MockTransport`] implements the [`Transport`] trait with pre-loaded
//! request/response pairs. This lets you test CAT command generation,
//! keyer byte sequences and response parsing without real hardware.
//!
//! Clones share state: keep one clone in the test and hand the other to the
//! driver, then inspect what was sent after the driver has moved into a
//! dispatcher.
//!
//! # Example
//!
//! ```
//! use shackctl_test_harness::MockTransport;
//!
//! let mock = MockTransport::new();
//! mock.expect(b"FA;", b"FA00014074000;");
//! let spy = mock.clone();
//! assert_eq!(spy.remaining_expectations(), 1);
//! ```

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use shackctl_core::error::{Error, Result};
use shackctl_core::transport::Transport;

/// A serial control line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Line {
    Dtr,
    Rts,
}

/// How the device answers one expected request.
#[derive(Debug, Clone)]
enum Answer {
    /// Reply immediately.
    Reply(Vec<u8>),
    /// Never reply; `receive` waits out its timeout.
    Silent,
    /// Reply only after the first `receive` has timed out.
    Late(Vec<u8>),
}

/// A pre-loaded request/response pair for the mock transport.
#[derive(Debug, Clone)]
struct Expectation {
    /// The exact bytes we expect to be sent.
    request: Vec<u8>,
    answer: Answer,
}

#[derive(Debug)]
struct Inner {
    /// Ordered queue of expected request/response pairs.
    expectations: VecDeque<Expectation>,
    /// The answer pending for the next `receive()` call.
    pending: Option<Answer>,
    /// Cursor into a pending reply (how many bytes have been read so far).
    response_cursor: usize,
    /// Bytes the device sends on its own (echo, status, broadcasts).
    incoming: VecDeque<Vec<u8>>,
    /// Whether the transport is "connected".
    connected: bool,
    /// Whether DTR/RTS are implemented.
    has_control_lines: bool,
    /// Log of all bytes sent through this transport.
    sent_log: Vec<Vec<u8>>,
    /// Log of control-line changes.
    line_log: Vec<(Line, bool)>,
}

/// A mock [`Transport`] for testing protocol engines without hardware.
///
/// Expectations are consumed in order. When `send()` is called, the sent
/// data is recorded and matched against the next expectation. The
/// corresponding answer is then produced by the next `receive()` call.
///
/// If no expectation matches or the queue is exhausted, `send()` fails with
/// [`Error::Protocol`].
#[derive(Debug, Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<Inner>>,
}

impl MockTransport {
    /// Create a new mock transport in the connected state.
    pub fn new() -> Self {
        MockTransport {
            inner: Arc::new(Mutex::new(Inner {
                expectations: VecDeque::new(),
                pending: None,
                response_cursor: 0,
                incoming: VecDeque::new(),
                connected: true,
                has_control_lines: true,
                sent_log: Vec::new(),
                line_log: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add an expected request/response pair.
    ///
    /// An empty `response` means the device acknowledges nothing; the next
    /// `receive()` times out at once.
    pub fn expect(&self, request: &[u8], response: &[u8]) {
        self.push(request, Answer::Reply(response.to_vec()));
    }

    /// Expect `request` and never answer it. The next `receive()` waits for
    /// its full timeout before failing with [`Error::Timeout`].
    pub fn expect_no_reply(&self, request: &[u8]) {
        self.push(request, Answer::Silent);
    }

    /// Expect `request` and answer only after the caller has given up.
    ///
    /// The first `receive()` waits out its timeout and fails; `response`
    /// then sits in the input buffer like a reply that arrived late.
    pub fn expect_late_reply(&self, request: &[u8], response: &[u8]) {
        self.push(request, Answer::Late(response.to_vec()));
    }

    fn push(&self, request: &[u8], answer: Answer) {
        self.lock().expectations.push_back(Expectation {
            request: request.to_vec(),
            answer,
        });
    }

    /// Queue bytes the device sends without being asked.
    pub fn push_incoming(&self, data: &[u8]) {
        self.lock().incoming.push_back(data.to_vec());
    }

    /// Return all data that has been sent through this transport.
    ///
    /// Each element is the byte slice from one `send()` call.
    pub fn sent_data(&self) -> Vec<Vec<u8>> {
        self.lock().sent_log.clone()
    }

    /// Number of `send()` calls so far.
    pub fn send_count(&self) -> usize {
        self.lock().sent_log.len()
    }

    /// Control-line changes, in order.
    pub fn line_changes(&self) -> Vec<(Line, bool)> {
        self.lock().line_log.clone()
    }

    /// Return the number of expectations that have not yet been consumed.
    pub fn remaining_expectations(&self) -> usize {
        self.lock().expectations.len()
    }

    /// Set the connected state of the mock transport.
    ///
    /// When set to `false`, subsequent `send()` and `receive()` calls will
    /// return [`Error::NotConnected`].
    pub fn set_connected(&self, connected: bool) {
        self.lock().connected = connected;
    }

    /// Behave like a network link without DTR/RTS lines.
    pub fn without_control_lines(self) -> Self {
        self.lock().has_control_lines = false;
        self
    }

    fn set_line(&self, line: Line, on: bool) -> Result<()> {
        let mut inner = self.lock();
        if !inner.connected {
            return Err(Error::NotConnected);
        }
        if !inner.has_control_lines {
            return Err(Error::unsupported(format!("{line:?} line control")));
        }
        inner.line_log.push((line, on));
        Ok(())
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn copy_out(data: &[u8], cursor: &mut usize, buf: &mut [u8]) -> usize {
    let remaining = &data[*cursor..];
    let n = remaining.len().min(buf.len());
    buf[..n].copy_from_slice(&remaining[..n]);
    *cursor += n;
    n
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, data: &[u8], _timeout: Duration) -> Result<()> {
        let mut inner = self.lock();
        if !inner.connected {
            return Err(Error::NotConnected);
        }

        inner.sent_log.push(data.to_vec());

        match inner.expectations.pop_front() {
            Some(expectation) => {
                if data != expectation.request.as_slice() {
                    return Err(Error::Protocol(format!(
                        "unexpected send data: expected {:02X?}, got {:02X?}",
                        expectation.request, data
                    )));
                }
                inner.pending = Some(expectation.answer);
                inner.response_cursor = 0;
                Ok(())
            }
            None => Err(Error::Protocol(
                "no more expectations in mock transport".into(),
            )),
        }
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let silent = {
            let mut inner = self.lock();
            if !inner.connected {
                return Err(Error::NotConnected);
            }

            match inner.pending.take() {
                Some(Answer::Reply(data)) => {
                    let mut cursor = inner.response_cursor;
                    let n = copy_out(&data, &mut cursor, buf);
                    if cursor < data.len() {
                        inner.pending = Some(Answer::Reply(data));
                        inner.response_cursor = cursor;
                    } else {
                        inner.response_cursor = 0;
                    }
                    if n > 0 {
                        return Ok(n);
                    }
                    false
                }
                Some(Answer::Late(data)) => {
                    inner.pending = Some(Answer::Reply(data));
                    inner.response_cursor = 0;
                    true
                }
                Some(Answer::Silent) => true,
                None => false,
            }
        };

        if silent {
            tokio::time::sleep(timeout).await;
            return Err(Error::Timeout);
        }

        let mut inner = self.lock();
        match inner.incoming.pop_front() {
            Some(data) => {
                let mut cursor = 0;
                let n = copy_out(&data, &mut cursor, buf);
                if cursor < data.len() {
                    inner.incoming.push_front(data[cursor..].to_vec());
                }
                Ok(n)
            }
            None => Err(Error::Timeout),
        }
    }

    async fn close(&mut self) -> Result<()> {
        let mut inner = self.lock();
        inner.connected = false;
        inner.pending = None;
        inner.response_cursor = 0;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    async fn set_dtr(&mut self, on: bool) -> Result<()> {
        self.set_line(Line::Dtr, on)
    }

    async fn set_rts(&mut self, on: bool) -> Result<()> {
        self.set_line(Line::Rts, on)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Duration = Duration::from_millis(100);

    #[tokio::test]
    async fn basic_send_receive() {
        let mut mock = MockTransport::new();
        mock.expect(b"FA;", b"FA00014074000;");

        mock.send(b"FA;", WAIT).await.unwrap();

        let mut buf = [0u8; 64];
        let n = mock.receive(&mut buf, WAIT).await.unwrap();
        assert_eq!(&buf[..n], b"FA00014074000;");
    }

    #[tokio::test]
    async fn clones_share_logs() {
        let mut mock = MockTransport::new();
        let spy = mock.clone();
        mock.expect(&[0x01, 0x02], &[0xFF]);
        mock.expect(&[0x03, 0x04], &[0xFE]);

        mock.send(&[0x01, 0x02], WAIT).await.unwrap();
        mock.send(&[0x03, 0x04], WAIT).await.unwrap();

        assert_eq!(spy.send_count(), 2);
        assert_eq!(spy.sent_data()[1], vec![0x03, 0x04]);
        assert_eq!(spy.remaining_expectations(), 0);
    }

    #[tokio::test]
    async fn wrong_data_errors() {
        let mut mock = MockTransport::new();
        mock.expect(&[0x01], &[0xFF]);

        let result = mock.send(&[0x99], WAIT).await;
        assert!(matches!(result.unwrap_err(), Error::Protocol(_)));
    }

    #[tokio::test]
    async fn no_expectations_errors() {
        let mut mock = MockTransport::new();
        let result = mock.send(&[0x01], WAIT).await;
        assert!(matches!(result.unwrap_err(), Error::Protocol(_)));
    }

    #[tokio::test]
    async fn receive_without_send_times_out() {
        let mut mock = MockTransport::new();
        let mut buf = [0u8; 64];
        let result = mock.receive(&mut buf, WAIT).await;
        assert!(matches!(result.unwrap_err(), Error::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_device_waits_out_timeout() {
        let mut mock = MockTransport::new();
        mock.expect_no_reply(b"FA;");
        mock.send(b"FA;", WAIT).await.unwrap();

        let start = tokio::time::Instant::now();
        let mut buf = [0u8; 16];
        let err = mock
            .receive(&mut buf, Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout));
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn late_reply_lands_in_input_buffer() {
        let mut mock = MockTransport::new();
        mock.expect_late_reply(b"FA;", b"FA00007030000;");
        mock.send(b"FA;", WAIT).await.unwrap();

        let mut buf = [0u8; 32];
        assert!(matches!(
            mock.receive(&mut buf, WAIT).await,
            Err(Error::Timeout)
        ));
        let dropped = mock.discard_input().await.unwrap();
        assert_eq!(dropped, 14);
    }

    #[tokio::test]
    async fn unsolicited_bytes() {
        let mut mock = MockTransport::new();
        mock.push_incoming(b"CQ");
        let mut buf = [0u8; 1];
        assert_eq!(mock.receive(&mut buf, WAIT).await.unwrap(), 1);
        assert_eq!(buf[0], b'C');
        assert_eq!(mock.receive(&mut buf, WAIT).await.unwrap(), 1);
        assert_eq!(buf[0], b'Q');
        assert!(mock.receive(&mut buf, WAIT).await.is_err());
    }

    #[tokio::test]
    async fn partial_receive() {
        let mut mock = MockTransport::new();
        mock.expect(&[0x01], &[0xAA, 0xBB, 0xCC, 0xDD]);
        mock.send(&[0x01], WAIT).await.unwrap();

        let mut buf = [0u8; 2];
        let n = mock.receive(&mut buf, WAIT).await.unwrap();
        assert_eq!(&buf[..n], &[0xAA, 0xBB]);
        let n = mock.receive(&mut buf, WAIT).await.unwrap();
        assert_eq!(&buf[..n], &[0xCC, 0xDD]);
    }

    #[tokio::test]
    async fn control_lines_are_logged() {
        let mut mock = MockTransport::new();
        mock.set_dtr(true).await.unwrap();
        mock.set_rts(false).await.unwrap();
        assert_eq!(mock.line_changes(), vec![(Line::Dtr, true), (Line::Rts, false)]);

        let mut net = MockTransport::new().without_control_lines();
        assert!(matches!(net.set_dtr(true).await, Err(Error::Unsupported(_))));
    }

    #[tokio::test]
    async fn disconnect() {
        let mut mock = MockTransport::new();
        mock.close().await.unwrap();
        assert!(!mock.is_connected());
        assert!(matches!(
            mock.send(&[0x01], WAIT).await.unwrap_err(),
            Error::NotConnected
        ));
    }
}
