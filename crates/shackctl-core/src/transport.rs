//! Transport traits for device communication.
//!
//! [`Transport`] abstracts over a byte stream to a device (serial port, TCP
//! socket, connected UDP socket). [`RpcTransport`] abstracts over a
//! request/response procedure-call channel to a companion application.
//!
//! Backend drivers operate on these traits rather than on concrete sockets,
//! so the same driver runs against real hardware and against the mock
//! transports in `shackctl-test-harness`.

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};

/// Upper bound on reads performed by [`Transport::discard_input`].
const DISCARD_MAX_READS: usize = 64;

/// Asynchronous byte-level transport to a device.
///
/// Every operation is deadline-bound. A `send` either writes the whole
/// buffer or fails; an adapter that cannot finish a write before its
/// timeout drops the underlying handle and reports [`Error::Timeout`], so a
/// later command never continues a half-written frame.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send raw bytes to the device within `timeout`.
    async fn send(&mut self, data: &[u8], timeout: Duration) -> Result<()>;

    /// Receive bytes from the device into the provided buffer.
    ///
    /// Returns the number of bytes actually read. Will wait up to `timeout`
    /// for data to arrive; returns [`Error::Timeout`] if nothing arrives.
    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Close the transport connection.
    ///
    /// After calling `close()`, subsequent `send()` and `receive()` calls
    /// return [`Error::NotConnected`].
    async fn close(&mut self) -> Result<()>;

    /// Check whether the transport is currently connected.
    fn is_connected(&self) -> bool;

    /// Drive the DTR control line. Only serial adapters support this.
    async fn set_dtr(&mut self, _on: bool) -> Result<()> {
        Err(Error::unsupported("DTR line control"))
    }

    /// Drive the RTS control line. Only serial adapters support this.
    async fn set_rts(&mut self, _on: bool) -> Result<()> {
        Err(Error::unsupported("RTS line control"))
    }

    /// Throw away whatever the device has already sent.
    ///
    /// Called before a new exchange so a late reply to a timed-out command
    /// is never taken as the answer to the next one. Returns the number of
    /// bytes dropped.
    async fn discard_input(&mut self) -> Result<usize> {
        let mut buf = [0u8; 256];
        let mut dropped = 0;
        for _ in 0..DISCARD_MAX_READS {
            match self.receive(&mut buf, Duration::ZERO).await {
                Ok(0) | Err(Error::Timeout) => break,
                Ok(n) => dropped += n,
                Err(e) => return Err(e),
            }
        }
        if dropped > 0 {
            tracing::debug!(bytes = dropped, "discarded stale input");
        }
        Ok(dropped)
    }
}

/// A value carried by a remote procedure call.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcValue {
    /// No value (empty response).
    Nil,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    Array(Vec<RpcValue>),
    /// Named members, in wire order.
    Struct(Vec<(String, RpcValue)>),
}

impl RpcValue {
    /// Return the contained string, if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RpcValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Look up a struct member by name.
    pub fn member(&self, name: &str) -> Option<&RpcValue> {
        match self {
            RpcValue::Struct(members) => members.iter().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Return the contained integer, if this is an integer value.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            RpcValue::Int(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for RpcValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcValue::Nil => write!(f, "nil"),
            RpcValue::Bool(b) => write!(f, "{b}"),
            RpcValue::Int(n) => write!(f, "{n}"),
            RpcValue::Double(d) => write!(f, "{d}"),
            RpcValue::String(s) => write!(f, "{s:?}"),
            RpcValue::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            RpcValue::Struct(members) => {
                write!(f, "{{")?;
                for (i, (name, value)) in members.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}: {value}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// A procedure-call channel to a companion application.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Invoke `method` with `params`, waiting at most `timeout` for the reply.
    ///
    /// A fault reply maps to [`Error::Protocol`]; a reply that cannot be
    /// decoded at all also maps to [`Error::Protocol`] and is never treated
    /// as success.
    async fn call(&mut self, method: &str, params: &[RpcValue], timeout: Duration)
    -> Result<RpcValue>;

    /// The endpoint this transport talks to, for logging.
    fn endpoint(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Transport that yields a fixed list of chunks, then times out.
    struct Chunks(Vec<Vec<u8>>);

    #[async_trait]
    impl Transport for Chunks {
        async fn send(&mut self, _data: &[u8], _timeout: Duration) -> Result<()> {
            Ok(())
        }

        async fn receive(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
            if self.0.is_empty() {
                return Err(Error::Timeout);
            }
            let chunk = self.0.remove(0);
            buf[..chunk.len()].copy_from_slice(&chunk);
            Ok(chunk.len())
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }

        fn is_connected(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn discard_input_drains_until_timeout() {
        let mut t = Chunks(vec![b"FA0001".to_vec(), b"4250000;".to_vec()]);
        let dropped = t.discard_input().await.unwrap();
        assert_eq!(dropped, 14);
        assert!(t.0.is_empty());
    }

    #[tokio::test]
    async fn line_control_unsupported_by_default() {
        let mut t = Chunks(vec![]);
        let err = t.set_dtr(true).await.unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }

    #[test]
    fn rpc_value_display() {
        let v = RpcValue::Array(vec![RpcValue::Int(1), RpcValue::String("CQ".into())]);
        assert_eq!(v.to_string(), "[1, \"CQ\"]");
        assert_eq!(RpcValue::String("x".into()).as_str(), Some("x"));
        assert_eq!(RpcValue::Int(3).as_int(), Some(3));
        assert_eq!(RpcValue::Nil.as_str(), None);
    }
}
