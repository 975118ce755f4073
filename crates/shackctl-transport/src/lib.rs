//! Transport implementations for shackctl.
//!
//! This crate provides concrete implementations of the
//! [`Transport`](shackctl_core::Transport) and
//! [`RpcTransport`](shackctl_core::RpcTransport) traits from `shackctl-core`:
//!
//! - [`SerialTransport`]: USB virtual COM ports and RS-232 lines, with
//!   DTR/RTS control for PTT keying
//! - [`TcpTransport`]: persistent TCP sessions to network transceivers
//! - [`UdpTransport`]: datagrams to keyer daemons and rotator controllers
//! - [`XmlRpcTransport`]: XML-RPC over HTTP to digital-modes applications

pub mod serial;
pub mod tcp;
pub mod udp;
pub mod xml;
pub mod xmlrpc;

pub use serial::{ControlLines, SerialTransport, validate_port_name};
pub use tcp::TcpTransport;
pub use udp::UdpTransport;
pub use xmlrpc::XmlRpcTransport;
