//! shackctl-test-harness: Test utilities, mock transports, and scripted
//! drivers for shackctl.
//!
//! - [`MockTransport`] for deterministic unit testing of protocol engines
//!   without hardware
//! - [`MockTcpServer`] for protocol engines that talk over TCP
//! - [`ScriptedDriver`] for testing the dispatcher and the façades without
//!   any protocol at all

pub mod mock_serial;
pub mod mock_tcp;
pub mod scripted;

pub use mock_serial::{Line, MockTransport};
pub use mock_tcp::MockTcpServer;
pub use scripted::{Failure, ScriptHandle, ScriptedDriver};
