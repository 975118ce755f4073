//! shackctl-tci: network text protocol backend for shackctl.
//!
//! Talks to SDR servers that accept `name:arg,arg;` messages on a
//! persistent TCP session and broadcast every state change back.
//!
//! - [`codec`] -- message encoding/decoding (pure, no I/O)
//! - [`state`] -- transceiver state folded from server broadcasts
//! - [`TciDriver`] -- the [`DeviceDriver`](shackctl_core::DeviceDriver)

pub mod codec;
pub mod driver;
pub mod state;

pub use driver::{READY_TIMEOUT, TciDriver};
pub use state::{ReceiverState, TrxState};
