//! shackctl-rotator: antenna rotator backend for shackctl.
//!
//! Drives a PstRotator-style controller with short UDP messages. Bearings
//! are whole degrees; the façade normalizes them before they get here.

pub mod driver;
pub mod protocol;

pub use driver::PstRotatorDriver;
pub use protocol::DEFAULT_PORT;
