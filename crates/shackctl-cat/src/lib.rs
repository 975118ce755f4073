//! shackctl-cat: GenericCAT backend for shackctl.
//!
//! Drives rigs that speak semicolon-terminated text CAT (Kenwood, Elecraft
//! and Yaesu families) over a serial port or a serial-over-TCP bridge.
//!
//! - [`protocol`] -- frame encode/decode
//! - [`dialect`] -- per-family command builders and parsers
//! - [`GenericCatDriver`] -- the [`DeviceDriver`](shackctl_core::DeviceDriver)
//!   implementation, including DTR/RTS PTT and PTT sharing

pub mod dialect;
pub mod driver;
pub mod protocol;

pub use dialect::{CatDialect, Kenwood, Yaesu, dialect_for};
pub use driver::GenericCatDriver;
