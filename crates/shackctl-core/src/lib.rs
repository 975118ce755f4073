//! shackctl-core: Core traits, types, and error definitions for shackctl.
//!
//! This crate defines the backend-agnostic abstractions shared by every
//! shackctl backend. Station loggers and CW consoles depend on these types
//! without pulling in any specific driver.
//!
//! # Key types
//!
//! - [`DeviceDriver`] -- the fixed interface every backend implements
//! - [`Transport`] / [`RpcTransport`] -- byte-stream and procedure-call links
//! - [`Capabilities`] -- what a connected backend can actually do
//! - [`DeviceState`] / [`DeviceEvent`] -- published state and change events
//! - [`DeviceProfile`] / [`ProfileStore`] -- read-only configuration
//! - [`Error`] / [`ErrorKind`] / [`Result`] -- error handling

pub mod capability;
pub mod command;
pub mod driver;
pub mod error;
pub mod events;
pub mod profile;
pub mod state;
pub mod transport;
pub mod types;

// Re-export key types at crate root for ergonomic `use shackctl_core::*`.
pub use capability::Capabilities;
pub use command::{Operation, Reply};
pub use driver::DeviceDriver;
pub use error::{Error, ErrorKind, Result};
pub use events::{DeviceEvent, EVENT_CHANNEL_CAPACITY};
pub use profile::{
    CapabilityHints, DeviceProfile, KeyerSettings, LinkSettings, MemoryProfileStore, ProfileStore,
};
pub use state::{ConnectionState, DeviceState, StateUpdate};
pub use transport::{RpcTransport, RpcValue, Transport};
pub use types::*;
