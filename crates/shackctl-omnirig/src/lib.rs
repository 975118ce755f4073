//! shackctl-omnirig: vendor bridge backend for shackctl.
//!
//! A vendor bridge hosts several rigs at once and exposes each as a slot
//! ("Rig 1".."Rig 4"). This crate binds a [`DeviceDriver`] to one slot.
//!
//! The bridge itself is reached through the [`Bridge`] trait. An in-memory
//! [`SimulatedBridge`] is included for tests and demonstrations.
//!
//! [`DeviceDriver`]: shackctl_core::DeviceDriver

pub mod bridge;
pub mod driver;
pub mod params;
pub mod sim;

pub use bridge::{Bridge, BridgeRig, BridgeVersion, slot_name};
pub use driver::{DEFAULT_OFFLINE_GRACE, DEFAULT_SETTLE, OmniRigDriver};
pub use params::{ParamMask, RigStatus};
pub use sim::{SimulatedBridge, SimulatedRig};
