//! shackctl-keyer: CW keyer backends for shackctl.
//!
//! - [`WinKeyDriver`] -- serial keyer chip with host mode and echo
//! - [`CwDaemonDriver`] -- keyer daemon over UDP
//! - [`FldigiDriver`] -- digital-modes application over XML-RPC
//! - [`MorseOverCatDriver`] -- the rig keys CW itself, through its
//!   dispatcher
//! - [`DummyKeyer`] -- no hardware; logs and echoes

pub mod cat;
pub mod daemon;
pub mod dummy;
pub mod fldigi;
pub mod winkey;

pub use cat::MorseOverCatDriver;
pub use daemon::CwDaemonDriver;
pub use dummy::DummyKeyer;
pub use fldigi::FldigiDriver;
pub use winkey::WinKeyDriver;
