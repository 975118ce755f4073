//! The automation bridge interface.
//!
//! A bridge is a separate process that owns the serial ports of several rigs
//! and exposes each one as a numbered slot. The platform binding (or the
//! in-memory [`SimulatedBridge`](crate::sim::SimulatedBridge)) implements
//! [`Bridge`] and [`BridgeRig`]; the driver only talks to these traits.
//!
//! Bridge calls are synchronous property reads and writes. They are cheap
//! and never block on the rig itself: the bridge answers from its own cache
//! and forwards writes in the background.

use std::fmt;
use std::sync::Arc;

use shackctl_core::error::{Error, Result};
use shackctl_core::types::BackendKind;

use crate::params::{ParamMask, RigStatus};

/// Bridge generation. They differ only in how many rig slots they expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BridgeVersion {
    V1,
    V2,
}

impl BridgeVersion {
    pub fn max_slots(&self) -> u8 {
        match self {
            BridgeVersion::V1 => 2,
            BridgeVersion::V2 => 4,
        }
    }

    pub fn backend(&self) -> BackendKind {
        match self {
            BridgeVersion::V1 => BackendKind::VendorBridgeV1,
            BridgeVersion::V2 => BackendKind::VendorBridgeV2,
        }
    }

    /// The bridge version a backend talks to, if it is a bridge backend.
    pub fn for_backend(backend: BackendKind) -> Option<Self> {
        match backend {
            BackendKind::VendorBridgeV1 => Some(BridgeVersion::V1),
            BackendKind::VendorBridgeV2 => Some(BridgeVersion::V2),
            _ => None,
        }
    }

    /// Check that `slot` exists on this version.
    pub fn check_slot(&self, slot: u8) -> Result<()> {
        if (1..=self.max_slots()).contains(&slot) {
            Ok(())
        } else {
            Err(Error::Configuration(format!(
                "{self} has no rig slot {slot} (valid: 1-{})",
                self.max_slots()
            )))
        }
    }

    /// Display names of every slot ("Rig 1", "Rig 2", ...).
    pub fn slot_names(&self) -> Vec<String> {
        (1..=self.max_slots()).map(slot_name).collect()
    }
}

impl fmt::Display for BridgeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeVersion::V1 => write!(f, "bridge v1"),
            BridgeVersion::V2 => write!(f, "bridge v2"),
        }
    }
}

/// Display name of a slot as the bridge shows it.
pub fn slot_name(slot: u8) -> String {
    format!("Rig {slot}")
}

/// A running bridge process.
pub trait Bridge: Send + Sync {
    /// Bind to one rig slot (1-based).
    fn rig(&self, slot: u8) -> Result<Arc<dyn BridgeRig>>;
}

/// One rig slot inside a bridge.
///
/// Frequencies are in hertz. Parameter setters take single [`ParamMask`]
/// bits (`TX`, `SSB_U`, `RITON`, ...).
pub trait BridgeRig: Send + Sync {
    /// Rig type configured in the slot, e.g. `"IC-7300"`.
    fn rig_type(&self) -> String;

    /// Parameters this rig can report.
    fn readable_params(&self) -> ParamMask;

    /// Parameters this rig can change.
    fn writeable_params(&self) -> ParamMask;

    fn status(&self) -> RigStatus;

    fn status_text(&self) -> String {
        self.status().to_string()
    }

    /// The VFO bits currently set (`VFOA`, `VFOAB`, ...).
    fn vfo(&self) -> Result<ParamMask>;

    fn freq(&self) -> Result<u64>;
    fn freq_a(&self) -> Result<u64>;
    fn freq_b(&self) -> Result<u64>;
    fn set_freq(&self, hz: u64) -> Result<()>;
    fn set_freq_a(&self, hz: u64) -> Result<()>;
    fn set_freq_b(&self, hz: u64) -> Result<()>;

    /// The mode bit currently set.
    fn mode(&self) -> Result<ParamMask>;
    fn set_mode(&self, mode: ParamMask) -> Result<()>;

    /// `TX` or `RX`.
    fn tx(&self) -> Result<ParamMask>;
    fn set_tx(&self, tx: ParamMask) -> Result<()>;

    /// `RITON` or `RITOFF`.
    fn rit(&self) -> Result<ParamMask>;
    fn set_rit(&self, rit: ParamMask) -> Result<()>;
    fn rit_offset(&self) -> Result<i32>;
    fn set_rit_offset(&self, hz: i32) -> Result<()>;
}
