//! Bridge parameter masks, rig status and the mode map.
//!
//! The bridge describes everything as bits of one parameter word: which
//! parameters a rig can read or write, which VFO is active, the current
//! mode, TX/RX. Bit values follow the bridge's published type library.

use std::fmt;
use std::ops::{BitAnd, BitOr};

use shackctl_core::types::Mode;

/// A set of bridge parameter bits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ParamMask(u32);

impl ParamMask {
    pub const UNKNOWN: ParamMask = ParamMask(0x0000_0001);
    pub const FREQ: ParamMask = ParamMask(0x0000_0002);
    pub const FREQA: ParamMask = ParamMask(0x0000_0004);
    pub const FREQB: ParamMask = ParamMask(0x0000_0008);
    pub const PITCH: ParamMask = ParamMask(0x0000_0010);
    pub const RITOFFSET: ParamMask = ParamMask(0x0000_0020);
    pub const RIT0: ParamMask = ParamMask(0x0000_0040);
    pub const VFOAA: ParamMask = ParamMask(0x0000_0080);
    pub const VFOAB: ParamMask = ParamMask(0x0000_0100);
    pub const VFOBA: ParamMask = ParamMask(0x0000_0200);
    pub const VFOBB: ParamMask = ParamMask(0x0000_0400);
    pub const VFOA: ParamMask = ParamMask(0x0000_0800);
    pub const VFOB: ParamMask = ParamMask(0x0000_1000);
    pub const VFOEQUAL: ParamMask = ParamMask(0x0000_2000);
    pub const VFOSWAP: ParamMask = ParamMask(0x0000_4000);
    pub const SPLITON: ParamMask = ParamMask(0x0000_8000);
    pub const SPLITOFF: ParamMask = ParamMask(0x0001_0000);
    pub const RITON: ParamMask = ParamMask(0x0002_0000);
    pub const RITOFF: ParamMask = ParamMask(0x0004_0000);
    pub const XITON: ParamMask = ParamMask(0x0008_0000);
    pub const XITOFF: ParamMask = ParamMask(0x0010_0000);
    pub const RX: ParamMask = ParamMask(0x0020_0000);
    pub const TX: ParamMask = ParamMask(0x0040_0000);
    pub const CW_U: ParamMask = ParamMask(0x0080_0000);
    pub const CW_L: ParamMask = ParamMask(0x0100_0000);
    pub const SSB_U: ParamMask = ParamMask(0x0200_0000);
    pub const SSB_L: ParamMask = ParamMask(0x0400_0000);
    pub const DIG_U: ParamMask = ParamMask(0x0800_0000);
    pub const DIG_L: ParamMask = ParamMask(0x1000_0000);
    pub const AM: ParamMask = ParamMask(0x2000_0000);
    pub const FM: ParamMask = ParamMask(0x4000_0000);

    /// Any frequency parameter.
    pub const FREQ_ANY: ParamMask = ParamMask(Self::FREQ.0 | Self::FREQA.0 | Self::FREQB.0);
    /// Receive on VFO A.
    pub const VFO_A_ANY: ParamMask = ParamMask(Self::VFOA.0 | Self::VFOAA.0 | Self::VFOAB.0);
    /// Receive on VFO B.
    pub const VFO_B_ANY: ParamMask = ParamMask(Self::VFOB.0 | Self::VFOBA.0 | Self::VFOBB.0);
    pub const RIT_ANY: ParamMask = ParamMask(Self::RITON.0 | Self::RITOFF.0);
    pub const TXRX: ParamMask = ParamMask(Self::RX.0 | Self::TX.0);
    /// Every mode bit.
    pub const MODES: ParamMask = ParamMask(
        Self::CW_U.0
            | Self::CW_L.0
            | Self::SSB_U.0
            | Self::SSB_L.0
            | Self::DIG_U.0
            | Self::DIG_L.0
            | Self::AM.0
            | Self::FM.0,
    );

    pub const fn from_bits(bits: u32) -> Self {
        ParamMask(bits)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn empty() -> Self {
        ParamMask(0)
    }

    /// Whether any bit of `other` is set.
    pub const fn intersects(&self, other: ParamMask) -> bool {
        self.0 & other.0 != 0
    }

    /// Whether every bit of `other` is set.
    pub const fn contains(&self, other: ParamMask) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ParamMask {
    type Output = ParamMask;

    fn bitor(self, rhs: ParamMask) -> ParamMask {
        ParamMask(self.0 | rhs.0)
    }
}

impl BitAnd for ParamMask {
    type Output = ParamMask;

    fn bitand(self, rhs: ParamMask) -> ParamMask {
        ParamMask(self.0 & rhs.0)
    }
}

impl fmt::Debug for ParamMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ParamMask({:#010x})", self.0)
    }
}

/// Mode bits in the order the bridge reports them, with their modes.
///
/// CW-U is the reverse-beat side, so it maps to CWR.
const MODE_MAP: [(ParamMask, Mode); 8] = [
    (ParamMask::CW_U, Mode::CWR),
    (ParamMask::CW_L, Mode::CW),
    (ParamMask::SSB_U, Mode::USB),
    (ParamMask::SSB_L, Mode::LSB),
    (ParamMask::DIG_U, Mode::DataUSB),
    (ParamMask::DIG_L, Mode::DataLSB),
    (ParamMask::AM, Mode::AM),
    (ParamMask::FM, Mode::FM),
];

/// The mode of the first mode bit set in `params`.
pub fn mode_from_params(params: ParamMask) -> Option<Mode> {
    MODE_MAP
        .iter()
        .find(|(bit, _)| params.intersects(*bit))
        .map(|(_, mode)| *mode)
}

/// The bit that selects `mode`, if the bridge has one.
pub fn params_for_mode(mode: Mode) -> Option<ParamMask> {
    MODE_MAP
        .iter()
        .find(|(_, m)| *m == mode)
        .map(|(bit, _)| *bit)
}

/// Modes a rig with writable mask `writable` can be switched to.
pub fn available_modes(writable: ParamMask) -> Vec<Mode> {
    MODE_MAP
        .iter()
        .filter(|(bit, _)| writable.intersects(*bit))
        .map(|(_, mode)| *mode)
        .collect()
}

/// Rig status as reported by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RigStatus {
    #[default]
    NotConfigured,
    Disabled,
    PortBusy,
    NotResponding,
    Online,
}

impl RigStatus {
    pub fn is_online(&self) -> bool {
        matches!(self, RigStatus::Online)
    }
}

impl fmt::Display for RigStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RigStatus::NotConfigured => "Rig is not configured",
            RigStatus::Disabled => "Rig is disabled",
            RigStatus::PortBusy => "Port is not available",
            RigStatus::NotResponding => "Rig is not responding",
            RigStatus::Online => "On-line",
        };
        write!(f, "{s}")
    }
}
