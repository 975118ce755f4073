//! Runtime capability set of a connected backend.
//!
//! Computed once when a device is opened, from the backend's own
//! introspection intersected with the profile's user hints, and immutable
//! for the life of that connection. The dispatcher checks every command
//! against it before the command reaches the driver.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

/// Bitset of operations a backend instance supports.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Capabilities(u32);

impl Capabilities {
    pub const GET_FREQ: Capabilities = Capabilities(1 << 0);
    pub const SET_FREQ: Capabilities = Capabilities(1 << 1);
    pub const GET_MODE: Capabilities = Capabilities(1 << 2);
    pub const SET_MODE: Capabilities = Capabilities(1 << 3);
    pub const GET_VFO: Capabilities = Capabilities(1 << 4);
    pub const GET_PTT: Capabilities = Capabilities(1 << 5);
    pub const SET_PTT: Capabilities = Capabilities(1 << 6);
    pub const GET_POWER: Capabilities = Capabilities(1 << 7);
    pub const SET_POWER: Capabilities = Capabilities(1 << 8);
    pub const GET_RIT: Capabilities = Capabilities(1 << 9);
    pub const SET_RIT: Capabilities = Capabilities(1 << 10);
    pub const GET_XIT: Capabilities = Capabilities(1 << 11);
    pub const SET_XIT: Capabilities = Capabilities(1 << 12);
    /// Text can be sent as Morse (through CAT or a keyer).
    pub const SEND_MORSE: Capabilities = Capabilities(1 << 13);
    pub const STOP_MORSE: Capabilities = Capabilities(1 << 14);
    pub const GET_KEYER_SPEED: Capabilities = Capabilities(1 << 15);
    pub const SET_KEYER_SPEED: Capabilities = Capabilities(1 << 16);
    pub const GET_POSITION: Capabilities = Capabilities(1 << 17);
    pub const SET_POSITION: Capabilities = Capabilities(1 << 18);
    /// One backend process hosts several simultaneously open rigs.
    pub const MULTI_RIG: Capabilities = Capabilities(1 << 19);

    const NAMES: [(Capabilities, &'static str); 20] = [
        (Self::GET_FREQ, "get-freq"),
        (Self::SET_FREQ, "set-freq"),
        (Self::GET_MODE, "get-mode"),
        (Self::SET_MODE, "set-mode"),
        (Self::GET_VFO, "get-vfo"),
        (Self::GET_PTT, "get-ptt"),
        (Self::SET_PTT, "set-ptt"),
        (Self::GET_POWER, "get-power"),
        (Self::SET_POWER, "set-power"),
        (Self::GET_RIT, "get-rit"),
        (Self::SET_RIT, "set-rit"),
        (Self::GET_XIT, "get-xit"),
        (Self::SET_XIT, "set-xit"),
        (Self::SEND_MORSE, "send-morse"),
        (Self::STOP_MORSE, "stop-morse"),
        (Self::GET_KEYER_SPEED, "get-keyer-speed"),
        (Self::SET_KEYER_SPEED, "set-keyer-speed"),
        (Self::GET_POSITION, "get-position"),
        (Self::SET_POSITION, "set-position"),
        (Self::MULTI_RIG, "multi-rig"),
    ];

    /// Frequency read and write.
    pub const FREQ: Capabilities = Capabilities(Self::GET_FREQ.0 | Self::SET_FREQ.0);
    /// Mode read and write.
    pub const MODE: Capabilities = Capabilities(Self::GET_MODE.0 | Self::SET_MODE.0);
    /// PTT read and write.
    pub const PTT: Capabilities = Capabilities(Self::GET_PTT.0 | Self::SET_PTT.0);
    /// Power read and write.
    pub const POWER: Capabilities = Capabilities(Self::GET_POWER.0 | Self::SET_POWER.0);
    /// RIT read and write.
    pub const RIT: Capabilities = Capabilities(Self::GET_RIT.0 | Self::SET_RIT.0);
    /// XIT read and write.
    pub const XIT: Capabilities = Capabilities(Self::GET_XIT.0 | Self::SET_XIT.0);
    /// Keyer speed read and write.
    pub const KEYER_SPEED: Capabilities =
        Capabilities(Self::GET_KEYER_SPEED.0 | Self::SET_KEYER_SPEED.0);
    /// Rotator position read and write.
    pub const POSITION: Capabilities = Capabilities(Self::GET_POSITION.0 | Self::SET_POSITION.0);

    /// The empty set.
    pub const fn empty() -> Self {
        Capabilities(0)
    }

    /// Every defined capability.
    pub const fn all() -> Self {
        Capabilities((1 << 20) - 1)
    }

    /// Raw bit representation.
    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Whether every bit of `other` is present in `self`.
    pub const fn contains(&self, other: Capabilities) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether no capability is present.
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Both sets combined; usable in constants.
    pub const fn union(self, other: Capabilities) -> Self {
        Capabilities(self.0 | other.0)
    }

    /// Return `self` without the bits of `other`.
    pub const fn without(self, other: Capabilities) -> Self {
        Capabilities(self.0 & !other.0)
    }

    /// Add or remove `other` depending on `on`.
    pub fn set(&mut self, other: Capabilities, on: bool) {
        if on {
            self.0 |= other.0;
        } else {
            self.0 &= !other.0;
        }
    }

    /// Names of the individual capabilities present, in bit order.
    pub fn names(&self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(cap, _)| self.contains(*cap))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl BitOr for Capabilities {
    type Output = Capabilities;

    fn bitor(self, rhs: Self) -> Self::Output {
        Capabilities(self.0 | rhs.0)
    }
}

impl BitOrAssign for Capabilities {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Capabilities {
    type Output = Capabilities;

    fn bitand(self, rhs: Self) -> Self::Output {
        Capabilities(self.0 & rhs.0)
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Capabilities({})", self.names().join(" | "))
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "none");
        }
        write!(f, "{}", self.names().join(", "))
    }
}
