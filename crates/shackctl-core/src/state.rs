//! Device state snapshot and connection state.
//!
//! [`DeviceState`] has a single writer per device (the dispatcher worker,
//! which also executes every poll query) and is published to readers as an
//! owned copy. Each applied change bumps [`DeviceState::revision`].

use std::fmt;

use crate::types::{Mode, Vfo};

/// Connection lifecycle of one device façade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// The poller gave up or the link broke. Only an explicit reopen leaves
    /// this state.
    Failed,
}

impl ConnectionState {
    /// Whether commands may be issued in this state.
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// One observed change to device state.
#[derive(Debug, Clone, PartialEq)]
pub enum StateUpdate {
    Frequency { vfo: Vfo, hz: u64 },
    Mode(Mode),
    ActiveVfo(Vfo),
    Ptt(bool),
    Power(f32),
    Rit(i32),
    Xit(i32),
    KeyerSpeed(u8),
    Position { azimuth: f64, elevation: f64 },
}

/// Snapshot of everything known about a connected device.
///
/// Fields are `None` until first observed.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeviceState {
    pub freq_a_hz: Option<u64>,
    pub freq_b_hz: Option<u64>,
    pub mode: Option<Mode>,
    /// Active VFO (`A` or `B`).
    pub vfo: Option<Vfo>,
    pub power_w: Option<f32>,
    pub ptt: Option<bool>,
    pub rit_hz: Option<i32>,
    pub xit_hz: Option<i32>,
    pub keyer_wpm: Option<u8>,
    pub azimuth_deg: Option<f64>,
    pub elevation_deg: Option<f64>,
    /// Incremented on every applied change. Never decreases while the
    /// device stays open.
    pub revision: u64,
}

impl DeviceState {
    /// Resolve `Vfo::Current` against the active VFO (A if unknown).
    pub fn resolve(&self, vfo: Vfo) -> Vfo {
        match vfo {
            Vfo::Current => match self.vfo {
                Some(Vfo::B) => Vfo::B,
                _ => Vfo::A,
            },
            other => other,
        }
    }

    /// Frequency of `vfo`, if known.
    pub fn frequency(&self, vfo: Vfo) -> Option<u64> {
        match self.resolve(vfo) {
            Vfo::B => self.freq_b_hz,
            _ => self.freq_a_hz,
        }
    }

    /// Apply `update`. Returns `true` and bumps the revision if anything
    /// actually changed.
    pub fn apply(&mut self, update: &StateUpdate) -> bool {
        let changed = match *update {
            StateUpdate::Frequency { vfo, hz } => {
                let slot = match self.resolve(vfo) {
                    Vfo::B => &mut self.freq_b_hz,
                    _ => &mut self.freq_a_hz,
                };
                replace(slot, hz)
            }
            StateUpdate::Mode(mode) => replace(&mut self.mode, mode),
            StateUpdate::ActiveVfo(vfo) => replace(&mut self.vfo, vfo),
            StateUpdate::Ptt(on) => replace(&mut self.ptt, on),
            StateUpdate::Power(watts) => replace(&mut self.power_w, watts),
            StateUpdate::Rit(hz) => replace(&mut self.rit_hz, hz),
            StateUpdate::Xit(hz) => replace(&mut self.xit_hz, hz),
            StateUpdate::KeyerSpeed(wpm) => replace(&mut self.keyer_wpm, wpm),
            StateUpdate::Position { azimuth, elevation } => {
                let az = replace(&mut self.azimuth_deg, azimuth);
                let el = replace(&mut self.elevation_deg, elevation);
                az || el
            }
        };
        if changed {
            self.revision += 1;
        }
        changed
    }
}

fn replace<T: PartialEq>(slot: &mut Option<T>, value: T) -> bool {
    if slot.as_ref() == Some(&value) {
        false
    } else {
        *slot = Some(value);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_bumps_revision_only_on_change() {
        let mut s = DeviceState::default();
        assert!(s.apply(&StateUpdate::Frequency {
            vfo: Vfo::A,
            hz: 14_074_000
        }));
        assert_eq!(s.revision, 1);
        assert!(!s.apply(&StateUpdate::Frequency {
            vfo: Vfo::A,
            hz: 14_074_000
        }));
        assert_eq!(s.revision, 1);
        assert!(s.apply(&StateUpdate::Ptt(true)));
        assert_eq!(s.revision, 2);
    }

    #[test]
    fn current_vfo_follows_active() {
        let mut s = DeviceState::default();
        s.apply(&StateUpdate::ActiveVfo(Vfo::B));
        s.apply(&StateUpdate::Frequency {
            vfo: Vfo::Current,
            hz: 7_030_000,
        });
        assert_eq!(s.freq_b_hz, Some(7_030_000));
        assert_eq!(s.freq_a_hz, None);
        assert_eq!(s.frequency(Vfo::Current), Some(7_030_000));
    }

    #[test]
    fn current_defaults_to_a() {
        let s = DeviceState::default();
        assert_eq!(s.resolve(Vfo::Current), Vfo::A);
    }

    #[test]
    fn position_change_detected_per_axis() {
        let mut s = DeviceState::default();
        assert!(s.apply(&StateUpdate::Position {
            azimuth: 90.0,
            elevation: 0.0
        }));
        assert!(s.apply(&StateUpdate::Position {
            azimuth: 90.0,
            elevation: 10.0
        }));
        assert_eq!(s.revision, 2);
    }

    #[test]
    fn connection_state_display() {
        assert_eq!(ConnectionState::Failed.to_string(), "failed");
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
    }
}
