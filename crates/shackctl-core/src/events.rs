//! Asynchronous device event types.
//!
//! Events are published through a [`tokio::sync::broadcast`] channel per
//! device. Loggers, CW consoles and rotator widgets subscribe to them
//! instead of being called directly. Delivery is at-least-once from the
//! consumer's point of view: identical consecutive updates can arrive and
//! must be tolerated.

use crate::state::{ConnectionState, StateUpdate};
use crate::types::{Mode, Vfo};

/// Capacity of every per-device event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// An event emitted by a device when its state changes.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// The façade's connection state changed.
    ConnectionChanged(ConnectionState),

    /// The frequency of a VFO changed.
    FrequencyChanged {
        /// Which VFO changed frequency.
        vfo: Vfo,
        /// New frequency in hertz.
        hz: u64,
        /// Snapshot revision after the change.
        revision: u64,
    },

    /// The operating mode changed.
    ModeChanged { mode: Mode, revision: u64 },

    /// The active VFO changed.
    VfoChanged { vfo: Vfo, revision: u64 },

    /// Push-to-talk state changed (TX/RX transition).
    PttChanged { on: bool, revision: u64 },

    /// Transmit power setting changed.
    PowerChanged { watts: f32, revision: u64 },

    /// RIT offset changed.
    RitChanged { hz: i32, revision: u64 },

    /// XIT offset changed.
    XitChanged { hz: i32, revision: u64 },

    /// Keyer speed changed.
    KeyerSpeedChanged { wpm: u8, revision: u64 },

    /// Rotator position changed.
    PositionChanged {
        azimuth: f64,
        elevation: f64,
        revision: u64,
    },

    /// A bridge-hosted rig changed status without the bridge announcing it.
    ///
    /// This is a warning. The device stays open; it only fails if the rig
    /// stays offline long enough for polling to give up.
    RigStatusChanged {
        /// Whether the rig is now online.
        online: bool,
        /// Status text reported by the bridge.
        status: String,
    },

    /// Characters echoed back by a hardware keyer as it sends them.
    KeyerEcho { text: String },

    /// The rig reported a different keyer speed than was just mirrored to it.
    KeyerSpeedMismatch { requested: u8, reported: u8 },

    /// A poll tick failed.
    PollMissed {
        /// Consecutive failed ticks so far.
        consecutive: u32,
        /// Display text of the failure.
        reason: String,
    },
}

impl DeviceEvent {
    /// Build the event announcing `update` at `revision`.
    pub fn from_update(update: &StateUpdate, revision: u64) -> Self {
        match *update {
            StateUpdate::Frequency { vfo, hz } => DeviceEvent::FrequencyChanged { vfo, hz, revision },
            StateUpdate::Mode(mode) => DeviceEvent::ModeChanged { mode, revision },
            StateUpdate::ActiveVfo(vfo) => DeviceEvent::VfoChanged { vfo, revision },
            StateUpdate::Ptt(on) => DeviceEvent::PttChanged { on, revision },
            StateUpdate::Power(watts) => DeviceEvent::PowerChanged { watts, revision },
            StateUpdate::Rit(hz) => DeviceEvent::RitChanged { hz, revision },
            StateUpdate::Xit(hz) => DeviceEvent::XitChanged { hz, revision },
            StateUpdate::KeyerSpeed(wpm) => DeviceEvent::KeyerSpeedChanged { wpm, revision },
            StateUpdate::Position { azimuth, elevation } => DeviceEvent::PositionChanged {
                azimuth,
                elevation,
                revision,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_maps_to_event() {
        let ev = DeviceEvent::from_update(
            &StateUpdate::Frequency {
                vfo: Vfo::A,
                hz: 3_573_000,
            },
            7,
        );
        assert_eq!(
            ev,
            DeviceEvent::FrequencyChanged {
                vfo: Vfo::A,
                hz: 3_573_000,
                revision: 7
            }
        );

        let ev = DeviceEvent::from_update(&StateUpdate::KeyerSpeed(28), 2);
        assert_eq!(
            ev,
            DeviceEvent::KeyerSpeedChanged {
                wpm: 28,
                revision: 2
            }
        );
    }
}
