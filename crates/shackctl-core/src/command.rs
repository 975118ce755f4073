//! Normalized device operations and their replies.
//!
//! Every façade call and every poll query becomes one [`Operation`]. The
//! dispatcher checks [`Operation::required`] against the backend's
//! [`Capabilities`] before anything reaches the driver, and turns a
//! successful [`Reply`] into a [`StateUpdate`].

use std::fmt;

use crate::capability::Capabilities;
use crate::state::StateUpdate;
use crate::types::{Mode, Vfo};

/// One device operation with its parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    SetFrequency { vfo: Vfo, hz: u64 },
    GetFrequency { vfo: Vfo },
    SetMode(Mode),
    GetMode,
    GetVfo,
    SetPtt(bool),
    GetPtt,
    SetPower(f32),
    GetPower,
    SetRit(i32),
    GetRit,
    SetXit(i32),
    GetXit,
    SendMorse(String),
    SetKeyerSpeed(u8),
    GetKeyerSpeed,
    StopSending,
    SetPosition { azimuth: f64, elevation: f64 },
    GetPosition,
}

/// Successful result of an [`Operation`].
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// A setter completed.
    Done,
    Frequency(u64),
    Mode(Mode),
    Vfo(Vfo),
    Ptt(bool),
    Power(f32),
    /// RIT or XIT offset in hertz.
    Offset(i32),
    Speed(u8),
    Position { azimuth: f64, elevation: f64 },
}

impl Operation {
    /// Short name used in logs and `Unsupported` errors.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::SetFrequency { .. } => "set frequency",
            Operation::GetFrequency { .. } => "get frequency",
            Operation::SetMode(_) => "set mode",
            Operation::GetMode => "get mode",
            Operation::GetVfo => "get VFO",
            Operation::SetPtt(_) => "set PTT",
            Operation::GetPtt => "get PTT",
            Operation::SetPower(_) => "set power",
            Operation::GetPower => "get power",
            Operation::SetRit(_) => "set RIT",
            Operation::GetRit => "get RIT",
            Operation::SetXit(_) => "set XIT",
            Operation::GetXit => "get XIT",
            Operation::SendMorse(_) => "send morse",
            Operation::SetKeyerSpeed(_) => "set keyer speed",
            Operation::GetKeyerSpeed => "get keyer speed",
            Operation::StopSending => "stop sending",
            Operation::SetPosition { .. } => "set position",
            Operation::GetPosition => "get position",
        }
    }

    /// The capability the active backend must have for this operation.
    pub fn required(&self) -> Capabilities {
        match self {
            Operation::SetFrequency { .. } => Capabilities::SET_FREQ,
            Operation::GetFrequency { .. } => Capabilities::GET_FREQ,
            Operation::SetMode(_) => Capabilities::SET_MODE,
            Operation::GetMode => Capabilities::GET_MODE,
            Operation::GetVfo => Capabilities::GET_VFO,
            Operation::SetPtt(_) => Capabilities::SET_PTT,
            Operation::GetPtt => Capabilities::GET_PTT,
            Operation::SetPower(_) => Capabilities::SET_POWER,
            Operation::GetPower => Capabilities::GET_POWER,
            Operation::SetRit(_) => Capabilities::SET_RIT,
            Operation::GetRit => Capabilities::GET_RIT,
            Operation::SetXit(_) => Capabilities::SET_XIT,
            Operation::GetXit => Capabilities::GET_XIT,
            Operation::SendMorse(_) => Capabilities::SEND_MORSE,
            Operation::SetKeyerSpeed(_) => Capabilities::SET_KEYER_SPEED,
            Operation::GetKeyerSpeed => Capabilities::GET_KEYER_SPEED,
            Operation::StopSending => Capabilities::STOP_MORSE,
            Operation::SetPosition { .. } => Capabilities::SET_POSITION,
            Operation::GetPosition => Capabilities::GET_POSITION,
        }
    }

    /// Whether the operation only reads device state.
    pub fn is_query(&self) -> bool {
        matches!(
            self,
            Operation::GetFrequency { .. }
                | Operation::GetMode
                | Operation::GetVfo
                | Operation::GetPtt
                | Operation::GetPower
                | Operation::GetRit
                | Operation::GetXit
                | Operation::GetKeyerSpeed
                | Operation::GetPosition
        )
    }

    /// The state change implied by this operation completing with `reply`.
    pub fn state_update(&self, reply: &Reply) -> Option<StateUpdate> {
        match (self, reply) {
            (Operation::SetFrequency { vfo, hz }, Reply::Done) => Some(StateUpdate::Frequency {
                vfo: *vfo,
                hz: *hz,
            }),
            (Operation::GetFrequency { vfo }, Reply::Frequency(hz)) => {
                Some(StateUpdate::Frequency { vfo: *vfo, hz: *hz })
            }
            (Operation::SetMode(mode), Reply::Done) | (Operation::GetMode, Reply::Mode(mode)) => {
                Some(StateUpdate::Mode(*mode))
            }
            (Operation::GetVfo, Reply::Vfo(vfo)) => Some(StateUpdate::ActiveVfo(*vfo)),
            (Operation::SetPtt(on), Reply::Done) | (Operation::GetPtt, Reply::Ptt(on)) => {
                Some(StateUpdate::Ptt(*on))
            }
            (Operation::SetPower(w), Reply::Done) | (Operation::GetPower, Reply::Power(w)) => {
                Some(StateUpdate::Power(*w))
            }
            (Operation::SetRit(hz), Reply::Done) | (Operation::GetRit, Reply::Offset(hz)) => {
                Some(StateUpdate::Rit(*hz))
            }
            (Operation::SetXit(hz), Reply::Done) | (Operation::GetXit, Reply::Offset(hz)) => {
                Some(StateUpdate::Xit(*hz))
            }
            (Operation::SetKeyerSpeed(wpm), Reply::Done)
            | (Operation::GetKeyerSpeed, Reply::Speed(wpm)) => Some(StateUpdate::KeyerSpeed(*wpm)),
            (Operation::SetPosition { azimuth, elevation }, Reply::Done)
            | (
                Operation::GetPosition,
                Reply::Position {
                    azimuth,
                    elevation,
                },
            ) => Some(StateUpdate::Position {
                azimuth: *azimuth,
                elevation: *elevation,
            }),
            _ => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::SetFrequency { vfo, hz } => write!(f, "set frequency {vfo} {hz} Hz"),
            Operation::GetFrequency { vfo } => write!(f, "get frequency {vfo}"),
            Operation::SetMode(mode) => write!(f, "set mode {mode}"),
            Operation::SetPtt(on) => write!(f, "set PTT {}", if *on { "on" } else { "off" }),
            Operation::SetPower(w) => write!(f, "set power {w} W"),
            Operation::SetRit(hz) => write!(f, "set RIT {hz:+} Hz"),
            Operation::SetXit(hz) => write!(f, "set XIT {hz:+} Hz"),
            Operation::SendMorse(text) => write!(f, "send morse {text:?}"),
            Operation::SetKeyerSpeed(wpm) => write!(f, "set keyer speed {wpm} WPM"),
            Operation::SetPosition { azimuth, elevation } => {
                write!(f, "set position az {azimuth} el {elevation}")
            }
            other => write!(f, "{}", other.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queries_are_flagged() {
        assert!(Operation::GetMode.is_query());
        assert!(Operation::GetPosition.is_query());
        assert!(!Operation::SetPtt(true).is_query());
        assert!(!Operation::SendMorse("CQ".into()).is_query());
        assert!(!Operation::StopSending.is_query());
    }

    #[test]
    fn required_capabilities() {
        assert_eq!(Operation::SetPower(50.0).required(), Capabilities::SET_POWER);
        assert_eq!(Operation::SendMorse("CQ".into()).required(), Capabilities::SEND_MORSE);
        assert_eq!(Operation::GetPosition.required(), Capabilities::GET_POSITION);
    }

    #[test]
    fn setter_implies_update() {
        let op = Operation::SetFrequency {
            vfo: Vfo::B,
            hz: 21_074_000,
        };
        assert_eq!(
            op.state_update(&Reply::Done),
            Some(StateUpdate::Frequency {
                vfo: Vfo::B,
                hz: 21_074_000
            })
        );
    }

    #[test]
    fn getter_update_comes_from_reply() {
        assert_eq!(
            Operation::GetPtt.state_update(&Reply::Ptt(true)),
            Some(StateUpdate::Ptt(true))
        );
        assert_eq!(
            Operation::GetRit.state_update(&Reply::Offset(-120)),
            Some(StateUpdate::Rit(-120))
        );
    }

    #[test]
    fn mismatched_reply_yields_nothing() {
        assert_eq!(Operation::GetMode.state_update(&Reply::Ptt(true)), None);
        assert_eq!(Operation::SendMorse("TEST".into()).state_update(&Reply::Done), None);
        assert_eq!(Operation::StopSending.state_update(&Reply::Done), None);
    }

    #[test]
    fn display() {
        assert_eq!(Operation::SetRit(50).to_string(), "set RIT +50 Hz");
        assert_eq!(Operation::GetVfo.to_string(), "get VFO");
    }
}
