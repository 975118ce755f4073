//! Transceiver state as announced by the server.
//!
//! The server broadcasts every change it makes, whether a client asked for
//! it or the operator turned a knob. Every message the session reads is
//! folded into [`TrxState`], so the announcements that arrive before
//! `ready;` (device name, modulation list, frequency limits) are kept too.

use std::collections::HashMap;

use tracing::trace;

use shackctl_core::types::Mode;

use crate::codec::{Message, parse_bool, parse_modulation};

/// Cached state of one receiver.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReceiverState {
    /// Frequency per sub-VFO index (0 = A, 1 = B).
    pub vfo_hz: HashMap<u8, u64>,
    pub transmitting: Option<bool>,
    pub mode: Option<Mode>,
    /// Drive level, percent.
    pub drive: Option<u8>,
    pub rit_enable: Option<bool>,
    pub rit_offset: Option<i32>,
    pub xit_enable: Option<bool>,
    pub xit_offset: Option<i32>,
}

/// Everything the server has told the session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrxState {
    /// Device model from `device:`.
    pub device: Option<String>,
    /// Protocol name and version from `protocol:`.
    pub protocol: Option<String>,
    /// Modulation names from `modulations_list:`.
    pub modulations: Vec<String>,
    /// Tunable range from `vfo_limits:`.
    pub vfo_limits: Option<(u64, u64)>,
    pub trx_count: Option<u8>,
    pub cw_speed: Option<u8>,
    pub receivers: HashMap<u8, ReceiverState>,
    /// Set once the server sent `ready;`.
    pub ready: bool,
}

impl TrxState {
    pub fn receiver(&self, rx: u8) -> Option<&ReceiverState> {
        self.receivers.get(&rx)
    }

    /// Fold one message into the state. Returns `false` for messages this
    /// session does not track or cannot parse.
    pub fn apply(&mut self, msg: &Message) -> bool {
        let applied = self.apply_inner(msg).is_some();
        if !applied {
            trace!(name = %msg.name, args = ?msg.args, "message not tracked");
        }
        applied
    }

    fn apply_inner(&mut self, msg: &Message) -> Option<()> {
        let args = &msg.args;
        match msg.name.as_str() {
            "ready" => self.ready = true,
            "device" => self.device = Some(args.first()?.trim().to_string()),
            "protocol" => self.protocol = Some(args.join(",")),
            "modulations_list" => {
                self.modulations = args.iter().map(|m| m.trim().to_ascii_lowercase()).collect()
            }
            "vfo_limits" => {
                self.vfo_limits = Some((msg.number(0).ok()?, msg.number(1).ok()?));
            }
            "trx_count" => self.trx_count = Some(msg.number(0).ok()?),
            "cw_macros_speed" => self.cw_speed = Some(msg.number(args.len().checked_sub(1)?).ok()?),
            "vfo" => {
                let hz = msg.number(2).ok()?;
                self.rx(msg)?.vfo_hz.insert(msg.number(1).ok()?, hz);
            }
            "trx" => {
                let on = parse_bool(msg.arg(1).ok()?)?;
                self.rx(msg)?.transmitting = Some(on);
            }
            "modulation" => {
                let mode = parse_modulation(msg.arg(1).ok()?)?;
                self.rx(msg)?.mode = Some(mode);
            }
            "drive" => {
                let drive = msg.number(1).ok()?;
                self.rx(msg)?.drive = Some(drive);
            }
            "rit_enable" => {
                let on = parse_bool(msg.arg(1).ok()?)?;
                self.rx(msg)?.rit_enable = Some(on);
            }
            "rit_offset" => {
                let hz = msg.number(1).ok()?;
                self.rx(msg)?.rit_offset = Some(hz);
            }
            "xit_enable" => {
                let on = parse_bool(msg.arg(1).ok()?)?;
                self.rx(msg)?.xit_enable = Some(on);
            }
            "xit_offset" => {
                let hz = msg.number(1).ok()?;
                self.rx(msg)?.xit_offset = Some(hz);
            }
            _ => return None,
        }
        Some(())
    }

    fn rx(&mut self, msg: &Message) -> Option<&mut ReceiverState> {
        let rx: u8 = msg.number(0).ok()?;
        Some(self.receivers.entry(rx).or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode;

    fn feed(state: &mut TrxState, mut bytes: &[u8]) {
        while let Some((msg, used)) = decode(bytes).unwrap() {
            state.apply(&msg);
            bytes = &bytes[used..];
        }
    }

    #[test]
    fn greeting_is_captured() {
        let mut state = TrxState::default();
        feed(
            &mut state,
            b"VFO_LIMITS:10000,30000000;TRX_COUNT:2;DEVICE:SunSDR2DX;\
              MODULATIONS_LIST:AM,SAM,LSB,USB,CW,NFM,WFM;PROTOCOL:ExpertSDR3,1.9;\
              VFO:0,0,14000000;TRX:0,false;MODULATION:0,USB;RIT_OFFSET:0,-50;\
              RIT_ENABLE:0,false;READY;",
        );
        assert!(state.ready);
        assert_eq!(state.device.as_deref(), Some("SunSDR2DX"));
        assert_eq!(state.protocol.as_deref(), Some("ExpertSDR3,1.9"));
        assert_eq!(state.vfo_limits, Some((10_000, 30_000_000)));
        assert_eq!(state.trx_count, Some(2));
        assert_eq!(state.modulations.len(), 7);

        let rx = state.receiver(0).unwrap();
        assert_eq!(rx.vfo_hz.get(&0), Some(&14_000_000));
        assert_eq!(rx.transmitting, Some(false));
        assert_eq!(rx.mode, Some(Mode::USB));
        assert_eq!(rx.rit_offset, Some(-50));
        assert_eq!(rx.rit_enable, Some(false));
    }

    #[test]
    fn receivers_are_tracked_separately() {
        let mut state = TrxState::default();
        feed(&mut state, b"vfo:0,1,7030000;vfo:1,0,3573000;drive:1,40;");
        assert_eq!(state.receiver(0).unwrap().vfo_hz.get(&1), Some(&7_030_000));
        assert_eq!(state.receiver(1).unwrap().vfo_hz.get(&0), Some(&3_573_000));
        assert_eq!(state.receiver(1).unwrap().drive, Some(40));
    }

    #[test]
    fn speed_takes_the_last_argument() {
        let mut state = TrxState::default();
        feed(&mut state, b"cw_macros_speed:0,28;");
        assert_eq!(state.cw_speed, Some(28));
        feed(&mut state, b"cw_macros_speed:30;");
        assert_eq!(state.cw_speed, Some(30));
    }

    #[test]
    fn unknown_or_malformed_messages_are_ignored() {
        let mut state = TrxState::default();
        assert!(!state.apply(&Message::new("audio_samplerate", &["48000"])));
        assert!(!state.apply(&Message::new("trx", &["0", "maybe"])));
        assert!(!state.apply(&Message::new("vfo", &["x", "0", "1"])));
        assert!(state.receivers.is_empty());
    }
}
