//! The CW keyer façade.
//!
//! A keyer may have a profile selected without being open: a profile whose
//! keyer failed to start still answers [`Error::KeyerNotConnected`], while
//! a keyer with no profile at all answers [`Error::NoProfileSelected`].

use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use shackctl_core::capability::Capabilities;
use shackctl_core::command::{Operation, Reply};
use shackctl_core::error::{Error, Result};
use shackctl_core::events::DeviceEvent;
use shackctl_core::profile::DeviceProfile;
use shackctl_core::state::{ConnectionState, DeviceState};
use shackctl_core::types::{BackendKind, DeviceKind};
use shackctl_dispatch::Commander;

use crate::device::{DeviceSlot, unexpected};
use crate::input::{SendMode, split_units};
use crate::rig::Rig;
use crate::station::Station;

/// What happened to the rig's keyer speed on a keyer speed change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedSync {
    /// Sync is off, there is no rig, or the rig has no keyer speed control.
    NotRequested,
    /// The rig took the new speed.
    Synced,
    /// The rig reports a different speed than was set.
    Mismatch { requested: u8, reported: u8 },
}

pub struct CwKeyer {
    slot: DeviceSlot,
    selected: watch::Sender<Option<DeviceProfile>>,
    rig: Option<Commander>,
}

impl CwKeyer {
    pub(crate) fn new(station: Station) -> Self {
        Self {
            slot: DeviceSlot::new(station, DeviceKind::Keyer),
            selected: watch::Sender::new(None),
            rig: None,
        }
    }

    /// Use the rig open in `rig` for speed sync and morse over CAT.
    pub fn attach_rig(&mut self, rig: &Rig) -> Result<()> {
        self.rig = Some(rig.commander()?);
        Ok(())
    }

    pub fn detach_rig(&mut self) {
        self.rig = None;
    }

    /// Select `profile` and start its keyer.
    ///
    /// The profile stays selected when starting fails.
    pub async fn open(&mut self, profile: DeviceProfile) -> Result<()> {
        if profile.device_kind() != DeviceKind::Keyer {
            return Err(Error::Configuration(format!(
                "profile {:?} configures a {}, not a keyer",
                profile.name,
                profile.device_kind()
            )));
        }
        self.selected.send_replace(Some(profile.clone()));
        self.slot.open(profile, self.rig.as_ref()).await
    }

    pub async fn open_named(&mut self, name: &str) -> Result<()> {
        let profile = self.slot.station().profile(name)?;
        self.open(profile).await
    }

    /// Stop the keyer and deselect its profile. Commands still in flight
    /// resolve with [`Error::Cancelled`].
    pub async fn close(&self) {
        self.selected.send_replace(None);
        self.slot.close().await;
    }

    pub fn selected(&self) -> Option<DeviceProfile> {
        self.selected.borrow().clone()
    }

    fn has_selection(&self) -> bool {
        self.selected.borrow().is_some()
    }

    pub fn is_open(&self) -> bool {
        self.slot.is_open()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.slot.capabilities()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.slot.connection_state()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.slot.watch_connection()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.slot.subscribe()
    }

    pub fn state(&self) -> DeviceState {
        self.slot.state()
    }

    async fn run(&self, op: Operation) -> Result<Reply> {
        if !self.has_selection() {
            return Err(Error::NoProfileSelected);
        }
        match self.slot.execute(op, || Error::KeyerNotConnected).await {
            Err(Error::NotConnected) => Err(Error::KeyerNotConnected),
            other => other,
        }
    }

    /// Send `text`, cut into units by `mode`. Returns the number of units
    /// sent.
    ///
    /// Units are queued in order and each is sent as an independent
    /// command; a failure stops the remaining units.
    pub async fn send(&self, text: &str, mode: SendMode) -> Result<usize> {
        if !self.has_selection() {
            return Err(Error::NoProfileSelected);
        }
        let units = split_units(text, mode);
        for unit in &units {
            self.send_unit(unit).await?;
        }
        debug!(units = units.len(), mode = ?mode, "CW text sent");
        Ok(units.len())
    }

    /// Send one unit exactly as given.
    pub async fn send_unit(&self, unit: &str) -> Result<()> {
        self.run(Operation::SendMorse(unit.to_string())).await?;
        Ok(())
    }

    /// Abort sending and drop anything the keyer has buffered.
    pub async fn stop(&self) -> Result<()> {
        self.run(Operation::StopSending).await?;
        Ok(())
    }

    pub async fn set_ptt(&self, on: bool) -> Result<()> {
        self.run(Operation::SetPtt(on)).await?;
        Ok(())
    }

    pub async fn get_speed(&self) -> Result<u8> {
        match self.run(Operation::GetKeyerSpeed).await? {
            Reply::Speed(wpm) => Ok(wpm),
            other => Err(unexpected("get keyer speed", other)),
        }
    }

    /// Set the keyer speed and, when the profile asks for it, mirror it to
    /// the attached rig's keyer in the same call.
    ///
    /// A rig that reads back a different speed is reported, never
    /// corrected.
    pub async fn set_speed(&self, wpm: u8) -> Result<SpeedSync> {
        self.run(Operation::SetKeyerSpeed(wpm)).await?;

        let Some(profile) = self.selected() else {
            return Err(Error::NoProfileSelected);
        };
        if !profile.keyer.speed_sync || profile.backend == BackendKind::MorseOverCat {
            return Ok(SpeedSync::NotRequested);
        }
        let Some(rig) = self.rig.as_ref().filter(|r| !r.is_closed()) else {
            debug!("speed sync requested but no rig is attached");
            return Ok(SpeedSync::NotRequested);
        };
        let rig_caps = rig.capabilities();
        if !rig_caps.contains(Capabilities::SET_KEYER_SPEED) {
            return Ok(SpeedSync::NotRequested);
        }

        rig.execute(Operation::SetKeyerSpeed(wpm)).await?;
        if !rig_caps.contains(Capabilities::GET_KEYER_SPEED) {
            return Ok(SpeedSync::Synced);
        }
        let reported = match rig.execute(Operation::GetKeyerSpeed).await? {
            Reply::Speed(reported) => reported,
            other => return Err(unexpected("get keyer speed", other)),
        };
        if reported == wpm {
            info!(wpm, "keyer speed mirrored to rig");
            Ok(SpeedSync::Synced)
        } else {
            warn!(requested = wpm, reported, "rig keyer speed differs after sync");
            let _ = self.slot.events().send(DeviceEvent::KeyerSpeedMismatch {
                requested: wpm,
                reported,
            });
            Ok(SpeedSync::Mismatch {
                requested: wpm,
                reported,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use shackctl_core::error::ErrorKind;
    use shackctl_core::profile::LinkSettings;
    use shackctl_test_harness::{ScriptHandle, ScriptedDriver};

    use crate::factory::DriverFactory;

    const KEYER: Capabilities = Capabilities::SEND_MORSE
        .union(Capabilities::STOP_MORSE)
        .union(Capabilities::KEYER_SPEED)
        .union(Capabilities::SET_PTT);

    struct Bench {
        station: Station,
        keyer: ScriptHandle,
        rig: ScriptHandle,
    }

    fn bench() -> Bench {
        let (_, keyer) = ScriptedDriver::new(BackendKind::KeyerDaemon, KEYER);
        let (_, rig) = ScriptedDriver::rig();
        let (k, r) = (keyer.clone(), rig.clone());
        let factory = DriverFactory::new()
            .register(
                BackendKind::KeyerDaemon,
                Arc::new(move |_| Box::new(k.driver(BackendKind::KeyerDaemon, KEYER))),
            )
            .register(
                BackendKind::GenericCat,
                Arc::new(move |_| {
                    Box::new(r.driver(
                        BackendKind::GenericCat,
                        Capabilities::FREQ
                            | Capabilities::KEYER_SPEED
                            | Capabilities::SEND_MORSE
                            | Capabilities::STOP_MORSE,
                    ))
                }),
            );
        Bench {
            station: Station::new(factory),
            keyer,
            rig,
        }
    }

    fn daemon() -> DeviceProfile {
        DeviceProfile::new(
            "cwdaemon",
            BackendKind::KeyerDaemon,
            LinkSettings::Udp {
                host: "127.0.0.1".into(),
                port: 6789,
                local_address: None,
                local_port: None,
            },
        )
    }

    fn rig_profile() -> DeviceProfile {
        DeviceProfile::new(
            "k3",
            BackendKind::GenericCat,
            LinkSettings::Serial {
                port: "/dev/ttyUSB0".into(),
                serial: Default::default(),
            },
        )
    }

    #[tokio::test]
    async fn word_mode_sends_each_word() {
        let b = bench();
        let mut keyer = b.station.keyer();
        keyer.open(daemon()).await.unwrap();

        assert_eq!(keyer.send("CQ TEST", SendMode::Word).await.unwrap(), 2);
        assert_eq!(b.keyer.morse(), ["CQ", "TEST"]);
    }

    #[tokio::test]
    async fn whole_mode_sends_one_unit() {
        let b = bench();
        let mut keyer = b.station.keyer();
        keyer.open(daemon()).await.unwrap();

        assert_eq!(keyer.send("CQ TEST", SendMode::Whole).await.unwrap(), 1);
        assert_eq!(b.keyer.morse(), ["CQ TEST"]);
        assert_eq!(b.keyer.count("send morse"), 1);
    }

    #[tokio::test]
    async fn nothing_selected_is_no_profile() {
        let keyer = Station::default().keyer();
        let err = keyer.send("CQ", SendMode::Word).await.unwrap_err();
        assert!(matches!(err, Error::NoProfileSelected));
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(matches!(keyer.set_speed(20).await, Err(Error::NoProfileSelected)));
    }

    #[cfg(feature = "keyer")]
    #[tokio::test(start_paused = true)]
    async fn ptt_on_keyer_that_never_started() {
        let mock = shackctl_test_harness::MockTransport::new();
        let m = mock.clone();
        let (events, _) = broadcast::channel(16);
        let factory = DriverFactory::new().register(
            BackendKind::KeyerHardware,
            Arc::new(move |_| {
                m.expect_no_reply(&[0x00, 0x02]);
                Box::new(shackctl_keyer::WinKeyDriver::with_transport(
                    Box::new(m.clone()),
                    events.clone(),
                ))
            }),
        );
        let mut keyer = Station::new(factory).keyer();
        let profile = DeviceProfile::new(
            "winkey",
            BackendKind::KeyerHardware,
            LinkSettings::Serial {
                port: "/dev/ttyUSB1".into(),
                serial: Default::default(),
            },
        );

        let err = keyer.open(profile).await.unwrap_err();
        assert!(matches!(err, Error::Initialization(_)), "{err}");
        assert!(keyer.selected().is_some());

        let err = keyer.set_ptt(true).await.unwrap_err();
        assert!(matches!(err, Error::KeyerNotConnected), "{err}");
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert!(matches!(
            keyer.send("TEST", SendMode::Whole).await,
            Err(Error::KeyerNotConnected)
        ));
    }

    #[tokio::test]
    async fn speed_sync_outcomes() {
        let b = bench();
        let mut rig = b.station.rig();
        rig.open(rig_profile()).await.unwrap();
        let mut keyer = b.station.keyer();
        keyer.attach_rig(&rig).unwrap();
        let mut events = keyer.subscribe();

        let mut p = daemon();
        keyer.open(p.clone()).await.unwrap();
        assert_eq!(keyer.set_speed(28).await.unwrap(), SpeedSync::NotRequested);
        assert_eq!(b.rig.count("set keyer speed"), 0);

        p.keyer.speed_sync = true;
        keyer.open(p).await.unwrap();
        assert_eq!(keyer.set_speed(30).await.unwrap(), SpeedSync::Synced);
        assert_eq!(rig.state().keyer_wpm, Some(30));

        b.rig.set_speed_skew(-2);
        assert_eq!(
            keyer.set_speed(32).await.unwrap(),
            SpeedSync::Mismatch {
                requested: 32,
                reported: 30
            }
        );
        let mismatch = loop {
            match events.recv().await.unwrap() {
                e @ DeviceEvent::KeyerSpeedMismatch { .. } => break e,
                _ => continue,
            }
        };
        assert_eq!(
            mismatch,
            DeviceEvent::KeyerSpeedMismatch {
                requested: 32,
                reported: 30
            }
        );
        assert_eq!(b.keyer.count("set keyer speed"), 3);
    }

    #[cfg(feature = "keyer")]
    #[tokio::test]
    async fn morse_over_cat_keys_through_the_rig() {
        let b = bench();
        let mut keyer = b.station.keyer();
        let cat_keyer = DeviceProfile::new("rig cw", BackendKind::MorseOverCat, LinkSettings::None);

        let err = keyer.open(cat_keyer.clone()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let mut rig = b.station.rig();
        rig.open(rig_profile()).await.unwrap();
        keyer.attach_rig(&rig).unwrap();
        keyer.open(cat_keyer).await.unwrap();
        keyer.send("5NN TU", SendMode::Word).await.unwrap();
        assert_eq!(b.rig.morse(), ["5NN", "TU"]);

        rig.close().await;
        let err = keyer.send("CQ", SendMode::Whole).await.unwrap_err();
        assert!(matches!(err, Error::KeyerNotConnected), "{err}");
    }

    #[cfg(feature = "keyer")]
    #[tokio::test]
    async fn dummy_keyer_echoes() {
        let mut keyer = Station::default().keyer();
        let mut events = keyer.subscribe();
        keyer
            .open(DeviceProfile::new("dummy", BackendKind::DummyKeyer, LinkSettings::None))
            .await
            .unwrap();
        keyer.send("TEST", SendMode::Whole).await.unwrap();
        loop {
            if let DeviceEvent::KeyerEcho { text } = events.recv().await.unwrap() {
                assert_eq!(text, "TEST");
                break;
            }
        }
        assert_eq!(keyer.get_speed().await.unwrap(), 25);
        keyer.close().await;
        assert!(matches!(keyer.stop().await, Err(Error::NoProfileSelected)));
    }
}
