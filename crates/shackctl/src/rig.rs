//! The transceiver façade.

use tokio::sync::{broadcast, watch};
use tracing::warn;

use shackctl_core::capability::Capabilities;
use shackctl_core::command::{Operation, Reply};
use shackctl_core::error::{Error, Result};
use shackctl_core::events::DeviceEvent;
use shackctl_core::profile::DeviceProfile;
use shackctl_core::state::{ConnectionState, DeviceState};
use shackctl_core::types::{DeviceKind, Mode, Vfo};
use shackctl_dispatch::Commander;

use crate::device::{DeviceSlot, unexpected};
use crate::station::Station;

/// A transceiver, driven through whichever backend its profile selects.
///
/// Every call is queued on the device's dispatcher and resolves to the
/// driver's result or one [`Error`]. State readers get owned snapshots via
/// [`state`](Self::state); changes are announced on
/// [`subscribe`](Self::subscribe).
pub struct Rig {
    slot: DeviceSlot,
}

impl Rig {
    pub(crate) fn new(station: Station) -> Self {
        Self {
            slot: DeviceSlot::new(station, DeviceKind::Rig),
        }
    }

    /// Open the rig described by `profile`, closing any rig open here.
    pub async fn open(&mut self, profile: DeviceProfile) -> Result<()> {
        self.slot.open(profile, None).await
    }

    /// Open the profile called `name` from the station's store.
    pub async fn open_named(&mut self, name: &str) -> Result<()> {
        let profile = self.slot.station().profile(name)?;
        self.open(profile).await
    }

    /// Close the rig. Outstanding commands resolve with
    /// [`Error::Cancelled`].
    pub async fn close(&self) {
        self.slot.close().await;
    }

    pub fn is_open(&self) -> bool {
        self.slot.is_open()
    }

    pub fn profile(&self) -> Option<DeviceProfile> {
        self.slot.profile()
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

    /// Copy of the latest state snapshot.
    pub fn state(&self) -> DeviceState {
        self.slot.state()
    }

    pub fn watch_state(&self) -> Option<watch::Receiver<DeviceState>> {
        self.slot.watch_state()
    }

    pub(crate) fn commander(&self) -> Result<Commander> {
        self.slot.commander().ok_or(Error::NotConnected)
    }

    async fn run(&self, op: Operation) -> Result<Reply> {
        self.slot.execute(op, || Error::NotConnected).await
    }

    async fn run_set(&self, op: Operation) -> Result<()> {
        self.run(op).await.map(|_| ())
    }

    pub async fn set_frequency(&self, vfo: Vfo, hz: u64) -> Result<()> {
        self.run_set(Operation::SetFrequency { vfo, hz }).await
    }

    pub async fn get_frequency(&self, vfo: Vfo) -> Result<u64> {
        match self.run(Operation::GetFrequency { vfo }).await? {
            Reply::Frequency(hz) => Ok(hz),
            other => Err(unexpected("get frequency", other)),
        }
    }

    pub async fn set_mode(&self, mode: Mode) -> Result<()> {
        self.run_set(Operation::SetMode(mode)).await
    }

    pub async fn get_mode(&self) -> Result<Mode> {
        match self.run(Operation::GetMode).await? {
            Reply::Mode(mode) => Ok(mode),
            other => Err(unexpected("get mode", other)),
        }
    }

    pub async fn get_vfo(&self) -> Result<Vfo> {
        match self.run(Operation::GetVfo).await? {
            Reply::Vfo(vfo) => Ok(vfo),
            other => Err(unexpected("get VFO", other)),
        }
    }

    /// Key or unkey the transmitter.
    ///
    /// Keying is refused with [`Error::Configuration`] when the profile has
    /// a TX range and the frequency in use lies outside it. The last known
    /// frequency is used; it is read from the rig only if nothing is known
    /// yet.
    pub async fn set_ptt(&self, on: bool) -> Result<()> {
        if on {
            self.check_tx_range().await?;
        }
        self.run_set(Operation::SetPtt(on)).await
    }

    async fn check_tx_range(&self) -> Result<()> {
        let Some(range) = self.profile().and_then(|p| p.tx_range) else {
            return Ok(());
        };
        let known = self.state().frequency(Vfo::Current);
        let hz = match known {
            Some(hz) => hz,
            None if self.capabilities().contains(Capabilities::GET_FREQ) => {
                self.get_frequency(Vfo::Current).await?
            }
            None => return Ok(()),
        };
        if range.contains(hz) {
            Ok(())
        } else {
            warn!(hz, range = %range, "transmit refused outside TX range");
            Err(Error::Configuration(format!(
                "{hz} Hz is outside the TX range {range}"
            )))
        }
    }

    pub async fn get_ptt(&self) -> Result<bool> {
        match self.run(Operation::GetPtt).await? {
            Reply::Ptt(on) => Ok(on),
            other => Err(unexpected("get PTT", other)),
        }
    }

    /// Set transmit power in watts.
    pub async fn set_power(&self, watts: f32) -> Result<()> {
        self.run_set(Operation::SetPower(watts)).await
    }

    pub async fn get_power(&self) -> Result<f32> {
        match self.run(Operation::GetPower).await? {
            Reply::Power(watts) => Ok(watts),
            other => Err(unexpected("get power", other)),
        }
    }

    /// Set the RIT offset in hertz; 0 turns RIT off.
    pub async fn set_rit(&self, hz: i32) -> Result<()> {
        self.run_set(Operation::SetRit(hz)).await
    }

    pub async fn get_rit(&self) -> Result<i32> {
        match self.run(Operation::GetRit).await? {
            Reply::Offset(hz) => Ok(hz),
            other => Err(unexpected("get RIT", other)),
        }
    }

    /// Set the XIT offset in hertz; 0 turns XIT off.
    pub async fn set_xit(&self, hz: i32) -> Result<()> {
        self.run_set(Operation::SetXit(hz)).await
    }

    pub async fn get_xit(&self) -> Result<i32> {
        match self.run(Operation::GetXit).await? {
            Reply::Offset(hz) => Ok(hz),
            other => Err(unexpected("get XIT", other)),
        }
    }

    /// Speed of the rig's internal keyer.
    pub async fn set_keyer_speed(&self, wpm: u8) -> Result<()> {
        self.run_set(Operation::SetKeyerSpeed(wpm)).await
    }

    pub async fn get_keyer_speed(&self) -> Result<u8> {
        match self.run(Operation::GetKeyerSpeed).await? {
            Reply::Speed(wpm) => Ok(wpm),
            other => Err(unexpected("get keyer speed", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use shackctl_core::error::ErrorKind;
    use shackctl_core::profile::LinkSettings;
    use shackctl_core::types::{BackendKind, TxRange};
    use shackctl_test_harness::{Failure, ScriptHandle, ScriptedDriver};

    use crate::factory::DriverFactory;

    fn station(caps: Capabilities) -> (Station, ScriptHandle) {
        let (_, handle) = ScriptedDriver::rig();
        let h = handle.clone();
        let factory = DriverFactory::new().register(
            BackendKind::GenericCat,
            Arc::new(move |_| Box::new(h.driver(BackendKind::GenericCat, caps))),
        );
        (Station::new(factory), handle)
    }

    fn rig_caps() -> Capabilities {
        Capabilities::FREQ
            | Capabilities::MODE
            | Capabilities::GET_VFO
            | Capabilities::PTT
            | Capabilities::POWER
            | Capabilities::RIT
    }

    fn profile(name: &str) -> DeviceProfile {
        DeviceProfile::new(
            name,
            BackendKind::GenericCat,
            LinkSettings::Serial {
                port: "/dev/ttyUSB0".into(),
                serial: Default::default(),
            },
        )
    }

    #[tokio::test]
    async fn open_round_trip_close() {
        let (station, h) = station(rig_caps());
        let mut rig = station.rig();
        let mut events = rig.subscribe();

        rig.open(profile("ts590")).await.unwrap();
        assert_eq!(rig.connection_state(), ConnectionState::Connected);
        assert_eq!(
            events.recv().await.unwrap(),
            DeviceEvent::ConnectionChanged(ConnectionState::Connecting)
        );
        assert_eq!(
            events.recv().await.unwrap(),
            DeviceEvent::ConnectionChanged(ConnectionState::Connected)
        );

        rig.set_frequency(Vfo::A, 7_025_000).await.unwrap();
        assert_eq!(rig.get_frequency(Vfo::A).await.unwrap(), 7_025_000);
        assert_eq!(rig.state().freq_a_hz, Some(7_025_000));
        rig.set_mode(Mode::CW).await.unwrap();
        assert_eq!(rig.get_mode().await.unwrap(), Mode::CW);

        rig.close().await;
        assert_eq!(rig.connection_state(), ConnectionState::Disconnected);
        assert!(h.calls().contains(&"shutdown".to_string()));
        assert!(matches!(
            rig.get_frequency(Vfo::A).await,
            Err(Error::NotConnected)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn close_cancels_a_hung_command() {
        let (station, h) = station(rig_caps());
        let mut rig = station.rig();
        rig.open(profile("ts590")).await.unwrap();
        let rig = Arc::new(rig);

        h.set_hang(true);
        let pending = {
            let rig = rig.clone();
            tokio::spawn(async move { rig.get_mode().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let started = tokio::time::Instant::now();
        rig.close().await;
        assert!(started.elapsed() < Duration::from_millis(100));

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Cancelled), "got {err:?}");
        assert_eq!(rig.connection_state(), ConnectionState::Disconnected);
        assert!(!station.registry().is_open("ts590"));
    }

    #[tokio::test]
    async fn same_profile_twice_is_already_open() {
        let (station, _h) = station(rig_caps());
        let mut first = station.rig();
        let mut second = station.rig();
        first.open(profile("ts590")).await.unwrap();

        let err = second.open(profile("ts590")).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyOpen(_)), "{err}");
        assert_eq!(second.connection_state(), ConnectionState::Disconnected);

        first.close().await;
        second.open(profile("ts590")).await.unwrap();
    }

    #[tokio::test]
    async fn wrong_device_kind_is_configuration() {
        let (station, _h) = station(rig_caps());
        let mut rig = station.rig();
        let keyer = DeviceProfile::new("wk", BackendKind::KeyerHardware, LinkSettings::None);
        let err = rig.open(keyer).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn hints_narrow_the_capability_set() {
        let (station, h) = station(rig_caps());
        let mut rig = station.rig();
        let mut p = profile("ts590");
        p.hints.power = false;
        rig.open(p).await.unwrap();

        assert!(!rig.capabilities().contains(Capabilities::SET_POWER));
        let err = rig.set_power(50.0).await.unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
        assert_eq!(h.count("set power"), 0);
        assert!(matches!(rig.set_xit(10).await, Err(Error::Unsupported(_))));
    }

    #[tokio::test]
    async fn ptt_outside_tx_range_is_refused() {
        let (station, h) = station(rig_caps());
        let mut rig = station.rig();
        let mut p = profile("ts590");
        p.tx_range = Some(TxRange::new(14_000_000, 14_350_000));
        rig.open(p).await.unwrap();

        rig.set_frequency(Vfo::A, 14_200_000).await.unwrap();
        rig.set_ptt(true).await.unwrap();
        rig.set_ptt(false).await.unwrap();

        rig.set_frequency(Vfo::A, 14_400_000).await.unwrap();
        let err = rig.set_ptt(true).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(h.count("set PTT"), 2);
        rig.set_ptt(false).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn open_retries_with_backoff() {
        let (station, h) = station(rig_caps());
        h.fail_initialize(2);
        let mut rig = station.rig();
        let mut p = profile("ts590");
        p.connect_attempts = 3;
        p.connect_backoff_ms = 250;

        let started = tokio::time::Instant::now();
        rig.open(p.clone()).await.unwrap();
        assert_eq!(h.count("initialize"), 3);
        assert!(started.elapsed() >= Duration::from_millis(500));
        rig.close().await;

        h.fail_initialize(1);
        p.connect_attempts = 1;
        let err = rig.open(p).await.unwrap_err();
        assert!(matches!(err, Error::Initialization(_)), "{err}");
        assert!(!station.registry().is_open("ts590"));
    }

    #[tokio::test(start_paused = true)]
    async fn poller_failure_needs_explicit_reopen() {
        let (station, h) = station(rig_caps());
        let mut rig = station.rig();
        let mut p = profile("ts590");
        p.poll_interval_ms = 100;
        rig.open(p.clone()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(rig.state().freq_a_hz, Some(14_074_000));

        h.set_failure(Some(Failure::Timeout));
        let mut connection = rig.watch_connection();
        connection
            .wait_for(|s| *s == ConnectionState::Failed)
            .await
            .unwrap();
        let polls = h.count("get VFO");
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.count("get VFO"), polls);
        assert!(matches!(rig.get_mode().await, Err(Error::NotConnected)));

        h.set_failure(None);
        rig.open(p).await.unwrap();
        assert_eq!(rig.connection_state(), ConnectionState::Connected);
        assert_eq!(rig.get_mode().await.unwrap(), Mode::USB);
    }

    #[cfg(feature = "omnirig")]
    #[tokio::test(start_paused = true)]
    async fn bridge_slots_are_independent() {
        use shackctl_omnirig::{BridgeVersion, SimulatedBridge};

        let bridge = Arc::new(SimulatedBridge::new(BridgeVersion::V2));
        let station = Station::new(DriverFactory::new().with_bridge(BridgeVersion::V2, bridge));
        let bridged = |name: &str, slot| {
            DeviceProfile::new(name, BackendKind::VendorBridgeV2, LinkSettings::Bridge { slot })
        };

        let mut rig1 = station.rig();
        let mut rig3 = station.rig();
        rig1.open(bridged("rig 1", 1)).await.unwrap();
        rig3.open(bridged("rig 3", 3)).await.unwrap();
        assert!(rig1.capabilities().contains(Capabilities::MULTI_RIG));
        tokio::time::sleep(Duration::from_millis(500)).await;

        let before = rig3.get_frequency(Vfo::A).await.unwrap();
        let snapshot = rig3.state();
        rig1.set_frequency(Vfo::A, 21_025_000).await.unwrap();
        assert_eq!(rig1.get_frequency(Vfo::A).await.unwrap(), 21_025_000);

        assert_eq!(rig3.state(), snapshot);
        assert_eq!(rig3.get_frequency(Vfo::A).await.unwrap(), before);

        let mut again = station.rig();
        let err = again.open(bridged("rig 1 again", 1)).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyOpen(_)), "{err}");
    }
}
