//! The antenna rotator façade.

use tokio::sync::{broadcast, watch};

use shackctl_core::capability::Capabilities;
use shackctl_core::command::{Operation, Reply};
use shackctl_core::error::{Error, Result};
use shackctl_core::events::DeviceEvent;
use shackctl_core::profile::DeviceProfile;
use shackctl_core::state::{ConnectionState, DeviceState};
use shackctl_core::types::DeviceKind;

use crate::device::{DeviceSlot, unexpected};
use crate::station::Station;

/// Fold any bearing into `0..360` degrees.
pub fn normalize_azimuth(degrees: f64) -> f64 {
    let folded = degrees.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs.
    if folded >= 360.0 { 0.0 } else { folded }
}

/// The reciprocal of a short-path bearing.
pub fn long_path(bearing: f64) -> f64 {
    normalize_azimuth(bearing + 180.0)
}

pub struct Rotator {
    slot: DeviceSlot,
}

impl Rotator {
    pub(crate) fn new(station: Station) -> Self {
        Self {
            slot: DeviceSlot::new(station, DeviceKind::Rotator),
        }
    }

    pub async fn open(&mut self, profile: DeviceProfile) -> Result<()> {
        self.slot.open(profile, None).await
    }

    pub async fn open_named(&mut self, name: &str) -> Result<()> {
        let profile = self.slot.station().profile(name)?;
        self.open(profile).await
    }

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

    pub fn state(&self) -> DeviceState {
        self.slot.state()
    }

    /// Turn to `azimuth` degrees; any value is folded into 0-360 first.
    pub async fn set_position(&self, azimuth: f64) -> Result<()> {
        if !azimuth.is_finite() {
            return Err(Error::Configuration(format!("azimuth {azimuth} is not a bearing")));
        }
        let azimuth = normalize_azimuth(azimuth);
        self.slot
            .execute(
                Operation::SetPosition {
                    azimuth,
                    elevation: 0.0,
                },
                || Error::NotConnected,
            )
            .await
            .map(|_| ())
    }

    /// Turn the antenna to the long path for a short-path `bearing`.
    /// Returns the azimuth commanded.
    pub async fn point_long_path(&self, bearing: f64) -> Result<f64> {
        let azimuth = long_path(bearing);
        self.set_position(azimuth).await?;
        Ok(azimuth)
    }

    /// Current azimuth in degrees.
    pub async fn get_position(&self) -> Result<f64> {
        match self
            .slot
            .execute(Operation::GetPosition, || Error::NotConnected)
            .await?
        {
            Reply::Position { azimuth, .. } => Ok(azimuth),
            other => Err(unexpected("get position", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use shackctl_core::profile::LinkSettings;
    use shackctl_core::types::BackendKind;
    use shackctl_test_harness::ScriptedDriver;

    use crate::factory::DriverFactory;

    #[test]
    fn bearings_fold_into_a_circle() {
        assert_eq!(normalize_azimuth(370.0), 10.0);
        assert_eq!(normalize_azimuth(-90.0), 270.0);
        assert_eq!(normalize_azimuth(360.0), 0.0);
        assert_eq!(long_path(45.0), 225.0);
        assert_eq!(long_path(270.0), 90.0);
    }

    #[tokio::test]
    async fn commands_are_normalized() {
        let (_, handle) = ScriptedDriver::new(BackendKind::RotatorUdp, Capabilities::POSITION);
        let h = handle.clone();
        let station = Station::new(DriverFactory::new().register(
            BackendKind::RotatorUdp,
            Arc::new(move |_| Box::new(h.driver(BackendKind::RotatorUdp, Capabilities::POSITION))),
        ));
        let mut rotator = station.rotator();
        rotator
            .open(DeviceProfile::new(
                "pst",
                BackendKind::RotatorUdp,
                LinkSettings::None,
            ))
            .await
            .unwrap();

        rotator.set_position(-30.0).await.unwrap();
        assert_eq!(rotator.get_position().await.unwrap(), 330.0);
        assert_eq!(rotator.point_long_path(330.0).await.unwrap(), 150.0);
        assert_eq!(rotator.get_position().await.unwrap(), 150.0);
        assert_eq!(rotator.state().azimuth_deg, Some(150.0));
        assert!(rotator.set_position(f64::NAN).await.is_err());
    }

    #[tokio::test]
    async fn closed_rotator_is_not_connected() {
        let rotator = Station::default().rotator();
        assert!(matches!(rotator.set_position(90.0).await, Err(Error::NotConnected)));
    }
}
