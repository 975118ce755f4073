//! The backend driver interface.
//!
//! Every backend family implements [`DeviceDriver`]. All operations have a
//! default body that fails with [`Error::Unsupported`], so a backend only
//! implements what its hardware can do. A driver is owned by exactly one
//! dispatcher worker at a time and therefore takes `&mut self` everywhere.

use async_trait::async_trait;

use crate::capability::Capabilities;
use crate::command::{Operation, Reply};
use crate::error::{Error, Result};
use crate::profile::DeviceProfile;
use crate::types::{BackendKind, Mode, Vfo};

/// A backend driver for one device.
#[async_trait]
pub trait DeviceDriver: Send {
    /// The backend family of this driver.
    fn backend(&self) -> BackendKind;

    /// Open the link and bring the device up.
    ///
    /// Returns the capabilities the backend discovered. The façade
    /// intersects them with the profile's hints.
    async fn initialize(&mut self, profile: &DeviceProfile) -> Result<Capabilities>;

    /// Release the link. Called exactly once when the device is closed.
    async fn shutdown(&mut self) -> Result<()>;

    /// Recover after a command was abandoned at its deadline.
    ///
    /// Drivers with a byte stream drop whatever late reply is still in
    /// flight here.
    async fn resync(&mut self) -> Result<()> {
        Ok(())
    }

    async fn set_frequency(&mut self, _vfo: Vfo, _hz: u64) -> Result<()> {
        Err(Error::unsupported("set frequency"))
    }

    async fn get_frequency(&mut self, _vfo: Vfo) -> Result<u64> {
        Err(Error::unsupported("get frequency"))
    }

    async fn set_mode(&mut self, _mode: Mode) -> Result<()> {
        Err(Error::unsupported("set mode"))
    }

    async fn get_mode(&mut self) -> Result<Mode> {
        Err(Error::unsupported("get mode"))
    }

    async fn get_vfo(&mut self) -> Result<Vfo> {
        Err(Error::unsupported("get VFO"))
    }

    async fn set_ptt(&mut self, _on: bool) -> Result<()> {
        Err(Error::unsupported("set PTT"))
    }

    async fn get_ptt(&mut self) -> Result<bool> {
        Err(Error::unsupported("get PTT"))
    }

    async fn set_power(&mut self, _watts: f32) -> Result<()> {
        Err(Error::unsupported("set power"))
    }

    async fn get_power(&mut self) -> Result<f32> {
        Err(Error::unsupported("get power"))
    }

    async fn set_rit(&mut self, _hz: i32) -> Result<()> {
        Err(Error::unsupported("set RIT"))
    }

    async fn get_rit(&mut self) -> Result<i32> {
        Err(Error::unsupported("get RIT"))
    }

    async fn set_xit(&mut self, _hz: i32) -> Result<()> {
        Err(Error::unsupported("set XIT"))
    }

    async fn get_xit(&mut self) -> Result<i32> {
        Err(Error::unsupported("get XIT"))
    }

    async fn send_morse(&mut self, _text: &str) -> Result<()> {
        Err(Error::unsupported("send morse"))
    }

    async fn set_keyer_speed(&mut self, _wpm: u8) -> Result<()> {
        Err(Error::unsupported("set keyer speed"))
    }

    async fn get_keyer_speed(&mut self) -> Result<u8> {
        Err(Error::unsupported("get keyer speed"))
    }

    async fn stop_sending(&mut self) -> Result<()> {
        Err(Error::unsupported("stop sending"))
    }

    async fn set_position(&mut self, _azimuth: f64, _elevation: f64) -> Result<()> {
        Err(Error::unsupported("set position"))
    }

    async fn get_position(&mut self) -> Result<(f64, f64)> {
        Err(Error::unsupported("get position"))
    }
}

/// Run `op` against `driver`, mapping the typed result to a [`Reply`].
pub async fn execute(driver: &mut dyn DeviceDriver, op: &Operation) -> Result<Reply> {
    match op {
        Operation::SetFrequency { vfo, hz } => {
            driver.set_frequency(*vfo, *hz).await.map(|_| Reply::Done)
        }
        Operation::GetFrequency { vfo } => driver.get_frequency(*vfo).await.map(Reply::Frequency),
        Operation::SetMode(mode) => driver.set_mode(*mode).await.map(|_| Reply::Done),
        Operation::GetMode => driver.get_mode().await.map(Reply::Mode),
        Operation::GetVfo => driver.get_vfo().await.map(Reply::Vfo),
        Operation::SetPtt(on) => driver.set_ptt(*on).await.map(|_| Reply::Done),
        Operation::GetPtt => driver.get_ptt().await.map(Reply::Ptt),
        Operation::SetPower(watts) => driver.set_power(*watts).await.map(|_| Reply::Done),
        Operation::GetPower => driver.get_power().await.map(Reply::Power),
        Operation::SetRit(hz) => driver.set_rit(*hz).await.map(|_| Reply::Done),
        Operation::GetRit => driver.get_rit().await.map(Reply::Offset),
        Operation::SetXit(hz) => driver.set_xit(*hz).await.map(|_| Reply::Done),
        Operation::GetXit => driver.get_xit().await.map(Reply::Offset),
        Operation::SendMorse(text) => driver.send_morse(text).await.map(|_| Reply::Done),
        Operation::SetKeyerSpeed(wpm) => driver.set_keyer_speed(*wpm).await.map(|_| Reply::Done),
        Operation::GetKeyerSpeed => driver.get_keyer_speed().await.map(Reply::Speed),
        Operation::StopSending => driver.stop_sending().await.map(|_| Reply::Done),
        Operation::SetPosition { azimuth, elevation } => driver
            .set_position(*azimuth, *elevation)
            .await
            .map(|_| Reply::Done),
        Operation::GetPosition => driver
            .get_position()
            .await
            .map(|(azimuth, elevation)| Reply::Position { azimuth, elevation }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedRig {
        hz: u64,
    }

    #[async_trait]
    impl DeviceDriver for FixedRig {
        fn backend(&self) -> BackendKind {
            BackendKind::GenericCat
        }

        async fn initialize(&mut self, _profile: &DeviceProfile) -> Result<Capabilities> {
            Ok(Capabilities::FREQ)
        }

        async fn shutdown(&mut self) -> Result<()> {
            Ok(())
        }

        async fn set_frequency(&mut self, _vfo: Vfo, hz: u64) -> Result<()> {
            self.hz = hz;
            Ok(())
        }

        async fn get_frequency(&mut self, _vfo: Vfo) -> Result<u64> {
            Ok(self.hz)
        }
    }

    #[tokio::test]
    async fn execute_maps_typed_results() {
        let mut rig = FixedRig { hz: 0 };
        let reply = execute(
            &mut rig,
            &Operation::SetFrequency {
                vfo: Vfo::A,
                hz: 10_136_000,
            },
        )
        .await
        .unwrap();
        assert_eq!(reply, Reply::Done);

        let reply = execute(&mut rig, &Operation::GetFrequency { vfo: Vfo::A })
            .await
            .unwrap();
        assert_eq!(reply, Reply::Frequency(10_136_000));
    }

    #[tokio::test]
    async fn defaults_are_unsupported() {
        let mut rig = FixedRig { hz: 0 };
        let err = execute(&mut rig, &Operation::SetPower(100.0)).await.unwrap_err();
        assert_eq!(err.to_string(), "unsupported operation: set power");
        let err = execute(&mut rig, &Operation::GetPosition).await.unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }
}
