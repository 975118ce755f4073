//! Morse keyed by the rig itself over its CAT link.
//!
//! The keyer owns no link of its own. Every request is submitted to the
//! rig's dispatcher, so keyer traffic and rig traffic stay serialized
//! through one queue.

use async_trait::async_trait;
use tracing::debug;

use shackctl_core::capability::Capabilities;
use shackctl_core::command::{Operation, Reply};
use shackctl_core::driver::DeviceDriver;
use shackctl_core::error::{Error, Result};
use shackctl_core::profile::DeviceProfile;
use shackctl_core::types::BackendKind;
use shackctl_dispatch::Commander;

const KEYER_CAPS: Capabilities = Capabilities::SEND_MORSE
    .union(Capabilities::STOP_MORSE)
    .union(Capabilities::KEYER_SPEED);

pub struct MorseOverCatDriver {
    rig: Commander,
    ready: bool,
}

impl MorseOverCatDriver {
    /// Key through the rig behind `rig`.
    pub fn new(rig: Commander) -> Self {
        Self { rig, ready: false }
    }

    async fn forward(&self, op: Operation) -> Result<Reply> {
        if !self.ready || self.rig.is_closed() {
            return Err(Error::KeyerNotConnected);
        }
        match self.rig.execute(op).await {
            Err(Error::NotConnected | Error::Cancelled) => Err(Error::KeyerNotConnected),
            other => other,
        }
    }
}

#[async_trait]
impl DeviceDriver for MorseOverCatDriver {
    fn backend(&self) -> BackendKind {
        BackendKind::MorseOverCat
    }

    async fn initialize(&mut self, profile: &DeviceProfile) -> Result<Capabilities> {
        if self.rig.is_closed() {
            return Err(Error::KeyerNotConnected);
        }
        let rig_caps = self.rig.capabilities();
        if !rig_caps.contains(Capabilities::SEND_MORSE) {
            return Err(Error::Initialization(format!(
                "{}: the rig cannot key morse over CAT",
                profile.name
            )));
        }
        self.ready = true;
        debug!(profile = %profile.name, "keying through the rig");
        Ok(rig_caps & KEYER_CAPS)
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.ready = false;
        Ok(())
    }

    async fn send_morse(&mut self, text: &str) -> Result<()> {
        self.forward(Operation::SendMorse(text.to_string())).await?;
        Ok(())
    }

    async fn set_keyer_speed(&mut self, wpm: u8) -> Result<()> {
        self.forward(Operation::SetKeyerSpeed(wpm)).await?;
        Ok(())
    }

    async fn get_keyer_speed(&mut self) -> Result<u8> {
        match self.forward(Operation::GetKeyerSpeed).await? {
            Reply::Speed(wpm) => Ok(wpm),
            other => Err(Error::Internal(format!("unexpected reply {other:?}"))),
        }
    }

    async fn stop_sending(&mut self) -> Result<()> {
        self.forward(Operation::StopSending).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use shackctl_core::events::EVENT_CHANNEL_CAPACITY;
    use shackctl_core::profile::LinkSettings;
    use shackctl_dispatch::{DispatchConfig, Dispatcher};
    use shackctl_test_harness::{ScriptHandle, ScriptedDriver};
    use tokio::sync::broadcast;

    fn rig_dispatcher(caps: Capabilities) -> (Dispatcher, ScriptHandle) {
        let (driver, handle) = ScriptedDriver::new(BackendKind::GenericCat, caps);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let d = Dispatcher::spawn(
            Box::new(driver),
            caps,
            DispatchConfig {
                command_timeout: Duration::from_secs(1),
                device: "rig".into(),
            },
            event_tx,
        );
        (d, handle)
    }

    fn profile() -> DeviceProfile {
        DeviceProfile::new("cat keyer", BackendKind::MorseOverCat, LinkSettings::None)
    }

    #[tokio::test]
    async fn keys_through_the_rig_queue() {
        let (rig, h) = rig_dispatcher(
            Capabilities::FREQ
                | Capabilities::SEND_MORSE
                | Capabilities::STOP_MORSE
                | Capabilities::KEYER_SPEED,
        );

        let mut k = MorseOverCatDriver::new(rig.commander());
        let caps = k.initialize(&profile()).await.unwrap();
        assert!(caps.contains(KEYER_CAPS));
        assert!(!caps.contains(Capabilities::SET_FREQ));

        k.send_morse("CQ TEST").await.unwrap();
        k.set_keyer_speed(32).await.unwrap();
        assert_eq!(k.get_keyer_speed().await.unwrap(), 32);
        k.stop_sending().await.unwrap();

        assert_eq!(h.morse(), ["CQ TEST"]);
        assert_eq!(h.count("stop sending"), 1);
        rig.shutdown().await;
    }

    #[tokio::test]
    async fn rig_without_cw_support_is_rejected() {
        let (rig, _h) = rig_dispatcher(Capabilities::FREQ | Capabilities::MODE);
        let err = MorseOverCatDriver::new(rig.commander())
            .initialize(&profile())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Initialization(_)), "{err}");
        rig.shutdown().await;
    }

    #[tokio::test]
    async fn closed_rig_means_keyer_not_connected() {
        let (rig, _h) = rig_dispatcher(Capabilities::SEND_MORSE | Capabilities::STOP_MORSE);
        let mut k = MorseOverCatDriver::new(rig.commander());
        k.initialize(&profile()).await.unwrap();

        rig.shutdown().await;
        let err = k.send_morse("TEST").await.unwrap_err();
        assert!(matches!(err, Error::KeyerNotConnected), "{err}");
    }
}
