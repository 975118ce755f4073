//! A keyer with no hardware behind it.
//!
//! Text is logged and echoed back as if it had been keyed, so contest
//! software can run its CW flow on a station without a keyer.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::info;

use shackctl_core::capability::Capabilities;
use shackctl_core::driver::DeviceDriver;
use shackctl_core::error::{Error, Result};
use shackctl_core::events::DeviceEvent;
use shackctl_core::profile::{DeviceProfile, MAX_WPM, MIN_WPM};
use shackctl_core::types::BackendKind;

pub struct DummyKeyer {
    events: broadcast::Sender<DeviceEvent>,
    sent: Arc<Mutex<Vec<String>>>,
    wpm: u8,
    open: bool,
}

impl DummyKeyer {
    pub fn new(events: broadcast::Sender<DeviceEvent>) -> Self {
        Self {
            events,
            sent: Arc::default(),
            wpm: 25,
            open: false,
        }
    }

    /// Shared view of every text "keyed" so far.
    pub fn sent(&self) -> Arc<Mutex<Vec<String>>> {
        self.sent.clone()
    }

    fn check_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(Error::KeyerNotConnected)
        }
    }
}

#[async_trait]
impl DeviceDriver for DummyKeyer {
    fn backend(&self) -> BackendKind {
        BackendKind::DummyKeyer
    }

    async fn initialize(&mut self, profile: &DeviceProfile) -> Result<Capabilities> {
        self.wpm = profile.keyer.default_wpm;
        self.open = true;
        info!(profile = %profile.name, wpm = self.wpm, "dummy keyer ready");
        Ok(Capabilities::SEND_MORSE | Capabilities::STOP_MORSE | Capabilities::KEYER_SPEED)
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.open = false;
        Ok(())
    }

    async fn send_morse(&mut self, text: &str) -> Result<()> {
        self.check_open()?;
        info!(text = %text, wpm = self.wpm, "dummy keyer sending");
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(text.to_string());
        let _ = self.events.send(DeviceEvent::KeyerEcho {
            text: text.to_string(),
        });
        Ok(())
    }

    async fn set_keyer_speed(&mut self, wpm: u8) -> Result<()> {
        self.check_open()?;
        if !(MIN_WPM..=MAX_WPM).contains(&wpm) {
            return Err(Error::Configuration(format!(
                "keyer speed must be {MIN_WPM}-{MAX_WPM} WPM, got {wpm}"
            )));
        }
        self.wpm = wpm;
        Ok(())
    }

    async fn get_keyer_speed(&mut self) -> Result<u8> {
        self.check_open()?;
        Ok(self.wpm)
    }

    async fn stop_sending(&mut self) -> Result<()> {
        self.check_open()
    }
}
