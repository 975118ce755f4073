//! Vendor bridge driver.
//!
//! One [`OmniRigDriver`] binds to one rig slot of a shared [`Bridge`]. Several
//! drivers may hold slots of the same bridge at once; each keeps its own
//! capability set, status tracking and cached readings.
//!
//! The bridge can report a rig going offline (port busy, not responding)
//! without telling its clients. The driver checks the slot status before
//! every operation. A change is published as
//! [`DeviceEvent::RigStatusChanged`]. While the rig is offline, reads are
//! answered from the last values seen and writes are still forwarded to the
//! bridge, which queues them. Once the rig has been offline for the whole
//! grace period every operation fails with [`Error::RigOffline`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use shackctl_core::capability::Capabilities;
use shackctl_core::driver::DeviceDriver;
use shackctl_core::error::{Error, Result};
use shackctl_core::events::DeviceEvent;
use shackctl_core::profile::{DeviceProfile, LinkSettings};
use shackctl_core::types::{BackendKind, Mode, Vfo};

use crate::bridge::{Bridge, BridgeRig, BridgeVersion, slot_name};
use crate::params::{ParamMask, RigStatus, mode_from_params, params_for_mode};

/// How long a rig may stay offline before operations fail.
pub const DEFAULT_OFFLINE_GRACE: Duration = Duration::from_millis(10_000);

/// Pause after each write so the bridge can forward it before the next read.
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(200);

#[derive(Debug, Default, Clone, Copy)]
struct Readings {
    freq_a: Option<u64>,
    freq_b: Option<u64>,
    mode: Option<Mode>,
    vfo: Option<Vfo>,
    ptt: Option<bool>,
    rit: Option<i32>,
}

/// Driver for one slot of a vendor bridge.
pub struct OmniRigDriver {
    bridge: Arc<dyn Bridge>,
    version: BridgeVersion,
    events: broadcast::Sender<DeviceEvent>,
    rig: Option<Arc<dyn BridgeRig>>,
    slot: u8,
    readable: ParamMask,
    writable: ParamMask,
    status: RigStatus,
    offline_since: Option<Instant>,
    grace: Duration,
    settle: Duration,
    last: Readings,
}

impl OmniRigDriver {
    /// Create a driver for `bridge`. Status changes are published on `events`.
    pub fn new(
        bridge: Arc<dyn Bridge>,
        version: BridgeVersion,
        events: broadcast::Sender<DeviceEvent>,
    ) -> Self {
        Self {
            bridge,
            version,
            events,
            rig: None,
            slot: 0,
            readable: ParamMask::empty(),
            writable: ParamMask::empty(),
            status: RigStatus::Online,
            offline_since: None,
            grace: DEFAULT_OFFLINE_GRACE,
            settle: DEFAULT_SETTLE,
            last: Readings::default(),
        }
    }

    /// Override the offline grace period.
    pub fn with_offline_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Override the post-write settle delay.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// The bound slot, 0 before initialize.
    pub fn slot(&self) -> u8 {
        self.slot
    }

    fn capabilities(&self) -> Capabilities {
        let r = self.readable;
        let w = self.writable;
        let mut caps = Capabilities::MULTI_RIG;
        caps.set(Capabilities::GET_FREQ, r.intersects(ParamMask::FREQ_ANY));
        caps.set(Capabilities::SET_FREQ, w.intersects(ParamMask::FREQ_ANY));
        caps.set(Capabilities::GET_MODE, r.intersects(ParamMask::MODES));
        caps.set(Capabilities::SET_MODE, w.intersects(ParamMask::MODES));
        caps.set(
            Capabilities::GET_VFO,
            r.intersects(ParamMask::VFO_A_ANY | ParamMask::VFO_B_ANY),
        );
        caps.set(Capabilities::GET_PTT, r.intersects(ParamMask::TXRX));
        caps.set(Capabilities::SET_PTT, w.intersects(ParamMask::TX));
        caps.set(
            Capabilities::GET_RIT,
            r.intersects(ParamMask::RIT_ANY | ParamMask::RITOFFSET),
        );
        caps.set(Capabilities::SET_RIT, w.intersects(ParamMask::RITOFFSET));
        caps
    }

    fn bound(&self) -> Result<Arc<dyn BridgeRig>> {
        self.rig.clone().ok_or(Error::NotConnected)
    }

    /// Check the slot status, publishing a change.
    ///
    /// Returns the rig and whether it is online. Fails once the rig has been
    /// offline for the grace period.
    fn check_status(&mut self) -> Result<(Arc<dyn BridgeRig>, bool)> {
        let rig = self.bound()?;
        let status = rig.status();

        if status != self.status {
            let text = rig.status_text();
            if status.is_online() {
                info!(slot = self.slot, status = %text, "bridge rig back online");
            } else {
                warn!(slot = self.slot, status = %text, "bridge rig status changed");
            }
            let _ = self.events.send(DeviceEvent::RigStatusChanged {
                online: status.is_online(),
                status: text,
            });
            self.status = status;
        }

        if status.is_online() {
            self.offline_since = None;
            return Ok((rig, true));
        }

        let since = *self.offline_since.get_or_insert_with(Instant::now);
        if since.elapsed() >= self.grace {
            return Err(Error::RigOffline(rig.status_text()));
        }
        Ok((rig, false))
    }

    /// The rig to read from, or `None` while it is offline within the grace
    /// period and cached values should be used instead.
    fn live(&mut self) -> Result<Option<Arc<dyn BridgeRig>>> {
        let (rig, online) = self.check_status()?;
        Ok(online.then_some(rig))
    }

    fn cached<T>(&self, value: Option<T>) -> Result<T> {
        value.ok_or_else(|| Error::RigOffline(self.status.to_string()))
    }

    async fn settle(&self) {
        if !self.settle.is_zero() {
            tokio::time::sleep(self.settle).await;
        }
    }

    fn current_vfo(&mut self, rig: &dyn BridgeRig) -> Result<Vfo> {
        let vfo = if rig.vfo()?.intersects(ParamMask::VFO_B_ANY) {
            Vfo::B
        } else {
            Vfo::A
        };
        self.last.vfo = Some(vfo);
        Ok(vfo)
    }

    fn resolve(&mut self, rig: &dyn BridgeRig, vfo: Vfo) -> Result<Vfo> {
        match vfo {
            Vfo::Current if self.readable.intersects(ParamMask::VFO_B_ANY) => {
                self.current_vfo(rig)
            }
            Vfo::Current => Ok(Vfo::A),
            other => Ok(other),
        }
    }
}

#[async_trait]
impl DeviceDriver for OmniRigDriver {
    fn backend(&self) -> BackendKind {
        self.version.backend()
    }

    async fn initialize(&mut self, profile: &DeviceProfile) -> Result<Capabilities> {
        let LinkSettings::Bridge { slot } = profile.link else {
            return Err(Error::Configuration(format!(
                "{} needs a bridge slot link",
                self.version
            )));
        };
        self.version.check_slot(slot)?;

        let rig = self.bridge.rig(slot)?;
        let status = rig.status();
        if status == RigStatus::NotConfigured {
            return Err(Error::Initialization(format!(
                "{} is not configured in the {}",
                slot_name(slot),
                self.version
            )));
        }

        self.slot = slot;
        self.readable = rig.readable_params();
        self.writable = rig.writeable_params();
        self.status = status;
        self.offline_since = None;
        self.last = Readings::default();

        let caps = self.capabilities();
        if !status.is_online() {
            warn!(slot, status = %rig.status_text(), "bridge rig is not online yet");
        }
        info!(
            bridge = %self.version,
            slot = %slot_name(slot),
            rig_type = %rig.rig_type(),
            capabilities = ?caps.names(),
            "bridge rig bound"
        );
        self.rig = Some(rig);
        Ok(caps)
    }

    async fn shutdown(&mut self) -> Result<()> {
        if self.rig.take().is_some() {
            debug!(slot = self.slot, "bridge rig released");
        }
        Ok(())
    }

    async fn set_frequency(&mut self, vfo: Vfo, hz: u64) -> Result<()> {
        if hz == 0 {
            return Err(Error::Configuration("frequency must be > 0 Hz".into()));
        }
        let (rig, online) = self.check_status()?;
        let target = match vfo {
            Vfo::Current if !online => self.last.vfo.unwrap_or(Vfo::A),
            vfo => self.resolve(rig.as_ref(), vfo)?,
        };

        if target == Vfo::B && self.writable.intersects(ParamMask::FREQB) {
            rig.set_freq_b(hz)?;
        } else if target != Vfo::B && self.writable.intersects(ParamMask::FREQA) {
            rig.set_freq_a(hz)?;
        } else if self.writable.intersects(ParamMask::FREQ) {
            rig.set_freq(hz)?;
        } else {
            return Err(Error::unsupported(format!("set frequency of VFO {target}")));
        }
        debug!(slot = self.slot, vfo = %target, hz, "bridge frequency written");
        self.settle().await;
        Ok(())
    }

    async fn get_frequency(&mut self, vfo: Vfo) -> Result<u64> {
        let Some(rig) = self.live()? else {
            let vfo = match vfo {
                Vfo::Current => self.last.vfo.unwrap_or(Vfo::A),
                other => other,
            };
            let hz = if vfo == Vfo::B {
                self.last.freq_b
            } else {
                self.last.freq_a
            };
            return self.cached(hz);
        };

        let vfo = self.resolve(rig.as_ref(), vfo)?;
        let specific = match vfo {
            Vfo::B if self.readable.intersects(ParamMask::FREQB) => rig.freq_b()?,
            Vfo::B => 0,
            _ if self.readable.intersects(ParamMask::FREQA) => rig.freq_a()?,
            _ => 0,
        };
        let hz = if specific == 0 { rig.freq()? } else { specific };

        if vfo == Vfo::B {
            self.last.freq_b = Some(hz);
        } else {
            self.last.freq_a = Some(hz);
        }
        Ok(hz)
    }

    async fn set_mode(&mut self, mode: Mode) -> Result<()> {
        let bit = params_for_mode(mode)
            .filter(|bit| self.writable.intersects(*bit))
            .ok_or_else(|| Error::unsupported(format!("mode {mode} on this bridge rig")))?;
        let (rig, _) = self.check_status()?;
        rig.set_mode(bit)?;
        self.settle().await;
        Ok(())
    }

    async fn get_mode(&mut self) -> Result<Mode> {
        let Some(rig) = self.live()? else {
            return self.cached(self.last.mode);
        };
        let params = rig.mode()?;
        let mode = mode_from_params(params)
            .ok_or_else(|| Error::Protocol(format!("bridge reported no known mode in {params:?}")))?;
        self.last.mode = Some(mode);
        Ok(mode)
    }

    async fn get_vfo(&mut self) -> Result<Vfo> {
        let Some(rig) = self.live()? else {
            return self.cached(self.last.vfo);
        };
        self.current_vfo(rig.as_ref())
    }

    async fn set_ptt(&mut self, on: bool) -> Result<()> {
        let (rig, _) = self.check_status()?;
        rig.set_tx(if on { ParamMask::TX } else { ParamMask::RX })?;
        self.settle().await;
        Ok(())
    }

    async fn get_ptt(&mut self) -> Result<bool> {
        let Some(rig) = self.live()? else {
            return self.cached(self.last.ptt);
        };
        let on = rig.tx()?.intersects(ParamMask::TX);
        self.last.ptt = Some(on);
        Ok(on)
    }

    async fn set_rit(&mut self, hz: i32) -> Result<()> {
        let (rig, _) = self.check_status()?;
        if hz == 0 {
            if self.writable.intersects(ParamMask::RITOFF) {
                rig.set_rit(ParamMask::RITOFF)?;
            } else {
                rig.set_rit_offset(0)?;
            }
        } else {
            rig.set_rit_offset(hz)?;
            if self.writable.intersects(ParamMask::RITON) {
                rig.set_rit(ParamMask::RITON)?;
            }
        }
        self.settle().await;
        Ok(())
    }

    async fn get_rit(&mut self) -> Result<i32> {
        let Some(rig) = self.live()? else {
            return self.cached(self.last.rit);
        };
        let on = !self.readable.intersects(ParamMask::RIT_ANY)
            || rig.rit()?.intersects(ParamMask::RITON);
        let hz = if on { rig.rit_offset()? } else { 0 };
        self.last.rit = Some(hz);
        Ok(hz)
    }
}
