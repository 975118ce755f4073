//! In-memory bridge.
//!
//! Behaves like a bridge with every slot configured for a full-featured rig
//! that is online and answers instantly. Tests and the test application use
//! it to drive the bridge backend without the real bridge process; the
//! `tune`, `set_status` and `set_params` hooks stand in for the operator
//! turning the dial or unplugging the radio.

use std::sync::{Arc, Mutex, MutexGuard};

use shackctl_core::error::{Error, Result};

use crate::bridge::{Bridge, BridgeRig, BridgeVersion};
use crate::params::{ParamMask, RigStatus};

/// A simulated bridge process.
pub struct SimulatedBridge {
    version: BridgeVersion,
    rigs: Vec<Arc<SimulatedRig>>,
}

impl SimulatedBridge {
    pub fn new(version: BridgeVersion) -> Self {
        let rigs = (1..=version.max_slots())
            .map(|_| Arc::new(SimulatedRig::default()))
            .collect();
        Self { version, rigs }
    }

    /// Direct access to a slot's simulated rig.
    pub fn slot(&self, slot: u8) -> Option<Arc<SimulatedRig>> {
        let index = usize::from(slot).checked_sub(1)?;
        self.rigs.get(index).cloned()
    }
}

impl Bridge for SimulatedBridge {
    fn rig(&self, slot: u8) -> Result<Arc<dyn BridgeRig>> {
        self.version.check_slot(slot)?;
        let rig = self
            .slot(slot)
            .ok_or_else(|| Error::Internal(format!("simulated slot {slot} missing")))?;
        Ok(rig)
    }
}

#[derive(Debug)]
struct RigInner {
    status: RigStatus,
    readable: ParamMask,
    writable: ParamMask,
    vfo: ParamMask,
    freq_a: u64,
    freq_b: u64,
    mode: ParamMask,
    tx: ParamMask,
    rit: ParamMask,
    rit_offset: i32,
}

/// One simulated rig slot.
#[derive(Debug)]
pub struct SimulatedRig {
    inner: Mutex<RigInner>,
}

impl Default for SimulatedRig {
    fn default() -> Self {
        let params = ParamMask::FREQ_ANY
            | ParamMask::VFO_A_ANY
            | ParamMask::VFO_B_ANY
            | ParamMask::MODES
            | ParamMask::TXRX
            | ParamMask::RIT_ANY
            | ParamMask::RITOFFSET;
        Self {
            inner: Mutex::new(RigInner {
                status: RigStatus::Online,
                readable: params,
                writable: params,
                vfo: ParamMask::VFOAA,
                freq_a: 14_000_000,
                freq_b: 14_000_000,
                mode: ParamMask::SSB_U,
                tx: ParamMask::RX,
                rit: ParamMask::RITOFF,
                rit_offset: 0,
            }),
        }
    }
}

impl SimulatedRig {
    fn lock(&self) -> MutexGuard<'_, RigInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_status(&self, status: RigStatus) {
        self.lock().status = status;
    }

    /// Replace the readable and writable parameter masks.
    pub fn set_params(&self, readable: ParamMask, writable: ParamMask) {
        let mut inner = self.lock();
        inner.readable = readable;
        inner.writable = writable;
    }

    /// Make `vfo` (one of the VFO bits) the active VFO.
    pub fn select_vfo(&self, vfo: ParamMask) {
        self.lock().vfo = vfo;
    }

    /// Turn the dial of the active VFO.
    pub fn tune(&self, hz: u64) {
        let mut inner = self.lock();
        if inner.vfo.intersects(ParamMask::VFO_B_ANY) {
            inner.freq_b = hz;
        } else {
            inner.freq_a = hz;
        }
    }
}

impl BridgeRig for SimulatedRig {
    fn rig_type(&self) -> String {
        "Simulated".to_string()
    }

    fn readable_params(&self) -> ParamMask {
        self.lock().readable
    }

    fn writeable_params(&self) -> ParamMask {
        self.lock().writable
    }

    fn status(&self) -> RigStatus {
        self.lock().status
    }

    fn vfo(&self) -> Result<ParamMask> {
        Ok(self.lock().vfo)
    }

    fn freq(&self) -> Result<u64> {
        let inner = self.lock();
        Ok(if inner.vfo.intersects(ParamMask::VFO_B_ANY) {
            inner.freq_b
        } else {
            inner.freq_a
        })
    }

    fn freq_a(&self) -> Result<u64> {
        Ok(self.lock().freq_a)
    }

    fn freq_b(&self) -> Result<u64> {
        Ok(self.lock().freq_b)
    }

    fn set_freq(&self, hz: u64) -> Result<()> {
        self.tune(hz);
        Ok(())
    }

    fn set_freq_a(&self, hz: u64) -> Result<()> {
        self.lock().freq_a = hz;
        Ok(())
    }

    fn set_freq_b(&self, hz: u64) -> Result<()> {
        self.lock().freq_b = hz;
        Ok(())
    }

    fn mode(&self) -> Result<ParamMask> {
        Ok(self.lock().mode)
    }

    fn set_mode(&self, mode: ParamMask) -> Result<()> {
        if !mode.intersects(ParamMask::MODES) {
            return Err(Error::Protocol(format!("{mode:?} is not a mode")));
        }
        self.lock().mode = mode;
        Ok(())
    }

    fn tx(&self) -> Result<ParamMask> {
        Ok(self.lock().tx)
    }

    fn set_tx(&self, tx: ParamMask) -> Result<()> {
        self.lock().tx = tx;
        Ok(())
    }

    fn rit(&self) -> Result<ParamMask> {
        Ok(self.lock().rit)
    }

    fn set_rit(&self, rit: ParamMask) -> Result<()> {
        self.lock().rit = rit;
        Ok(())
    }

    fn rit_offset(&self) -> Result<i32> {
        Ok(self.lock().rit_offset)
    }

    fn set_rit_offset(&self, hz: i32) -> Result<()> {
        self.lock().rit_offset = hz;
        Ok(())
    }
}
