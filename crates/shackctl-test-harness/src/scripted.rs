//! A scriptable in-memory [`DeviceDriver`].
//!
//! [`ScriptedDriver`] keeps a simulated device in memory and records every
//! call. Tests keep the [`ScriptHandle`] to steer it (slow it down, make it
//! hang, make it fail) and to inspect what happened after the driver has
//! been moved into a dispatcher.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use shackctl_core::capability::Capabilities;
use shackctl_core::driver::DeviceDriver;
use shackctl_core::error::{Error, Result};
use shackctl_core::profile::DeviceProfile;
use shackctl_core::types::{BackendKind, Mode, Vfo};

/// A failure the driver produces on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Timeout,
    LinkLost,
    Protocol,
}

impl Failure {
    fn to_error(self) -> Error {
        match self {
            Failure::Timeout => Error::Timeout,
            Failure::LinkLost => Error::ConnectionLost,
            Failure::Protocol => Error::Protocol("scripted failure".into()),
        }
    }
}

#[derive(Debug, Default)]
struct Sim {
    freq_a: u64,
    freq_b: u64,
    mode: Option<Mode>,
    vfo_b: bool,
    ptt: bool,
    power: f32,
    rit: i32,
    xit: i32,
    wpm: u8,
    azimuth: f64,
    elevation: f64,
}

#[derive(Debug, Default)]
struct Shared {
    sim: Sim,
    calls: Vec<String>,
    morse: Vec<String>,
    in_flight: usize,
    max_in_flight: usize,
    delay: Duration,
    hang: bool,
    failure: Option<Failure>,
    init_failures: u32,
    /// Added to every reported keyer speed.
    speed_skew: i16,
}

/// Control and inspection handle for a [`ScriptedDriver`].
#[derive(Debug, Clone, Default)]
pub struct ScriptHandle {
    shared: Arc<Mutex<Shared>>,
}

impl ScriptHandle {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Names of every call, in order (`"initialize"`, `"set frequency"`, ...).
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Number of calls whose name is `name`.
    pub fn count(&self, name: &str) -> usize {
        self.lock().calls.iter().filter(|c| c.as_str() == name).count()
    }

    /// Every text passed to `send_morse`, in order.
    pub fn morse(&self) -> Vec<String> {
        self.lock().morse.clone()
    }

    /// Highest number of calls observed running at once.
    pub fn max_concurrency(&self) -> usize {
        self.lock().max_in_flight
    }

    /// Make every operation take `delay`.
    pub fn set_delay(&self, delay: Duration) {
        self.lock().delay = delay;
    }

    /// Make every operation (not initialize/shutdown) block forever.
    pub fn set_hang(&self, hang: bool) {
        self.lock().hang = hang;
    }

    /// Make every operation fail, or clear the failure with `None`.
    pub fn set_failure(&self, failure: Option<Failure>) {
        self.lock().failure = failure;
    }

    /// Make the next `n` initialize calls fail.
    pub fn fail_initialize(&self, n: u32) {
        self.lock().init_failures = n;
    }

    /// Report keyer speed off by `skew` WPM from what was set.
    pub fn set_speed_skew(&self, skew: i16) {
        self.lock().speed_skew = skew;
    }

    /// Change the simulated VFO A frequency behind the façade's back.
    pub fn tune(&self, hz: u64) {
        self.lock().sim.freq_a = hz;
    }

    /// Another driver over the same simulated device, for reopen tests.
    pub fn driver(&self, backend: BackendKind, caps: Capabilities) -> ScriptedDriver {
        ScriptedDriver {
            backend,
            caps,
            handle: self.clone(),
        }
    }
}

/// Decrements the in-flight counter even if the call is abandoned.
struct InFlight {
    shared: Arc<Mutex<Shared>>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut s = self.shared.lock().unwrap_or_else(|p| p.into_inner());
        s.in_flight = s.in_flight.saturating_sub(1);
    }
}

/// In-memory device driver with scripted behaviour.
#[derive(Debug)]
pub struct ScriptedDriver {
    backend: BackendKind,
    caps: Capabilities,
    handle: ScriptHandle,
}

impl ScriptedDriver {
    /// A driver announcing `caps`, plus the handle that controls it.
    pub fn new(backend: BackendKind, caps: Capabilities) -> (Self, ScriptHandle) {
        let handle = ScriptHandle::default();
        {
            let mut s = handle.lock();
            s.sim.freq_a = 14_074_000;
            s.sim.freq_b = 7_074_000;
            s.sim.mode = Some(Mode::USB);
            s.sim.wpm = 25;
            s.sim.power = 100.0;
        }
        (
            Self {
                backend,
                caps,
                handle: handle.clone(),
            },
            handle,
        )
    }

    /// A rig with everything except keyer and rotator features.
    pub fn rig() -> (Self, ScriptHandle) {
        Self::new(
            BackendKind::GenericCat,
            Capabilities::FREQ
                | Capabilities::MODE
                | Capabilities::GET_VFO
                | Capabilities::PTT
                | Capabilities::POWER
                | Capabilities::RIT
                | Capabilities::XIT
                | Capabilities::KEYER_SPEED
                | Capabilities::SEND_MORSE
                | Capabilities::STOP_MORSE,
        )
    }

    /// Record the call and apply the scripted delay, hang and failure.
    async fn enter(&self, name: &str) -> Result<InFlight> {
        let (delay, hang, failure) = {
            let mut s = self.handle.lock();
            s.calls.push(name.to_string());
            s.in_flight += 1;
            s.max_in_flight = s.max_in_flight.max(s.in_flight);
            (s.delay, s.hang, s.failure)
        };
        let guard = InFlight {
            shared: self.handle.shared.clone(),
        };
        if hang {
            std::future::pending::<()>().await;
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match failure {
            Some(f) => Err(f.to_error()),
            None => Ok(guard),
        }
    }

    fn sim(&self) -> MutexGuard<'_, Shared> {
        self.handle.lock()
    }
}

#[async_trait]
impl DeviceDriver for ScriptedDriver {
    fn backend(&self) -> BackendKind {
        self.backend
    }

    async fn initialize(&mut self, _profile: &DeviceProfile) -> Result<Capabilities> {
        let mut s = self.sim();
        s.calls.push("initialize".into());
        if s.init_failures > 0 {
            s.init_failures -= 1;
            return Err(Error::Initialization("scripted initialize failure".into()));
        }
        Ok(self.caps)
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.sim().calls.push("shutdown".into());
        Ok(())
    }

    async fn resync(&mut self) -> Result<()> {
        self.sim().calls.push("resync".into());
        Ok(())
    }

    async fn set_frequency(&mut self, vfo: Vfo, hz: u64) -> Result<()> {
        let _g = self.enter("set frequency").await?;
        let mut s = self.sim();
        let b = match vfo {
            Vfo::A => false,
            Vfo::B => true,
            Vfo::Current => s.sim.vfo_b,
        };
        if b {
            s.sim.freq_b = hz;
        } else {
            s.sim.freq_a = hz;
        }
        Ok(())
    }

    async fn get_frequency(&mut self, vfo: Vfo) -> Result<u64> {
        let _g = self.enter("get frequency").await?;
        let s = self.sim();
        let b = match vfo {
            Vfo::A => false,
            Vfo::B => true,
            Vfo::Current => s.sim.vfo_b,
        };
        Ok(if b { s.sim.freq_b } else { s.sim.freq_a })
    }

    async fn set_mode(&mut self, mode: Mode) -> Result<()> {
        let _g = self.enter("set mode").await?;
        self.sim().sim.mode = Some(mode);
        Ok(())
    }

    async fn get_mode(&mut self) -> Result<Mode> {
        let _g = self.enter("get mode").await?;
        self.sim()
            .sim
            .mode
            .ok_or_else(|| Error::Protocol("mode unknown".into()))
    }

    async fn get_vfo(&mut self) -> Result<Vfo> {
        let _g = self.enter("get VFO").await?;
        Ok(if self.sim().sim.vfo_b { Vfo::B } else { Vfo::A })
    }

    async fn set_ptt(&mut self, on: bool) -> Result<()> {
        let _g = self.enter("set PTT").await?;
        self.sim().sim.ptt = on;
        Ok(())
    }

    async fn get_ptt(&mut self) -> Result<bool> {
        let _g = self.enter("get PTT").await?;
        Ok(self.sim().sim.ptt)
    }

    async fn set_power(&mut self, watts: f32) -> Result<()> {
        let _g = self.enter("set power").await?;
        self.sim().sim.power = watts;
        Ok(())
    }

    async fn get_power(&mut self) -> Result<f32> {
        let _g = self.enter("get power").await?;
        Ok(self.sim().sim.power)
    }

    async fn set_rit(&mut self, hz: i32) -> Result<()> {
        let _g = self.enter("set RIT").await?;
        self.sim().sim.rit = hz;
        Ok(())
    }

    async fn get_rit(&mut self) -> Result<i32> {
        let _g = self.enter("get RIT").await?;
        Ok(self.sim().sim.rit)
    }

    async fn set_xit(&mut self, hz: i32) -> Result<()> {
        let _g = self.enter("set XIT").await?;
        self.sim().sim.xit = hz;
        Ok(())
    }

    async fn get_xit(&mut self) -> Result<i32> {
        let _g = self.enter("get XIT").await?;
        Ok(self.sim().sim.xit)
    }

    async fn send_morse(&mut self, text: &str) -> Result<()> {
        let _g = self.enter("send morse").await?;
        self.sim().morse.push(text.to_string());
        Ok(())
    }

    async fn set_keyer_speed(&mut self, wpm: u8) -> Result<()> {
        let _g = self.enter("set keyer speed").await?;
        self.sim().sim.wpm = wpm;
        Ok(())
    }

    async fn get_keyer_speed(&mut self) -> Result<u8> {
        let _g = self.enter("get keyer speed").await?;
        let s = self.sim();
        let reported = i16::from(s.sim.wpm) + s.speed_skew;
        Ok(reported.clamp(0, i16::from(u8::MAX)) as u8)
    }

    async fn stop_sending(&mut self) -> Result<()> {
        let _g = self.enter("stop sending").await?;
        Ok(())
    }

    async fn set_position(&mut self, azimuth: f64, elevation: f64) -> Result<()> {
        let _g = self.enter("set position").await?;
        let mut s = self.sim();
        s.sim.azimuth = azimuth;
        s.sim.elevation = elevation;
        Ok(())
    }

    async fn get_position(&mut self) -> Result<(f64, f64)> {
        let _g = self.enter("get position").await?;
        let s = self.sim();
        Ok((s.sim.azimuth, s.sim.elevation))
    }
}
