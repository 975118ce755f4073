//! # shackctl -- Rig, Rotator and CW Keyer Control
//!
//! `shackctl` gives station logging software one asynchronous API over the
//! devices in a radio shack: transceivers, antenna rotators and CW keyers.
//! Each device is described by a [`DeviceProfile`] and opened through a
//! façade that owns its lifecycle, command queue and status polling.
//!
//! ## Quick Start
//!
//! ```no_run
//! use shackctl::{Station, Vfo};
//! use shackctl::store::TomlProfileStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = TomlProfileStore::load("station.toml")?;
//!     let station = Station::default().with_store(Arc::new(store));
//!
//!     let mut rig = station.rig();
//!     rig.open_named("k3").await?;
//!     println!("VFO-A: {} Hz", rig.get_frequency(Vfo::A).await?);
//!     rig.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! | Crate                 | Purpose                                          |
//! |-----------------------|--------------------------------------------------|
//! | `shackctl-core`       | Driver trait, capabilities, state, errors        |
//! | `shackctl-transport`  | Serial, TCP, UDP and XML-RPC links               |
//! | `shackctl-dispatch`   | FIFO command dispatcher and status poller        |
//! | `shackctl-cat`        | Generic serial CAT (Kenwood/Yaesu dialects)      |
//! | `shackctl-omnirig`    | Automation bridge rig slots                      |
//! | `shackctl-tci`        | `cmd:args;` network transceiver protocol         |
//! | `shackctl-keyer`      | WinKey, cwdaemon, fldigi, morse over CAT, dummy  |
//! | `shackctl-rotator`    | UDP rotator controller                           |
//! | **`shackctl`**        | This façade crate                                |
//!
//! Every command a façade issues goes through one dispatcher per device:
//! commands run one at a time in submission order, each under a deadline.
//! The poller reads state on a timer through the same queue and marks the
//! device [`Failed`](ConnectionState::Failed) after repeated misses.
//!
//! ## Feature Flags
//!
//! | Feature   | Enables                                   | Default |
//! |-----------|-------------------------------------------|---------|
//! | `cat`     | [`cat`] module, generic CAT rigs          | yes     |
//! | `omnirig` | [`omnirig`] module, bridge rig slots      | yes     |
//! | `tci`     | [`tci`] module, network text transceivers | yes     |
//! | `keyer`   | [`keyer_drivers`] module, all keyers      | yes     |
//! | `rotator` | [`rotator_drivers`] module                | yes     |
//! | `full`    | All backends                              | no      |
//!
//! A profile naming a backend that is not compiled in fails to open with a
//! configuration error.
//!
//! ## Events
//!
//! Each façade has its own broadcast channel. Subscribers keep receiving
//! across close and reopen:
//!
//! ```no_run
//! use shackctl::{DeviceEvent, Rig};
//! # async fn example(rig: &Rig) {
//! let mut events = rig.subscribe();
//! while let Ok(event) = events.recv().await {
//!     match event {
//!         DeviceEvent::FrequencyChanged { vfo, hz, .. } => println!("{vfo}: {hz} Hz"),
//!         DeviceEvent::ConnectionChanged(state) => println!("link {state}"),
//!         other => println!("{other:?}"),
//!     }
//! }
//! # }
//! ```

mod device;
pub mod factory;
pub mod input;
pub mod keyer;
pub mod registry;
pub mod rig;
pub mod rotator;
pub mod station;
pub mod store;

pub use shackctl_core::*;

pub use factory::{BuildContext, Constructor, DriverFactory};
pub use input::{CwInputBuffer, SendMode};
pub use keyer::{CwKeyer, SpeedSync};
pub use registry::{Claim, Registry};
pub use rig::Rig;
pub use rotator::{Rotator, long_path, normalize_azimuth};
pub use station::Station;
pub use store::TomlProfileStore;

/// Generic serial CAT backend.
///
/// Provides [`GenericCatDriver`](cat::GenericCatDriver) and the Kenwood and
/// Yaesu command dialects it speaks.
#[cfg(feature = "cat")]
pub mod cat {
    pub use shackctl_cat::*;
}

/// Automation bridge backend.
///
/// Provides [`OmniRigDriver`](omnirig::OmniRigDriver) over one slot of a
/// [`Bridge`](omnirig::Bridge), plus an in-process
/// [`SimulatedBridge`](omnirig::SimulatedBridge) for tests and demos.
#[cfg(feature = "omnirig")]
pub mod omnirig {
    pub use shackctl_omnirig::*;
}

/// Network text transceiver backend.
///
/// Provides [`TciDriver`](tci::TciDriver), which keeps a persistent TCP
/// session and tracks the transceiver's pushed state.
#[cfg(feature = "tci")]
pub mod tci {
    pub use shackctl_tci::*;
}

/// CW keyer backends: WinKey, cwdaemon, fldigi, morse over CAT and the
/// dummy keyer.
#[cfg(feature = "keyer")]
pub mod keyer_drivers {
    pub use shackctl_keyer::*;
}

/// UDP rotator controller backend.
#[cfg(feature = "rotator")]
pub mod rotator_drivers {
    pub use shackctl_rotator::*;
}

/// Backends compiled into this build, in declaration order.
///
/// # Example
///
/// ```
/// for backend in shackctl::supported_backends() {
///     println!("{backend} ({})", backend.device_kind());
/// }
/// ```
pub fn supported_backends() -> Vec<BackendKind> {
    let mut backends = Vec::new();

    #[cfg(feature = "cat")]
    backends.push(BackendKind::GenericCat);

    #[cfg(feature = "omnirig")]
    backends.extend([BackendKind::VendorBridgeV1, BackendKind::VendorBridgeV2]);

    #[cfg(feature = "tci")]
    backends.push(BackendKind::NetworkText);

    #[cfg(feature = "keyer")]
    backends.extend([
        BackendKind::KeyerHardware,
        BackendKind::KeyerDaemon,
        BackendKind::DigitalModesRpc,
        BackendKind::MorseOverCat,
    ]);

    #[cfg(feature = "rotator")]
    backends.push(BackendKind::RotatorUdp);

    #[cfg(feature = "keyer")]
    backends.push(BackendKind::DummyKeyer);

    backends
}
