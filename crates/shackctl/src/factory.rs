//! Driver construction keyed by backend kind.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::broadcast;

use shackctl_core::driver::DeviceDriver;
use shackctl_core::error::{Error, Result};
use shackctl_core::events::DeviceEvent;
use shackctl_core::profile::DeviceProfile;
use shackctl_core::types::BackendKind;
use shackctl_dispatch::Commander;

#[cfg(feature = "omnirig")]
use shackctl_omnirig::{Bridge, BridgeVersion};

/// Builds a driver for a profile, replacing the built-in one for a backend.
pub type Constructor = Arc<dyn Fn(&DeviceProfile) -> Box<dyn DeviceDriver> + Send + Sync>;

/// What a driver may need besides its profile.
pub struct BuildContext<'a> {
    /// Sender for events the driver publishes itself (echo, rig status).
    pub events: &'a broadcast::Sender<DeviceEvent>,
    /// The open rig, for keyers that key through it.
    pub rig: Option<&'a Commander>,
}

/// Turns a profile into an uninitialized driver.
#[derive(Clone, Default)]
pub struct DriverFactory {
    #[cfg(feature = "omnirig")]
    bridges: HashMap<BridgeVersion, Arc<dyn Bridge>>,
    custom: HashMap<BackendKind, Constructor>,
}

impl fmt::Debug for DriverFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut custom: Vec<_> = self.custom.keys().map(|b| b.to_string()).collect();
        custom.sort();
        f.debug_struct("DriverFactory")
            .field("custom", &custom)
            .finish_non_exhaustive()
    }
}

impl DriverFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make an automation bridge available to profiles of its version.
    #[cfg(feature = "omnirig")]
    pub fn with_bridge(mut self, version: BridgeVersion, bridge: Arc<dyn Bridge>) -> Self {
        self.bridges.insert(version, bridge);
        self
    }

    /// Build drivers for `backend` with `constructor` instead.
    pub fn register(mut self, backend: BackendKind, constructor: Constructor) -> Self {
        self.custom.insert(backend, constructor);
        self
    }

    /// Build the driver `profile` selects. Nothing is opened yet.
    pub fn build(
        &self,
        profile: &DeviceProfile,
        ctx: BuildContext<'_>,
    ) -> Result<Box<dyn DeviceDriver>> {
        if let Some(constructor) = self.custom.get(&profile.backend) {
            return Ok(constructor(profile));
        }

        match profile.backend {
            #[cfg(feature = "cat")]
            BackendKind::GenericCat => Ok(Box::new(shackctl_cat::GenericCatDriver::new())),

            #[cfg(feature = "omnirig")]
            BackendKind::VendorBridgeV1 | BackendKind::VendorBridgeV2 => {
                let version = BridgeVersion::for_backend(profile.backend).ok_or_else(|| {
                    Error::Internal(format!("{} is not a bridge backend", profile.backend))
                })?;
                let bridge = self.bridges.get(&version).ok_or_else(|| {
                    Error::Initialization(format!("{version} is not available on this station"))
                })?;
                Ok(Box::new(shackctl_omnirig::OmniRigDriver::new(
                    bridge.clone(),
                    version,
                    ctx.events.clone(),
                )))
            }

            #[cfg(feature = "tci")]
            BackendKind::NetworkText => Ok(Box::new(shackctl_tci::TciDriver::new())),

            #[cfg(feature = "keyer")]
            BackendKind::KeyerHardware => Ok(Box::new(shackctl_keyer::WinKeyDriver::new(
                ctx.events.clone(),
            ))),
            #[cfg(feature = "keyer")]
            BackendKind::KeyerDaemon => Ok(Box::new(shackctl_keyer::CwDaemonDriver::new())),
            #[cfg(feature = "keyer")]
            BackendKind::DigitalModesRpc => Ok(Box::new(shackctl_keyer::FldigiDriver::new())),
            #[cfg(feature = "keyer")]
            BackendKind::MorseOverCat => {
                let rig = ctx.rig.ok_or_else(|| {
                    Error::Configuration(format!(
                        "{}: morse over CAT needs an open rig",
                        profile.name
                    ))
                })?;
                Ok(Box::new(shackctl_keyer::MorseOverCatDriver::new(rig.clone())))
            }
            #[cfg(feature = "keyer")]
            BackendKind::DummyKeyer => Ok(Box::new(shackctl_keyer::DummyKeyer::new(
                ctx.events.clone(),
            ))),

            #[cfg(feature = "rotator")]
            BackendKind::RotatorUdp => Ok(Box::new(shackctl_rotator::PstRotatorDriver::new())),

            #[allow(unreachable_patterns)]
            other => Err(Error::Configuration(format!(
                "{other} support is not compiled into this build"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shackctl_core::capability::Capabilities;
    use shackctl_core::events::EVENT_CHANNEL_CAPACITY;
    use shackctl_core::profile::LinkSettings;
    use shackctl_test_harness::ScriptedDriver;

    fn ctx(events: &broadcast::Sender<DeviceEvent>) -> BuildContext<'_> {
        BuildContext { events, rig: None }
    }

    #[test]
    fn builds_the_selected_backend() {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let factory = DriverFactory::new();
        for backend in [
            BackendKind::GenericCat,
            BackendKind::NetworkText,
            BackendKind::KeyerHardware,
            BackendKind::KeyerDaemon,
            BackendKind::DigitalModesRpc,
            BackendKind::DummyKeyer,
            BackendKind::RotatorUdp,
        ] {
            let profile = DeviceProfile::new("p", backend, LinkSettings::None);
            let driver = factory.build(&profile, ctx(&tx)).unwrap();
            assert_eq!(driver.backend(), backend);
        }
    }

    #[test]
    fn missing_bridge_and_rig_are_reported() {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let factory = DriverFactory::new();

        let bridge = DeviceProfile::new("b", BackendKind::VendorBridgeV2, LinkSettings::Bridge { slot: 1 });
        let err = factory.build(&bridge, ctx(&tx)).err().unwrap();
        assert!(matches!(err, Error::Initialization(_)), "{err}");

        let cat_keyer = DeviceProfile::new("k", BackendKind::MorseOverCat, LinkSettings::None);
        let err = factory.build(&cat_keyer, ctx(&tx)).err().unwrap();
        assert!(matches!(err, Error::Configuration(_)), "{err}");
    }

    #[test]
    fn registered_constructor_wins() {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (_, handle) = ScriptedDriver::rig();
        let factory = DriverFactory::new().register(
            BackendKind::GenericCat,
            Arc::new(move |_| Box::new(handle.driver(BackendKind::GenericCat, Capabilities::FREQ))),
        );
        let profile = DeviceProfile::new("p", BackendKind::GenericCat, LinkSettings::None);
        assert!(factory.build(&profile, ctx(&tx)).is_ok());
    }
}
