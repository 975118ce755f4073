use std::fmt;
use std::sync::Arc;

use shackctl_core::error::{Error, Result};
use shackctl_core::profile::{DeviceProfile, ProfileStore};

use crate::factory::DriverFactory;
use crate::keyer::CwKeyer;
use crate::registry::Registry;
use crate::rig::Rig;
use crate::rotator::Rotator;

/// What the façades of one station share: the driver factory, the registry
/// of open devices and, optionally, a profile store.
///
/// Cheap to clone; clones share the registry.
#[derive(Clone)]
pub struct Station {
    factory: Arc<DriverFactory>,
    registry: Registry,
    store: Option<Arc<dyn ProfileStore>>,
}

impl fmt::Debug for Station {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Station")
            .field("factory", &self.factory)
            .field("open", &self.registry.open_profiles())
            .field("profiles", &self.profile_names())
            .finish()
    }
}

impl Default for Station {
    fn default() -> Self {
        Self::new(DriverFactory::new())
    }
}

impl Station {
    pub fn new(factory: DriverFactory) -> Self {
        Self {
            factory: Arc::new(factory),
            registry: Registry::new(),
            store: None,
        }
    }

    /// Look profiles up by name in `store`.
    pub fn with_store(mut self, store: Arc<dyn ProfileStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn factory(&self) -> &DriverFactory {
        &self.factory
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Copy of the profile called `name`.
    pub fn profile(&self, name: &str) -> Result<DeviceProfile> {
        match &self.store {
            Some(store) => store.profile(name),
            None => Err(Error::Configuration(format!(
                "no profile store to look up {name:?} in"
            ))),
        }
    }

    /// Names of every profile in the store.
    pub fn profile_names(&self) -> Vec<String> {
        self.store.as_ref().map(|s| s.names()).unwrap_or_default()
    }

    pub fn rig(&self) -> Rig {
        Rig::new(self.clone())
    }

    pub fn rotator(&self) -> Rotator {
        Rotator::new(self.clone())
    }

    pub fn keyer(&self) -> CwKeyer {
        CwKeyer::new(self.clone())
    }
}
