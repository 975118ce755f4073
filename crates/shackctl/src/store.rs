//! Profiles read from a TOML file.
//!
//! ```toml
//! [[profile]]
//! name = "k3"
//! backend = "generic_cat"
//! model = "kenwood"
//! link = { type = "serial", port = "/dev/ttyUSB0", serial = { baud_rate = 38400 } }
//! tx_range = { low_hz = 14000000, high_hz = 14350000 }
//!
//! [[profile]]
//! name = "winkey"
//! backend = "keyer_hardware"
//! link = { type = "serial", port = "/dev/ttyUSB1" }
//! keyer = { mode = "iambic_a", speed_sync = true }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use shackctl_core::error::{Error, Result};
use shackctl_core::profile::{DeviceProfile, ProfileStore};

#[derive(Deserialize)]
struct ProfileFile {
    #[serde(default, rename = "profile")]
    profiles: Vec<DeviceProfile>,
}

/// A read-only [`ProfileStore`] loaded from TOML.
///
/// Every profile is validated at load time, so a bad file fails up front
/// rather than at open.
#[derive(Debug, Clone, Default)]
pub struct TomlProfileStore {
    profiles: BTreeMap<String, DeviceProfile>,
}

impl TomlProfileStore {
    pub fn parse(text: &str) -> Result<Self> {
        let file: ProfileFile =
            toml::from_str(text).map_err(|e| Error::Configuration(e.to_string()))?;
        let mut profiles = BTreeMap::new();
        for profile in file.profiles {
            profile.validate()?;
            let name = profile.name.clone();
            if profiles.insert(name.clone(), profile).is_some() {
                return Err(Error::Configuration(format!(
                    "profile {name:?} is defined twice"
                )));
            }
        }
        Ok(Self { profiles })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let store = Self::parse(&text)
            .map_err(|e| Error::Configuration(format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), profiles = store.profiles.len(), "profiles loaded");
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

impl ProfileStore for TomlProfileStore {
    fn profile(&self, name: &str) -> Result<DeviceProfile> {
        self.profiles
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Configuration(format!("no profile named {name:?}")))
    }

    fn names(&self) -> Vec<String> {
        self.profiles.keys().cloned().collect()
    }
}
