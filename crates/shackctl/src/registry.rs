//! Exclusive ownership of profiles and physical links.
//!
//! A profile can be open once, and a serial port, socket peer or bridge
//! slot can belong to one open device at a time. Opening either twice
//! fails with [`Error::AlreadyOpen`]; the claim is released when the
//! device closes.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use shackctl_core::error::{Error, Result};
use shackctl_core::profile::DeviceProfile;

#[derive(Debug, Default)]
struct Open {
    profiles: BTreeSet<String>,
    /// Resource key to the profile holding it.
    resources: HashMap<String, String>,
}

/// Registry of open devices, shared by every façade of a station.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    open: Arc<Mutex<Open>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Open> {
        self.open.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim `profile` and its link for the caller.
    pub fn claim(&self, profile: &DeviceProfile) -> Result<Claim> {
        let mut open = self.lock();
        if open.profiles.contains(&profile.name) {
            return Err(Error::AlreadyOpen(profile.name.clone()));
        }
        let resource = profile.resource_key();
        if let Some(key) = &resource
            && let Some(holder) = open.resources.get(key)
        {
            return Err(Error::AlreadyOpen(format!("{key} (held by {holder})")));
        }

        open.profiles.insert(profile.name.clone());
        if let Some(key) = &resource {
            open.resources.insert(key.clone(), profile.name.clone());
        }
        Ok(Claim {
            registry: self.clone(),
            name: profile.name.clone(),
            resource,
        })
    }

    pub fn is_open(&self, name: &str) -> bool {
        self.lock().profiles.contains(name)
    }

    /// Names of all open profiles, sorted.
    pub fn open_profiles(&self) -> Vec<String> {
        self.lock().profiles.iter().cloned().collect()
    }
}

/// Proof of ownership; dropping it releases the profile and its link.
#[derive(Debug)]
pub struct Claim {
    registry: Registry,
    name: String,
    resource: Option<String>,
}

impl Drop for Claim {
    fn drop(&mut self) {
        let mut open = self.registry.lock();
        open.profiles.remove(&self.name);
        if let Some(key) = &self.resource {
            open.resources.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shackctl_core::error::ErrorKind;
    use shackctl_core::profile::LinkSettings;
    use shackctl_core::types::BackendKind;

    fn serial(name: &str, port: &str) -> DeviceProfile {
        DeviceProfile::new(
            name,
            BackendKind::GenericCat,
            LinkSettings::Serial {
                port: port.into(),
                serial: Default::default(),
            },
        )
    }

    #[test]
    fn profile_and_port_are_exclusive() {
        let registry = Registry::new();
        let claim = registry.claim(&serial("ts590", "/dev/ttyUSB0")).unwrap();

        let err = registry.claim(&serial("ts590", "/dev/ttyUSB1")).unwrap_err();
        assert!(matches!(err, Error::AlreadyOpen(_)));
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let err = registry.claim(&serial("other", "/dev/ttyUSB0")).unwrap_err();
        assert!(err.to_string().contains("held by ts590"), "{err}");

        drop(claim);
        assert!(!registry.is_open("ts590"));
        registry.claim(&serial("other", "/dev/ttyUSB0")).unwrap();
    }

    #[test]
    fn only_com_port_names_ignore_case() {
        let registry = Registry::new();
        let _upper = registry.claim(&serial("rig", "/dev/ttyUSB0")).unwrap();
        let _lower = registry.claim(&serial("keyer", "/dev/ttyusb0")).unwrap();

        let _com = registry.claim(&serial("k3", "COM3")).unwrap();
        let err = registry.claim(&serial("winkey", "com3")).unwrap_err();
        assert!(matches!(err, Error::AlreadyOpen(_)), "{err}");
        registry.claim(&serial("winkey", "COM31")).unwrap();
    }

    #[test]
    fn linkless_profiles_only_claim_their_name() {
        let registry = Registry::new();
        let a = DeviceProfile::new("dummy a", BackendKind::DummyKeyer, LinkSettings::None);
        let b = DeviceProfile::new("dummy b", BackendKind::DummyKeyer, LinkSettings::None);
        let _a = registry.claim(&a).unwrap();
        let _b = registry.claim(&b).unwrap();
        assert_eq!(registry.open_profiles(), ["dummy a", "dummy b"]);
    }
}
