//! Device profiles and the read-only profile store contract.
//!
//! A [`DeviceProfile`] is created by an external settings surface and only
//! read here. Profiles are cloned out of the store, so a device that is open
//! keeps the exact profile it was opened with even if the store changes.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capability::Capabilities;
use crate::error::{Error, Result};
use crate::types::{
    BackendKind, DeviceKind, KeyerMode, PttShare, PttType, SerialSettings, TxRange,
};

/// Lowest keyer speed accepted anywhere.
pub const MIN_WPM: u8 = 5;
/// Highest keyer speed accepted anywhere.
pub const MAX_WPM: u8 = 99;

/// How the device is reached.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LinkSettings {
    /// No link of its own (dummy keyer, keyer riding on the rig's CAT).
    #[default]
    None,
    /// Serial port.
    Serial {
        port: String,
        #[serde(default)]
        serial: SerialSettings,
    },
    /// TCP peer, or HTTP endpoint for RPC backends.
    Network { host: String, port: u16 },
    /// UDP peer with an optional local endpoint to bind.
    Udp {
        host: String,
        port: u16,
        /// Local address or host name to bind; any IPv4 address if absent.
        #[serde(default)]
        local_address: Option<String>,
        /// Local port to bind; ephemeral if absent.
        #[serde(default)]
        local_port: Option<u16>,
    },
    /// A rig slot inside an automation bridge (1-based).
    Bridge { slot: u8 },
}

impl LinkSettings {
    /// Short description of the physical resource, used for exclusive
    /// ownership checks. `None` when nothing physical is claimed.
    pub fn resource_key(&self, backend: BackendKind) -> Option<String> {
        match self {
            LinkSettings::None => None,
            LinkSettings::Serial { port, .. } => Some(format!("serial:{}", port_identity(port))),
            LinkSettings::Network { host, port } => Some(format!("tcp:{host}:{port}")),
            LinkSettings::Udp { host, port, .. } => Some(format!("udp:{host}:{port}")),
            LinkSettings::Bridge { slot } => Some(format!("{backend}:slot{slot}")),
        }
    }
}

/// Windows `COMn` names are case-insensitive; device paths are not.
fn port_identity(port: &str) -> String {
    let is_com = match (port.get(..3), port.get(3..)) {
        (Some(prefix), Some(number)) => {
            prefix.eq_ignore_ascii_case("com")
                && !number.is_empty()
                && number.bytes().all(|b| b.is_ascii_digit())
        }
        _ => false,
    };
    if is_com {
        port.to_ascii_uppercase()
    } else {
        port.to_string()
    }
}

/// Which readings the operator allows a backend to report.
///
/// All enabled by default; the runtime capability set is the backend's own
/// set intersected with these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityHints {
    pub freq: bool,
    pub mode: bool,
    pub vfo: bool,
    pub ptt: bool,
    pub power: bool,
    pub rit: bool,
    pub xit: bool,
    pub keyer_speed: bool,
    pub morse: bool,
}

impl Default for CapabilityHints {
    fn default() -> Self {
        Self {
            freq: true,
            mode: true,
            vfo: true,
            ptt: true,
            power: true,
            rit: true,
            xit: true,
            keyer_speed: true,
            morse: true,
        }
    }
}

impl CapabilityHints {
    /// The mask of capabilities these hints permit.
    pub fn mask(&self) -> Capabilities {
        let mut caps = Capabilities::all();
        caps.set(Capabilities::FREQ, self.freq);
        caps.set(Capabilities::MODE, self.mode);
        caps.set(Capabilities::GET_VFO, self.vfo);
        caps.set(Capabilities::PTT, self.ptt);
        caps.set(Capabilities::POWER, self.power);
        caps.set(Capabilities::RIT, self.rit);
        caps.set(Capabilities::XIT, self.xit);
        caps.set(Capabilities::KEYER_SPEED, self.keyer_speed);
        caps.set(Capabilities::SEND_MORSE | Capabilities::STOP_MORSE, self.morse);
        caps
    }
}

/// Keyer behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyerSettings {
    pub mode: KeyerMode,
    pub swap_paddles: bool,
    /// Speed applied at initialize.
    pub default_wpm: u8,
    /// Mirror keyer speed changes to the rig's own keyer.
    pub speed_sync: bool,
}

impl Default for KeyerSettings {
    fn default() -> Self {
        Self {
            mode: KeyerMode::IambicB,
            swap_paddles: false,
            default_wpm: 25,
            speed_sync: false,
        }
    }
}

/// Immutable configuration of one device instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceProfile {
    /// Logical name, unique within a store.
    pub name: String,
    pub backend: BackendKind,
    #[serde(default)]
    pub link: LinkSettings,
    /// Backend-specific model or dialect (e.g. `"kenwood"`, `"yaesu"`).
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    /// Consecutive failed poll ticks before the device is marked failed.
    #[serde(default = "default_poll_failure_threshold")]
    pub poll_failure_threshold: u32,
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    /// Attempts at initialize before open gives up. 1 means no retry.
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    #[serde(default = "default_connect_backoff_ms")]
    pub connect_backoff_ms: u64,
    #[serde(default)]
    pub ptt_type: PttType,
    #[serde(default)]
    pub ptt_share: PttShare,
    #[serde(default)]
    pub tx_range: Option<TxRange>,
    #[serde(default)]
    pub hints: CapabilityHints,
    #[serde(default)]
    pub keyer: KeyerSettings,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_poll_timeout_ms() -> u64 {
    500
}

fn default_poll_failure_threshold() -> u32 {
    3
}

fn default_command_timeout_ms() -> u64 {
    1000
}

fn default_connect_attempts() -> u32 {
    1
}

fn default_connect_backoff_ms() -> u64 {
    500
}

impl DeviceProfile {
    /// A profile with every tunable at its default.
    pub fn new(name: impl Into<String>, backend: BackendKind, link: LinkSettings) -> Self {
        Self {
            name: name.into(),
            backend,
            link,
            model: None,
            poll_interval_ms: default_poll_interval_ms(),
            poll_timeout_ms: default_poll_timeout_ms(),
            poll_failure_threshold: default_poll_failure_threshold(),
            command_timeout_ms: default_command_timeout_ms(),
            connect_attempts: default_connect_attempts(),
            connect_backoff_ms: default_connect_backoff_ms(),
            ptt_type: PttType::default(),
            ptt_share: PttShare::default(),
            tx_range: None,
            hints: CapabilityHints::default(),
            keyer: KeyerSettings::default(),
        }
    }

    /// The device family this profile configures.
    pub fn device_kind(&self) -> DeviceKind {
        self.backend.device_kind()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn connect_backoff(&self) -> Duration {
        Duration::from_millis(self.connect_backoff_ms)
    }

    /// Exclusive-ownership key of the physical link, if any.
    pub fn resource_key(&self) -> Option<String> {
        self.link.resource_key(self.backend)
    }

    /// Check the profile for values no backend could accept.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Configuration("profile name is empty".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::Configuration("poll interval must be > 0 ms".into()));
        }
        if self.poll_failure_threshold == 0 {
            return Err(Error::Configuration(
                "poll failure threshold must be at least 1".into(),
            ));
        }
        if self.command_timeout_ms == 0 {
            return Err(Error::Configuration("command timeout must be > 0 ms".into()));
        }
        if self.connect_attempts == 0 {
            return Err(Error::Configuration("connect attempts must be at least 1".into()));
        }
        if let Some(range) = self.tx_range
            && range.low_hz >= range.high_hz
        {
            return Err(Error::Configuration(format!("empty TX range {range}")));
        }
        if !(MIN_WPM..=MAX_WPM).contains(&self.keyer.default_wpm) {
            return Err(Error::Configuration(format!(
                "keyer speed {} outside {MIN_WPM}-{MAX_WPM} WPM",
                self.keyer.default_wpm
            )));
        }
        if let LinkSettings::Serial { serial, .. } = &self.link {
            serial.validate().map_err(Error::Configuration)?;
        }
        Ok(())
    }
}

/// Read-only source of device profiles.
pub trait ProfileStore: Send + Sync {
    /// Fetch a copy of the profile called `name`.
    fn profile(&self, name: &str) -> Result<DeviceProfile>;

    /// Names of all profiles in the store.
    fn names(&self) -> Vec<String>;
}

/// In-memory [`ProfileStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryProfileStore {
    profiles: BTreeMap<String, DeviceProfile>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a profile, keyed by its name.
    pub fn insert(&mut self, profile: DeviceProfile) {
        self.profiles.insert(profile.name.clone(), profile);
    }
}

impl FromIterator<DeviceProfile> for MemoryProfileStore {
    fn from_iter<I: IntoIterator<Item = DeviceProfile>>(iter: I) -> Self {
        let mut store = MemoryProfileStore::new();
        for profile in iter {
            store.insert(profile);
        }
        store
    }
}

impl ProfileStore for MemoryProfileStore {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn serial_profile() -> DeviceProfile {
        DeviceProfile::new(
            "ts590",
            BackendKind::GenericCat,
            LinkSettings::Serial {
                port: "/dev/ttyUSB0".into(),
                serial: SerialSettings::default(),
            },
        )
    }

    #[test]
    fn defaults_resolve_open_questions() {
        let p = serial_profile();
        assert_eq!(p.poll_failure_threshold, 3);
        assert_eq!(p.connect_attempts, 1);
        assert_eq!(p.command_timeout(), Duration::from_secs(1));
        assert!(p.validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut p = serial_profile();
        p.poll_interval_ms = 0;
        assert_eq!(p.validate().unwrap_err().kind(), ErrorKind::Configuration);

        let mut p = serial_profile();
        p.tx_range = Some(TxRange::new(14_350_000, 14_000_000));
        assert!(p.validate().is_err());

        let mut p = serial_profile();
        p.keyer.default_wpm = 3;
        assert!(p.validate().is_err());

        let mut p = serial_profile();
        if let LinkSettings::Serial { serial, .. } = &mut p.link {
            serial.baud_rate = 300;
        }
        assert!(p.validate().is_err());
    }

    #[test]
    fn resource_keys() {
        assert_eq!(
            serial_profile().resource_key().as_deref(),
            Some("serial:/dev/ttyUSB0")
        );
        let com = LinkSettings::Serial {
            port: "com4".into(),
            serial: Default::default(),
        };
        assert_eq!(
            com.resource_key(BackendKind::GenericCat).as_deref(),
            Some("serial:COM4")
        );
        let bridge = DeviceProfile::new(
            "omni3",
            BackendKind::VendorBridgeV2,
            LinkSettings::Bridge { slot: 3 },
        );
        assert_eq!(
            bridge.resource_key().as_deref(),
            Some("vendor bridge v2:slot3")
        );
        let dummy = DeviceProfile::new("dummy", BackendKind::DummyKeyer, LinkSettings::None);
        assert_eq!(dummy.resource_key(), None);
    }

    #[test]
    fn hints_mask_removes_disabled() {
        let hints = CapabilityHints {
            ptt: false,
            morse: false,
            ..CapabilityHints::default()
        };
        let mask = hints.mask();
        assert!(!mask.contains(Capabilities::GET_PTT));
        assert!(!mask.contains(Capabilities::SEND_MORSE));
        assert!(mask.contains(Capabilities::FREQ));
        assert!(mask.contains(Capabilities::POSITION));
    }

    #[test]
    fn memory_store_lookup() {
        let store: MemoryProfileStore = [serial_profile()].into_iter().collect();
        assert_eq!(store.names(), vec!["ts590".to_string()]);
        assert_eq!(store.profile("ts590").unwrap().backend, BackendKind::GenericCat);
        assert_eq!(
            store.profile("missing").unwrap_err().kind(),
            ErrorKind::Configuration
        );
    }
}
