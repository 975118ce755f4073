//! The open/close lifecycle shared by every façade.
//!
//! A [`DeviceSlot`] belongs to one façade and holds at most one open
//! [`Device`]: the claimed profile, the dispatcher that owns the driver and
//! the poller. The slot's event channel and connection state outlive
//! individual opens, so subscribers keep receiving across a reopen.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use shackctl_core::capability::Capabilities;
use shackctl_core::command::{Operation, Reply};
use shackctl_core::driver::DeviceDriver;
use shackctl_core::error::{Error, ErrorKind, Result};
use shackctl_core::events::{DeviceEvent, EVENT_CHANNEL_CAPACITY};
use shackctl_core::profile::DeviceProfile;
use shackctl_core::state::{ConnectionState, DeviceState};
use shackctl_core::types::DeviceKind;
use shackctl_dispatch::{Commander, DispatchConfig, Dispatcher, PollConfig, Poller, poll_queries};

use crate::factory::BuildContext;
use crate::registry::Claim;
use crate::station::Station;

/// One open device.
struct Device {
    profile: DeviceProfile,
    caps: Capabilities,
    commander: Commander,
    dispatcher: Dispatcher,
    poller: Option<Poller>,
    claim: Claim,
}

/// Lifecycle and command path of one façade.
pub(crate) struct DeviceSlot {
    station: Station,
    kind: DeviceKind,
    events: broadcast::Sender<DeviceEvent>,
    connection: Arc<watch::Sender<ConnectionState>>,
    device: Mutex<Option<Device>>,
}

impl DeviceSlot {
    pub(crate) fn new(station: Station, kind: DeviceKind) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (connection, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            station,
            kind,
            events,
            connection: Arc::new(connection),
            device: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Device>> {
        self.device.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn station(&self) -> &Station {
        &self.station
    }

    pub(crate) fn events(&self) -> &broadcast::Sender<DeviceEvent> {
        &self.events
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    pub(crate) fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    pub(crate) fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe()
    }

    fn set_connection(&self, state: ConnectionState) {
        let previous = self.connection.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "connection state changed");
            let _ = self.events.send(DeviceEvent::ConnectionChanged(state));
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.lock().is_some()
    }

    pub(crate) fn profile(&self) -> Option<DeviceProfile> {
        self.lock().as_ref().map(|d| d.profile.clone())
    }

    /// Runtime capabilities; empty while closed.
    pub(crate) fn capabilities(&self) -> Capabilities {
        self.lock()
            .as_ref()
            .map(|d| d.caps)
            .unwrap_or_else(Capabilities::empty)
    }

    pub(crate) fn state(&self) -> DeviceState {
        self.lock()
            .as_ref()
            .map(|d| d.dispatcher.state())
            .unwrap_or_default()
    }

    pub(crate) fn watch_state(&self) -> Option<watch::Receiver<DeviceState>> {
        self.lock().as_ref().map(|d| d.dispatcher.watch_state())
    }

    /// Commander of the open device, for devices that ride on this one.
    pub(crate) fn commander(&self) -> Option<Commander> {
        self.lock().as_ref().map(|d| d.commander.clone())
    }

    /// Open `profile`, closing whatever this slot had open first.
    pub(crate) async fn open(
        &mut self,
        profile: DeviceProfile,
        rig: Option<&Commander>,
    ) -> Result<()> {
        profile.validate()?;
        if profile.device_kind() != self.kind {
            return Err(Error::Configuration(format!(
                "profile {:?} configures a {}, not a {}",
                profile.name,
                profile.device_kind(),
                self.kind
            )));
        }
        self.close().await;

        let claim = self.station.registry().claim(&profile)?;
        self.set_connection(ConnectionState::Connecting);

        let (driver, driver_caps) = match self.initialize(&profile, rig).await {
            Ok(ready) => ready,
            Err(e) => {
                error!(profile = %profile.name, backend = %profile.backend, error = %e, "open failed");
                self.set_connection(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        let caps = driver_caps & profile.hints.mask();
        let dispatcher = Dispatcher::spawn(
            driver,
            caps,
            DispatchConfig {
                command_timeout: profile.command_timeout(),
                device: profile.name.clone(),
            },
            self.events.clone(),
        );
        let commander = dispatcher.commander();

        let queries = poll_queries(self.kind, caps);
        let poller = (!queries.is_empty()).then(|| {
            Poller::spawn(
                PollConfig {
                    interval: profile.poll_interval(),
                    timeout: profile.poll_timeout(),
                    failure_threshold: profile.poll_failure_threshold,
                    device: profile.name.clone(),
                },
                queries,
                commander.clone(),
                self.events.clone(),
                self.connection.clone(),
                dispatcher.cancel_token().child_token(),
            )
        });

        info!(
            profile = %profile.name,
            backend = %profile.backend,
            capabilities = %caps,
            "device open"
        );
        *self.lock() = Some(Device {
            profile,
            caps,
            commander,
            dispatcher,
            poller,
            claim,
        });
        self.set_connection(ConnectionState::Connected);
        Ok(())
    }

    /// Build and initialize a driver, retrying link failures as the profile
    /// allows.
    async fn initialize(
        &self,
        profile: &DeviceProfile,
        rig: Option<&Commander>,
    ) -> Result<(Box<dyn DeviceDriver>, Capabilities)> {
        let attempts = profile.connect_attempts.max(1);
        let mut attempt = 1;
        loop {
            let mut driver = self.station.factory().build(
                profile,
                BuildContext {
                    events: &self.events,
                    rig,
                },
            )?;
            match driver.initialize(profile).await {
                Ok(caps) => return Ok((driver, caps)),
                Err(e) => {
                    if let Err(shutdown) = driver.shutdown().await {
                        debug!(error = %shutdown, "shutdown after failed initialize");
                    }
                    let retryable = matches!(
                        e.kind(),
                        ErrorKind::Connection | ErrorKind::Timeout | ErrorKind::Initialization
                    );
                    if !retryable || attempt >= attempts {
                        return Err(e);
                    }
                    warn!(
                        profile = %profile.name,
                        attempt,
                        of = attempts,
                        error = %e,
                        "open attempt failed, retrying"
                    );
                    tokio::time::sleep(profile.connect_backoff()).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Cancel the in-flight and queued commands, stop polling, shut the
    /// driver down and release the profile. Does nothing when closed.
    pub(crate) async fn close(&self) {
        let Some(device) = self.lock().take() else {
            return;
        };
        device.dispatcher.cancel_token().cancel();
        if let Some(poller) = device.poller {
            poller.stop().await;
        }
        device.dispatcher.shutdown().await;
        info!(profile = %device.profile.name, "device closed");
        drop(device.claim);
        self.set_connection(ConnectionState::Disconnected);
    }

    /// Run `op` on the open device.
    ///
    /// `closed` is the error for a slot with nothing open. A device the
    /// poller gave up on takes no commands until it is reopened.
    pub(crate) async fn execute(&self, op: Operation, closed: fn() -> Error) -> Result<Reply> {
        let commander = self.commander().ok_or_else(closed)?;
        if self.connection_state() == ConnectionState::Failed {
            return Err(Error::NotConnected);
        }
        match commander.execute(op).await {
            Err(Error::NotConnected) if commander.is_closed() => Err(closed()),
            other => other,
        }
    }
}

/// Unexpected reply shape from the dispatcher.
pub(crate) fn unexpected(op: &str, reply: Reply) -> Error {
    Error::Internal(format!("{op} returned {reply:?}"))
}
