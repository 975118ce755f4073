//! Periodic state polling.
//!
//! The poller never talks to the driver directly. Each tick submits a fixed
//! list of queries through the device's [`Commander`], so poll traffic is
//! serialized with façade commands and its replies update state the same
//! way. A tick fails if any query fails for a reason other than
//! [`Error::Unsupported`]; after `failure_threshold` consecutive failed
//! ticks the device is marked [`ConnectionState::Failed`] and polling stops.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use shackctl_core::capability::Capabilities;
use shackctl_core::command::Operation;
use shackctl_core::error::{Error, Result};
use shackctl_core::events::DeviceEvent;
use shackctl_core::state::ConnectionState;
use shackctl_core::types::{DeviceKind, Vfo};

use crate::dispatcher::Commander;

/// Poller settings, taken from the device profile.
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub interval: Duration,
    /// Deadline for each query.
    pub timeout: Duration,
    /// Consecutive failed ticks before the device is failed.
    pub failure_threshold: u32,
    /// Label for logs (the profile name).
    pub device: String,
}

/// The queries one tick submits for a device of `kind` with `caps`.
///
/// The active VFO is read before the frequency so that a `Current`
/// frequency lands on the right VFO.
pub fn poll_queries(kind: DeviceKind, caps: Capabilities) -> Vec<Operation> {
    let candidates: Vec<Operation> = match kind {
        DeviceKind::Rig => vec![
            Operation::GetVfo,
            Operation::GetFrequency { vfo: Vfo::Current },
            Operation::GetMode,
            Operation::GetPtt,
            Operation::GetRit,
            Operation::GetXit,
        ],
        DeviceKind::Rotator => vec![Operation::GetPosition],
        DeviceKind::Keyer => vec![Operation::GetKeyerSpeed],
    };
    candidates
        .into_iter()
        .filter(|op| caps.contains(op.required()))
        .collect()
}

/// Handle to a running poller task.
pub struct Poller {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Poller {
    /// Start polling.
    ///
    /// `connection` is the device's connection state; the poller writes
    /// [`ConnectionState::Failed`] to it when it gives up. `cancel` should
    /// be a child of the dispatcher's token so the poller stops with it.
    pub fn spawn(
        config: PollConfig,
        queries: Vec<Operation>,
        commander: Commander,
        event_tx: broadcast::Sender<DeviceEvent>,
        connection: Arc<watch::Sender<ConnectionState>>,
        cancel: CancellationToken,
    ) -> Self {
        let task = tokio::spawn(poll_loop(
            config,
            queries,
            commander,
            event_tx,
            connection,
            cancel.clone(),
        ));
        Self { cancel, task }
    }

    /// Whether the poll loop has exited (cancelled or gave up).
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop polling and wait for the task to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "poller task panicked");
        }
    }
}

async fn poll_loop(
    config: PollConfig,
    queries: Vec<Operation>,
    commander: Commander,
    event_tx: broadcast::Sender<DeviceEvent>,
    connection: Arc<watch::Sender<ConnectionState>>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut misses: u32 = 0;

    debug!(
        device = %config.device,
        interval_ms = config.interval.as_millis(),
        queries = queries.len(),
        "poller started"
    );

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            r = poll_once(&commander, &queries, config.timeout) => r,
        };

        match outcome {
            Ok(()) => {
                if misses > 0 {
                    debug!(device = %config.device, after = misses, "poll recovered");
                }
                misses = 0;
            }
            Err(Error::Cancelled) | Err(Error::NotConnected) if commander.is_closed() => break,
            Err(e) => {
                misses += 1;
                tracing::warn!(
                    device = %config.device,
                    consecutive = misses,
                    error = %e,
                    "poll missed"
                );
                let _ = event_tx.send(DeviceEvent::PollMissed {
                    consecutive: misses,
                    reason: e.to_string(),
                });

                if misses >= config.failure_threshold {
                    tracing::error!(
                        device = %config.device,
                        misses,
                        "device not responding, marking failed"
                    );
                    connection.send_replace(ConnectionState::Failed);
                    let _ = event_tx.send(DeviceEvent::ConnectionChanged(ConnectionState::Failed));
                    break;
                }
            }
        }
    }

    debug!(device = %config.device, "poller stopped");
}

async fn poll_once(commander: &Commander, queries: &[Operation], timeout: Duration) -> Result<()> {
    for op in queries {
        match commander.submit(op.clone(), timeout).await {
            Ok(_) | Err(Error::Unsupported(_)) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{DispatchConfig, Dispatcher};
    use shackctl_core::events::EVENT_CHANNEL_CAPACITY;
    use shackctl_test_harness::{Failure, ScriptHandle, ScriptedDriver};

    struct Fixture {
        dispatcher: Dispatcher,
        poller: Poller,
        handle: ScriptHandle,
        connection: Arc<watch::Sender<ConnectionState>>,
        events: broadcast::Receiver<DeviceEvent>,
    }

    fn start(threshold: u32) -> Fixture {
        let (driver, handle) = ScriptedDriver::rig();
        let caps = Capabilities::FREQ | Capabilities::MODE | Capabilities::GET_VFO;
        let (event_tx, events) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let dispatcher = Dispatcher::spawn(
            Box::new(driver),
            caps,
            DispatchConfig {
                command_timeout: Duration::from_secs(1),
                device: "rig".into(),
            },
            event_tx.clone(),
        );
        let connection = Arc::new(watch::channel(ConnectionState::Connected).0);
        let poller = Poller::spawn(
            PollConfig {
                interval: Duration::from_millis(1000),
                timeout: Duration::from_millis(200),
                failure_threshold: threshold,
                device: "rig".into(),
            },
            poll_queries(DeviceKind::Rig, caps),
            dispatcher.commander(),
            event_tx,
            connection.clone(),
            dispatcher.cancel_token().child_token(),
        );
        Fixture {
            dispatcher,
            poller,
            handle,
            connection,
            events,
        }
    }

    #[test]
    fn queries_follow_capabilities() {
        let caps = Capabilities::FREQ | Capabilities::GET_PTT;
        assert_eq!(
            poll_queries(DeviceKind::Rig, caps),
            vec![Operation::GetFrequency { vfo: Vfo::Current }, Operation::GetPtt]
        );
        assert_eq!(
            poll_queries(DeviceKind::Rotator, Capabilities::POSITION),
            vec![Operation::GetPosition]
        );
        assert!(poll_queries(DeviceKind::Keyer, Capabilities::SEND_MORSE).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn poll_updates_state() {
        let f = start(3);
        f.handle.tune(10_106_000);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let state = f.dispatcher.state();
        assert_eq!(state.freq_a_hz, Some(10_106_000));
        assert_eq!(state.vfo, Some(Vfo::A));
        assert_eq!(f.handle.count("get PTT"), 0);

        f.poller.stop().await;
        f.dispatcher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn three_missed_ticks_fail_the_device() {
        let mut f = start(3);
        f.handle.set_failure(Some(Failure::Timeout));

        // Ticks at 0 s, 1 s and 2 s all fail.
        tokio::time::sleep(Duration::from_millis(2500)).await;

        assert_eq!(*f.connection.borrow(), ConnectionState::Failed);
        assert!(f.poller.is_finished());

        let mut missed = Vec::new();
        let mut failed = false;
        while let Ok(ev) = f.events.try_recv() {
            match ev {
                DeviceEvent::PollMissed { consecutive, .. } => missed.push(consecutive),
                DeviceEvent::ConnectionChanged(ConnectionState::Failed) => failed = true,
                _ => {}
            }
        }
        assert_eq!(missed, vec![1, 2, 3]);
        assert!(failed);

        // No fourth tick.
        let polled = f.handle.count("get VFO");
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(f.handle.count("get VFO"), polled);

        f.dispatcher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_the_miss_count() {
        let f = start(3);
        f.handle.set_failure(Some(Failure::Protocol));
        tokio::time::sleep(Duration::from_millis(1500)).await; // two misses

        f.handle.set_failure(None);
        tokio::time::sleep(Duration::from_millis(1000)).await; // success

        f.handle.set_failure(Some(Failure::Protocol));
        tokio::time::sleep(Duration::from_millis(2000)).await; // two more misses

        assert_eq!(*f.connection.borrow(), ConnectionState::Connected);
        assert!(!f.poller.is_finished());

        f.poller.stop().await;
        f.dispatcher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stops_with_the_dispatcher() {
        let f = start(3);
        tokio::time::sleep(Duration::from_millis(10)).await;
        f.dispatcher.shutdown().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(f.poller.is_finished());
        assert_eq!(*f.connection.borrow(), ConnectionState::Connected);
    }
}
