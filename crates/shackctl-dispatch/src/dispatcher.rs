//! The per-device command dispatcher.
//!
//! One tokio task owns the backend driver exclusively and executes every
//! command for the device, whether it comes from a façade call or from the
//! poller. Commands are taken strictly in arrival order and exactly one is
//! in flight at a time. Each command carries a deadline; a command still
//! running at its deadline is abandoned with [`Error::Timeout`] and the
//! driver is asked to resync before the next one runs.
//!
//! The worker is also the only writer of the device's [`DeviceState`]:
//! every successful reply is folded into the published snapshot and
//! announced as a [`DeviceEvent`].

use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use shackctl_core::capability::Capabilities;
use shackctl_core::command::{Operation, Reply};
use shackctl_core::driver::{self, DeviceDriver};
use shackctl_core::error::{Error, Result};
use shackctl_core::events::DeviceEvent;
use shackctl_core::state::DeviceState;

/// Depth of the command queue. Callers wait for room when it is full.
const QUEUE_DEPTH: usize = 64;

/// Upper bound on a driver's resync after an abandoned command.
const RESYNC_TIMEOUT: Duration = Duration::from_millis(250);

/// Configuration for the dispatcher task.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Deadline applied by [`Commander::execute`].
    pub command_timeout: Duration,
    /// Label for logs (the profile name).
    pub device: String,
}

/// One command travelling from a caller to the worker.
struct Command {
    op: Operation,
    deadline: Instant,
    reply: oneshot::Sender<Result<Reply>>,
}

/// Cloneable handle for submitting commands to one device.
#[derive(Debug, Clone)]
pub struct Commander {
    tx: mpsc::Sender<Command>,
    caps: Capabilities,
    command_timeout: Duration,
}

impl Commander {
    /// Submit `op` with the default command timeout.
    pub async fn execute(&self, op: Operation) -> Result<Reply> {
        self.submit(op, self.command_timeout).await
    }

    /// Submit `op` and wait for its result.
    ///
    /// Resolves exactly once: with the driver's result, with
    /// [`Error::Timeout`] once `timeout` has elapsed (whether the command
    /// was still queued or already running), or with [`Error::Cancelled`]
    /// if the device is closed first.
    pub async fn submit(&self, op: Operation, timeout: Duration) -> Result<Reply> {
        let deadline = Instant::now() + timeout;
        let (reply_tx, reply_rx) = oneshot::channel();
        let cmd = Command {
            op,
            deadline,
            reply: reply_tx,
        };

        match tokio::time::timeout_at(deadline, self.tx.send(cmd)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => return Err(Error::NotConnected),
            Err(_) => return Err(Error::Timeout),
        }

        match tokio::time::timeout_at(deadline, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Cancelled),
            Err(_) => Err(Error::Timeout),
        }
    }

    /// The capability set the worker checks commands against.
    pub fn capabilities(&self) -> Capabilities {
        self.caps
    }

    /// Whether the worker has stopped accepting commands.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Handle to a running dispatcher task.
pub struct Dispatcher {
    commander: Commander,
    state_rx: watch::Receiver<DeviceState>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Dispatcher {
    /// Spawn the worker for an initialized `driver`.
    ///
    /// `caps` is the device's runtime capability set; commands outside it
    /// are rejected without touching the driver.
    pub fn spawn(
        driver: Box<dyn DeviceDriver>,
        caps: Capabilities,
        config: DispatchConfig,
        event_tx: broadcast::Sender<DeviceEvent>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let (state_tx, state_rx) = watch::channel(DeviceState::default());
        let cancel = CancellationToken::new();

        let worker = Worker {
            driver,
            caps,
            device: config.device,
            state_tx,
            event_tx,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(worker.run(rx));

        Self {
            commander: Commander {
                tx,
                caps,
                command_timeout: config.command_timeout,
            },
            state_rx,
            cancel,
            task,
        }
    }

    /// A handle for submitting commands.
    pub fn commander(&self) -> Commander {
        self.commander.clone()
    }

    /// Copy of the current state snapshot.
    pub fn state(&self) -> DeviceState {
        self.state_rx.borrow().clone()
    }

    /// Receiver that sees every new state snapshot.
    pub fn watch_state(&self) -> watch::Receiver<DeviceState> {
        self.state_rx.clone()
    }

    /// Token cancelled when the dispatcher shuts down; pollers hang their
    /// own tokens off it.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Stop the worker.
    ///
    /// The in-flight command and every queued command resolve with
    /// [`Error::Cancelled`], then the driver is shut down.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "dispatcher task panicked");
        }
    }
}

struct Worker {
    driver: Box<dyn DeviceDriver>,
    caps: Capabilities,
    device: String,
    state_tx: watch::Sender<DeviceState>,
    event_tx: broadcast::Sender<DeviceEvent>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        debug!(device = %self.device, backend = %self.driver.backend(), "dispatcher started");

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    debug!(device = %self.device, "dispatcher cancelled");
                    break;
                }

                cmd = rx.recv() => match cmd {
                    Some(cmd) => self.handle(cmd).await,
                    None => {
                        debug!(device = %self.device, "command channel closed");
                        break;
                    }
                }
            }
        }

        rx.close();
        let mut dropped = 0usize;
        while let Ok(cmd) = rx.try_recv() {
            let _ = cmd.reply.send(Err(Error::Cancelled));
            dropped += 1;
        }
        if dropped > 0 {
            debug!(device = %self.device, dropped, "cancelled queued commands");
        }

        if let Err(e) = self.driver.shutdown().await {
            tracing::warn!(device = %self.device, error = %e, "driver shutdown failed");
        }
        debug!(device = %self.device, "dispatcher stopped");
    }

    async fn handle(&mut self, cmd: Command) {
        let Command {
            op,
            deadline,
            reply,
        } = cmd;

        // The caller already gave up.
        if reply.is_closed() {
            return;
        }

        let required = op.required();
        if !self.caps.contains(required) {
            debug!(device = %self.device, op = %op, "rejected: capability missing");
            let _ = reply.send(Err(Error::unsupported(op.name())));
            return;
        }

        if Instant::now() >= deadline {
            let _ = reply.send(Err(Error::Timeout));
            return;
        }

        tracing::trace!(device = %self.device, op = %op, "executing");

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            r = tokio::time::timeout_at(deadline, driver::execute(&mut *self.driver, &op)) => {
                r.unwrap_or(Err(Error::Timeout))
            }
        };

        match &result {
            Ok(r) => {
                if let Some(update) = op.state_update(r) {
                    self.publish(update);
                }
            }
            Err(Error::Timeout) => {
                tracing::warn!(device = %self.device, op = %op, "command timed out");
            }
            Err(Error::Cancelled) | Err(Error::Unsupported(_)) => {}
            Err(e) => {
                debug!(device = %self.device, op = %op, error = %e, "command failed");
            }
        }

        let timed_out = matches!(result, Err(Error::Timeout));
        let _ = reply.send(result);

        if timed_out && !self.cancel.is_cancelled() {
            match tokio::time::timeout(RESYNC_TIMEOUT, self.driver.resync()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(device = %self.device, error = %e, "resync failed");
                }
                Err(_) => tracing::warn!(device = %self.device, "resync timed out"),
            }
        }
    }

    fn publish(&self, update: shackctl_core::state::StateUpdate) {
        let mut revision = 0;
        let changed = self.state_tx.send_if_modified(|state| {
            let changed = state.apply(&update);
            revision = state.revision;
            changed
        });
        if changed {
            let _ = self
                .event_tx
                .send(DeviceEvent::from_update(&update, revision));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shackctl_core::events::EVENT_CHANNEL_CAPACITY;
    use shackctl_core::types::{BackendKind, Mode, Vfo};
    use shackctl_test_harness::{ScriptHandle, ScriptedDriver};

    fn spawn_rig() -> (Dispatcher, ScriptHandle, broadcast::Receiver<DeviceEvent>) {
        let (driver, handle) = ScriptedDriver::rig();
        let caps = Capabilities::FREQ | Capabilities::MODE | Capabilities::PTT;
        let (event_tx, event_rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let d = Dispatcher::spawn(
            Box::new(driver),
            caps,
            DispatchConfig {
                command_timeout: Duration::from_secs(1),
                device: "test".into(),
            },
            event_tx,
        );
        (d, handle, event_rx)
    }

    #[tokio::test]
    async fn set_then_get_round_trip() {
        let (d, _h, mut events) = spawn_rig();
        let c = d.commander();

        let r = c
            .execute(Operation::SetFrequency {
                vfo: Vfo::A,
                hz: 14_025_000,
            })
            .await
            .unwrap();
        assert_eq!(r, Reply::Done);
        let r = c
            .execute(Operation::GetFrequency { vfo: Vfo::A })
            .await
            .unwrap();
        assert_eq!(r, Reply::Frequency(14_025_000));

        let state = d.state();
        assert_eq!(state.freq_a_hz, Some(14_025_000));
        assert_eq!(state.revision, 1);

        let ev = events.recv().await.unwrap();
        assert_eq!(
            ev,
            DeviceEvent::FrequencyChanged {
                vfo: Vfo::A,
                hz: 14_025_000,
                revision: 1
            }
        );
        d.shutdown().await;
    }

    #[tokio::test]
    async fn unsupported_never_reaches_driver() {
        let (d, h, _events) = spawn_rig();
        let c = d.commander();

        let err = c.execute(Operation::SetPower(50.0)).await.unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
        let err = c
            .execute(Operation::SendMorse("CQ".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));

        assert_eq!(h.count("set power"), 0);
        assert_eq!(h.count("send morse"), 0);
        d.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn one_command_in_flight_in_fifo_order() {
        let (d, h, _events) = spawn_rig();
        h.set_delay(Duration::from_millis(20));
        let c = d.commander();

        let mut tasks = Vec::new();
        for (i, mode) in [Mode::CW, Mode::USB, Mode::LSB, Mode::FM].into_iter().enumerate() {
            let c = c.clone();
            tasks.push(tokio::spawn(async move {
                // Stagger submission so arrival order is well defined.
                tokio::time::sleep(Duration::from_millis(i as u64)).await;
                c.execute(Operation::SetMode(mode)).await
            }));
        }
        for t in tasks {
            t.await.unwrap().unwrap();
        }

        assert_eq!(h.max_concurrency(), 1);
        assert_eq!(h.count("set mode"), 4);
        assert_eq!(d.state().mode, Some(Mode::FM));
        d.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_then_device_still_usable() {
        let (d, h, _events) = spawn_rig();
        let c = d.commander();

        h.set_hang(true);
        let err = c
            .submit(Operation::GetMode, Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout));

        h.set_hang(false);
        let r = c.execute(Operation::GetMode).await.unwrap();
        assert_eq!(r, Reply::Mode(Mode::USB));
        assert_eq!(h.count("resync"), 1);
        d.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn queued_command_expires_behind_slow_one() {
        let (d, h, _events) = spawn_rig();
        h.set_delay(Duration::from_millis(500));
        let c = d.commander();

        let slow = {
            let c = c.clone();
            tokio::spawn(async move { c.submit(Operation::GetMode, Duration::from_secs(2)).await })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;

        let err = c
            .submit(Operation::GetPtt, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout));

        assert!(slow.await.unwrap().is_ok());
        assert_eq!(h.count("get PTT"), 0);
        d.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_in_flight_and_queued() {
        let (d, h, _events) = spawn_rig();
        h.set_hang(true);
        let c = d.commander();

        let mut pending = Vec::new();
        for _ in 0..3 {
            let c = c.clone();
            pending.push(tokio::spawn(async move {
                c.submit(Operation::GetMode, Duration::from_secs(30)).await
            }));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        d.shutdown().await;
        for p in pending {
            let err = p.await.unwrap().unwrap_err();
            assert!(matches!(err, Error::Cancelled), "got {err:?}");
        }
        assert_eq!(h.count("shutdown"), 1);
        assert!(c.is_closed());
        assert!(matches!(
            c.execute(Operation::GetMode).await,
            Err(Error::NotConnected)
        ));
    }

    #[tokio::test]
    async fn unchanged_reply_does_not_bump_revision() {
        let (d, _h, _events) = spawn_rig();
        let c = d.commander();
        c.execute(Operation::GetMode).await.unwrap();
        c.execute(Operation::GetMode).await.unwrap();
        assert_eq!(d.state().revision, 1);

        let mut rx = d.watch_state();
        c.execute(Operation::SetPtt(true)).await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().ptt, Some(true));
        assert_eq!(rx.borrow().revision, 2);
        d.shutdown().await;
    }

    #[tokio::test]
    async fn driver_backend_kind_is_irrelevant_to_dispatch() {
        let (driver, h) = ScriptedDriver::new(BackendKind::RotatorUdp, Capabilities::POSITION);
        let (event_tx, _rx) = broadcast::channel(8);
        let d = Dispatcher::spawn(
            Box::new(driver),
            Capabilities::POSITION,
            DispatchConfig {
                command_timeout: Duration::from_secs(1),
                device: "rotor".into(),
            },
            event_tx,
        );
        let c = d.commander();
        c.execute(Operation::SetPosition {
            azimuth: 270.0,
            elevation: 0.0,
        })
        .await
        .unwrap();
        assert_eq!(
            c.execute(Operation::GetPosition).await.unwrap(),
            Reply::Position {
                azimuth: 270.0,
                elevation: 0.0
            }
        );
        assert_eq!(h.count("set position"), 1);
        d.shutdown().await;
    }
}
