//! Health supervision and bounded recovery.
//!
//! The watchdog polls TX_TUNE_STATUS and TX_ASQ_STATUS on the monitor
//! interval and drives this state machine:
//!
//! ```text
//!  Healthy ──fault──▶ Degraded ──▶ Recovering{1} ──fail──▶ Recovering{2} ── … ──▶ Failed
//!     ▲                                  │                      │                  │
//!     └──────────── successful poll ─────┴──────────────────────┴──────────────────┘
//! ```
//!
//! A fault is a failed status read or a carrier that is not transmitting.
//! Recovery attempt `k` runs after `recovery_backoff_s × k`; it resets the
//! chip and re-applies the last configuration through [`Recover`], then
//! polls. After `recovery_attempts` failed attempts the watchdog gives up
//! and stays `Failed`, still polling, until a poll succeeds or
//! [`Watchdog::reset_failed`] is called.
//!
//! Overmodulation is reported, never recovered from: two consecutive polls
//! with the (filtered) ASQ overmodulation flag move a healthy transmitter
//! to `Degraded`, and the next clean poll moves it back.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use picast_core::config::MonitorConfig;
use picast_core::error::{Error, Result};
use picast_core::events::TxEvent;
use picast_core::transmitter::Transmitter;
use picast_core::types::WatchdogState;

/// Consecutive filtered overmodulation polls that count as degraded.
const OVERMOD_POLLS: u32 = 2;

/// The reset + reapply path the watchdog calls while recovering.
#[async_trait]
pub trait Recover: Send + Sync {
    async fn recover(&self) -> Result<()>;
}

/// Snapshot of the watchdog's view of the transmitter.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Health {
    pub state: WatchdogState,
    /// Human-readable status line.
    pub status: String,
    pub consecutive_failures: u32,
    /// Recovery attempts made since the last healthy poll.
    pub attempts: u32,
    pub overmodulated: bool,
    pub last_poll: Option<Instant>,
}

/// Result of one health poll.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Ok,
    Fault(String),
}

/// The supervision state machine. Driven by [`spawn_watchdog`] or directly
/// in tests.
pub struct Watchdog {
    tx: Arc<dyn Transmitter>,
    params: MonitorConfig,
    events: broadcast::Sender<TxEvent>,
    health: Health,
    grace_until: Option<Instant>,
    overmod_streak: u32,
}

impl Watchdog {
    pub fn new(
        tx: Arc<dyn Transmitter>,
        params: MonitorConfig,
        events: broadcast::Sender<TxEvent>,
    ) -> Self {
        Watchdog {
            tx,
            params,
            events,
            health: Health {
                status: "idle".into(),
                ..Health::default()
            },
            grace_until: None,
            overmod_streak: 0,
        }
    }

    pub fn health(&self) -> &Health {
        &self.health
    }

    pub fn params(&self) -> &MonitorConfig {
        &self.params
    }

    pub fn set_params(&mut self, params: MonitorConfig) {
        if params != self.params {
            tracing::debug!(
                interval_s = params.interval_s,
                attempts = params.recovery_attempts,
                backoff_s = params.recovery_backoff_s,
                "Watchdog parameters updated"
            );
            self.params = params;
        }
    }

    /// Leave `Failed` (or any other state) and start counting afresh.
    pub fn reset_failed(&mut self) {
        self.health.attempts = 0;
        self.health.consecutive_failures = 0;
        if self.health.state != WatchdogState::Healthy {
            self.set_state(WatchdogState::Healthy, "reset by operator".into());
        }
    }

    /// Ignore faults for the grace window, e.g. right after bring-up.
    pub fn start_grace(&mut self) {
        self.grace_until = Some(Instant::now() + self.params.grace());
    }

    fn in_grace(&self) -> bool {
        self.grace_until.is_some_and(|until| Instant::now() < until)
    }

    fn set_state(&mut self, state: WatchdogState, status: String) {
        let changed = self.health.state != state || self.health.status != status;
        self.health.state = state;
        self.health.status = status;
        if changed {
            let _ = self.events.send(TxEvent::WatchdogStateChanged {
                state,
                status: self.health.status.clone(),
            });
        }
    }

    /// Read status and ASQ once and report what was seen.
    pub async fn poll(&mut self) -> PollOutcome {
        self.health.last_poll = Some(Instant::now());
        let mut fault = None;
        let mut transmitting = true;
        let mut antenna_cap = None;

        if self.params.health {
            match self.tx.read_status().await {
                Ok(status) => {
                    transmitting = status.is_transmitting();
                    antenna_cap = Some(status.antenna_cap);
                    if !transmitting {
                        fault = Some(format!(
                            "carrier down (power {} dBuV at {} kHz)",
                            status.power, status.frequency_khz
                        ));
                    }
                }
                Err(e) => {
                    transmitting = false;
                    fault = Some(format!("status read failed: {e}"));
                }
            }
        }

        let mut input_level = None;
        let mut overmod_now = false;
        if self.params.asq && fault.is_none() {
            match self.tx.read_asq().await {
                Ok(asq) => {
                    input_level = Some(asq.input_level_dbfs);
                    let level = f64::from(asq.input_level_dbfs);
                    overmod_now = asq.overmodulated
                        && self
                            .params
                            .overmod_ignore_below_dbfs
                            .is_none_or(|floor| level > floor);
                }
                Err(e) if e.is_transport() => fault = Some(format!("ASQ read failed: {e}")),
                Err(e) => tracing::debug!(error = %e, "ASQ read unavailable"),
            }
        }

        self.overmod_streak = if overmod_now { self.overmod_streak + 1 } else { 0 };
        self.health.overmodulated = self.overmod_streak >= OVERMOD_POLLS;

        let _ = self.events.send(TxEvent::HealthPolled {
            transmitting,
            overmodulated: self.health.overmodulated,
            input_level_dbfs: input_level,
            antenna_cap,
        });

        match fault {
            Some(reason) => PollOutcome::Fault(reason),
            None => PollOutcome::Ok,
        }
    }

    /// Run one step of the state machine and return how long to wait before
    /// the next one.
    pub async fn cycle(&mut self, recover: &dyn Recover) -> Duration {
        match self.health.state {
            WatchdogState::Recovering { attempt } => self.attempt_recovery(attempt, recover).await,
            _ => self.supervise().await,
        }
    }

    async fn supervise(&mut self) -> Duration {
        let interval = self.params.interval();
        match self.poll().await {
            PollOutcome::Ok => {
                self.health.consecutive_failures = 0;
                self.health.attempts = 0;
                if self.health.overmodulated {
                    if self.health.state == WatchdogState::Healthy {
                        tracing::warn!("Sustained overmodulation");
                    }
                    self.set_state(WatchdogState::Degraded, "overmodulation".into());
                } else if self.health.state != WatchdogState::Healthy {
                    tracing::info!(previous = %self.health.state, "Transmitter healthy");
                    self.set_state(WatchdogState::Healthy, "on air".into());
                } else if self.health.status != "on air" {
                    self.set_state(WatchdogState::Healthy, "on air".into());
                }
                interval
            }
            PollOutcome::Fault(reason) => {
                if self.in_grace() {
                    tracing::debug!(reason = %reason, "Health fault inside grace window, not counted");
                    return interval;
                }
                self.health.consecutive_failures += 1;
                if self.health.state == WatchdogState::Failed {
                    tracing::debug!(reason = %reason, "Still failed");
                    return interval;
                }

                tracing::warn!(
                    reason = %reason,
                    failures = self.health.consecutive_failures,
                    "Transmitter unhealthy"
                );
                self.set_state(WatchdogState::Degraded, reason.clone());
                if self.params.recovery_attempts == 0 {
                    tracing::error!(reason = %reason, "Recovery disabled, giving up");
                    self.set_state(WatchdogState::Failed, reason);
                    return interval;
                }
                self.set_state(WatchdogState::Recovering { attempt: 1 }, reason);
                self.params.backoff(1)
            }
        }
    }

    async fn attempt_recovery(&mut self, attempt: u32, recover: &dyn Recover) -> Duration {
        self.health.attempts = attempt;
        tracing::info!(attempt, max = self.params.recovery_attempts, "Recovery attempt");

        let outcome = match recover.recover().await {
            Ok(()) => self.poll().await,
            Err(e) => PollOutcome::Fault(format!("recovery failed: {e}")),
        };

        match outcome {
            PollOutcome::Ok => {
                tracing::info!(attempt, "Transmitter recovered");
                self.health.attempts = 0;
                self.health.consecutive_failures = 0;
                self.set_state(WatchdogState::Healthy, format!("recovered after {attempt} attempt(s)"));
                self.params.interval()
            }
            PollOutcome::Fault(reason) => {
                self.health.consecutive_failures += 1;
                if attempt >= self.params.recovery_attempts {
                    tracing::error!(attempts = attempt, reason = %reason, "Recovery exhausted, transmitter failed");
                    self.set_state(WatchdogState::Failed, reason);
                    return self.params.interval();
                }
                let next = attempt + 1;
                tracing::warn!(attempt, reason = %reason, "Recovery attempt failed");
                self.set_state(WatchdogState::Recovering { attempt: next }, reason);
                self.params.backoff(next)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Background task
// ---------------------------------------------------------------------------

enum Command {
    CheckNow(oneshot::Sender<Health>),
    ResetFailed,
    SetActive(bool),
}

/// Handle to a watchdog running in its own task.
pub struct WatchdogHandle {
    commands: mpsc::Sender<Command>,
    health: watch::Receiver<Health>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

/// Start supervising. The watchdog stays idle until
/// [`WatchdogHandle::set_active`] turns it on; parameters follow `params`.
pub fn spawn_watchdog(
    tx: Arc<dyn Transmitter>,
    recover: Arc<dyn Recover>,
    params: watch::Receiver<MonitorConfig>,
    events: broadcast::Sender<TxEvent>,
) -> WatchdogHandle {
    let watchdog = Watchdog::new(tx, params.borrow().clone(), events);
    let (cmd_tx, cmd_rx) = mpsc::channel(8);
    let (health_tx, health_rx) = watch::channel(watchdog.health().clone());
    let cancel = CancellationToken::new();

    let task = tokio::spawn(run(watchdog, recover, params, cmd_rx, health_tx, cancel.clone()));

    WatchdogHandle {
        commands: cmd_tx,
        health: health_rx,
        cancel,
        task: Some(task),
    }
}

impl WatchdogHandle {
    /// Run one supervision step now (if active) and return the result.
    pub async fn check_now(&self) -> Result<Health> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::CheckNow(reply_tx))
            .await
            .map_err(|_| Error::NotConnected)?;
        reply_rx.await.map_err(|_| Error::NotConnected)
    }

    /// Leave `Failed` and allow automatic recovery again.
    pub async fn reset_failed(&self) {
        let _ = self.commands.send(Command::ResetFailed).await;
    }

    /// Start (with a grace window) or stop polling.
    pub async fn set_active(&self, active: bool) {
        let _ = self.commands.send(Command::SetActive(active)).await;
    }

    /// Latest published health.
    pub fn health(&self) -> Health {
        self.health.borrow().clone()
    }

    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for WatchdogHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(
    mut watchdog: Watchdog,
    recover: Arc<dyn Recover>,
    mut params: watch::Receiver<MonitorConfig>,
    mut commands: mpsc::Receiver<Command>,
    health: watch::Sender<Health>,
    cancel: CancellationToken,
) {
    let mut active = false;
    let mut next = Instant::now();

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            Some(cmd) = commands.recv() => match cmd {
                Command::CheckNow(reply) => {
                    if active {
                        let wait = watchdog.cycle(&*recover).await;
                        next = Instant::now() + wait;
                    }
                    let _ = reply.send(watchdog.health().clone());
                }
                Command::ResetFailed => watchdog.reset_failed(),
                Command::SetActive(on) => {
                    if on && !active {
                        watchdog.start_grace();
                        next = Instant::now() + watchdog.params().interval();
                        tracing::debug!("Watchdog active");
                    } else if !on && active {
                        tracing::debug!("Watchdog idle");
                    }
                    active = on;
                }
            },

            Ok(()) = params.changed() => {
                let p = params.borrow_and_update().clone();
                watchdog.set_params(p);
            }

            _ = tokio::time::sleep_until(next), if active => {
                let wait = watchdog.cycle(&*recover).await;
                next = Instant::now() + wait;
            }
        }

        health.send_if_modified(|current| {
            let changed = *current != *watchdog.health();
            if changed {
                *current = watchdog.health().clone();
            }
            changed
        });
    }
}
