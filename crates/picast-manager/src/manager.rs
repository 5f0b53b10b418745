//! The transmitter manager: one object owning the rotation engine, the
//! watchdog, the UECP listener and the status board for a single chip.
//!
//! ```no_run
//! use std::sync::Arc;
//! use picast_core::ConfigSnapshot;
//! use picast_manager::TransmitterManager;
//! # async fn example(tx: Arc<dyn picast_core::Transmitter>) -> picast_core::Result<()> {
//! let manager = TransmitterManager::new(tx);
//! let cfg = ConfigSnapshot::from_json_str(r#"{
//!     "rf":  { "frequency_khz": 98700, "power": 115 },
//!     "rds": { "pi": "0xC201", "pty": 10, "ps": ["PICAST"] }
//! }"#)?;
//! manager.start_broadcast("station.json", cfg).await?;
//! println!("{:?}", manager.status());
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use picast_core::config::{ConfigSnapshot, MonitorConfig, RdsConfig};
use picast_core::error::{Error, Result};
use picast_core::events::TxEvent;
use picast_core::helpers::format_freq_mhz;
use picast_core::status::StatusSnapshot;
use picast_core::transmitter::Transmitter;

use crate::apply::{AppliedConfig, Applier};
use crate::rotation::{PsSettings, RotationEngine, StationInfo};
use crate::watchdog::{Health, Recover, WatchdogHandle, spawn_watchdog};

/// Event channel capacity.
const EVENT_CAPACITY: usize = 256;
/// Status refresh cadence when no events arrive.
const STATUS_REFRESH: Duration = Duration::from_secs(1);

/// Command surface for one transmitter.
pub struct TransmitterManager {
    tx: Arc<dyn Transmitter>,
    applier: Arc<Applier>,
    watchdog: WatchdogHandle,
    events: broadcast::Sender<TxEvent>,
    status: Arc<RwLock<StatusSnapshot>>,
    /// Held for the whole of start, stop and apply so they never overlap.
    on_air: Mutex<bool>,
    staged: RwLock<Option<AppliedConfig>>,
    cancel: CancellationToken,
    board: JoinHandle<()>,
}

impl TransmitterManager {
    /// Wrap a transmitter. Spawns the background tasks, which stay idle
    /// until [`start_broadcast`](Self::start_broadcast).
    pub fn new(tx: Arc<dyn Transmitter>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let rds = RdsConfig::default();
        let rotation = RotationEngine::spawn(
            Arc::clone(&tx),
            PsSettings {
                entries: rds.ps.clone(),
                center: rds.ps_center,
                interval: rds.ps_interval(),
            },
            rds.rt.clone(),
            StationInfo::default(),
            events.clone(),
            true,
        );

        let (monitor_tx, monitor_rx) = watch::channel(MonitorConfig::default());
        let applier = Arc::new(Applier::new(Arc::clone(&tx), rotation, monitor_tx, events.clone()));
        let recover: Arc<dyn Recover> = applier.clone();
        let watchdog = spawn_watchdog(Arc::clone(&tx), recover, monitor_rx, events.clone());

        let status = Arc::new(RwLock::new(StatusSnapshot::default()));
        let cancel = CancellationToken::new();
        let board = tokio::spawn(status_board(
            events.subscribe(),
            Arc::clone(&status),
            Arc::clone(&applier),
            cancel.clone(),
        ));

        TransmitterManager {
            tx,
            applier,
            watchdog,
            events,
            status,
            on_air: Mutex::new(false),
            staged: RwLock::new(None),
            cancel,
            board,
        }
    }

    /// Bring the chip up and program `config` in full. While already on air
    /// this is the same as [`apply_config`](Self::apply_config).
    pub async fn start_broadcast(&self, name: &str, config: ConfigSnapshot) -> Result<()> {
        let mut on_air = self.on_air.lock().await;
        if *on_air {
            self.apply_live(name, config).await?;
            return Ok(());
        }

        config.validate()?;
        tracing::info!(
            config = %name,
            freq = %format_freq_mhz(config.rf.frequency_khz),
            power = config.rf.power,
            "Starting broadcast"
        );

        self.tx.init().await?;
        self.applier.forget();
        if let Err(e) = self.applier.apply(name, config).await {
            tracing::error!(config = %name, error = %e, "Bring-up failed");
            self.applier.stop_uecp().await;
            if let Err(reset) = self.tx.reset().await {
                tracing::warn!(error = %reset, "Reset after failed bring-up also failed");
            }
            return Err(e);
        }

        self.applier.set_on_air(true);
        self.watchdog.reset_failed().await;
        self.watchdog.set_active(true).await;
        *on_air = true;
        *self.staged.write().unwrap_or_else(PoisonError::into_inner) = None;

        let _ = self.events.send(TxEvent::BroadcastStarted {
            config_name: name.to_string(),
        });
        Ok(())
    }

    /// Take the carrier off air. The chip is left in reset. Stopping a
    /// stopped manager is a no-op.
    pub async fn stop_broadcast(&self) -> Result<()> {
        let mut on_air = self.on_air.lock().await;
        if !*on_air {
            return Ok(());
        }
        tracing::info!("Stopping broadcast");

        self.watchdog.set_active(false).await;
        self.applier.set_on_air(false);
        self.applier.stop_uecp().await;
        *on_air = false;

        // Waits out a recovery already in flight; later ones see off-air.
        let result = self.applier.halt().await;
        let _ = self.events.send(TxEvent::BroadcastStopped);
        result
    }

    /// Apply `config` live, running only the operations that differ from
    /// the last applied snapshot. While stopped the snapshot is validated
    /// and staged instead. Returns the number of operations run.
    ///
    /// A successful apply also clears a `Failed` watchdog.
    pub async fn apply_config(&self, name: &str, config: ConfigSnapshot) -> Result<usize> {
        let on_air = self.on_air.lock().await;
        if !*on_air {
            config.validate()?;
            tracing::info!(config = %name, "Not broadcasting, configuration staged");
            *self.staged.write().unwrap_or_else(PoisonError::into_inner) = Some(AppliedConfig {
                name: name.to_string(),
                config: Arc::new(config),
            });
            return Ok(0);
        }
        self.apply_live(name, config).await
    }

    async fn apply_live(&self, name: &str, config: ConfigSnapshot) -> Result<usize> {
        let n = self.applier.apply(name, config).await?;
        self.watchdog.reset_failed().await;
        Ok(n)
    }

    /// Start broadcasting the staged configuration, if there is one.
    pub async fn start_staged(&self) -> Result<()> {
        let staged = self.staged_config().ok_or_else(|| {
            Error::Config("no staged configuration to start".into())
        })?;
        self.start_broadcast(&staged.name, (*staged.config).clone()).await
    }

    /// Run a health check now and return the watchdog's view.
    pub async fn force_health_check(&self) -> Result<Health> {
        self.watchdog.check_now().await
    }

    /// Hand the RDS fields to UECP clients (`true`) or back to the rotation
    /// engine (`false`). While stopped the staged snapshot is updated.
    pub async fn set_uecp_enabled(&self, enabled: bool) -> Result<()> {
        let on_air = self.on_air.lock().await;
        if *on_air {
            return self.applier.toggle_uecp(enabled).await;
        }
        let mut staged = self.staged.write().unwrap_or_else(PoisonError::into_inner);
        match staged.as_mut() {
            Some(applied) => {
                Arc::make_mut(&mut applied.config).uecp.enabled = enabled;
                Ok(())
            }
            None => Err(Error::NotConnected),
        }
    }

    /// Current status snapshot.
    pub fn status(&self) -> StatusSnapshot {
        self.status.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TxEvent> {
        self.events.subscribe()
    }

    /// The snapshot currently on air.
    pub fn last_applied(&self) -> Option<AppliedConfig> {
        self.applier.last_applied()
    }

    /// The snapshot waiting for the next start.
    pub fn staged_config(&self) -> Option<AppliedConfig> {
        self.staged.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn watchdog_health(&self) -> Health {
        self.watchdog.health()
    }

    /// Stop broadcasting and every background task, then close the chip.
    pub async fn shutdown(self) {
        if let Err(e) = self.stop_broadcast().await {
            tracing::warn!(error = %e, "Reset during shutdown failed");
        }
        self.cancel.cancel();
        let _ = self.board.await;
        self.watchdog.shutdown().await;

        match Arc::try_unwrap(self.applier) {
            Ok(applier) => applier.shutdown().await,
            Err(applier) => applier.stop_uecp().await,
        }
        if let Err(e) = self.tx.close().await {
            tracing::debug!(error = %e, "Close failed");
        }
        tracing::info!("Transmitter manager stopped");
    }
}

/// Fold events into the status snapshot and refresh it every second.
async fn status_board(
    mut events: broadcast::Receiver<TxEvent>,
    status: Arc<RwLock<StatusSnapshot>>,
    applier: Arc<Applier>,
    cancel: CancellationToken,
) {
    let mut refresh = tokio::time::interval(STATUS_REFRESH);
    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            recv = events.recv() => match recv {
                Ok(event) => {
                    let mut s = status.write().unwrap_or_else(PoisonError::into_inner);
                    s.apply_event(&event);
                    if let TxEvent::ConfigApplied { .. } = event {
                        if let Some(applied) = applier.last_applied() {
                            let cfg = &applied.config;
                            s.frequency_khz = cfg.rf.frequency_khz;
                            s.power = cfg.rf.power;
                            s.pi = cfg.rds.pi;
                            s.pty = cfg.rds.pty;
                        }
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    tracing::debug!(missed = n, "Status board lagged");
                }
                Err(RecvError::Closed) => break,
            },

            _ = refresh.tick() => {
                status.write().unwrap_or_else(PoisonError::into_inner).touch();
            }
        }
    }
}
