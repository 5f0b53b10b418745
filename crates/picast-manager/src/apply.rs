//! Executes diff operations against the transmitter.
//!
//! The [`Applier`] owns the last applied snapshot and the collaborators an
//! operation may touch: the chip, the rotation engine, the watchdog
//! parameters and the UECP listener. Applies and recoveries are serialized
//! by one gate so a recovery never interleaves with a config change.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tokio::sync::{Mutex, broadcast, watch};

use picast_core::config::{ConfigSnapshot, MonitorConfig, UecpConfig};
use picast_core::error::{Error, Result};
use picast_core::events::TxEvent;
use picast_core::transmitter::Transmitter;
use picast_uecp::UecpListener;

use crate::diff::{Op, Stage, diff};
use crate::rotation::{PsSettings, RotationHandle, StationInfo};
use crate::watchdog::Recover;

/// A snapshot together with the name it was applied under.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedConfig {
    pub name: String,
    pub config: Arc<ConfigSnapshot>,
}

/// Runs diff operations in order and keeps the last applied snapshot.
pub struct Applier {
    tx: Arc<dyn Transmitter>,
    rotation: RotationHandle,
    monitor: watch::Sender<MonitorConfig>,
    events: broadcast::Sender<TxEvent>,
    uecp: Mutex<Option<UecpListener>>,
    last: RwLock<Option<AppliedConfig>>,
    gate: Mutex<()>,
    on_air: AtomicBool,
    uecp_on: AtomicBool,
}

impl Applier {
    pub fn new(
        tx: Arc<dyn Transmitter>,
        rotation: RotationHandle,
        monitor: watch::Sender<MonitorConfig>,
        events: broadcast::Sender<TxEvent>,
    ) -> Self {
        Applier {
            tx,
            rotation,
            monitor,
            events,
            uecp: Mutex::new(None),
            last: RwLock::new(None),
            gate: Mutex::new(()),
            on_air: AtomicBool::new(false),
            uecp_on: AtomicBool::new(false),
        }
    }

    /// The last successfully applied snapshot.
    pub fn last_applied(&self) -> Option<AppliedConfig> {
        self.last.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Forget the last snapshot so the next apply is a full one.
    pub fn forget(&self) {
        *self.last.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Whether the UECP listener currently owns the RDS fields.
    pub fn uecp_enabled(&self) -> bool {
        self.uecp_on.load(Ordering::SeqCst)
    }

    /// Mark the carrier on or off air. Rotation only runs on air and while
    /// UECP is off.
    pub fn set_on_air(&self, on_air: bool) {
        self.on_air.store(on_air, Ordering::SeqCst);
        self.sync_rotation();
    }

    fn sync_rotation(&self) {
        let paused = !self.on_air.load(Ordering::SeqCst) || self.uecp_on.load(Ordering::SeqCst);
        self.rotation.set_paused(paused);
    }

    /// Validate, diff against the last snapshot and execute. The stored
    /// snapshot only moves forward when every operation succeeded.
    /// Returns the number of operations run.
    pub async fn apply(&self, name: &str, config: ConfigSnapshot) -> Result<usize> {
        config.validate()?;
        let _gate = self.gate.lock().await;

        let prev = self.last_applied();
        let ops = self.converge(prev.as_ref().map(|a| a.config.as_ref()), &config).await?;

        self.rotation.set_station(StationInfo {
            config_name: name.to_string(),
            frequency_khz: config.rf.frequency_khz,
            power: config.rf.power,
        });
        *self.last.write().unwrap_or_else(PoisonError::into_inner) = Some(AppliedConfig {
            name: name.to_string(),
            config: Arc::new(config),
        });

        tracing::info!(config = %name, operations = ops.len(), "Configuration applied");
        let _ = self.events.send(TxEvent::ConfigApplied {
            config_name: name.to_string(),
            operations: ops.len(),
        });
        Ok(ops.len())
    }

    /// Diff `prev` against `next` and execute the result.
    ///
    /// When UECP goes from on to off the listener is stopped first and every
    /// RDS identity field is rewritten from `next`, since a UECP client may
    /// have changed any of them. Rotation resumes only after that.
    async fn converge(&self, prev: Option<&ConfigSnapshot>, next: &ConfigSnapshot) -> Result<Vec<Op>> {
        let mut ops = diff(prev, next);
        let hand_back = prev.is_some_and(|p| p.uecp.enabled) && !next.uecp.enabled;
        if hand_back {
            self.stop_listener().await;
            ops.retain(|op| op.stage() != Stage::RdsIdentity);
            ops.extend(
                diff(None, next)
                    .into_iter()
                    .filter(|op| op.stage() == Stage::RdsIdentity),
            );
            ops.sort_by_key(Op::stage);
        }
        tracing::debug!(operations = ops.len(), full = prev.is_none(), hand_back, "Converging");
        self.execute(&ops).await?;
        Ok(ops)
    }

    /// Run `ops` in order, stopping at the first failure.
    pub async fn execute(&self, ops: &[Op]) -> Result<()> {
        for op in ops {
            tracing::trace!(op = ?op, "Executing");
            if let Err(e) = self.execute_one(op).await {
                tracing::warn!(op = ?op, error = %e, "Operation failed, stopping apply");
                return Err(e);
            }
        }
        Ok(())
    }

    async fn execute_one(&self, op: &Op) -> Result<()> {
        let tx = &self.tx;
        match op {
            Op::SetOutput { power, antenna_cap } => {
                tx.set_output(*power, *antenna_cap).await?;
                if antenna_cap.is_auto() {
                    match tx.read_status().await {
                        Ok(status) => tracing::info!(antenna_cap = status.antenna_cap, "Auto antenna capacitor tuned"),
                        Err(e) => tracing::debug!(error = %e, "Antenna capacitor read-back failed"),
                    }
                }
                let _ = self.events.send(TxEvent::OutputChanged {
                    power: *power,
                    antenna_cap: *antenna_cap,
                });
            }
            Op::Tune(khz) => {
                tx.tune(*khz).await?;
                let _ = self.events.send(TxEvent::Tuned { frequency_khz: *khz });
            }
            Op::SetStereo(on) => tx.set_stereo(*on).await?,
            Op::SetPilot { freq_hz, deviation } => tx.set_pilot(*freq_hz, *deviation).await?,
            Op::SetAudio {
                deviation,
                preemphasis,
            } => tx.set_audio(*deviation, false, *preemphasis).await?,
            Op::SetAudioProcessing(p) => tx.set_audio_processing(p).await?,
            Op::RdsSetPi(pi) => tx.rds_set_pi(*pi).await?,
            Op::RdsSetPty(pty) => tx.rds_set_pty(*pty).await?,
            Op::RdsSetTp(on) => tx.rds_set_tp(*on).await?,
            Op::RdsSetTa(on) => tx.rds_set_ta(*on).await?,
            Op::RdsSetMs(music) => tx.rds_set_ms(*music).await?,
            Op::RdsSetDi(di) => tx.rds_set_di(*di).await?,
            Op::RdsSetDeviation(dev) => tx.rds_set_deviation(*dev).await?,
            Op::RdsEnable(on) => tx.rds_enable(*on).await?,
            Op::UpdatePs {
                entries,
                center,
                interval,
            } => self.rotation.set_ps(PsSettings {
                entries: entries.clone(),
                center: *center,
                interval: *interval,
            }),
            Op::UpdateRt(rt) => self.rotation.set_rt(rt.clone()),
            Op::UpdateMonitor(m) => {
                self.monitor.send_replace(m.clone());
            }
            Op::UpdateStreaming(s) => {
                let _ = self.events.send(TxEvent::StreamingChanged {
                    enabled: s.enabled,
                    url: s.url.clone(),
                });
            }
            Op::SetUecp(cfg) => self.set_uecp(cfg).await?,
        }
        Ok(())
    }

    /// Start, stop or rebind the UECP listener to match `cfg`.
    pub async fn set_uecp(&self, cfg: &UecpConfig) -> Result<()> {
        let mut slot = self.uecp.lock().await;
        if let Some(listener) = slot.take() {
            listener.shutdown().await;
        }
        if cfg.enabled {
            let listener = UecpListener::bind(cfg, Arc::clone(&self.tx), self.events.clone()).await?;
            *slot = Some(listener);
        }
        drop(slot);
        self.set_uecp_mode(cfg.enabled);
        Ok(())
    }

    fn set_uecp_mode(&self, enabled: bool) {
        let was = self.uecp_on.swap(enabled, Ordering::SeqCst);
        self.sync_rotation();
        if was != enabled {
            tracing::info!(enabled, "UECP mode changed");
            let _ = self.events.send(TxEvent::UecpModeChanged { enabled });
        }
    }

    /// Runtime UECP toggle. The stored snapshot follows, so a later diff
    /// sees the listener state as applied.
    pub async fn toggle_uecp(&self, enabled: bool) -> Result<()> {
        let _gate = self.gate.lock().await;
        let Some(applied) = self.last_applied() else {
            return Err(Error::NotConnected);
        };
        let mut cfg = (*applied.config).clone();
        if cfg.uecp.enabled == enabled {
            return Ok(());
        }
        cfg.uecp.enabled = enabled;

        self.converge(Some(applied.config.as_ref()), &cfg).await?;
        *self.last.write().unwrap_or_else(PoisonError::into_inner) = Some(AppliedConfig {
            name: applied.name,
            config: Arc::new(cfg),
        });
        Ok(())
    }

    /// Stop the UECP listener without touching the stored snapshot.
    pub async fn stop_uecp(&self) {
        self.stop_listener().await;
        self.set_uecp_mode(false);
    }

    /// Close the listener but leave the rotation paused.
    async fn stop_listener(&self) {
        if let Some(listener) = self.uecp.lock().await.take() {
            listener.shutdown().await;
        }
    }

    /// Reset the chip once any in-flight apply or recovery has finished.
    /// Call after [`set_on_air(false)`](Self::set_on_air) so a queued
    /// recovery does not bring the carrier back.
    pub async fn halt(&self) -> Result<()> {
        let _gate = self.gate.lock().await;
        self.tx.reset().await
    }

    /// Stop everything this applier started.
    pub async fn shutdown(self) {
        self.stop_uecp().await;
        self.rotation.shutdown().await;
    }
}

#[async_trait]
impl Recover for Applier {
    /// Reset the chip, bring it up and program the last snapshot in full.
    /// The rotations then re-send PS and RT.
    async fn recover(&self) -> Result<()> {
        let _gate = self.gate.lock().await;
        if !self.on_air.load(Ordering::SeqCst) {
            tracing::debug!("Off air, skipping recovery");
            return Ok(());
        }
        self.tx.reset().await?;
        self.tx.init().await?;

        if let Some(applied) = self.last_applied() {
            let chip_ops: Vec<Op> = diff(None, &applied.config)
                .into_iter()
                .filter(Op::touches_chip)
                .collect();
            tracing::info!(config = %applied.name, operations = chip_ops.len(), "Re-applying configuration");
            self.execute(&chip_ops).await?;
        }
        self.rotation.clear();
        Ok(())
    }
}
