//! Station configuration snapshots.
//!
//! A [`ConfigSnapshot`] is the immutable aggregate the manager diffs and
//! applies. It deserializes from a JSON document with the sections `rf`,
//! `audio`, `rds` (with nested `di` and `rt`), `uecp`, `monitor` and
//! `streaming`. Units are fixed: frequency in kHz, power in dBµV, audio and
//! RDS deviation in 10 Hz units, RT gap in milliseconds.
//!
//! # Example
//!
//! ```
//! use picast_core::config::ConfigSnapshot;
//!
//! let cfg = ConfigSnapshot::from_json_str(r#"{
//!     "rf":  { "frequency_khz": 98700, "power": 115 },
//!     "rds": { "pi": "0xC201", "pty": 10, "ps": ["PICAST", "FM"] }
//! }"#).unwrap();
//! assert_eq!(cfg.rds.pi, 0xC201);
//! assert!(cfg.validate().is_ok());
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};
use crate::limits;
use crate::types::{AbMode, AntennaCap, DiFlags, Preemphasis};

/// Shortest PS or RT rotation interval.
pub const MIN_ROTATION_INTERVAL: Duration = Duration::from_millis(500);
/// Longest interval, backoff or rotation step a configuration may ask for.
pub const MAX_INTERVAL_S: u32 = 86_400;

/// Complete station configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub rf: RfConfig,
    #[serde(default)]
    pub audio: AudioProcessing,
    pub rds: RdsConfig,
    #[serde(default)]
    pub uecp: UecpConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub streaming: StreamingConfig,
}

/// RF output settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RfConfig {
    /// Carrier frequency in kHz.
    pub frequency_khz: u32,
    /// Output level in dBµV.
    pub power: u8,
    #[serde(default)]
    pub antenna_cap: AntennaCap,
    /// Audio deviation in 10 Hz units (7500 = 75 kHz).
    #[serde(default = "default_audio_deviation")]
    pub audio_deviation_hz: u16,
    /// Audio deviation used while RDS is off, in 10 Hz units.
    #[serde(default)]
    pub audio_deviation_no_rds_hz: Option<u16>,
    #[serde(default)]
    pub preemphasis: Preemphasis,
}

fn default_audio_deviation() -> u16 {
    7_500
}

impl Default for RfConfig {
    fn default() -> Self {
        RfConfig {
            frequency_khz: 98_000,
            power: 115,
            antenna_cap: AntennaCap::default(),
            audio_deviation_hz: default_audio_deviation(),
            audio_deviation_no_rds_hz: None,
            preemphasis: Preemphasis::default(),
        }
    }
}

/// Built-in audio dynamics processor registers.
///
/// Values are chip register indices, not physical units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioProcessing {
    pub agc: bool,
    pub limiter: bool,
    /// Compressor threshold, -40..=0 (dBFS).
    pub compressor_threshold: i16,
    /// Compressor attack index, 0..=9.
    pub compressor_attack: u16,
    /// Compressor release index, 0..=5.
    pub compressor_release: u16,
    /// Compressor gain, 0..=20 (dB).
    pub compressor_gain: u16,
    /// Limiter release index, 5..=2000.
    pub limiter_release: u16,
}

impl Default for AudioProcessing {
    fn default() -> Self {
        AudioProcessing {
            agc: false,
            limiter: true,
            compressor_threshold: -30,
            compressor_attack: 0,
            compressor_release: 2,
            compressor_gain: 15,
            limiter_release: 50,
        }
    }
}

/// RDS identity, flags and rotations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RdsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Program Identification; a number or a hex string such as `"0xC201"`.
    #[serde(deserialize_with = "deserialize_pi")]
    pub pi: u16,
    pub pty: u8,
    #[serde(default = "default_true")]
    pub tp: bool,
    #[serde(default)]
    pub ta: bool,
    #[serde(default = "default_true")]
    pub ms_music: bool,
    #[serde(default)]
    pub di: DiFlags,
    /// PS slots in rotation order.
    pub ps: Vec<String>,
    #[serde(default = "default_true")]
    pub ps_center: bool,
    /// Seconds per PS slot.
    #[serde(default = "default_ps_speed")]
    pub ps_speed: u32,
    /// RDS deviation in 10 Hz units (200 = 2 kHz).
    #[serde(default = "default_rds_deviation")]
    pub deviation_hz: u16,
    #[serde(default)]
    pub rt: RtConfig,
}

fn default_true() -> bool {
    true
}

fn default_ps_speed() -> u32 {
    10
}

fn default_rds_deviation() -> u16 {
    200
}

impl Default for RdsConfig {
    fn default() -> Self {
        RdsConfig {
            enabled: true,
            pi: 0x1000,
            pty: 0,
            tp: true,
            ta: false,
            ms_music: true,
            di: DiFlags::default(),
            ps: vec!["PICAST".into()],
            ps_center: true,
            ps_speed: default_ps_speed(),
            deviation_hz: default_rds_deviation(),
            rt: RtConfig::default(),
        }
    }
}

impl RdsConfig {
    /// Interval between PS slot advances.
    pub fn ps_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.ps_speed)).max(MIN_ROTATION_INTERVAL)
    }
}

fn deserialize_pi<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u16, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u64),
        Text(String),
    }

    let value = match Raw::deserialize(deserializer)? {
        Raw::Num(n) => n,
        Raw::Text(s) => {
            let t = s.trim();
            let parsed = match t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
                Some(hex) => u64::from_str_radix(hex, 16),
                None => t.parse::<u64>(),
            };
            parsed.map_err(|e| serde::de::Error::custom(format!("invalid PI {s:?}: {e}")))?
        }
    };
    u16::try_from(value).map_err(|_| serde::de::Error::custom(format!("PI {value} exceeds 16 bits")))
}

/// RadioText rotation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RtConfig {
    /// Fallback text when `texts` is empty and no file is active.
    pub text: String,
    /// Rotation list.
    pub texts: Vec<String>,
    /// Seconds per rotation step.
    pub speed_s: f64,
    pub center: bool,
    /// Override file; its first non-empty line supersedes the list.
    pub file_path: Option<PathBuf>,
    /// Case-insensitive substrings removed from the expanded text.
    pub skip_words: Vec<String>,
    pub ab_mode: AbMode,
    /// Transmissions per burst.
    pub repeats: u32,
    /// Spacing between burst transmissions in milliseconds.
    pub gap_ms: u64,
    /// Explicit bank (0 = A, 1 = B) for `ab_mode = "bank"`.
    pub bank: Option<u8>,
}

impl Default for RtConfig {
    fn default() -> Self {
        RtConfig {
            text: String::new(),
            texts: Vec::new(),
            speed_s: 10.0,
            center: true,
            file_path: None,
            skip_words: Vec::new(),
            ab_mode: AbMode::default(),
            repeats: 3,
            gap_ms: 60,
            bank: None,
        }
    }
}

impl RtConfig {
    /// Interval between rotation steps.
    pub fn interval(&self) -> Duration {
        secs_clamped(self.speed_s).max(MIN_ROTATION_INTERVAL)
    }

    /// Spacing between burst transmissions.
    pub fn gap(&self) -> Duration {
        Duration::from_millis(self.gap_ms)
    }
}

/// UECP listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UecpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    /// Answer frames with a non-zero sequence counter.
    pub ack: bool,
    /// TCP sessions idle for this long are closed.
    pub idle_timeout_s: u64,
}

impl Default for UecpConfig {
    fn default() -> Self {
        UecpConfig {
            enabled: false,
            host: "0.0.0.0".into(),
            port: 4001,
            ack: true,
            idle_timeout_s: 120,
        }
    }
}

impl UecpConfig {
    /// `host:port` bind string.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Health monitoring and recovery parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Poll TX_TUNE_STATUS and recover when the carrier drops.
    pub health: bool,
    /// Poll TX_ASQ_STATUS for overmodulation.
    pub asq: bool,
    pub interval_s: f64,
    pub recovery_attempts: u32,
    pub recovery_backoff_s: f64,
    /// Overmodulation is ignored while the input level is at or below this
    /// many dBFS; `null` disables the filter.
    #[serde(default = "default_overmod_ignore")]
    pub overmod_ignore_below_dbfs: Option<f64>,
}

fn default_overmod_ignore() -> Option<f64> {
    Some(-5.0)
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            health: true,
            asq: true,
            interval_s: 1.0,
            recovery_attempts: 3,
            recovery_backoff_s: 0.5,
            overmod_ignore_below_dbfs: default_overmod_ignore(),
        }
    }
}

impl MonitorConfig {
    /// Poll interval.
    pub fn interval(&self) -> Duration {
        secs_clamped(self.interval_s).max(Duration::from_millis(100))
    }

    /// Backoff before recovery attempt `attempt` (1-based): linear.
    pub fn backoff(&self, attempt: u32) -> Duration {
        secs_clamped(self.recovery_backoff_s * f64::from(attempt))
    }

    /// Window after a broadcast start in which failed polls are not counted.
    pub fn grace(&self) -> Duration {
        self.interval()
            .checked_mul(3)
            .unwrap_or(Duration::MAX)
            .max(Duration::from_secs(1))
    }
}

/// Audio stream settings, consumed by the player collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    pub enabled: bool,
    pub url: String,
}

impl ConfigSnapshot {
    /// Parse a JSON document. Syntax and type errors map to [`Error::Config`].
    pub fn from_json_str(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| Error::Config(e.to_string()))
    }

    /// Whether RDS is transmitted. UECP input forces RDS on.
    pub fn effective_rds_enabled(&self) -> bool {
        self.rds.enabled || self.uecp.enabled
    }

    /// Audio deviation to program, honoring the no-RDS variant.
    pub fn effective_audio_deviation(&self) -> u16 {
        match self.rf.audio_deviation_no_rds_hz {
            Some(dev) if !self.effective_rds_enabled() && dev > 0 => dev,
            _ => self.rf.audio_deviation_hz,
        }
    }

    /// Check every field against chip and protocol bounds.
    ///
    /// Returns the first violation as [`Error::Config`]; nothing is applied
    /// when this fails.
    pub fn validate(&self) -> Result<()> {
        let rf = &self.rf;
        limits::check_frequency(rf.frequency_khz).map_err(to_config)?;
        if !(limits::POWER_CONFIG_MIN_DBUV..=limits::POWER_MAX_DBUV).contains(&rf.power) {
            return Err(Error::Config(format!(
                "rf.power {} outside {}..={} dBuV",
                rf.power,
                limits::POWER_CONFIG_MIN_DBUV,
                limits::POWER_MAX_DBUV
            )));
        }
        if let AntennaCap::Manual(step) = rf.antenna_cap {
            limits::check_antenna_cap(step).map_err(to_config)?;
        }
        for (name, dev) in [
            ("rf.audio_deviation_hz", Some(rf.audio_deviation_hz)),
            ("rf.audio_deviation_no_rds_hz", rf.audio_deviation_no_rds_hz),
        ] {
            match dev {
                Some(dev) if dev > limits::AUDIO_DEVIATION_MAX => {
                    return Err(Error::Config(format!(
                        "{name} {dev} above {}",
                        limits::AUDIO_DEVIATION_MAX
                    )));
                }
                _ => {}
            }
        }

        let a = &self.audio;
        ensure(
            (-40..=0).contains(&a.compressor_threshold),
            "audio.compressor_threshold must be in -40..=0",
        )?;
        ensure(a.compressor_attack <= 9, "audio.compressor_attack must be <= 9")?;
        ensure(a.compressor_release <= 5, "audio.compressor_release must be <= 5")?;
        ensure(a.compressor_gain <= 20, "audio.compressor_gain must be <= 20")?;
        ensure(
            (5..=2000).contains(&a.limiter_release),
            "audio.limiter_release must be in 5..=2000",
        )?;

        let rds = &self.rds;
        limits::check_pi(rds.pi).map_err(to_config)?;
        limits::check_pty(rds.pty).map_err(to_config)?;
        ensure(!rds.ps.is_empty(), "rds.ps must be a non-empty list")?;
        ensure(
            rds.ps.len() <= usize::from(limits::PS_SLOTS),
            "rds.ps holds at most 8 entries",
        )?;
        for entry in &rds.ps {
            if entry.chars().any(char::is_control) {
                return Err(Error::Config(format!(
                    "rds.ps entry {entry:?} contains control characters"
                )));
            }
            if !entry.contains('{') && entry.chars().count() > limits::PS_LEN {
                return Err(Error::Config(format!(
                    "rds.ps entry {entry:?} longer than {} chars",
                    limits::PS_LEN
                )));
            }
        }
        ensure(
            (1..=MAX_INTERVAL_S).contains(&rds.ps_speed),
            "rds.ps_speed must be in 1..=86400",
        )?;
        ensure(
            rds.deviation_hz <= limits::RDS_DEVIATION_MAX,
            "rds.deviation_hz above 750 (7.5 kHz)",
        )?;

        let rt = &rds.rt;
        ensure(
            rt.speed_s > 0.0 && rt.speed_s <= f64::from(MAX_INTERVAL_S),
            "rds.rt.speed_s must be in (0, 86400]",
        )?;
        ensure(
            (1..=10).contains(&rt.repeats),
            "rds.rt.repeats must be in 1..=10",
        )?;
        ensure(rt.gap_ms <= 10_000, "rds.rt.gap_ms must be <= 10000")?;
        if let Some(bank) = rt.bank {
            ensure(bank <= 1, "rds.rt.bank must be 0 (A) or 1 (B)")?;
        }

        if self.uecp.enabled {
            ensure(!self.uecp.host.trim().is_empty(), "uecp.host must be set")?;
        }

        let m = &self.monitor;
        ensure(
            m.interval_s > 0.0 && m.interval_s <= f64::from(MAX_INTERVAL_S),
            "monitor.interval_s must be in (0, 86400]",
        )?;
        ensure(
            m.recovery_backoff_s >= 0.0 && m.recovery_backoff_s <= f64::from(MAX_INTERVAL_S),
            "monitor.recovery_backoff_s must be in [0, 86400]",
        )?;
        if let Some(dbfs) = m.overmod_ignore_below_dbfs {
            ensure(
                dbfs.is_finite(),
                "monitor.overmod_ignore_below_dbfs must be a number",
            )?;
        }

        if self.streaming.enabled {
            ensure(
                !self.streaming.url.trim().is_empty(),
                "streaming.url must be set when streaming is enabled",
            )?;
        }
        Ok(())
    }
}

/// Seconds as a `Duration`, saturating at [`MAX_INTERVAL_S`]. NaN and
/// negative values give zero.
fn secs_clamped(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    let max = Duration::from_secs(u64::from(MAX_INTERVAL_S));
    Duration::try_from_secs_f64(secs.min(max.as_secs_f64())).unwrap_or(max)
}

fn ensure(cond: bool, msg: &str) -> Result<()> {
    if cond {
        Ok(())
    } else {
        Err(Error::Config(msg.to_string()))
    }
}

fn to_config(e: Error) -> Error {
    Error::Config(e.to_string())
}
