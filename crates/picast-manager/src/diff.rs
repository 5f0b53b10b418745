//! Config diff engine.
//!
//! [`diff`] compares two [`ConfigSnapshot`]s field by field and returns the
//! operations that move the transmitter from the first to the second. It
//! never touches the bus; [`Applier`](crate::apply::Applier) executes the
//! result.
//!
//! Operations come out grouped by [`Stage`]: RF before audio before RDS
//! identity before the rotations, then monitor and streaming parameters,
//! and UECP last since it decides who may write RDS fields afterwards.

use std::time::Duration;

use picast_core::config::{
    AudioProcessing, ConfigSnapshot, MonitorConfig, RtConfig, StreamingConfig, UecpConfig,
};
use picast_core::types::{AntennaCap, DiFlags, Preemphasis};

/// Standard pilot tone, programmed on first apply only.
pub const PILOT_FREQ_HZ: u16 = 19_000;
/// 6.75 kHz pilot deviation in 10 Hz units.
pub const PILOT_DEVIATION: u16 = 675;

/// Execution group of an [`Op`]. Ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Rf,
    Audio,
    RdsIdentity,
    Rotation,
    Monitor,
    Uecp,
}

/// One step towards a target configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    SetOutput { power: u8, antenna_cap: AntennaCap },
    Tune(u32),
    SetStereo(bool),
    SetPilot { freq_hz: u16, deviation: u16 },
    SetAudio { deviation: u16, preemphasis: Preemphasis },
    SetAudioProcessing(AudioProcessing),
    RdsSetPi(u16),
    RdsSetPty(u8),
    RdsSetTp(bool),
    RdsSetTa(bool),
    RdsSetMs(bool),
    RdsSetDi(DiFlags),
    RdsSetDeviation(u16),
    RdsEnable(bool),
    /// Replace the PS rotation list.
    UpdatePs {
        entries: Vec<String>,
        center: bool,
        interval: Duration,
    },
    /// Replace the RadioText rotation settings.
    UpdateRt(RtConfig),
    UpdateMonitor(MonitorConfig),
    UpdateStreaming(StreamingConfig),
    SetUecp(UecpConfig),
}

impl Op {
    pub fn stage(&self) -> Stage {
        match self {
            Op::SetOutput { .. } | Op::Tune(_) | Op::SetStereo(_) | Op::SetPilot { .. } => Stage::Rf,
            Op::SetAudio { .. } | Op::SetAudioProcessing(_) => Stage::Audio,
            Op::RdsSetPi(_)
            | Op::RdsSetPty(_)
            | Op::RdsSetTp(_)
            | Op::RdsSetTa(_)
            | Op::RdsSetMs(_)
            | Op::RdsSetDi(_)
            | Op::RdsSetDeviation(_)
            | Op::RdsEnable(_) => Stage::RdsIdentity,
            Op::UpdatePs { .. } | Op::UpdateRt(_) => Stage::Rotation,
            Op::UpdateMonitor(_) | Op::UpdateStreaming(_) => Stage::Monitor,
            Op::SetUecp(_) => Stage::Uecp,
        }
    }

    /// Whether executing this op writes to the chip.
    pub fn touches_chip(&self) -> bool {
        matches!(self.stage(), Stage::Rf | Stage::Audio | Stage::RdsIdentity)
    }
}

/// Operations that converge `prev` to `next`. With no `prev`, every field
/// counts as changed.
///
/// # Example
///
/// ```
/// use picast_core::config::ConfigSnapshot;
/// use picast_manager::diff::{diff, Op};
///
/// let old = ConfigSnapshot::default();
/// let mut new = old.clone();
/// new.rds.pty = 10;
/// assert_eq!(diff(Some(&old), &new), vec![Op::RdsSetPty(10)]);
/// ```
pub fn diff(prev: Option<&ConfigSnapshot>, next: &ConfigSnapshot) -> Vec<Op> {
    let mut ops = Vec::new();
    let changed = |f: &dyn Fn(&ConfigSnapshot) -> bool| prev.is_none_or(|p| !f(p));

    let (rf, rds) = (&next.rf, &next.rds);

    if changed(&|p| p.rf.power == rf.power && p.rf.antenna_cap == rf.antenna_cap) {
        ops.push(Op::SetOutput {
            power: rf.power,
            antenna_cap: rf.antenna_cap,
        });
    }
    if changed(&|p| p.rf.frequency_khz == rf.frequency_khz) {
        ops.push(Op::Tune(rf.frequency_khz));
    }
    if prev.is_none() {
        ops.push(Op::SetStereo(true));
        ops.push(Op::SetPilot {
            freq_hz: PILOT_FREQ_HZ,
            deviation: PILOT_DEVIATION,
        });
    }

    let deviation = next.effective_audio_deviation();
    if changed(&|p| {
        p.effective_audio_deviation() == deviation && p.rf.preemphasis == rf.preemphasis
    }) {
        ops.push(Op::SetAudio {
            deviation,
            preemphasis: rf.preemphasis,
        });
    }
    if changed(&|p| p.audio == next.audio) {
        ops.push(Op::SetAudioProcessing(next.audio));
    }

    if changed(&|p| p.rds.pi == rds.pi) {
        ops.push(Op::RdsSetPi(rds.pi));
    }
    if changed(&|p| p.rds.pty == rds.pty) {
        ops.push(Op::RdsSetPty(rds.pty));
    }
    if changed(&|p| p.rds.tp == rds.tp) {
        ops.push(Op::RdsSetTp(rds.tp));
    }
    if changed(&|p| p.rds.ta == rds.ta) {
        ops.push(Op::RdsSetTa(rds.ta));
    }
    if changed(&|p| p.rds.ms_music == rds.ms_music) {
        ops.push(Op::RdsSetMs(rds.ms_music));
    }
    if changed(&|p| p.rds.di == rds.di) {
        ops.push(Op::RdsSetDi(rds.di));
    }
    if changed(&|p| p.rds.deviation_hz == rds.deviation_hz) {
        ops.push(Op::RdsSetDeviation(rds.deviation_hz));
    }
    let rds_on = next.effective_rds_enabled();
    if changed(&|p| p.effective_rds_enabled() == rds_on) {
        ops.push(Op::RdsEnable(rds_on));
    }

    if changed(&|p| {
        p.rds.ps == rds.ps && p.rds.ps_center == rds.ps_center && p.rds.ps_speed == rds.ps_speed
    }) {
        ops.push(Op::UpdatePs {
            entries: rds.ps.clone(),
            center: rds.ps_center,
            interval: rds.ps_interval(),
        });
    }
    if changed(&|p| p.rds.rt == rds.rt) {
        ops.push(Op::UpdateRt(rds.rt.clone()));
    }

    if changed(&|p| p.monitor == next.monitor) {
        ops.push(Op::UpdateMonitor(next.monitor.clone()));
    }
    if changed(&|p| p.streaming == next.streaming) {
        ops.push(Op::UpdateStreaming(next.streaming.clone()));
    }
    if changed(&|p| p.uecp == next.uecp) {
        ops.push(Op::SetUecp(next.uecp.clone()));
    }

    // Already grouped by construction; the sort pins the contract.
    ops.sort_by_key(Op::stage);
    ops
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> ConfigSnapshot {
        ConfigSnapshot::default()
    }

    #[test]
    fn identical_snapshots_produce_nothing() {
        let cfg = base();
        assert!(diff(Some(&cfg), &cfg.clone()).is_empty());
    }

    #[test]
    fn pty_only_change_is_one_op() {
        let old = base();
        let mut new = old.clone();
        new.rds.pty = 10;
        assert_eq!(diff(Some(&old), &new), vec![Op::RdsSetPty(10)]);
    }

    #[test]
    fn first_apply_covers_every_stage_in_order() {
        let ops = diff(None, &base());
        let stages: Vec<Stage> = ops.iter().map(Op::stage).collect();
        let mut sorted = stages.clone();
        sorted.sort();
        assert_eq!(stages, sorted);

        assert!(ops.contains(&Op::Tune(98_000)));
        assert!(ops.contains(&Op::SetStereo(true)));
        assert!(ops.contains(&Op::SetPilot {
            freq_hz: 19_000,
            deviation: 675
        }));
        assert!(ops.contains(&Op::RdsEnable(true)));
        assert!(matches!(ops.last(), Some(Op::SetUecp(_))));
        assert_eq!(ops.iter().filter(|o| o.stage() == Stage::Rotation).count(), 2);
    }

    #[test]
    fn rf_changes_come_before_rds_changes() {
        let old = base();
        let mut new = old.clone();
        new.rds.pi = 0xC201;
        new.rf.frequency_khz = 104_100;
        new.uecp.enabled = true;
        let ops = diff(Some(&old), &new);
        assert_eq!(ops.first(), Some(&Op::Tune(104_100)));
        assert!(matches!(ops.last(), Some(Op::SetUecp(c)) if c.enabled));
    }

    #[test]
    fn enabling_uecp_forces_rds_on() {
        let mut old = base();
        old.rds.enabled = false;
        let mut new = old.clone();
        new.uecp.enabled = true;
        let ops = diff(Some(&old), &new);
        assert!(ops.contains(&Op::RdsEnable(true)));
    }

    #[test]
    fn no_rds_deviation_follows_rds_state() {
        let mut old = base();
        old.rf.audio_deviation_no_rds_hz = Some(6_800);
        let mut new = old.clone();
        new.rds.enabled = false;
        let ops = diff(Some(&old), &new);
        assert!(ops.contains(&Op::SetAudio {
            deviation: 6_800,
            preemphasis: Preemphasis::Us50
        }));
        assert!(ops.contains(&Op::RdsEnable(false)));
    }

    #[test]
    fn output_op_carries_both_fields() {
        let old = base();
        let mut new = old.clone();
        new.rf.antenna_cap = AntennaCap::Auto;
        assert_eq!(
            diff(Some(&old), &new),
            vec![Op::SetOutput {
                power: 115,
                antenna_cap: AntennaCap::Auto
            }]
        );
    }

    #[test]
    fn rotation_changes() {
        let old = base();
        let mut new = old.clone();
        new.rds.ps = vec!["STATION".into(), "NEWS-FM".into()];
        new.rds.rt.texts = vec!["Hello".into()];
        let ops = diff(Some(&old), &new);
        assert_eq!(ops.len(), 2);
        assert!(matches!(&ops[0], Op::UpdatePs { entries, .. } if entries.len() == 2));
        assert!(matches!(&ops[1], Op::UpdateRt(rt) if rt.texts == vec!["Hello".to_string()]));
    }

    #[test]
    fn chip_ops_flagged() {
        assert!(Op::Tune(98_000).touches_chip());
        assert!(Op::RdsSetPty(3).touches_chip());
        assert!(!Op::UpdateMonitor(MonitorConfig::default()).touches_chip());
        assert!(!Op::SetUecp(UecpConfig::default()).touches_chip());
    }
}
