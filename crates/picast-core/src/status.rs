//! Read-only status snapshot exposed to collaborators.
//!
//! The manager keeps one [`StatusSnapshot`] current by folding every
//! [`TxEvent`] into it with [`StatusSnapshot::apply_event`] and refreshing
//! `last_updated` at least once per second.

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::events::TxEvent;
use crate::types::{RtBank, RtSource, WatchdogState};

/// Snapshot of what the transmitter is doing right now.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct StatusSnapshot {
    pub broadcasting: bool,
    pub config_name: String,
    pub frequency_khz: u32,
    pub power: u8,
    /// Antenna capacitor step reported by the chip.
    pub antenna_cap: Option<u8>,
    pub pi: u16,
    pub pty: u8,
    /// PS currently on air, trimmed.
    pub ps: String,
    /// RadioText currently on air, trimmed.
    pub rt: String,
    pub rt_source: Option<RtSource>,
    pub rt_bank: Option<RtBank>,
    pub uecp_enabled: bool,
    pub overmodulation: bool,
    pub input_level_dbfs: Option<i8>,
    pub watchdog_state: WatchdogState,
    pub watchdog_status: String,
    pub last_updated: Option<DateTime<Local>>,
}

impl StatusSnapshot {
    /// Fold one event into the snapshot.
    pub fn apply_event(&mut self, event: &TxEvent) {
        match event {
            TxEvent::BroadcastStarted { config_name } => {
                self.broadcasting = true;
                self.config_name = config_name.clone();
            }
            TxEvent::BroadcastStopped => {
                self.broadcasting = false;
            }
            TxEvent::ConfigApplied { config_name, .. } => {
                self.config_name = config_name.clone();
            }
            TxEvent::Tuned { frequency_khz } => {
                self.frequency_khz = *frequency_khz;
            }
            TxEvent::OutputChanged { power, .. } => {
                self.power = *power;
            }
            TxEvent::PsChanged { text, .. } => {
                self.ps = text.trim().to_string();
            }
            TxEvent::RtChanged { text, bank, source } => {
                self.rt = text.trim_end_matches('\r').trim().to_string();
                self.rt_bank = Some(*bank);
                self.rt_source = Some(source.clone());
            }
            TxEvent::HealthPolled {
                overmodulated,
                input_level_dbfs,
                antenna_cap,
                ..
            } => {
                self.overmodulation = *overmodulated;
                if input_level_dbfs.is_some() {
                    self.input_level_dbfs = *input_level_dbfs;
                }
                if antenna_cap.is_some() {
                    self.antenna_cap = *antenna_cap;
                }
            }
            TxEvent::WatchdogStateChanged { state, status } => {
                self.watchdog_state = *state;
                self.watchdog_status = status.clone();
            }
            TxEvent::UecpModeChanged { enabled } => {
                self.uecp_enabled = *enabled;
            }
            TxEvent::UecpFieldApplied { .. } | TxEvent::StreamingChanged { .. } => {}
        }
        self.touch();
    }

    /// Stamp `last_updated` with the current local time.
    pub fn touch(&mut self) {
        self.last_updated = Some(Local::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_rt_and_ps() {
        let mut s = StatusSnapshot::default();
        s.apply_event(&TxEvent::PsChanged {
            text: " PICAST ".into(),
            index: Some(0),
        });
        s.apply_event(&TxEvent::RtChanged {
            text: "Hello\r".into(),
            bank: RtBank::A,
            source: RtSource::List(0),
        });
        assert_eq!(s.ps, "PICAST");
        assert_eq!(s.rt, "Hello");
        assert_eq!(s.rt_bank, Some(RtBank::A));
        assert_eq!(s.rt_source, Some(RtSource::List(0)));
        assert!(s.last_updated.is_some());
    }

    #[test]
    fn folds_watchdog_and_broadcast() {
        let mut s = StatusSnapshot::default();
        s.apply_event(&TxEvent::BroadcastStarted {
            config_name: "station".into(),
        });
        s.apply_event(&TxEvent::WatchdogStateChanged {
            state: WatchdogState::Failed,
            status: "gave up".into(),
        });
        assert!(s.broadcasting);
        assert_eq!(s.config_name, "station");
        assert_eq!(s.watchdog_state, WatchdogState::Failed);
        assert_eq!(s.watchdog_status, "gave up");

        s.apply_event(&TxEvent::BroadcastStopped);
        assert!(!s.broadcasting);
    }

    #[test]
    fn health_poll_keeps_last_known_level() {
        let mut s = StatusSnapshot::default();
        s.apply_event(&TxEvent::HealthPolled {
            transmitting: true,
            overmodulated: true,
            input_level_dbfs: Some(-3),
            antenna_cap: Some(42),
        });
        s.apply_event(&TxEvent::HealthPolled {
            transmitting: true,
            overmodulated: false,
            input_level_dbfs: None,
            antenna_cap: None,
        });
        assert!(!s.overmodulation);
        assert_eq!(s.input_level_dbfs, Some(-3));
        assert_eq!(s.antenna_cap, Some(42));
    }

    #[test]
    fn serializes_to_json() {
        let s = StatusSnapshot {
            frequency_khz: 98_700,
            ..StatusSnapshot::default()
        };
        let json = serde_json::to_string(&s).unwrap();
        assert!(json.contains("\"frequency_khz\":98700"));
        assert!(json.contains("\"watchdog_state\":{\"state\":\"healthy\"}"));
    }
}
