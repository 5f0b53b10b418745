//! Behavioural SI4713 simulator.
//!
//! [`SimulatedSi4713`] is a [`Transport`] that decodes the command bytes a
//! driver writes and keeps the resulting chip state: tuned frequency, output
//! level, the property table, PS slots and the RadioText buffer. Status
//! commands answer from that state. A cloneable [`SimHandle`] inspects the
//! state and injects faults (NACKed writes, a stuck CTS bit, carrier loss,
//! overmodulation) while the transport itself is owned by the driver.
//!
//! It backs the manager and watchdog tests, and the `--mock` mode of the
//! command-line app.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use picast_core::error::{Error, Result};
use picast_core::transport::Transport;
use picast_core::types::RtBank;

const STATUS_CTS: u8 = 0x80;
const STATUS_ERR: u8 = 0x40;

/// Capacitor step the simulated tuning loop settles on in auto mode.
pub const SIM_AUTO_ANTENNA_CAP: u8 = 42;

#[derive(Debug, Default)]
struct SimState {
    connected: bool,
    powered: bool,
    frequency_10khz: u16,
    power: u8,
    antenna_cap: u8,
    properties: BTreeMap<u16, u16>,
    ps: [[u8; 4]; 16],
    rt: [[u8; 4]; 8],
    rt_ab: Option<bool>,
    rt_loads: usize,
    response: Vec<u8>,
    writes: Vec<Vec<u8>>,
    fail_sends: usize,
    cts_stuck: bool,
    overmodulated: bool,
    input_level: i8,
    resets: usize,
    power_ups: usize,
}

impl SimState {
    fn execute(&mut self, cmd: &[u8]) {
        let status = if self.cts_stuck { 0x00 } else { STATUS_CTS };
        let Some(&op) = cmd.first() else {
            self.response = vec![status | STATUS_ERR];
            return;
        };

        if op != 0x01 && !self.powered {
            self.response = vec![status | STATUS_ERR];
            return;
        }

        self.response = vec![status];
        match op {
            // POWER_UP
            0x01 => {
                self.powered = true;
                self.power_ups += 1;
            }
            // POWER_DOWN
            0x11 => {
                self.power_down();
                self.response = vec![status];
            }
            // GET_REV: Si4713, firmware 3.0, chip rev A
            0x10 => {
                self.response = vec![status, 13, b'3', b'0', 0, 0, b'3', b'0', b'A'];
            }
            // SET_PROPERTY
            0x12 if cmd.len() >= 6 => {
                let prop = u16::from_be_bytes([cmd[2], cmd[3]]);
                let value = u16::from_be_bytes([cmd[4], cmd[5]]);
                self.properties.insert(prop, value);
            }
            // TX_TUNE_FREQ
            0x30 if cmd.len() >= 4 => {
                self.frequency_10khz = u16::from_be_bytes([cmd[2], cmd[3]]);
            }
            // TX_TUNE_POWER
            0x31 if cmd.len() >= 5 => {
                self.power = cmd[3];
                self.antenna_cap = if cmd[4] == 0 {
                    SIM_AUTO_ANTENNA_CAP
                } else {
                    cmd[4]
                };
            }
            // TX_TUNE_STATUS
            0x33 => {
                let [f_hi, f_lo] = self.frequency_10khz.to_be_bytes();
                let flags = if self.overmodulated { 0x04 } else { 0x00 };
                self.response = vec![
                    status,
                    flags,
                    f_hi,
                    f_lo,
                    0,
                    self.power,
                    self.antenna_cap,
                    0,
                ];
            }
            // TX_ASQ_STATUS, optionally clearing the sticky flags
            0x34 => {
                let flags = if self.overmodulated { 0x04 } else { 0x00 };
                self.response = vec![status, flags, 0, 0, self.input_level as u8];
                if cmd.get(1).copied().unwrap_or(0) & 0x01 != 0 {
                    self.overmodulated = false;
                }
            }
            // TX_RDS_BUFF
            0x35 if cmd.len() >= 8 => {
                let block_b = u16::from_be_bytes([cmd[2], cmd[3]]);
                let segment = usize::from(block_b & 0x0F) % 8;
                if cmd[1] & 0x02 != 0 {
                    self.rt = Default::default();
                    self.rt_loads += 1;
                }
                self.rt[segment].copy_from_slice(&cmd[4..8]);
                self.rt_ab = Some(block_b & 0x10 != 0);
            }
            // TX_RDS_PS
            0x36 if cmd.len() >= 6 => {
                let group = usize::from(cmd[1]) % 16;
                self.ps[group].copy_from_slice(&cmd[2..6]);
            }
            0x80 => {}
            _ => {
                self.response = vec![status | STATUS_ERR];
            }
        }
    }

    fn power_down(&mut self) {
        self.powered = false;
        self.frequency_10khz = 0;
        self.power = 0;
        self.antenna_cap = 0;
        self.properties.clear();
        self.ps = Default::default();
        self.rt = Default::default();
        self.rt_ab = None;
        self.response.clear();
    }
}

/// A simulated SI4713 on the bus.
#[derive(Debug)]
pub struct SimulatedSi4713 {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedSi4713 {
    /// A connected, powered-down chip.
    pub fn new() -> Self {
        let state = SimState {
            connected: true,
            ..SimState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// A handle that stays valid after the transport is moved into a driver.
    pub fn handle(&self) -> SimHandle {
        SimHandle {
            state: Arc::clone(&self.state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SimulatedSi4713 {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for SimulatedSi4713 {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let mut state = self.lock();
        if !state.connected {
            return Err(Error::NotConnected);
        }
        if state.fail_sends > 0 {
            state.fail_sends -= 1;
            return Err(Error::Transport("simulated I2C NACK".into()));
        }
        state.writes.push(data.to_vec());
        state.execute(data);
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        let state = self.lock();
        if !state.connected {
            return Err(Error::NotConnected);
        }
        if state.response.is_empty() {
            return Err(Error::Timeout);
        }
        let n = state.response.len().min(buf.len());
        buf[..n].copy_from_slice(&state.response[..n]);
        Ok(n)
    }

    async fn reset(&mut self) -> Result<()> {
        let mut state = self.lock();
        state.resets += 1;
        state.power_down();
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.lock().connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }
}

/// Inspection and fault-injection handle for a [`SimulatedSi4713`].
#[derive(Debug, Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimHandle {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_powered(&self) -> bool {
        self.lock().powered
    }

    pub fn frequency_khz(&self) -> u32 {
        u32::from(self.lock().frequency_10khz) * 10
    }

    pub fn power(&self) -> u8 {
        self.lock().power
    }

    pub fn antenna_cap(&self) -> u8 {
        self.lock().antenna_cap
    }

    /// Current value of a chip property, if ever set since power-up.
    pub fn property(&self, prop: u16) -> Option<u16> {
        self.lock().properties.get(&prop).copied()
    }

    /// The 8 characters loaded into PS slot `slot`.
    pub fn ps_slot(&self, slot: u8) -> String {
        let state = self.lock();
        let group = usize::from(slot) * 2;
        state.ps[group % 16]
            .iter()
            .chain(state.ps[(group + 1) % 16].iter())
            .map(|&b| char::from(b))
            .collect()
    }

    /// The 32-byte RadioText buffer as loaded, CR included.
    pub fn rt_raw(&self) -> String {
        self.lock()
            .rt
            .iter()
            .flatten()
            .map(|&b| char::from(b))
            .collect()
    }

    /// RadioText up to the CR terminator, trailing spaces trimmed.
    pub fn rt_text(&self) -> String {
        let raw = self.rt_raw();
        raw.split('\r').next().unwrap_or("").trim_end().to_string()
    }

    /// A/B flag of the last RadioText segment written.
    pub fn rt_bank(&self) -> Option<RtBank> {
        self.lock().rt_ab.map(|b| RtBank::from_bit(u8::from(b)))
    }

    /// Number of complete RadioText loads (segment 0 with buffer reset).
    pub fn rt_loads(&self) -> usize {
        self.lock().rt_loads
    }

    /// Every write the chip accepted, oldest first.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.lock().writes.clone()
    }

    /// Accepted writes whose first byte is `op`.
    pub fn writes_with_opcode(&self, op: u8) -> Vec<Vec<u8>> {
        self.lock()
            .writes
            .iter()
            .filter(|w| w.first() == Some(&op))
            .cloned()
            .collect()
    }

    pub fn clear_writes(&self) {
        self.lock().writes.clear();
    }

    pub fn reset_count(&self) -> usize {
        self.lock().resets
    }

    pub fn power_up_count(&self) -> usize {
        self.lock().power_ups
    }

    /// NACK the next `n` writes with a transport error.
    pub fn fail_next_sends(&self, n: usize) {
        self.lock().fail_sends = n;
    }

    /// Hold the CTS bit low so every command times out.
    pub fn set_cts_stuck(&self, stuck: bool) {
        self.lock().cts_stuck = stuck;
    }

    /// Latch overmodulation and set the reported input level.
    pub fn set_audio_input(&self, overmodulated: bool, level_dbfs: i8) {
        let mut state = self.lock();
        state.overmodulated = overmodulated;
        state.input_level = level_dbfs;
    }

    /// The carrier drops while the chip stays powered.
    pub fn drop_carrier(&self) {
        self.lock().power = 0;
    }

    /// Brown-out: the chip loses power and all register state.
    pub fn power_loss(&self) {
        self.lock().power_down();
    }

    pub fn set_connected(&self, connected: bool) {
        self.lock().connected = connected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: Duration = Duration::from_millis(5);

    async fn write(sim: &mut SimulatedSi4713, cmd: &[u8]) -> Vec<u8> {
        sim.send(cmd).await.unwrap();
        let mut buf = [0u8; 16];
        let n = sim.receive(&mut buf, T).await.unwrap();
        buf[..n].to_vec()
    }

    #[tokio::test]
    async fn rejects_commands_before_power_up() {
        let mut sim = SimulatedSi4713::new();
        let resp = write(&mut sim, &[0x30, 0x00, 0x26, 0x8E]).await;
        assert_eq!(resp[0] & STATUS_ERR, STATUS_ERR);

        let resp = write(&mut sim, &[0x01, 0x12, 0x50]).await;
        assert_eq!(resp, vec![STATUS_CTS]);
        assert!(sim.handle().is_powered());
    }

    #[tokio::test]
    async fn tune_and_report_status() {
        let mut sim = SimulatedSi4713::new();
        let handle = sim.handle();
        write(&mut sim, &[0x01, 0x12, 0x50]).await;
        write(&mut sim, &[0x30, 0x00, 0x26, 0x8E]).await;
        write(&mut sim, &[0x31, 0x00, 0x00, 115, 0]).await;

        let status = write(&mut sim, &[0x33, 0x00]).await;
        assert_eq!(u16::from_be_bytes([status[2], status[3]]), 9870);
        assert_eq!(status[5], 115);
        assert_eq!(status[6], SIM_AUTO_ANTENNA_CAP);
        assert_eq!(handle.frequency_khz(), 98_700);
    }

    #[tokio::test]
    async fn radiotext_and_ps_buffers() {
        let mut sim = SimulatedSi4713::new();
        let handle = sim.handle();
        write(&mut sim, &[0x01, 0x12, 0x50]).await;
        write(&mut sim, &[0x36, 0x00, b'P', b'I', b'C', b'A']).await;
        write(&mut sim, &[0x36, 0x01, b'S', b'T', b' ', b' ']).await;
        assert_eq!(handle.ps_slot(0), "PICAST  ");

        // Segment 0 with the reset flag and bank B.
        write(&mut sim, &[0x35, 0x06, 0x20, 0x10, b'H', b'i', b'\r', b' ']).await;
        assert_eq!(handle.rt_text(), "Hi");
        assert_eq!(handle.rt_bank(), Some(RtBank::B));
        assert_eq!(handle.rt_loads(), 1);
    }

    #[tokio::test]
    async fn asq_clear_drops_overmod_latch() {
        let mut sim = SimulatedSi4713::new();
        let handle = sim.handle();
        write(&mut sim, &[0x01, 0x12, 0x50]).await;
        handle.set_audio_input(true, -2);

        let asq = write(&mut sim, &[0x34, 0x00]).await;
        assert_eq!(asq[1] & 0x04, 0x04);
        assert_eq!(asq[4] as i8, -2);

        write(&mut sim, &[0x34, 0x01]).await;
        let asq = write(&mut sim, &[0x34, 0x00]).await;
        assert_eq!(asq[1] & 0x04, 0);
    }

    #[tokio::test]
    async fn faults() {
        let mut sim = SimulatedSi4713::new();
        let handle = sim.handle();
        handle.fail_next_sends(1);
        assert!(matches!(
            sim.send(&[0x01, 0x12, 0x50]).await,
            Err(Error::Transport(_))
        ));
        write(&mut sim, &[0x01, 0x12, 0x50]).await;

        handle.set_cts_stuck(true);
        let resp = write(&mut sim, &[0x80, 0x0E]).await;
        assert_eq!(resp[0] & STATUS_CTS, 0);
        handle.set_cts_stuck(false);

        sim.reset().await.unwrap();
        assert!(!handle.is_powered());
        assert_eq!(handle.reset_count(), 1);
    }
}
