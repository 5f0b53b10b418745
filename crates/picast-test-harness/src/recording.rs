//! A [`Transmitter`] that records every call.
//!
//! [`RecordingTransmitter`] stands in for a real chip driver when testing
//! the layers above the register interface: the rotation engine, the UECP
//! listener, the watchdog and the config applier. Each call is logged with a
//! `tokio::time::Instant` so tests running on a paused clock can assert
//! exact pacing. Faults are injected through setters.

use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;

use picast_core::config::AudioProcessing;
use picast_core::error::{Error, Result};
use picast_core::transmitter::Transmitter;
use picast_core::types::*;

/// One recorded [`Transmitter`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum TxCall {
    Init,
    Reset,
    Tune(u32),
    SetOutput { power: u8, antenna_cap: AntennaCap },
    SetStereo(bool),
    SetPilot { freq_hz: u16, deviation: u16 },
    SetAudio { deviation: u16, mute: bool, preemphasis: Preemphasis },
    SetAudioProcessing(AudioProcessing),
    RdsEnable(bool),
    RdsSetPi(u16),
    RdsSetPty(u8),
    RdsSetTp(bool),
    RdsSetTa(bool),
    RdsSetMs(bool),
    RdsSetDi(DiFlags),
    RdsSetDeviation(u16),
    RdsSetPs { slot: u8, text: String },
    RdsSetRt { text: String, bank: RtBank, cr_terminate: bool },
    ReadStatus,
    ReadAsq,
    Close,
}

impl TxCall {
    /// Whether this call writes to the chip.
    pub fn is_write(&self) -> bool {
        !matches!(self, TxCall::ReadStatus | TxCall::ReadAsq | TxCall::Close)
    }
}

#[derive(Debug)]
struct Inner {
    log: Vec<(Instant, TxCall)>,
    frequency_khz: u32,
    power: u8,
    carrier: bool,
    heal_on_init: bool,
    fail_writes: usize,
    fail_status: bool,
    overmodulated: bool,
    input_level: i8,
}

/// Recording [`Transmitter`] with a tiny behavioural model.
///
/// `read_status` reports the last tuned frequency and output level while the
/// carrier is up, and power 0 after [`drop_carrier`](Self::drop_carrier).
/// By default `init` brings the carrier back.
#[derive(Debug)]
pub struct RecordingTransmitter {
    info: TransmitterInfo,
    inner: Mutex<Inner>,
}

impl RecordingTransmitter {
    pub fn new() -> Self {
        Self {
            info: TransmitterInfo {
                model: "Recording".into(),
                bus_address: 0x63,
            },
            inner: Mutex::new(Inner {
                log: Vec::new(),
                frequency_khz: 98_000,
                power: 115,
                carrier: true,
                heal_on_init: true,
                fail_writes: 0,
                fail_status: false,
                overmodulated: false,
                input_level: -20,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self, call: TxCall) -> Result<()> {
        let mut inner = self.lock();
        if inner.fail_writes > 0 {
            inner.fail_writes -= 1;
            return Err(Error::Transport(format!("injected failure on {call:?}")));
        }
        inner.log.push((Instant::now(), call));
        Ok(())
    }

    /// All recorded calls, oldest first.
    pub fn calls(&self) -> Vec<TxCall> {
        self.lock().log.iter().map(|(_, c)| c.clone()).collect()
    }

    /// All recorded calls with their timestamps.
    pub fn timed_calls(&self) -> Vec<(Instant, TxCall)> {
        self.lock().log.clone()
    }

    /// Recorded calls that write to the chip.
    pub fn writes(&self) -> Vec<TxCall> {
        self.calls().into_iter().filter(TxCall::is_write).collect()
    }

    /// `(time, text, bank)` for every RadioText load.
    pub fn rt_sends(&self) -> Vec<(Instant, String, RtBank)> {
        self.lock()
            .log
            .iter()
            .filter_map(|(at, c)| match c {
                TxCall::RdsSetRt { text, bank, .. } => Some((*at, text.clone(), *bank)),
                _ => None,
            })
            .collect()
    }

    /// `(time, text)` for every PS load.
    pub fn ps_sends(&self) -> Vec<(Instant, String)> {
        self.lock()
            .log
            .iter()
            .filter_map(|(at, c)| match c {
                TxCall::RdsSetPs { text, .. } => Some((*at, text.clone())),
                _ => None,
            })
            .collect()
    }

    /// Number of recorded calls matching `pred`.
    pub fn count(&self, pred: impl Fn(&TxCall) -> bool) -> usize {
        self.lock().log.iter().filter(|(_, c)| pred(c)).count()
    }

    pub fn clear(&self) {
        self.lock().log.clear();
    }

    /// Fail the next `n` write calls with a transport error.
    pub fn fail_next_writes(&self, n: usize) {
        self.lock().fail_writes = n;
    }

    /// Make `read_status` and `read_asq` fail with a transport error.
    pub fn set_status_failing(&self, failing: bool) {
        self.lock().fail_status = failing;
    }

    /// The carrier drops; `read_status` reports power 0.
    pub fn drop_carrier(&self) {
        self.lock().carrier = false;
    }

    /// Whether `init` restores a dropped carrier.
    pub fn set_heal_on_init(&self, heal: bool) {
        self.lock().heal_on_init = heal;
    }

    pub fn set_audio_input(&self, overmodulated: bool, level_dbfs: i8) {
        let mut inner = self.lock();
        inner.overmodulated = overmodulated;
        inner.input_level = level_dbfs;
    }
}

impl Default for RecordingTransmitter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transmitter for RecordingTransmitter {
    fn info(&self) -> &TransmitterInfo {
        &self.info
    }

    async fn init(&self) -> Result<()> {
        self.write(TxCall::Init)?;
        let mut inner = self.lock();
        if inner.heal_on_init {
            inner.carrier = true;
        }
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        self.write(TxCall::Reset)
    }

    async fn tune(&self, frequency_khz: u32) -> Result<()> {
        picast_core::limits::check_frequency(frequency_khz)?;
        self.write(TxCall::Tune(frequency_khz))?;
        self.lock().frequency_khz = frequency_khz;
        Ok(())
    }

    async fn set_output(&self, power: u8, antenna_cap: AntennaCap) -> Result<()> {
        picast_core::limits::check_power(power)?;
        self.write(TxCall::SetOutput { power, antenna_cap })?;
        self.lock().power = power;
        Ok(())
    }

    async fn set_stereo(&self, on: bool) -> Result<()> {
        self.write(TxCall::SetStereo(on))
    }

    async fn set_pilot(&self, freq_hz: u16, deviation: u16) -> Result<()> {
        self.write(TxCall::SetPilot { freq_hz, deviation })
    }

    async fn set_audio(&self, deviation: u16, mute: bool, preemphasis: Preemphasis) -> Result<()> {
        self.write(TxCall::SetAudio {
            deviation,
            mute,
            preemphasis,
        })
    }

    async fn set_audio_processing(&self, processing: &AudioProcessing) -> Result<()> {
        self.write(TxCall::SetAudioProcessing(*processing))
    }

    async fn rds_enable(&self, on: bool) -> Result<()> {
        self.write(TxCall::RdsEnable(on))
    }

    async fn rds_set_pi(&self, pi: u16) -> Result<()> {
        picast_core::limits::check_pi(pi)?;
        self.write(TxCall::RdsSetPi(pi))
    }

    async fn rds_set_pty(&self, pty: u8) -> Result<()> {
        picast_core::limits::check_pty(pty)?;
        self.write(TxCall::RdsSetPty(pty))
    }

    async fn rds_set_tp(&self, on: bool) -> Result<()> {
        self.write(TxCall::RdsSetTp(on))
    }

    async fn rds_set_ta(&self, on: bool) -> Result<()> {
        self.write(TxCall::RdsSetTa(on))
    }

    async fn rds_set_ms(&self, music: bool) -> Result<()> {
        self.write(TxCall::RdsSetMs(music))
    }

    async fn rds_set_di(&self, di: DiFlags) -> Result<()> {
        self.write(TxCall::RdsSetDi(di))
    }

    async fn rds_set_deviation(&self, deviation: u16) -> Result<()> {
        self.write(TxCall::RdsSetDeviation(deviation))
    }

    async fn rds_set_ps(&self, slot: u8, text: &str) -> Result<()> {
        picast_core::limits::check_ps(slot, text)?;
        self.write(TxCall::RdsSetPs {
            slot,
            text: text.to_string(),
        })
    }

    async fn rds_set_rt(&self, text: &str, bank: RtBank, cr_terminate: bool) -> Result<()> {
        picast_core::limits::check_rt(text)?;
        self.write(TxCall::RdsSetRt {
            text: text.to_string(),
            bank,
            cr_terminate,
        })
    }

    async fn read_status(&self) -> Result<TuneStatus> {
        let mut inner = self.lock();
        if inner.fail_status {
            return Err(Error::Transport("injected status failure".into()));
        }
        inner.log.push((Instant::now(), TxCall::ReadStatus));
        Ok(TuneStatus {
            frequency_khz: inner.frequency_khz,
            power: if inner.carrier { inner.power } else { 0 },
            antenna_cap: 42,
            overmodulated: inner.overmodulated,
        })
    }

    async fn read_asq(&self) -> Result<AsqStatus> {
        let mut inner = self.lock();
        if inner.fail_status {
            return Err(Error::Transport("injected status failure".into()));
        }
        inner.log.push((Instant::now(), TxCall::ReadAsq));
        Ok(AsqStatus {
            overmodulated: inner.overmodulated,
            input_level_dbfs: inner.input_level,
        })
    }

    async fn close(&self) -> Result<()> {
        self.lock().log.push((Instant::now(), TxCall::Close));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_calls_in_order() {
        let tx = RecordingTransmitter::new();
        tx.tune(98_700).await.unwrap();
        tx.rds_set_ps(0, "PICAST").await.unwrap();
        tx.rds_set_rt("Hello", RtBank::B, true).await.unwrap();

        assert_eq!(
            tx.calls(),
            vec![
                TxCall::Tune(98_700),
                TxCall::RdsSetPs {
                    slot: 0,
                    text: "PICAST".into()
                },
                TxCall::RdsSetRt {
                    text: "Hello".into(),
                    bank: RtBank::B,
                    cr_terminate: true
                },
            ]
        );
        assert_eq!(tx.rt_sends().len(), 1);
    }

    #[tokio::test]
    async fn validates_like_a_driver() {
        let tx = RecordingTransmitter::new();
        assert!(matches!(tx.tune(50_000).await, Err(Error::OutOfRange(_))));
        assert!(matches!(tx.rds_set_pty(40).await, Err(Error::InvalidField(_))));
        assert!(tx.calls().is_empty());
    }

    #[tokio::test]
    async fn carrier_model() {
        let tx = RecordingTransmitter::new();
        assert!(tx.read_status().await.unwrap().is_transmitting());

        tx.drop_carrier();
        assert!(!tx.read_status().await.unwrap().is_transmitting());

        tx.init().await.unwrap();
        assert!(tx.read_status().await.unwrap().is_transmitting());

        tx.set_heal_on_init(false);
        tx.drop_carrier();
        tx.init().await.unwrap();
        assert!(!tx.read_status().await.unwrap().is_transmitting());
    }

    #[tokio::test]
    async fn injected_failures() {
        let tx = RecordingTransmitter::new();
        tx.fail_next_writes(1);
        assert!(tx.rds_set_tp(true).await.unwrap_err().is_transport());
        tx.rds_set_tp(true).await.unwrap();

        tx.set_status_failing(true);
        assert!(tx.read_status().await.is_err());
        assert!(tx.read_asq().await.is_err());
    }
}
