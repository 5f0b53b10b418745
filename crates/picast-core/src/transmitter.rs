//! The `Transmitter` trait -- the Device Register Interface contract.
//!
//! This trait is the capability interface every producer (rotation engine,
//! UECP listener, watchdog, config applier) programs against. Each method is
//! one semantic operation; an implementation must hold exclusive access to
//! the bus for the whole byte sequence of that operation and release it
//! before returning, so operations from different producers never
//! interleave.
//!
//! Implementations validate their arguments before touching the bus:
//! out-of-bounds RF values fail with [`Error::OutOfRange`] and malformed RDS
//! fields fail with [`Error::InvalidField`]. Callers are expected to have
//! validated already; the re-check is cheap and keeps the chip consistent.
//!
//! [`Error::OutOfRange`]: crate::error::Error::OutOfRange
//! [`Error::InvalidField`]: crate::error::Error::InvalidField

use async_trait::async_trait;

use crate::config::AudioProcessing;
use crate::error::Result;
use crate::types::*;

/// Asynchronous interface to an FM/RDS transmitter chip.
///
/// All methods take `&self`; implementations serialize bus access
/// internally. Methods returning cached data ([`info()`](Transmitter::info))
/// are synchronous.
#[async_trait]
pub trait Transmitter: Send + Sync {
    /// Return static information about the chip.
    fn info(&self) -> &TransmitterInfo;

    /// Power the chip up and load the baseline properties.
    async fn init(&self) -> Result<()>;

    /// Reset the chip. The carrier stops and all registers are lost;
    /// [`init`](Transmitter::init) is required before further use.
    async fn reset(&self) -> Result<()>;

    /// Tune the carrier. Fails with `OutOfRange` outside 76000..=108000 kHz.
    async fn tune(&self, frequency_khz: u32) -> Result<()>;

    /// Set output level and antenna capacitor mode.
    ///
    /// Fails with `OutOfRange` above 120 dBµV. Levels above 115 dBµV are
    /// accepted with a logged advisory.
    async fn set_output(&self, power: u8, antenna_cap: AntennaCap) -> Result<()>;

    /// Enable or disable the stereo pilot and L-R subcarrier.
    async fn set_stereo(&self, on: bool) -> Result<()>;

    /// Program pilot tone frequency (Hz) and deviation (10 Hz units).
    async fn set_pilot(&self, freq_hz: u16, deviation: u16) -> Result<()>;

    /// Program audio deviation (10 Hz units), line-input mute and
    /// pre-emphasis.
    async fn set_audio(&self, deviation: u16, mute: bool, preemphasis: Preemphasis) -> Result<()>;

    /// Program AGC, compressor and limiter registers.
    async fn set_audio_processing(&self, processing: &AudioProcessing) -> Result<()>;

    /// Enable or disable the RDS subcarrier.
    async fn rds_enable(&self, on: bool) -> Result<()>;

    /// Set Program Identification.
    async fn rds_set_pi(&self, pi: u16) -> Result<()>;

    /// Set Program Type (0..=31).
    async fn rds_set_pty(&self, pty: u8) -> Result<()>;

    /// Set the Traffic Programme flag.
    async fn rds_set_tp(&self, on: bool) -> Result<()>;

    /// Set the Traffic Announcement flag.
    async fn rds_set_ta(&self, on: bool) -> Result<()>;

    /// Set the Music/Speech flag (`true` = music).
    async fn rds_set_ms(&self, music: bool) -> Result<()>;

    /// Set the Decoder Identification flags.
    async fn rds_set_di(&self, di: DiFlags) -> Result<()>;

    /// Set RDS subcarrier deviation (10 Hz units).
    async fn rds_set_deviation(&self, deviation: u16) -> Result<()>;

    /// Load `text` (at most 8 chars, space padded) into PS slot `slot`.
    async fn rds_set_ps(&self, slot: u8, text: &str) -> Result<()>;

    /// Load a RadioText message (at most 32 chars) with the given A/B bank.
    ///
    /// With `cr_terminate`, a carriage return follows texts shorter than 32
    /// characters.
    async fn rds_set_rt(&self, text: &str, bank: RtBank, cr_terminate: bool) -> Result<()>;

    /// Read tune status (frequency, power, antenna cap, overmodulation).
    async fn read_status(&self) -> Result<TuneStatus>;

    /// Read audio signal quality and clear its interrupt flags.
    async fn read_asq(&self) -> Result<AsqStatus>;

    /// Read the chip revision.
    async fn read_revision(&self) -> Result<Revision> {
        Err(crate::error::Error::Unsupported(
            "revision read not supported".into(),
        ))
    }

    /// Release the bus.
    async fn close(&self) -> Result<()>;
}
