//! Chip-legal bounds and the validators shared by the driver, the UECP
//! decoder and configuration validation.
//!
//! Every check here runs before a byte is written to the bus.

use crate::error::{Error, Result};

/// Lowest tunable frequency in kHz.
pub const FREQ_MIN_KHZ: u32 = 76_000;
/// Highest tunable frequency in kHz.
pub const FREQ_MAX_KHZ: u32 = 108_000;

/// Absolute TX_TUNE_POWER command ceiling in dBµV.
pub const POWER_MAX_DBUV: u8 = 120;
/// Datasheet ceiling; values above it are accepted with an advisory.
pub const POWER_ADVISORY_DBUV: u8 = 115;
/// Lowest power a configuration may request (below this the chip is
/// effectively muted; `0` is reserved for "carrier off").
pub const POWER_CONFIG_MIN_DBUV: u8 = 88;

/// Highest manual antenna capacitor step.
pub const ANTENNA_CAP_MAX: u8 = 191;

/// Highest Program Type code.
pub const PTY_MAX: u8 = 31;

/// Program Service slot width in characters.
pub const PS_LEN: usize = 8;
/// Number of PS slots held by the chip.
pub const PS_SLOTS: u8 = 8;
/// RadioText payload width in characters (group 2A).
pub const RT_LEN: usize = 32;

/// Audio deviation ceiling in 10 Hz units (90 kHz).
pub const AUDIO_DEVIATION_MAX: u16 = 9_000;
/// RDS deviation ceiling in 10 Hz units (7.5 kHz).
pub const RDS_DEVIATION_MAX: u16 = 750;

/// Fail with [`Error::OutOfRange`] unless `khz` is tunable.
pub fn check_frequency(khz: u32) -> Result<()> {
    if !(FREQ_MIN_KHZ..=FREQ_MAX_KHZ).contains(&khz) {
        return Err(Error::OutOfRange(format!(
            "frequency {khz} kHz outside {FREQ_MIN_KHZ}..={FREQ_MAX_KHZ}"
        )));
    }
    Ok(())
}

/// Fail with [`Error::OutOfRange`] above the absolute command ceiling.
///
/// Returns `true` when the value is legal but above the datasheet
/// advisory, so the caller can log a warning.
pub fn check_power(power: u8) -> Result<bool> {
    if power > POWER_MAX_DBUV {
        return Err(Error::OutOfRange(format!(
            "power {power} dBuV above {POWER_MAX_DBUV}"
        )));
    }
    Ok(power > POWER_ADVISORY_DBUV)
}

/// Fail with [`Error::OutOfRange`] for a manual capacitor step above 191.
pub fn check_antenna_cap(step: u8) -> Result<()> {
    if step > ANTENNA_CAP_MAX {
        return Err(Error::OutOfRange(format!(
            "antenna cap {step} above {ANTENNA_CAP_MAX}"
        )));
    }
    Ok(())
}

/// Fail with [`Error::InvalidField`] for the reserved PI code 0x0000.
pub fn check_pi(pi: u16) -> Result<()> {
    if pi == 0 {
        return Err(Error::InvalidField("PI 0x0000 is reserved".into()));
    }
    Ok(())
}

/// Fail with [`Error::InvalidField`] for PTY codes above 31.
pub fn check_pty(pty: u8) -> Result<()> {
    if pty > PTY_MAX {
        return Err(Error::InvalidField(format!("PTY {pty} above {PTY_MAX}")));
    }
    Ok(())
}

/// Fail with [`Error::InvalidField`] for an out-of-range PS slot or a text
/// longer than one slot.
pub fn check_ps(slot: u8, text: &str) -> Result<()> {
    if slot >= PS_SLOTS {
        return Err(Error::InvalidField(format!(
            "PS slot {slot} outside 0..{PS_SLOTS}"
        )));
    }
    check_text("PS", text, PS_LEN)
}

/// Fail with [`Error::InvalidField`] for RadioText longer than 32 chars.
pub fn check_rt(text: &str) -> Result<()> {
    check_text("RT", text, RT_LEN)
}

fn check_text(field: &str, text: &str, max: usize) -> Result<()> {
    let n = text.chars().count();
    if n > max {
        return Err(Error::InvalidField(format!(
            "{field} text is {n} chars, limit {max}"
        )));
    }
    if text.chars().any(|c| c.is_control() && c != '\r') {
        return Err(Error::InvalidField(format!(
            "{field} text contains control characters"
        )));
    }
    Ok(())
}
