//! SI4713 property addresses and register bit layouts.
//!
//! Properties are 16-bit registers written with SET_PROPERTY. Three of them
//! pack several independent fields ([`TX_COMPONENT_ENABLE`],
//! [`TX_ACOMP_ENABLE`], [`TX_RDS_PS_MISC`]); the `with_*` helpers update
//! one field of a packed value without disturbing the others.

use picast_core::types::{DiFlags, Preemphasis};

// ---------------------------------------------------------------
// Property addresses
// ---------------------------------------------------------------

/// Reference clock frequency in Hz.
pub const REFCLK_FREQ: u16 = 0x0201;
/// Pilot / L-R / RDS enables.
pub const TX_COMPONENT_ENABLE: u16 = 0x2100;
/// Audio deviation, 10 Hz units.
pub const TX_AUDIO_DEVIATION: u16 = 0x2101;
/// Pilot deviation, 10 Hz units.
pub const TX_PILOT_DEVIATION: u16 = 0x2102;
/// RDS deviation, 10 Hz units.
pub const TX_RDS_DEVIATION: u16 = 0x2103;
/// Line input mute.
pub const TX_LINE_INPUT_MUTE: u16 = 0x2105;
/// Pre-emphasis selector.
pub const TX_PREEMPHASIS: u16 = 0x2106;
/// Pilot tone frequency in Hz.
pub const TX_PILOT_FREQUENCY: u16 = 0x2107;
/// Audio dynamic range control enables.
pub const TX_ACOMP_ENABLE: u16 = 0x2200;
pub const TX_ACOMP_THRESHOLD: u16 = 0x2201;
pub const TX_ACOMP_ATTACK_TIME: u16 = 0x2202;
pub const TX_ACOMP_RELEASE_TIME: u16 = 0x2203;
pub const TX_ACOMP_GAIN: u16 = 0x2204;
pub const TX_LIMITER_RELEASE_TIME: u16 = 0x2205;
/// Which ASQ conditions raise the interrupt.
pub const TX_ASQ_INTERRUPT_SELECT: u16 = 0x2300;
pub const TX_RDS_PI: u16 = 0x2C01;
/// PTY, TP, TA, MS and DI.
pub const TX_RDS_PS_MISC: u16 = 0x2C03;
/// Times each PS slot repeats before the next.
pub const TX_RDS_PS_REPEAT_COUNT: u16 = 0x2C04;
/// Number of PS slots in rotation.
pub const TX_RDS_PS_MESSAGE_COUNT: u16 = 0x2C05;

// ---------------------------------------------------------------
// Fixed values
// ---------------------------------------------------------------

/// Overmodulation, input-low and input-high all raise ASQ.
pub const ASQ_INTERRUPTS_ALL: u16 = 0x0007;
pub const LINE_INPUT_MUTED: u16 = 0x0003;
/// Standard 19 kHz pilot.
pub const PILOT_FREQUENCY_HZ: u16 = 19_000;
/// 6.75 kHz pilot deviation.
pub const PILOT_DEVIATION_10HZ: u16 = 675;
/// The PS rotation is driven from software through slot 0 only.
pub const PS_MESSAGE_COUNT: u16 = 1;
pub const PS_REPEAT_COUNT: u16 = 3;

// ---------------------------------------------------------------
// Packed field layouts
// ---------------------------------------------------------------

const COMPONENT_STEREO: u16 = 0x0003;
const COMPONENT_RDS: u16 = 0x0004;

const ACOMP_AGC: u16 = 0x0001;
const ACOMP_LIMITER: u16 = 0x0002;

const MISC_PTY_MASK: u16 = 0xFC1F;
const MISC_PTY_SHIFT: u16 = 5;
const MISC_MS: u16 = 1 << 3;
const MISC_TA: u16 = 1 << 4;
const MISC_TP: u16 = 1 << 10;
const MISC_DI_DYNAMIC_PTY: u16 = 1 << 12;
const MISC_DI_COMPRESSED: u16 = 1 << 13;
const MISC_DI_ARTIFICIAL_HEAD: u16 = 1 << 14;
const MISC_DI_STEREO: u16 = 1 << 15;

fn set_bits(value: u16, bits: u16, on: bool) -> u16 {
    if on { value | bits } else { value & !bits }
}

/// Pilot and L-R subcarrier together.
pub fn with_stereo(component: u16, on: bool) -> u16 {
    set_bits(component, COMPONENT_STEREO, on)
}

pub fn with_rds(component: u16, on: bool) -> u16 {
    set_bits(component, COMPONENT_RDS, on)
}

pub fn with_agc(acomp: u16, on: bool) -> u16 {
    set_bits(acomp, ACOMP_AGC, on)
}

pub fn with_limiter(acomp: u16, on: bool) -> u16 {
    set_bits(acomp, ACOMP_LIMITER, on)
}

pub fn with_pty(misc: u16, pty: u8) -> u16 {
    (misc & MISC_PTY_MASK) | ((u16::from(pty) & 0x1F) << MISC_PTY_SHIFT)
}

pub fn with_tp(misc: u16, on: bool) -> u16 {
    set_bits(misc, MISC_TP, on)
}

pub fn with_ta(misc: u16, on: bool) -> u16 {
    set_bits(misc, MISC_TA, on)
}

pub fn with_ms(misc: u16, music: bool) -> u16 {
    set_bits(misc, MISC_MS, music)
}

pub fn with_di(misc: u16, di: DiFlags) -> u16 {
    let misc = set_bits(misc, MISC_DI_DYNAMIC_PTY, di.dynamic_pty);
    let misc = set_bits(misc, MISC_DI_COMPRESSED, di.compressed);
    let misc = set_bits(misc, MISC_DI_ARTIFICIAL_HEAD, di.artificial_head);
    set_bits(misc, MISC_DI_STEREO, di.stereo)
}

/// PTY currently packed into `misc`.
pub fn misc_pty(misc: u16) -> u8 {
    ((misc >> MISC_PTY_SHIFT) & 0x1F) as u8
}

/// TP currently packed into `misc`.
pub fn misc_tp(misc: u16) -> bool {
    misc & MISC_TP != 0
}

/// TX_PREEMPHASIS selector value.
pub fn preemphasis_value(p: Preemphasis) -> u16 {
    match p {
        Preemphasis::Us75 => 0,
        Preemphasis::Us50 => 1,
        Preemphasis::None => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pty_replaces_only_its_field() {
        let misc = with_tp(0, true);
        let misc = with_pty(misc, 10);
        assert_eq!(misc, (1 << 10) | (10 << 5));
        let misc = with_pty(misc, 31);
        assert_eq!(misc_pty(misc), 31);
        assert!(misc_tp(misc));
    }

    #[test]
    fn di_bits_live_in_upper_nibble() {
        let di = DiFlags {
            stereo: true,
            artificial_head: false,
            compressed: true,
            dynamic_pty: false,
        };
        assert_eq!(with_di(0, di), 0xA000);
        assert_eq!(with_di(0xFFFF, DiFlags::from_bits(0)), 0x0FFF);
    }

    #[test]
    fn component_and_acomp() {
        assert_eq!(with_rds(with_stereo(0, true), true), 0x0007);
        assert_eq!(with_stereo(0x0007, false), 0x0004);
        assert_eq!(with_limiter(with_agc(0, true), true), 0x0003);
        assert_eq!(with_agc(0x0003, false), 0x0002);
    }

    #[test]
    fn preemphasis_selector() {
        assert_eq!(preemphasis_value(Preemphasis::Us75), 0);
        assert_eq!(preemphasis_value(Preemphasis::Us50), 1);
        assert_eq!(preemphasis_value(Preemphasis::None), 2);
    }

    #[test]
    fn ms_and_ta_flags() {
        let misc = with_ta(with_ms(0, true), true);
        assert_eq!(misc, 0x0018);
        assert_eq!(with_ms(misc, false), 0x0010);
    }
}
