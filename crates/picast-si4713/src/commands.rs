//! SI4713 command builders and response parsers.
//!
//! All functions are pure: they build the byte sequence for one bus write,
//! or decode the bytes of one bus read. Every response begins with the
//! status byte; bit 7 is CTS (clear to send) and bit 6 flags a command
//! error.

use picast_core::error::{Error, Result};
use picast_core::helpers::{pad_fixed, to_latin1};
use picast_core::limits::{PS_LEN, RT_LEN};
use picast_core::types::{AsqStatus, Revision, RtBank, TuneStatus};

// ---------------------------------------------------------------
// Command bytes
// ---------------------------------------------------------------

pub const CMD_POWER_UP: u8 = 0x01;
pub const CMD_GET_REV: u8 = 0x10;
pub const CMD_POWER_DOWN: u8 = 0x11;
pub const CMD_SET_PROPERTY: u8 = 0x12;
pub const CMD_TX_TUNE_FREQ: u8 = 0x30;
pub const CMD_TX_TUNE_POWER: u8 = 0x31;
pub const CMD_TX_TUNE_STATUS: u8 = 0x33;
pub const CMD_TX_ASQ_STATUS: u8 = 0x34;
pub const CMD_TX_RDS_BUFF: u8 = 0x35;
pub const CMD_TX_RDS_PS: u8 = 0x36;
pub const CMD_GPO_CTL: u8 = 0x80;

pub const STATUS_CTS: u8 = 0x80;
pub const STATUS_ERR: u8 = 0x40;

/// Response lengths, status byte included.
pub const TUNE_STATUS_LEN: usize = 8;
pub const ASQ_STATUS_LEN: usize = 5;
pub const REVISION_LEN: usize = 9;

/// POWER_UP arguments: crystal oscillator on, transmit function, analog
/// audio inputs.
const POWER_UP_ARGS: [u8; 2] = [0x12, 0x50];
/// GPO1..3 as outputs.
const GPO_OUTPUTS: u8 = 0x0E;

/// TX_RDS_BUFF flags: load into the circular buffer, and on the first
/// segment also empty it first.
const RDS_BUFF_LOAD: u8 = 0x04;
const RDS_BUFF_EMPTY: u8 = 0x02;

/// Number of RadioText segments (group 2A carries 4 characters each).
pub const RT_SEGMENTS: usize = RT_LEN / 4;

const CR: u8 = 0x0D;

// ---------------------------------------------------------------
// Builders
// ---------------------------------------------------------------

pub fn cmd_power_up() -> Vec<u8> {
    vec![CMD_POWER_UP, POWER_UP_ARGS[0], POWER_UP_ARGS[1]]
}

pub fn cmd_power_down() -> Vec<u8> {
    vec![CMD_POWER_DOWN]
}

pub fn cmd_gpo_ctl() -> Vec<u8> {
    vec![CMD_GPO_CTL, GPO_OUTPUTS]
}

pub fn cmd_get_rev() -> Vec<u8> {
    vec![CMD_GET_REV]
}

pub fn cmd_set_property(prop: u16, value: u16) -> Vec<u8> {
    let [p_hi, p_lo] = prop.to_be_bytes();
    let [v_hi, v_lo] = value.to_be_bytes();
    vec![CMD_SET_PROPERTY, 0x00, p_hi, p_lo, v_hi, v_lo]
}

/// Frequency is sent in 10 kHz units, rounded to nearest.
pub fn cmd_tune_freq(frequency_khz: u32) -> Vec<u8> {
    let units = ((frequency_khz + 5) / 10) as u16;
    let [hi, lo] = units.to_be_bytes();
    vec![CMD_TX_TUNE_FREQ, 0x00, hi, lo]
}

/// `cap` 0 selects automatic antenna tuning.
pub fn cmd_tune_power(power: u8, cap: u8) -> Vec<u8> {
    vec![CMD_TX_TUNE_POWER, 0x00, 0x00, power, cap]
}

pub fn cmd_tune_status() -> Vec<u8> {
    vec![CMD_TX_TUNE_STATUS, 0x00]
}

/// With `clear`, the sticky ASQ interrupt flags are reset.
pub fn cmd_asq_status(clear: bool) -> Vec<u8> {
    vec![CMD_TX_ASQ_STATUS, u8::from(clear)]
}

/// Load 4 PS characters into half of a PS slot. `group` is `slot * 2` for
/// the first half and `slot * 2 + 1` for the second.
pub fn cmd_rds_ps(group: u8, chars: [u8; 4]) -> Vec<u8> {
    vec![
        CMD_TX_RDS_PS,
        group,
        chars[0],
        chars[1],
        chars[2],
        chars[3],
    ]
}

/// Group 2A block B: group type 2, version A, TP, PTY, A/B flag and the
/// segment address.
pub fn rds_block_b(tp: bool, pty: u8, bank: RtBank, segment: u8) -> u16 {
    (2 << 12)
        | (u16::from(tp) << 10)
        | ((u16::from(pty) & 0x1F) << 5)
        | (u16::from(bank.bit()) << 4)
        | (u16::from(segment) & 0x0F)
}

pub fn cmd_rds_buff(first: bool, block_b: u16, chars: [u8; 4]) -> Vec<u8> {
    let flags = if first {
        RDS_BUFF_LOAD | RDS_BUFF_EMPTY
    } else {
        RDS_BUFF_LOAD
    };
    let [b_hi, b_lo] = block_b.to_be_bytes();
    vec![
        CMD_TX_RDS_BUFF,
        flags,
        b_hi,
        b_lo,
        chars[0],
        chars[1],
        chars[2],
        chars[3],
    ]
}

/// The two PS writes for `text` in `slot`, space padded to 8 characters.
pub fn cmd_rds_ps_slot(slot: u8, text: &str) -> [Vec<u8>; 2] {
    let payload = ps_payload(text);
    let group = slot * 2;
    [
        cmd_rds_ps(group, [payload[0], payload[1], payload[2], payload[3]]),
        cmd_rds_ps(group + 1, [payload[4], payload[5], payload[6], payload[7]]),
    ]
}

/// The eight TX_RDS_BUFF writes carrying a full RadioText.
pub fn cmd_rt_segments(payload: &[u8; RT_LEN], tp: bool, pty: u8, bank: RtBank) -> Vec<Vec<u8>> {
    payload
        .chunks_exact(4)
        .enumerate()
        .map(|(seg, chunk)| {
            let block_b = rds_block_b(tp, pty, bank, seg as u8);
            cmd_rds_buff(seg == 0, block_b, [chunk[0], chunk[1], chunk[2], chunk[3]])
        })
        .collect()
}

/// PS characters as Latin-1, space padded.
pub fn ps_payload(text: &str) -> [u8; PS_LEN] {
    let bytes = to_latin1(&pad_fixed(text, PS_LEN));
    let mut out = [b' '; PS_LEN];
    out.copy_from_slice(&bytes[..PS_LEN]);
    out
}

/// The 32-byte RadioText buffer image.
///
/// Text is truncated to 32 characters and space padded. With
/// `cr_terminate`, a carriage return follows a shorter text unless it
/// already ends with one.
pub fn rt_payload(text: &str, cr_terminate: bool) -> [u8; RT_LEN] {
    let bytes = to_latin1(text);
    let len = bytes.len().min(RT_LEN);
    let mut out = [b' '; RT_LEN];
    out[..len].copy_from_slice(&bytes[..len]);
    if cr_terminate && len < RT_LEN && (len == 0 || out[len - 1] != CR) {
        out[len] = CR;
    }
    out
}

// ---------------------------------------------------------------
// Parsers
// ---------------------------------------------------------------

fn check_len(resp: &[u8], want: usize, what: &str) -> Result<()> {
    if resp.len() < want {
        return Err(Error::Protocol(format!(
            "{what} response too short: {} of {want} bytes",
            resp.len()
        )));
    }
    Ok(())
}

pub fn parse_tune_status(resp: &[u8]) -> Result<TuneStatus> {
    check_len(resp, TUNE_STATUS_LEN, "TX_TUNE_STATUS")?;
    let units = u16::from_be_bytes([resp[2], resp[3]]);
    Ok(TuneStatus {
        frequency_khz: u32::from(units) * 10,
        power: resp[5],
        antenna_cap: resp[6],
        overmodulated: resp[1] & 0x04 != 0,
    })
}

pub fn parse_asq_status(resp: &[u8]) -> Result<AsqStatus> {
    check_len(resp, ASQ_STATUS_LEN, "TX_ASQ_STATUS")?;
    Ok(AsqStatus {
        overmodulated: resp[1] & 0x04 != 0,
        input_level_dbfs: resp[4] as i8,
    })
}

pub fn parse_revision(resp: &[u8]) -> Result<Revision> {
    check_len(resp, REVISION_LEN, "GET_REV")?;
    Ok(Revision {
        part_number: resp[1],
        firmware: [resp[2], resp[3]].iter().map(|&b| char::from(b)).collect(),
        chip_revision: char::from(resp[8]),
    })
}
