//! UECP message element decoding.
//!
//! The MSG field of a frame carries one or more message elements, each
//! starting with its message element code (MEC). Only the RDS fields the
//! SI4713 can carry are decoded; an element with any other MEC stops
//! decoding because its length cannot be known without a full UECP table,
//! and is reported as [`UecpCommand::Unsupported`].
//!
//! | MEC  | Field | Layout after MEC          |
//! |------|-------|---------------------------|
//! | 0x01 | PI    | DSN PSN PI(2)             |
//! | 0x02 | PS    | DSN PSN text(8)           |
//! | 0x03 | TA/TP | DSN PSN flags             |
//! | 0x04 | DI    | DSN PSN flags             |
//! | 0x05 | MS    | DSN PSN flag              |
//! | 0x07 | PTY   | DSN PSN pty               |
//! | 0x0A | RT    | DSN PSN MEL [cfg text..]  |

use picast_core::error::{Error, Result};
use picast_core::helpers::from_latin1;
use picast_core::limits::{PS_LEN, RT_LEN};
use picast_core::types::DiFlags;

pub const MEC_PI: u8 = 0x01;
pub const MEC_PS: u8 = 0x02;
pub const MEC_TA_TP: u8 = 0x03;
pub const MEC_DI: u8 = 0x04;
pub const MEC_MS: u8 = 0x05;
pub const MEC_PTY: u8 = 0x07;
pub const MEC_RT: u8 = 0x0A;

/// One decoded message element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UecpCommand {
    Pi(u16),
    /// Eight characters, control characters replaced by spaces.
    Ps(String),
    TaTp { ta: bool, tp: bool },
    Di(DiFlags),
    /// `true` = music.
    Ms(bool),
    Pty(u8),
    /// RadioText, cut at the first CR and truncated to 32 characters.
    Rt {
        text: String,
        /// The encoder asked for the A/B flag to toggle.
        toggle: bool,
        /// Requested transmission count (0 = encoder default).
        repeats: u8,
    },
    /// An RT element with MEL 0: clear the RadioText buffer.
    RtClear,
    /// An element this decoder does not handle. Decoding stopped here.
    Unsupported(u8),
}

impl UecpCommand {
    /// Field name used in events and logs.
    pub fn field(&self) -> &'static str {
        match self {
            UecpCommand::Pi(_) => "pi",
            UecpCommand::Ps(_) => "ps",
            UecpCommand::TaTp { .. } => "ta_tp",
            UecpCommand::Di(_) => "di",
            UecpCommand::Ms(_) => "ms",
            UecpCommand::Pty(_) => "pty",
            UecpCommand::Rt { .. } | UecpCommand::RtClear => "rt",
            UecpCommand::Unsupported(_) => "unsupported",
        }
    }
}

/// Decode every message element in `msg`.
///
/// A truncated element is a [`Error::Protocol`]; the elements before it are
/// discarded with it, so a frame is applied whole or not at all.
pub fn parse_message(msg: &[u8]) -> Result<Vec<UecpCommand>> {
    let mut commands = Vec::new();
    let mut rest = msg;

    while let Some((&mec, body)) = rest.split_first() {
        let (command, used) = match mec {
            MEC_PI => {
                let b = take(body, 4, "PI")?;
                (UecpCommand::Pi(u16::from_be_bytes([b[2], b[3]])), 4)
            }
            MEC_PS => {
                let b = take(body, 2 + PS_LEN, "PS")?;
                (UecpCommand::Ps(clean_text(&b[2..])), 2 + PS_LEN)
            }
            MEC_TA_TP => {
                let b = take(body, 3, "TA/TP")?;
                let ta = b[2] & 0x01 != 0;
                let tp = b[2] & 0x02 != 0;
                (UecpCommand::TaTp { ta, tp }, 3)
            }
            MEC_DI => {
                let b = take(body, 3, "DI")?;
                (UecpCommand::Di(DiFlags::from_bits(b[2])), 3)
            }
            MEC_MS => {
                let b = take(body, 3, "MS")?;
                (UecpCommand::Ms(b[2] & 0x01 != 0), 3)
            }
            MEC_PTY => {
                let b = take(body, 3, "PTY")?;
                (UecpCommand::Pty(b[2]), 3)
            }
            MEC_RT => parse_rt(body)?,
            other => {
                tracing::debug!(
                    mec = format_args!("0x{:02X}", other),
                    remaining = rest.len(),
                    "Unsupported UECP message element, ignoring rest of message"
                );
                commands.push(UecpCommand::Unsupported(other));
                break;
            }
        };
        commands.push(command);
        rest = &body[used..];
    }

    Ok(commands)
}

fn parse_rt(body: &[u8]) -> Result<(UecpCommand, usize)> {
    let head = take(body, 3, "RT")?;
    let mel = usize::from(head[2]);
    if mel == 0 {
        return Ok((UecpCommand::RtClear, 3));
    }
    let data = take(&body[3..], mel, "RT")?;
    let config = data[0];
    let raw = &data[1..];
    let raw = match raw.iter().position(|&b| b == b'\r') {
        Some(cr) => &raw[..cr],
        None => raw,
    };
    let text: String = clean_text(raw).chars().take(RT_LEN).collect();
    let command = UecpCommand::Rt {
        text,
        toggle: config & 0x01 != 0,
        repeats: (config >> 1) & 0x0F,
    };
    Ok((command, 3 + mel))
}

fn take<'a>(body: &'a [u8], n: usize, field: &str) -> Result<&'a [u8]> {
    body.get(..n).ok_or_else(|| {
        Error::Protocol(format!(
            "{field} element truncated: need {n} bytes, have {}",
            body.len()
        ))
    })
}

fn clean_text(raw: &[u8]) -> String {
    from_latin1(raw)
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect()
}
