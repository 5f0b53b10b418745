//! UECP frame encoding and decoding.
//!
//! A UECP frame on the wire is:
//!
//! ```text
//! STA | ADD(2) SQC MFL MSG[MFL] CRC(2) | STP
//! 0xFE                                   0xFF
//! ```
//!
//! Between the start and stop bytes, the three reserved values are
//! byte-stuffed: `0xFD` becomes `FD 00`, `0xFE` becomes `FD 01` and `0xFF`
//! becomes `FD 02`. The CRC is CRC-16/GENIBUS (CCITT polynomial, inverted)
//! over ADD through the end of MSG, before stuffing.

use bytes::{BufMut, BytesMut};
use crc::{CRC_16_GENIBUS, Crc};

/// Start byte.
pub const STA: u8 = 0xFE;
/// Stop byte.
pub const STP: u8 = 0xFF;
/// Escape byte for stuffing.
pub const ESC: u8 = 0xFD;

/// Message element code of an acknowledgement.
pub const MEC_ACK: u8 = 0x18;
/// Acknowledgement: message received and processed.
pub const ACK_OK: u8 = 0x00;
/// Acknowledgement: message could not be decoded.
pub const ACK_MALFORMED: u8 = 0x02;

/// Header bytes before MSG: ADD(2) SQC MFL.
const HEADER_LEN: usize = 4;
const CRC_LEN: usize = 2;

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_GENIBUS);

/// A decoded UECP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UecpFrame {
    /// Site/encoder address (ADD).
    pub address: u16,
    /// Sequence counter (SQC); 0 means the sender wants no acknowledgement.
    pub sequence: u8,
    /// Message field: one or more message elements.
    pub message: Vec<u8>,
}

/// Outcome of one [`decode_frame`] attempt on a receive buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeResult {
    /// A valid frame; the `usize` is the number of bytes consumed, including
    /// anything skipped before the start byte.
    Frame(UecpFrame, usize),

    /// No complete frame yet. More data is needed.
    Incomplete,

    /// Bytes that do not form a valid frame. Discard `consumed` bytes and
    /// try again.
    Malformed { consumed: usize, reason: String },
}

/// CRC-16/GENIBUS over `data`.
pub fn crc16(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}

/// Byte-stuff `data` for transmission between STA and STP.
pub fn stuff(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 4);
    for &b in data {
        match b {
            ESC => out.extend_from_slice(&[ESC, 0x00]),
            STA => out.extend_from_slice(&[ESC, 0x01]),
            STP => out.extend_from_slice(&[ESC, 0x02]),
            _ => out.push(b),
        }
    }
    out
}

/// Reverse [`stuff`]. Fails on an escape byte followed by anything but
/// 0, 1 or 2, or a dangling escape at the end.
pub fn unstuff(data: &[u8]) -> std::result::Result<Vec<u8>, String> {
    let mut out = Vec::with_capacity(data.len());
    let mut iter = data.iter();
    while let Some(&b) = iter.next() {
        if b != ESC {
            out.push(b);
            continue;
        }
        match iter.next() {
            Some(0x00) => out.push(ESC),
            Some(0x01) => out.push(STA),
            Some(0x02) => out.push(STP),
            Some(other) => return Err(format!("invalid escape sequence FD {other:02X}")),
            None => return Err("dangling escape byte".into()),
        }
    }
    Ok(out)
}

/// Encode a frame ready for the wire.
///
/// # Panics
///
/// Never; a message longer than 255 bytes is truncated to 255, the most MFL
/// can describe.
pub fn encode_frame(frame: &UecpFrame) -> Vec<u8> {
    let msg = &frame.message[..frame.message.len().min(255)];
    let mut body = BytesMut::with_capacity(HEADER_LEN + msg.len() + CRC_LEN);
    body.put_u16(frame.address);
    body.put_u8(frame.sequence);
    body.put_u8(msg.len() as u8);
    body.put_slice(msg);
    let crc = crc16(&body);
    body.put_u16(crc);

    let stuffed = stuff(&body);
    let mut out = Vec::with_capacity(stuffed.len() + 2);
    out.push(STA);
    out.extend_from_slice(&stuffed);
    out.push(STP);
    out
}

/// Acknowledgement frame for `sequence`, echoing the sender's `address`.
pub fn encode_ack(address: u16, sequence: u8, code: u8) -> Vec<u8> {
    encode_frame(&UecpFrame {
        address,
        sequence,
        message: vec![MEC_ACK, code, sequence],
    })
}

/// Try to decode one frame from the front of `buf`.
///
/// The caller drains `consumed` bytes after a `Frame` or `Malformed`
/// result, and appends more data after `Incomplete`.
///
/// # Example
///
/// ```
/// use picast_uecp::codec::{decode_frame, encode_frame, DecodeResult, UecpFrame};
///
/// let frame = UecpFrame { address: 0, sequence: 1, message: vec![0x07, 0, 0, 10] };
/// let wire = encode_frame(&frame);
/// match decode_frame(&wire) {
///     DecodeResult::Frame(decoded, consumed) => {
///         assert_eq!(decoded, frame);
///         assert_eq!(consumed, wire.len());
///     }
///     other => panic!("expected a frame, got {other:?}"),
/// }
/// ```
pub fn decode_frame(buf: &[u8]) -> DecodeResult {
    let start = match buf.iter().position(|&b| b == STA) {
        Some(pos) => pos,
        None if buf.is_empty() => return DecodeResult::Incomplete,
        None => {
            return DecodeResult::Malformed {
                consumed: buf.len(),
                reason: "no start byte".into(),
            };
        }
    };
    if start > 0 {
        return DecodeResult::Malformed {
            consumed: start,
            reason: format!("{start} bytes before start byte"),
        };
    }

    let stop = match buf[1..].iter().position(|&b| b == STP || b == STA) {
        Some(rel) => rel + 1,
        None => return DecodeResult::Incomplete,
    };
    if buf[stop] == STA {
        // A new frame began before this one ended.
        return DecodeResult::Malformed {
            consumed: stop,
            reason: "start byte inside frame".into(),
        };
    }
    let consumed = stop + 1;
    let malformed = |reason: String| DecodeResult::Malformed { consumed, reason };

    let body = match unstuff(&buf[1..stop]) {
        Ok(body) => body,
        Err(reason) => return malformed(reason),
    };
    if body.len() < HEADER_LEN + CRC_LEN {
        return malformed(format!("frame body too short: {} bytes", body.len()));
    }

    let mfl = usize::from(body[3]);
    let expected = HEADER_LEN + mfl + CRC_LEN;
    if body.len() != expected {
        return malformed(format!(
            "length mismatch: MFL {mfl} implies {expected} bytes, got {}",
            body.len()
        ));
    }

    let crc_at = HEADER_LEN + mfl;
    let received = u16::from_be_bytes([body[crc_at], body[crc_at + 1]]);
    let computed = crc16(&body[..crc_at]);
    if received != computed {
        return malformed(format!(
            "CRC mismatch: received 0x{received:04X}, computed 0x{computed:04X}"
        ));
    }

    let frame = UecpFrame {
        address: u16::from_be_bytes([body[0], body[1]]),
        sequence: body[2],
        message: body[HEADER_LEN..crc_at].to_vec(),
    };
    DecodeResult::Frame(frame, consumed)
}
