//! picast-uecp: UECP input for picast.
//!
//! Studio RDS encoders and playout systems push PI, PS, RadioText and the
//! RDS flags over UECP. This crate decodes those frames and writes the
//! supported fields through a [`Transmitter`](picast_core::Transmitter).
//!
//! - [`codec`] -- framing, byte stuffing and CRC
//! - [`message`] -- message element decoding into [`UecpCommand`]
//! - [`listener`] -- [`UecpListener`], serving TCP and UDP on one port

pub mod codec;
pub mod listener;
pub mod message;

pub use codec::{DecodeResult, UecpFrame, decode_frame, encode_ack, encode_frame};
pub use listener::UecpListener;
pub use message::{UecpCommand, parse_message};
