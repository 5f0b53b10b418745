//! Core types used throughout picast.
//!
//! These are the vocabulary shared by the chip driver, the rotation engine,
//! the UECP listener and the watchdog. Enums that appear in configuration
//! documents implement `FromStr`/`Display` and serde with the same spelling.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Static information about the driven transmitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransmitterInfo {
    /// Human-readable model name (e.g. "SI4713").
    pub model: String,
    /// 7-bit bus address of the chip.
    pub bus_address: u8,
}

/// FM pre-emphasis time constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preemphasis {
    /// 50 µs (Europe, Australia).
    #[default]
    #[serde(alias = "50")]
    Us50,
    /// 75 µs (Americas, Korea).
    #[serde(alias = "75", alias = "us")]
    Us75,
    /// Pre-emphasis disabled.
    #[serde(alias = "off", alias = "0")]
    None,
}

impl fmt::Display for Preemphasis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Preemphasis::Us50 => "50us",
            Preemphasis::Us75 => "75us",
            Preemphasis::None => "none",
        };
        write!(f, "{s}")
    }
}

/// Error returned when parsing one of the string-valued enums fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseValueError(String);

impl fmt::Display for ParseValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unrecognized value: {}", self.0)
    }
}

impl std::error::Error for ParseValueError {}

impl FromStr for Preemphasis {
    type Err = ParseValueError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "us50" | "50" | "50us" => Ok(Preemphasis::Us50),
            "us75" | "75" | "75us" | "us" => Ok(Preemphasis::Us75),
            "none" | "off" | "0" => Ok(Preemphasis::None),
            _ => Err(ParseValueError(s.to_string())),
        }
    }
}

/// Antenna tuning capacitor mode.
///
/// Exactly one mode is active at a time: either the chip auto-tunes, or a
/// manual varactor step (1..=191, 0.25 pF each) is forced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AntennaCap {
    /// Let the chip select the capacitor value.
    Auto,
    /// Force a specific capacitor step.
    Manual(u8),
}

impl Default for AntennaCap {
    fn default() -> Self {
        AntennaCap::Manual(4)
    }
}

impl AntennaCap {
    /// The byte sent in TX_TUNE_POWER (0 selects auto-tuning).
    pub fn wire_value(&self) -> u8 {
        match self {
            AntennaCap::Auto => 0,
            AntennaCap::Manual(v) => *v,
        }
    }

    /// Whether auto-tuning is selected.
    pub fn is_auto(&self) -> bool {
        matches!(self, AntennaCap::Auto)
    }
}

impl fmt::Display for AntennaCap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AntennaCap::Auto => write!(f, "auto"),
            AntennaCap::Manual(v) => write!(f, "{v}"),
        }
    }
}

impl FromStr for AntennaCap {
    type Err = ParseValueError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let t = s.trim();
        if t.eq_ignore_ascii_case("auto") {
            return Ok(AntennaCap::Auto);
        }
        match t.parse::<u8>() {
            Ok(0) => Ok(AntennaCap::Auto),
            Ok(v) => Ok(AntennaCap::Manual(v)),
            Err(_) => Err(ParseValueError(s.to_string())),
        }
    }
}

impl Serialize for AntennaCap {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            AntennaCap::Auto => serializer.serialize_str("auto"),
            AntennaCap::Manual(v) => serializer.serialize_u8(*v),
        }
    }
}

impl<'de> Deserialize<'de> for AntennaCap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Num(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Num(0) => Ok(AntennaCap::Auto),
            Raw::Num(n) => u8::try_from(n)
                .map(AntennaCap::Manual)
                .map_err(|_| serde::de::Error::custom(format!("antenna_cap {n} exceeds 255"))),
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// RadioText A/B flag handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AbMode {
    /// Flip the flag on every transmission regardless of content.
    Legacy,
    /// Flip the flag only when the RT template changes.
    #[default]
    Auto,
    /// Use the bank selected in configuration; flip only on a bank switch.
    Bank,
}

impl fmt::Display for AbMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AbMode::Legacy => "legacy",
            AbMode::Auto => "auto",
            AbMode::Bank => "bank",
        };
        write!(f, "{s}")
    }
}

impl FromStr for AbMode {
    type Err = ParseValueError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "legacy" => Ok(AbMode::Legacy),
            "auto" => Ok(AbMode::Auto),
            "bank" => Ok(AbMode::Bank),
            _ => Err(ParseValueError(s.to_string())),
        }
    }
}

/// The RadioText A/B bank carried in group 2A block B.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RtBank {
    A,
    B,
}

impl RtBank {
    /// The other bank.
    pub fn flip(self) -> Self {
        match self {
            RtBank::A => RtBank::B,
            RtBank::B => RtBank::A,
        }
    }

    /// The single A/B bit (A = 0, B = 1).
    pub fn bit(self) -> u8 {
        match self {
            RtBank::A => 0,
            RtBank::B => 1,
        }
    }

    /// Build a bank from the low bit of `v`.
    pub fn from_bit(v: u8) -> Self {
        if v & 1 == 0 { RtBank::A } else { RtBank::B }
    }
}

impl fmt::Display for RtBank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RtBank::A => write!(f, "A"),
            RtBank::B => write!(f, "B"),
        }
    }
}

/// Decoder Identification sub-flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct DiFlags {
    pub stereo: bool,
    pub artificial_head: bool,
    pub compressed: bool,
    pub dynamic_pty: bool,
}

impl Default for DiFlags {
    fn default() -> Self {
        DiFlags {
            stereo: true,
            artificial_head: false,
            compressed: false,
            dynamic_pty: false,
        }
    }
}

impl DiFlags {
    /// Pack as the 4-bit DI code (d0 stereo, d1 artificial head,
    /// d2 compressed, d3 dynamic PTY).
    pub fn to_bits(&self) -> u8 {
        (self.stereo as u8)
            | (self.artificial_head as u8) << 1
            | (self.compressed as u8) << 2
            | (self.dynamic_pty as u8) << 3
    }

    /// Unpack from a 4-bit DI code. Bits above d3 are ignored.
    pub fn from_bits(bits: u8) -> Self {
        DiFlags {
            stereo: bits & 0x01 != 0,
            artificial_head: bits & 0x02 != 0,
            compressed: bits & 0x04 != 0,
            dynamic_pty: bits & 0x08 != 0,
        }
    }
}

/// Result of a TX_TUNE_STATUS read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TuneStatus {
    /// Tuned frequency in kHz.
    pub frequency_khz: u32,
    /// Output level in dBµV; zero means the carrier is off.
    pub power: u8,
    /// Antenna capacitor step currently in use (tuned value in auto mode).
    pub antenna_cap: u8,
    /// Overmodulation interrupt flag.
    pub overmodulated: bool,
}

impl TuneStatus {
    /// Whether the chip reports a live carrier.
    pub fn is_transmitting(&self) -> bool {
        self.power > 0
    }
}

/// Result of a TX_ASQ_STATUS read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsqStatus {
    /// Overmodulation detected since the last clear.
    pub overmodulated: bool,
    /// Audio input level in dBFS (signed, ≤ 0).
    pub input_level_dbfs: i8,
}

/// Chip revision as returned by GET_REV.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    /// Final two digits of the part number (13 for an SI4713).
    pub part_number: u8,
    /// Firmware major/minor as ASCII (e.g. "30").
    pub firmware: String,
    /// Chip revision letter.
    pub chip_revision: char,
}

/// Watchdog supervisor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum WatchdogState {
    #[default]
    Healthy,
    Degraded,
    Recovering {
        /// 1-based recovery attempt number.
        attempt: u32,
    },
    Failed,
}

impl fmt::Display for WatchdogState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchdogState::Healthy => write!(f, "healthy"),
            WatchdogState::Degraded => write!(f, "degraded"),
            WatchdogState::Recovering { attempt } => write!(f, "recovering ({attempt})"),
            WatchdogState::Failed => write!(f, "failed"),
        }
    }
}

/// Where the RadioText currently on air came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RtSource {
    /// The override file.
    File,
    /// An entry of the rotation list.
    List(usize),
    /// The single fallback text.
    Text,
    /// A UECP client.
    Uecp,
}

impl fmt::Display for RtSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RtSource::File => write!(f, "file"),
            RtSource::List(i) => write!(f, "list[{i}]"),
            RtSource::Text => write!(f, "text"),
            RtSource::Uecp => write!(f, "uecp"),
        }
    }
}
