//! picast-core: Core traits, types, and error definitions for picast.
//!
//! This crate defines the chip-agnostic abstractions the rest of the
//! workspace is built on. The rotation engine, the UECP listener and the
//! watchdog depend on these types without pulling in a specific chip
//! driver.
//!
//! # Key types
//!
//! - [`Transmitter`] -- the Device Register Interface every producer calls
//! - [`Transport`] -- transaction-level bus to the chip
//! - [`ConfigSnapshot`] -- the immutable station configuration
//! - [`TxEvent`] / [`StatusSnapshot`] -- state change notifications and the
//!   read-only status view
//! - [`Error`] / [`Result`] -- error handling

pub mod config;
pub mod error;
pub mod events;
pub mod helpers;
pub mod limits;
pub mod status;
pub mod transmitter;
pub mod transport;
pub mod types;

// Re-export key types at crate root for ergonomic `use picast_core::*`.
pub use config::{
    AudioProcessing, ConfigSnapshot, MonitorConfig, RdsConfig, RfConfig, RtConfig,
    StreamingConfig, UecpConfig,
};
pub use error::{Error, Result};
pub use events::TxEvent;
pub use helpers::{center_fixed, format_freq_mhz};
pub use status::StatusSnapshot;
pub use transmitter::Transmitter;
pub use transport::Transport;
pub use types::*;
