//! picast-si4713: Silicon Labs SI4713 FM/RDS transmitter backend.
//!
//! This crate implements the [`Transmitter`](picast_core::Transmitter)
//! trait for the SI4713 over any [`Transport`](picast_core::Transport):
//! a local I2C adapter, the TCP bus bridge, or a simulated chip in tests.
//!
//! # Architecture
//!
//! - [`commands`] -- pure command builders and response parsers
//! - [`properties`] -- property addresses and packed register layouts
//! - [`driver`] -- [`Si4713`], the `Transmitter` implementation
//! - [`builder`] -- [`Si4713Builder`] for bus policy and construction

pub mod builder;
pub mod commands;
pub mod driver;
pub mod properties;

pub use builder::Si4713Builder;
pub use driver::Si4713;
