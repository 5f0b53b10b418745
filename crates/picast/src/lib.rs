//! # picast -- FM/RDS transmitter manager for the SI4713
//!
//! `picast` keeps an SI4713 FM transmitter on air and its RDS data moving:
//! it programs the chip from a JSON station file, rotates Program Service
//! names and RadioText, accepts RDS fields from encoders over UECP, watches
//! the carrier and recovers it when it drops, and applies edited
//! configuration live by touching only what changed.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use picast::{ConfigSnapshot, Transmitter, TransmitterManager};
//! use picast::si4713::Si4713Builder;
//! use picast::transport::BridgeTransport;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bus = BridgeTransport::connect("10.0.0.20:7713").await?;
//!     let chip = Si4713Builder::new().build_uninitialized(Box::new(bus));
//!     let tx: Arc<dyn Transmitter> = Arc::new(chip);
//!
//!     let cfg = ConfigSnapshot::from_json_str(&std::fs::read_to_string("station.json")?)?;
//!     let manager = TransmitterManager::new(tx);
//!     manager.start_broadcast("station.json", cfg).await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     manager.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! | Crate              | Purpose                                                  |
//! |--------------------|----------------------------------------------------------|
//! | `picast-core`      | [`Transmitter`] and [`Transport`] traits, config, events, errors |
//! | `picast-transport` | TCP, UDP and I2C-bridge transports                       |
//! | `picast-si4713`    | SI4713 command encoder and driver                        |
//! | `picast-uecp`      | UECP frame codec and TCP/UDP listener                    |
//! | `picast-manager`   | Config diff, RDS rotation, watchdog, [`TransmitterManager`] |
//! | **`picast`**       | This facade crate -- re-exports everything               |
//!
//! Every producer (rotation, UECP, watchdog, config applier) talks to the
//! chip through `dyn Transmitter`, whose implementations serialize bus
//! access per operation.
//!
//! ## Events
//!
//! [`TransmitterManager::subscribe`] yields [`TxEvent`]s: PS and RT
//! changes, retunes, health polls and watchdog transitions. The manager
//! also folds them into a [`StatusSnapshot`] available from
//! [`TransmitterManager::status`].
//!
//! ## Feature Flags
//!
//! | Feature  | Enables                                      | Default |
//! |----------|----------------------------------------------|---------|
//! | `si4713` | [`si4713`] driver and [`transport`] backends | yes     |

pub use picast_core::*;
pub use picast_manager::{AppliedConfig, Health, TransmitterManager};

/// Configuration diffing, RDS rotation and health supervision.
pub mod manager {
    pub use picast_manager::*;
}

/// UECP frame codec and listener.
///
/// Provides [`UecpListener`](uecp::UecpListener), which accepts RDS field
/// updates from external encoders over TCP and UDP on one port.
pub mod uecp {
    pub use picast_uecp::*;
}

/// SI4713 driver.
///
/// Provides [`Si4713`](si4713::Si4713) and
/// [`Si4713Builder`](si4713::Si4713Builder).
#[cfg(feature = "si4713")]
pub mod si4713 {
    pub use picast_si4713::*;
}

/// Bus transports: TCP, UDP and the networked I2C bridge.
#[cfg(feature = "si4713")]
pub mod transport {
    pub use picast_transport::*;
}
