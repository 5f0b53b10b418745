//! picast-manager: everything between a configuration file and the chip.
//!
//! - [`diff`] -- compares two [`ConfigSnapshot`]s and emits ordered [`Op`]s
//! - [`apply`] -- the [`Applier`] that executes them and keeps the last
//!   applied snapshot
//! - [`rotation`] -- PS and RadioText rotation with macros, a file
//!   override and A/B banking
//! - [`watchdog`] -- health polling and bounded recovery
//! - [`manager`] -- [`TransmitterManager`], the command surface that ties
//!   them together and keeps a [`StatusSnapshot`] current
//!
//! [`ConfigSnapshot`]: picast_core::ConfigSnapshot
//! [`StatusSnapshot`]: picast_core::StatusSnapshot

pub mod apply;
pub mod diff;
pub mod manager;
pub mod rotation;
pub mod watchdog;

pub use apply::{AppliedConfig, Applier};
pub use diff::{Op, Stage, diff};
pub use manager::TransmitterManager;
pub use rotation::{
    PsRotation, PsSettings, RotationEngine, RotationHandle, RtPlan, RtRotation, StationInfo,
    expand_macros, strip_skip_words,
};
pub use watchdog::{Health, PollOutcome, Recover, Watchdog, WatchdogHandle, spawn_watchdog};
