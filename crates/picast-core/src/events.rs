//! Asynchronous transmitter event types.
//!
//! Events are emitted through a [`tokio::sync::broadcast`] channel by the
//! rotation engine, the UECP listener, the watchdog and the manager. The
//! status board and any dashboard collaborator subscribe to them; slow
//! consumers may miss events under load and should fall back to the status
//! snapshot.

use crate::types::{AntennaCap, RtBank, RtSource, WatchdogState};

/// An event emitted when transmitter state changes.
#[derive(Debug, Clone, PartialEq)]
pub enum TxEvent {
    /// Broadcasting started with the named configuration.
    BroadcastStarted {
        config_name: String,
    },

    /// Broadcasting stopped; the chip is held in reset.
    BroadcastStopped,

    /// A configuration was applied.
    ConfigApplied {
        config_name: String,
        /// Number of operations the diff produced.
        operations: usize,
    },

    /// The carrier was retuned.
    Tuned {
        frequency_khz: u32,
    },

    /// Output level or antenna capacitor mode changed.
    OutputChanged {
        power: u8,
        antenna_cap: AntennaCap,
    },

    /// The PS currently on air changed.
    PsChanged {
        /// Rendered 8-character text.
        text: String,
        /// Index in the rotation list, or `None` when set over UECP.
        index: Option<usize>,
    },

    /// A RadioText message was sent to the chip.
    RtChanged {
        text: String,
        bank: RtBank,
        source: RtSource,
    },

    /// The watchdog completed a health poll.
    HealthPolled {
        transmitting: bool,
        overmodulated: bool,
        input_level_dbfs: Option<i8>,
        antenna_cap: Option<u8>,
    },

    /// The watchdog changed state.
    WatchdogStateChanged {
        state: WatchdogState,
        status: String,
    },

    /// UECP control was enabled or disabled.
    UecpModeChanged {
        enabled: bool,
    },

    /// A UECP client updated an RDS field.
    UecpFieldApplied {
        /// Field name (`pi`, `pty`, `ps`, `rt`, ...).
        field: &'static str,
    },

    /// Audio stream settings changed; consumed by the player collaborator.
    StreamingChanged {
        enabled: bool,
        url: String,
    },
}
