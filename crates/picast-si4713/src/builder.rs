//! Si4713Builder -- fluent builder for constructing [`Si4713`] instances.
//!
//! Separates bus policy (address, reference clock, CTS pacing, retry
//! policy) from construction, so callers can tune them before the chip is
//! powered up.
//!
//! # Example
//!
//! ```no_run
//! use picast_si4713::Si4713Builder;
//! use picast_transport::BridgeTransport;
//! use std::time::Duration;
//!
//! # async fn example() -> picast_core::Result<()> {
//! let bus = BridgeTransport::connect("10.0.0.20:7713").await?;
//! let tx = Si4713Builder::new()
//!     .refclk_hz(32_768)
//!     .read_timeout(Duration::from_millis(50))
//!     .build_with_transport(Box::new(bus))
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use picast_core::error::Result;
use picast_core::transmitter::Transmitter;
use picast_core::transport::Transport;

use crate::driver::{BusTiming, Si4713};

/// Default 7-bit address with the SEN pin high.
pub const DEFAULT_BUS_ADDRESS: u8 = 0x63;
/// 32.768 kHz crystal.
pub const DEFAULT_REFCLK_HZ: u16 = 32_768;

/// Fluent builder for [`Si4713`].
#[derive(Debug, Clone)]
pub struct Si4713Builder {
    bus_address: u8,
    refclk_hz: u16,
    timing: BusTiming,
}

impl Si4713Builder {
    pub fn new() -> Self {
        Si4713Builder {
            bus_address: DEFAULT_BUS_ADDRESS,
            refclk_hz: DEFAULT_REFCLK_HZ,
            timing: BusTiming {
                read_timeout: Duration::from_millis(100),
                cts_polls: 50,
                power_up_polls: 100,
                cts_interval: Duration::from_millis(2),
                attempts: 3,
                retry_backoff: Duration::from_millis(10),
            },
        }
    }

    /// 7-bit bus address (0x63 or 0x11 depending on SEN).
    pub fn bus_address(mut self, addr: u8) -> Self {
        self.bus_address = addr;
        self
    }

    /// Reference clock in Hz (default: 32768).
    pub fn refclk_hz(mut self, hz: u16) -> Self {
        self.refclk_hz = hz;
        self
    }

    /// Deadline for a single bus read (default: 100ms).
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.timing.read_timeout = timeout;
        self
    }

    /// CTS polls before a command is declared stuck (default: 50).
    pub fn cts_polls(mut self, polls: u32) -> Self {
        self.timing.cts_polls = polls.max(1);
        self
    }

    /// Delay between CTS polls (default: 2ms).
    pub fn cts_interval(mut self, interval: Duration) -> Self {
        self.timing.cts_interval = interval;
        self
    }

    /// Total attempts for a NACKed write (default: 3).
    pub fn attempts(mut self, n: u32) -> Self {
        self.timing.attempts = n.max(1);
        self
    }

    /// Back-off unit between write attempts (default: 10ms).
    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.timing.retry_backoff = backoff;
        self
    }

    /// Build and power up the chip.
    pub async fn build_with_transport(self, transport: Box<dyn Transport>) -> Result<Si4713> {
        let tx = self.build_uninitialized(transport);
        tx.init().await?;
        Ok(tx)
    }

    /// Build without touching the bus. [`Transmitter::init`] must run
    /// before anything else.
    pub fn build_uninitialized(self, transport: Box<dyn Transport>) -> Si4713 {
        tracing::debug!(
            addr = format_args!("0x{:02X}", self.bus_address),
            "Building SI4713 driver"
        );
        Si4713::new(transport, self.bus_address, self.refclk_hz, self.timing)
    }
}

impl Default for Si4713Builder {
    fn default() -> Self {
        Self::new()
    }
}
