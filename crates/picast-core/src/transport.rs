//! Transport trait for the transmitter's register bus.
//!
//! The [`Transport`] trait abstracts over the physical link to the SI4713.
//! On real hardware that is an I2C adapter (Raspberry Pi bus, FT232H, or a
//! bus bridge reachable over TCP); in tests it is a mock from the
//! `picast-test-harness` crate.
//!
//! The contract is transaction-shaped: one [`send`](Transport::send) is one
//! bus write (command byte followed by its arguments) and one
//! [`receive`](Transport::receive) is one bus read of exactly `buf.len()`
//! bytes (status byte first, then any response payload). Command encoding,
//! CTS polling and response parsing live in the driver that consumes this
//! trait.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::{Error, Result};

/// Asynchronous transaction-level transport to the transmitter chip.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write one command (command byte plus arguments) to the chip.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Read up to `buf.len()` bytes from the chip in one bus transaction.
    ///
    /// Returns the number of bytes actually read. Will wait up to `timeout`;
    /// returns [`Error::Timeout`] if nothing arrives within the deadline.
    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Pulse the chip's hardware reset line. The chip comes back powered
    /// down with its registers cleared and needs a fresh POWER_UP.
    ///
    /// Transports without a reset line return [`Error::Unsupported`]; the
    /// driver then falls back to a soft reset.
    async fn reset(&mut self) -> Result<()> {
        Err(Error::Unsupported("hardware reset line".into()))
    }

    /// Close the transport connection.
    ///
    /// After calling `close()`, subsequent `send()` and `receive()` calls
    /// should return [`Error::NotConnected`].
    async fn close(&mut self) -> Result<()>;

    /// Check whether the transport is currently connected.
    fn is_connected(&self) -> bool;
}
