//! Scripted bus transport for byte-exact driver tests.
//!
//! [`MockTransport`] implements [`Transport`] with pre-loaded
//! write/response pairs. It models the SI4713 read semantics: every bus read
//! after a write returns the chip's status byte followed by the response
//! payload, from the start, however many times it is read. That lets a
//! driver poll CTS with 1-byte reads and then read the full response.
//!
//! # Example
//!
//! ```
//! use picast_test_harness::MockTransport;
//!
//! let mut mock = MockTransport::new();
//! // SET_PROPERTY RDS_PI = 0x1234, acknowledged with CTS.
//! mock.expect_ok(&[0x12, 0x00, 0x2C, 0x01, 0x12, 0x34]);
//! // TX_TUNE_STATUS with an 8-byte response.
//! mock.expect(&[0x33, 0x00], &[0x80, 0x00, 0x26, 0x8E, 0x00, 0x73, 0x20, 0x00]);
//! ```

use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::Duration;

use picast_core::error::{Error, Result};
use picast_core::transport::Transport;

/// Status byte with CTS set and no error.
pub const STATUS_CTS: u8 = 0x80;

#[derive(Debug, Clone)]
struct Expectation {
    request: Vec<u8>,
    response: Vec<u8>,
}

/// A scripted [`Transport`] for testing the register driver without
/// hardware.
///
/// Expectations are consumed in order by `send()`. A mismatching write fails
/// with [`Error::Protocol`]. Reads before the first write time out.
#[derive(Debug)]
pub struct MockTransport {
    expectations: VecDeque<Expectation>,
    /// What the chip returns on read after the last matched write.
    current_response: Option<Vec<u8>>,
    connected: bool,
    sent_log: Vec<Vec<u8>>,
    resets: usize,
    reset_supported: bool,
}

impl MockTransport {
    /// Create a new mock transport in the connected state.
    pub fn new() -> Self {
        MockTransport {
            expectations: VecDeque::new(),
            current_response: None,
            connected: true,
            sent_log: Vec::new(),
            resets: 0,
            reset_supported: true,
        }
    }

    /// Expect `request`; subsequent reads return `response`.
    ///
    /// `response` must start with the status byte.
    pub fn expect(&mut self, request: &[u8], response: &[u8]) {
        self.expectations.push_back(Expectation {
            request: request.to_vec(),
            response: response.to_vec(),
        });
    }

    /// Expect `request`, answered with a bare CTS status.
    pub fn expect_ok(&mut self, request: &[u8]) {
        self.expect(request, &[STATUS_CTS]);
    }

    /// Every write seen so far, one element per `send()`.
    pub fn sent_data(&self) -> &[Vec<u8>] {
        &self.sent_log
    }

    /// Expectations not yet consumed.
    pub fn remaining_expectations(&self) -> usize {
        self.expectations.len()
    }

    /// Force the connected state. While disconnected every call returns
    /// [`Error::NotConnected`].
    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    /// Make [`reset`](Transport::reset) report that no reset line is wired.
    pub fn without_reset_line(mut self) -> Self {
        self.reset_supported = false;
        self
    }

    /// How many times the reset line was pulsed.
    pub fn reset_count(&self) -> usize {
        self.resets
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        self.sent_log.push(data.to_vec());

        let Some(expectation) = self.expectations.pop_front() else {
            return Err(Error::Protocol(format!(
                "no more expectations in mock transport, got {data:02X?}"
            )));
        };
        if data != expectation.request.as_slice() {
            return Err(Error::Protocol(format!(
                "unexpected write: expected {:02X?}, got {:02X?}",
                expectation.request, data
            )));
        }
        self.current_response = Some(expectation.response);
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        let response = self.current_response.as_ref().ok_or(Error::Timeout)?;
        let n = response.len().min(buf.len());
        buf[..n].copy_from_slice(&response[..n]);
        Ok(n)
    }

    async fn reset(&mut self) -> Result<()> {
        if !self.reset_supported {
            return Err(Error::Unsupported("hardware reset line".into()));
        }
        self.resets += 1;
        self.current_response = None;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.connected = false;
        self.current_response = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(10);

    #[tokio::test]
    async fn reads_repeat_status_then_payload() {
        let mut mock = MockTransport::new();
        mock.expect(&[0x34, 0x00], &[0x80, 0x04, 0x00, 0x00, 0xFB]);
        mock.send(&[0x34, 0x00]).await.unwrap();

        let mut status = [0u8; 1];
        assert_eq!(mock.receive(&mut status, TIMEOUT).await.unwrap(), 1);
        assert_eq!(status[0], STATUS_CTS);

        let mut full = [0u8; 5];
        assert_eq!(mock.receive(&mut full, TIMEOUT).await.unwrap(), 5);
        assert_eq!(full, [0x80, 0x04, 0x00, 0x00, 0xFB]);
    }

    #[tokio::test]
    async fn records_writes_in_order() {
        let mut mock = MockTransport::new();
        mock.expect_ok(&[0x01, 0x12, 0x50]);
        mock.expect_ok(&[0x80, 0x0E]);
        mock.send(&[0x01, 0x12, 0x50]).await.unwrap();
        mock.send(&[0x80, 0x0E]).await.unwrap();

        assert_eq!(mock.sent_data(), &[vec![0x01, 0x12, 0x50], vec![0x80, 0x0E]]);
        assert_eq!(mock.remaining_expectations(), 0);
    }

    #[tokio::test]
    async fn mismatched_write_is_protocol_error() {
        let mut mock = MockTransport::new();
        mock.expect_ok(&[0x30, 0x00, 0x26, 0x8E]);
        let result = mock.send(&[0x30, 0x00, 0x26, 0x8F]).await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn exhausted_script_is_protocol_error() {
        let mut mock = MockTransport::new();
        assert!(matches!(mock.send(&[0x10]).await, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn read_before_write_times_out() {
        let mut mock = MockTransport::new();
        let mut buf = [0u8; 1];
        assert!(matches!(
            mock.receive(&mut buf, TIMEOUT).await,
            Err(Error::Timeout)
        ));
    }

    #[tokio::test]
    async fn disconnected_and_closed() {
        let mut mock = MockTransport::new();
        mock.set_connected(false);
        assert!(matches!(mock.send(&[0x10]).await, Err(Error::NotConnected)));

        mock.set_connected(true);
        mock.close().await.unwrap();
        assert!(!mock.is_connected());
        let mut buf = [0u8; 1];
        assert!(matches!(
            mock.receive(&mut buf, TIMEOUT).await,
            Err(Error::NotConnected)
        ));
    }

    #[tokio::test]
    async fn reset_line_optional() {
        let mut wired = MockTransport::new();
        wired.reset().await.unwrap();
        assert_eq!(wired.reset_count(), 1);

        let mut unwired = MockTransport::new().without_reset_line();
        assert!(matches!(unwired.reset().await, Err(Error::Unsupported(_))));
    }
}
