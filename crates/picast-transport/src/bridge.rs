//! Networked I2C bridge.
//!
//! When the SI4713 board hangs off another host, a small bridge process on
//! that host owns the I2C bus and exposes it over TCP. [`BridgeTransport`]
//! speaks its framing on top of a [`TcpTransport`]:
//!
//! | request                  | reply                           |
//! |--------------------------|---------------------------------|
//! | `'W' len bytes[len]`     | `0x00` ack, `0x01` NACK         |
//! | `'R' len`                | `0x00 bytes[len]`, or `0x01`    |
//! | `'X'`                    | `0x00` after pulsing RST        |
//!
//! Every request is answered before the next is sent, so one bridge
//! transaction maps onto one bus transaction.

use async_trait::async_trait;
use picast_core::error::{Error, Result};
use picast_core::transport::Transport;
use std::time::Duration;

use crate::tcp::TcpTransport;

pub const OP_WRITE: u8 = b'W';
pub const OP_READ: u8 = b'R';
pub const OP_RESET: u8 = b'X';
pub const REPLY_ACK: u8 = 0x00;
pub const REPLY_NACK: u8 = 0x01;

/// Default time to wait for a bridge reply.
const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_millis(500);

/// A [`Transport`] that tunnels bus transactions through a TCP bridge.
#[derive(Debug)]
pub struct BridgeTransport {
    link: TcpTransport,
    reply_timeout: Duration,
}

impl BridgeTransport {
    /// Connect to a bridge at `host:port`.
    pub async fn connect(addr: &str) -> Result<Self> {
        let link = TcpTransport::connect(addr).await?;
        Ok(Self::new(link))
    }

    /// Use an established link.
    pub fn new(link: TcpTransport) -> Self {
        Self {
            link,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        }
    }

    /// Override how long to wait for each bridge reply.
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            filled += self
                .link
                .receive(&mut buf[filled..], self.reply_timeout)
                .await?;
        }
        Ok(())
    }

    async fn expect_ack(&mut self, what: &str) -> Result<()> {
        let mut reply = [0u8; 1];
        self.read_exact(&mut reply).await?;
        match reply[0] {
            REPLY_ACK => Ok(()),
            REPLY_NACK => Err(Error::Transport(format!("bridge NACK on {what}"))),
            other => Err(Error::Protocol(format!(
                "bridge reply 0x{other:02X} on {what}"
            ))),
        }
    }
}

#[async_trait]
impl Transport for BridgeTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let len = u8::try_from(data.len())
            .map_err(|_| Error::Protocol(format!("bus write of {} bytes", data.len())))?;
        let mut frame = Vec::with_capacity(data.len() + 2);
        frame.push(OP_WRITE);
        frame.push(len);
        frame.extend_from_slice(data);
        self.link.send(&frame).await?;
        self.expect_ack("write").await
    }

    async fn receive(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        let len = u8::try_from(buf.len())
            .map_err(|_| Error::Protocol(format!("bus read of {} bytes", buf.len())))?;
        self.link.send(&[OP_READ, len]).await?;
        self.expect_ack("read").await?;
        self.read_exact(buf).await?;
        Ok(buf.len())
    }

    async fn reset(&mut self) -> Result<()> {
        self.link.send(&[OP_RESET]).await?;
        self.expect_ack("reset").await
    }

    async fn close(&mut self) -> Result<()> {
        self.link.close().await
    }

    fn is_connected(&self) -> bool {
        self.link.is_connected()
    }
}
