//! UDP datagram socket for UECP encoders.
//!
//! Many studio encoders push UECP frames over UDP, one frame per datagram,
//! and expect acknowledgements back to the sending address. [`UdpTransport`]
//! is connectionless, so it does not implement [`Transport`]; callers pair
//! [`recv_from`](UdpTransport::recv_from) with
//! [`send_to`](UdpTransport::send_to).
//!
//! [`Transport`]: picast_core::transport::Transport

use picast_core::error::{Error, Result};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;

/// A bound UDP socket with timeout-aware receive.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    local_addr: SocketAddr,
}

impl UdpTransport {
    /// Bind to `addr`. Port 0 lets the OS choose; see
    /// [`local_addr`](Self::local_addr).
    pub async fn bind(addr: &str) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await.map_err(|e| {
            tracing::error!(addr = %addr, error = %e, "UDP bind failed");
            Error::Io(e)
        })?;
        let local_addr = socket.local_addr()?;
        tracing::debug!(local = %local_addr, "UDP socket bound");
        Ok(Self { socket, local_addr })
    }

    /// The address actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Send `data` as one datagram to `addr`.
    pub async fn send_to(&self, data: &[u8], addr: SocketAddr) -> Result<()> {
        tracing::trace!(local = %self.local_addr, remote = %addr, bytes = data.len(), "TX datagram");
        self.socket.send_to(data, addr).await.map_err(|e| {
            tracing::warn!(remote = %addr, error = %e, "UDP send failed");
            Error::Io(e)
        })?;
        Ok(())
    }

    /// Wait up to `timeout` for one datagram. Returns its length and sender.
    ///
    /// Bytes beyond `buf.len()` are dropped by the kernel, so size `buf` for
    /// the largest frame expected.
    pub async fn recv_from(&self, buf: &mut [u8], timeout: Duration) -> Result<(usize, SocketAddr)> {
        match tokio::time::timeout(timeout, self.socket.recv_from(buf)).await {
            Ok(Ok((n, src))) => {
                tracing::trace!(local = %self.local_addr, remote = %src, bytes = n, "RX datagram");
                Ok((n, src))
            }
            Ok(Err(e)) => Err(Error::Io(e)),
            Err(_) => Err(Error::Timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_assigns_port() {
        let transport = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        assert_ne!(transport.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn frame_and_ack_exchange() {
        let encoder = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let station = UdpTransport::bind("127.0.0.1:0").await.unwrap();

        let frame = [0xFE, 0x00, 0x00, 0x01, 0x00, 0xFF];
        encoder.send_to(&frame, station.local_addr()).await.unwrap();

        let mut buf = [0u8; 512];
        let (n, src) = station
            .recv_from(&mut buf, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(&buf[..n], &frame);
        assert_eq!(src, encoder.local_addr());

        station.send_to(&[0xFE, 0xFF], src).await.unwrap();
        let (n, _) = encoder
            .recv_from(&mut buf, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(&buf[..n], &[0xFE, 0xFF]);
    }

    #[tokio::test]
    async fn recv_times_out() {
        let transport = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let mut buf = [0u8; 16];
        let result = transport.recv_from(&mut buf, Duration::from_millis(30)).await;
        assert!(matches!(result, Err(Error::Timeout)), "{result:?}");
    }
}
