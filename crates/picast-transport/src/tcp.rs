//! TCP stream transport.
//!
//! [`TcpTransport`] serves two roles in picast:
//!
//! - wrapping each accepted UECP client connection, so the listener reads
//!   frames through the same timeout-aware [`Transport`] contract as the
//!   chip bus;
//! - connecting to a networked I2C bridge that forwards register writes to
//!   the SI4713 and streams reads back, when the transmitter board is not
//!   on the local bus.
//!
//! # Example
//!
//! ```no_run
//! use picast_transport::TcpTransport;
//! use picast_core::transport::Transport;
//! use std::time::Duration;
//!
//! # async fn example() -> picast_core::Result<()> {
//! let mut bridge = TcpTransport::connect("10.0.0.20:7713").await?;
//! bridge.send(&[0x33, 0x00]).await?;
//! let mut status = [0u8; 8];
//! let n = bridge.receive(&mut status, Duration::from_millis(200)).await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use picast_core::error::{Error, Result};
use picast_core::transport::Transport;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Default connection timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// A [`Transport`] over one TCP stream.
#[derive(Debug)]
pub struct TcpTransport {
    /// `None` once `close()` has run.
    stream: Option<TcpStream>,
    /// Peer label used in log fields.
    peer: String,
}

impl TcpTransport {
    /// Connect to `host:port` with the default timeout.
    pub async fn connect(addr: &str) -> Result<Self> {
        Self::connect_with_timeout(addr, DEFAULT_CONNECT_TIMEOUT).await
    }

    /// Connect to `host:port`, giving up after `timeout`.
    pub async fn connect_with_timeout(addr: &str, timeout: Duration) -> Result<Self> {
        tracing::debug!(peer = %addr, timeout_ms = timeout.as_millis(), "Connecting");

        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                tracing::error!(peer = %addr, "TCP connect timed out");
                Error::Timeout
            })?
            .map_err(|e| {
                tracing::error!(peer = %addr, error = %e, "TCP connect failed");
                map_connect_error(e, addr)
            })?;

        // Register writes are a few bytes each; do not let Nagle batch them.
        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!(peer = %addr, error = %e, "TCP_NODELAY not set");
        }

        tracing::info!(peer = %addr, "TCP connection established");
        Ok(Self {
            stream: Some(stream),
            peer: addr.to_string(),
        })
    }

    /// Wrap an already-connected stream, typically one returned by
    /// `TcpListener::accept`.
    pub fn from_stream(stream: TcpStream, peer: String) -> Self {
        tracing::debug!(peer = %peer, "Wrapping accepted TCP stream");
        Self {
            stream: Some(stream),
            peer,
        }
    }

    /// The peer label given at construction.
    pub fn peer(&self) -> &str {
        &self.peer
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
        tracing::trace!(peer = %self.peer, bytes = data.len(), data = ?data, "TX");

        stream.write_all(data).await.map_err(|e| {
            tracing::error!(peer = %self.peer, error = %e, "Write failed");
            map_io_error(e)
        })?;
        stream.flush().await.map_err(map_io_error)
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;

        match tokio::time::timeout(timeout, stream.read(buf)).await {
            // Zero bytes from a stream read means the peer sent FIN.
            Ok(Ok(0)) => {
                tracing::debug!(peer = %self.peer, "Peer closed connection");
                Err(Error::ConnectionLost)
            }
            Ok(Ok(n)) => {
                tracing::trace!(peer = %self.peer, bytes = n, data = ?&buf[..n], "RX");
                Ok(n)
            }
            Ok(Err(e)) => {
                tracing::error!(peer = %self.peer, error = %e, "Read failed");
                Err(map_io_error(e))
            }
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                tracing::debug!(peer = %self.peer, error = %e, "Shutdown after peer reset");
            }
            tracing::debug!(peer = %self.peer, "TCP connection closed");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

fn map_connect_error(e: std::io::Error, addr: &str) -> Error {
    match e.kind() {
        std::io::ErrorKind::ConnectionRefused => {
            Error::Transport(format!("connection refused: {addr}"))
        }
        _ => Error::Io(e),
    }
}

fn map_io_error(e: std::io::Error) -> Error {
    match e.kind() {
        std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::ConnectionAborted => Error::ConnectionLost,
        _ => Error::Io(e),
    }
}
