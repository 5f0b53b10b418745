//! Transport implementations for picast.
//!
//! Concrete [`Transport`](picast_core::Transport) implementations and
//! network sockets used by the transmitter manager:
//!
//! - [`TcpTransport`]: accepted UECP sessions and the raw link to a bus
//!   bridge
//! - [`BridgeTransport`]: bus transactions tunnelled to an SI4713 on another
//!   host
//! - [`UdpTransport`]: datagram UECP from studio encoders
//!
//! # Example
//!
//! ```no_run
//! use picast_transport::BridgeTransport;
//! use picast_core::transport::Transport;
//! use std::time::Duration;
//!
//! # async fn example() -> picast_core::Result<()> {
//! let mut bus = BridgeTransport::connect("10.0.0.20:7713").await?;
//!
//! // GET_REV
//! bus.send(&[0x10]).await?;
//! let mut rev = [0u8; 9];
//! let n = bus.receive(&mut rev, Duration::from_millis(100)).await?;
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod tcp;
pub mod udp;

pub use bridge::BridgeTransport;
pub use tcp::TcpTransport;
pub use udp::UdpTransport;
