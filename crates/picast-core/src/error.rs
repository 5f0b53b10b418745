//! Error types for picast.
//!
//! All fallible operations across the workspace return [`Result<T>`], which
//! uses [`Error`] as the error type. Validation failures, bus and network
//! failures, and UECP decode failures are all captured here.

/// The error type for all picast operations.
///
/// Validation variants ([`OutOfRange`](Error::OutOfRange),
/// [`InvalidField`](Error::InvalidField), [`Config`](Error::Config)) are
/// raised before any byte reaches the bus. The transport class (see
/// [`Error::is_transport`]) is what the watchdog treats as a failed health
/// check.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A value outside chip-legal bounds (frequency, power, antenna cap).
    #[error("value out of range: {0}")]
    OutOfRange(String),

    /// A malformed RDS field (PI, PTY, PS/RT text, slot index).
    #[error("invalid field: {0}")]
    InvalidField(String),

    /// A transport-level error (I2C bridge, TCP socket, UDP socket).
    #[error("transport error: {0}")]
    Transport(String),

    /// A protocol-level error (malformed UECP frame, short chip response).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A configuration snapshot failed validation.
    #[error("config error: {0}")]
    Config(String),

    /// Timed out waiting for the chip or a peer.
    ///
    /// On the register bus this means CTS never came up, which usually
    /// indicates the chip is held in reset or unpowered.
    #[error("timeout waiting for response")]
    Timeout,

    /// The requested operation is not supported by this transport or chip.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// No connection to the bus has been established.
    #[error("not connected")]
    NotConnected,

    /// The connection was lost unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error belongs to the transport class.
    ///
    /// Transport-class errors from a scheduled rotation tick or a UECP
    /// update are logged and retried by their owner; the same errors seen
    /// by a watchdog poll drive recovery.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Transport(_)
                | Error::Timeout
                | Error::NotConnected
                | Error::ConnectionLost
                | Error::Io(_)
        )
    }
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
