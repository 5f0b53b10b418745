//! picast-test-harness: Mock transports, a simulated SI4713 and a recording
//! transmitter for testing picast without hardware.
//!
//! - [`MockTransport`] -- scripted write/response pairs for byte-exact
//!   driver tests
//! - [`SimulatedSi4713`] -- a behavioural chip model with fault injection
//! - [`RecordingTransmitter`] -- a [`Transmitter`](picast_core::Transmitter)
//!   that logs every call with its timestamp

pub mod mock_transport;
pub mod recording;
pub mod sim_chip;

pub use mock_transport::MockTransport;
pub use recording::{RecordingTransmitter, TxCall};
pub use sim_chip::{SimHandle, SimulatedSi4713};
