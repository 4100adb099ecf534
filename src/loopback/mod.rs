//! In-process transports
//!
//! [`LoopbackFactory`] stands in for a WebRTC stack and [`LoopbackHub`] for
//! the meeting server's signaling relay, so complete calls can run inside
//! one process. The demo and the tests are built on them.

pub mod signaling;
pub mod transport;

pub use signaling::{LoopbackHub, LoopbackSignaling};
pub use transport::{LoopbackFactory, LoopbackTransport, Step, StepGate};
