//! Signaling
//!
//! Offers, answers and candidates travel over an external relay that is
//! best-effort: messages can be late, duplicated or lost, and ordering only
//! holds between one pair of participants. This module holds the artifact
//! types, the socket wire codec and the bridge that connects the relay to
//! the registry.

pub mod artifact;
pub mod bridge;
pub mod event;
pub mod wire;

pub use artifact::{OutboundSignal, SignalKind, SignalingArtifact};
pub use bridge::{Routed, SignalingBridge, SignalingError, SignalingTransport};
pub use event::InboundEvent;
pub use wire::WireEvent;
