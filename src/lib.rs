//! Peer-connection orchestration for mesh video calls
//!
//! `meshcall` establishes, renegotiates and tears down one peer connection
//! per remote participant, driven by signaling events that arrive late,
//! duplicated or not at all.
//!
//! # Architecture
//!
//! ```text
//!            inbound events                       outbound signals
//!   socket ──► SignalingBridge ──┐         ┌──► SignalingBridge ──► socket
//!                                ▼         │
//!                        ConnectionRegistry│
//!                  ┌──────────┼──────────┐ │
//!                  ▼          ▼          ▼ │
//!            [engine p1] [engine p2] [engine p3]   one task per participant
//!                  ▲          ▲          ▲
//!                  └──── MediaBinding ───┘          local track changes
//!                  ▲
//!          ConnectionSupervisor                     health polling, ICE restart
//! ```
//!
//! Each connection is owned by a single negotiation task. Commands for that
//! connection queue up in order, so transitions never interleave; removing
//! a participant aborts the task, discarding whatever step was in flight.
//!
//! The WebRTC stack and the signaling channel sit behind the
//! [`PeerTransport`](peer::PeerTransport) and
//! [`SignalingTransport`](signaling::SignalingTransport) traits. The
//! [`loopback`] module ships in-memory implementations of both.

pub mod error;
pub mod loopback;
pub mod media;
pub mod negotiation;
pub mod peer;
pub mod registry;
pub mod session;
pub mod signaling;
pub mod stats;
pub mod supervisor;

pub use error::{Error, Result};
pub use media::{LocalTrack, MediaBinding, RemoteTrack, TrackId, TrackKind};
pub use negotiation::NegotiationState;
pub use peer::{ParticipantId, Role};
pub use registry::{ConnectionHandle, ConnectionRegistry, ConnectionStatus, RemovalCause};
pub use session::{Session, SessionConfig};
pub use signaling::{InboundEvent, OutboundSignal, SignalingArtifact};
pub use supervisor::{ConnectionSupervisor, SupervisorConfig};
