//! Participant identity and the peer transport seam

pub mod id;
pub mod transport;

pub use id::{ParticipantId, Role};
pub use transport::{
    IceCandidate, IceServer, PeerTransport, SdpType, SessionDescription, TransportConfig,
    TransportError, TransportEvent, TransportEventSender, TransportFactory, TransportState,
};
