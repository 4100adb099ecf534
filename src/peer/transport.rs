//! Peer transport seam
//!
//! The orchestration core drives a WebRTC stack through [`PeerTransport`]
//! and obtains one instance per participant from a [`TransportFactory`].
//! Asynchronous notifications from the stack (gathered candidates, remote
//! tracks, state changes) flow back as [`TransportEvent`]s.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::id::ParticipantId;
use crate::media::{LocalTrack, RemoteTrack, TrackId};

/// Kind of session description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// An SDP payload with its type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// A network reachability candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// Candidate line (`candidate:...`)
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
        }
    }
}

/// Transport-level connection state, as reported by the WebRTC stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    /// Connectivity lost, may recover on its own
    Disconnected,
    /// Connectivity lost, needs an ICE restart
    Failed,
    Closed,
}

/// Notification emitted by a transport
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A local candidate was gathered and should be signaled
    LocalCandidate(IceCandidate),
    /// The remote side started sending a track
    RemoteTrackAdded(RemoteTrack),
    /// The remote side stopped sending a track
    RemoteTrackRemoved(TrackId),
    /// Connection state changed
    StateChanged(TransportState),
}

/// Channel on which a transport reports its events
pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

/// Error reported by a transport
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Session description could not be parsed
    #[error("malformed session description: {0}")]
    Malformed(String),
    /// Operation not valid in the current signaling state
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// The stack refused the operation
    #[error("rejected: {0}")]
    Rejected(String),
    /// Transport already closed
    #[error("transport closed")]
    Closed,
}

/// ICE server entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    /// Create a STUN server entry without credentials
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

/// Configuration handed to the factory for every new transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub ice_servers: Vec<IceServer>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![
                IceServer::stun("stun:stun.l.google.com:19302"),
                IceServer::stun("stun:stun1.l.google.com:19302"),
            ],
        }
    }
}

/// One peer connection, as seen by the negotiation engine
///
/// All methods are called from a single engine task, never concurrently
/// for the same instance, except [`connection_state`](Self::connection_state)
/// which the supervisor polls.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Create an offer. `ice_restart` requests fresh ICE credentials.
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription, TransportError>;

    /// Create an answer to the applied remote offer
    async fn create_answer(&self) -> Result<SessionDescription, TransportError>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), TransportError>;

    async fn set_remote_description(&self, desc: SessionDescription)
        -> Result<(), TransportError>;

    /// Discard a local offer that has not been answered
    async fn rollback(&self) -> Result<(), TransportError>;

    /// Apply a remote candidate. Fails if no remote description is set.
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError>;

    async fn add_track(&self, track: &LocalTrack) -> Result<(), TransportError>;

    async fn remove_track(&self, track_id: &TrackId) -> Result<(), TransportError>;

    /// Swap the track sent by an existing sender without renegotiating
    async fn replace_track(&self, old: &TrackId, new: &LocalTrack) -> Result<(), TransportError>;

    /// Prepare ICE for a restart; the next offer carries new credentials
    async fn restart_ice(&self) -> Result<(), TransportError>;

    fn connection_state(&self) -> TransportState;

    /// Close the transport. Idempotent.
    async fn close(&self);
}

/// Creates transports, one per participant connection
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(
        &self,
        participant: &ParticipantId,
        config: &TransportConfig,
        events: TransportEventSender,
    ) -> Result<Arc<dyn PeerTransport>, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ice_servers() {
        let config = TransportConfig::default();
        assert_eq!(config.ice_servers.len(), 2);
        assert_eq!(config.ice_servers[0].urls[0], "stun:stun.l.google.com:19302");
    }

    #[test]
    fn test_candidate_wire_shape() {
        let mut candidate = IceCandidate::new("candidate:1 1 udp 2122260223 10.0.0.1 5000 typ host");
        candidate.sdp_mid = Some("0".into());
        candidate.sdp_m_line_index = Some(0);

        let json = serde_json::to_value(&candidate).unwrap();
        assert_eq!(json["sdpMid"], "0");
        assert_eq!(json["sdpMLineIndex"], 0);
    }

    #[test]
    fn test_description_wire_shape() {
        let desc = SessionDescription::offer("v=0");
        let json = serde_json::to_value(&desc).unwrap();
        assert_eq!(json["type"], "offer");
        assert_eq!(json["sdp"], "v=0");
    }
}
