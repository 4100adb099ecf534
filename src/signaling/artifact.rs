//! Signaling artifacts exchanged between peers

use serde::{Deserialize, Serialize};

use crate::peer::{IceCandidate, ParticipantId};

/// A payload carried by the signaling channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SignalingArtifact {
    Offer { sdp: String },
    Answer { sdp: String },
    IceCandidate { candidate: IceCandidate },
    /// The sender is tearing down its side of the connection
    Bye,
}

/// Artifact discriminant, for logging and filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
    Bye,
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::IceCandidate => "ice-candidate",
            SignalKind::Bye => "bye",
        };
        f.write_str(name)
    }
}

impl SignalingArtifact {
    pub fn kind(&self) -> SignalKind {
        match self {
            SignalingArtifact::Offer { .. } => SignalKind::Offer,
            SignalingArtifact::Answer { .. } => SignalKind::Answer,
            SignalingArtifact::IceCandidate { .. } => SignalKind::IceCandidate,
            SignalingArtifact::Bye => SignalKind::Bye,
        }
    }
}

/// An artifact addressed to one remote participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundSignal {
    #[serde(rename = "fromParticipantId")]
    pub from: ParticipantId,
    #[serde(rename = "toParticipantId")]
    pub to: ParticipantId,
    #[serde(flatten)]
    pub artifact: SignalingArtifact,
}

impl OutboundSignal {
    pub fn new(from: ParticipantId, to: ParticipantId, artifact: SignalingArtifact) -> Self {
        Self { from, to, artifact }
    }

    pub fn kind(&self) -> SignalKind {
        self.artifact.kind()
    }
}
