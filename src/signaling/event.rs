//! Inbound signaling events

use crate::peer::{IceCandidate, ParticipantId};

use super::artifact::{OutboundSignal, SignalingArtifact};

/// An event delivered by the signaling channel, tagged with its sender
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    OfferReceived { from: ParticipantId, sdp: String },
    AnswerReceived { from: ParticipantId, sdp: String },
    IceCandidateReceived { from: ParticipantId, candidate: IceCandidate },
    ByeReceived { from: ParticipantId },
    /// The server reports that a participant left the meeting
    ParticipantLeft { id: ParticipantId },
}

impl InboundEvent {
    /// Participant the event concerns
    pub fn participant(&self) -> &ParticipantId {
        match self {
            InboundEvent::OfferReceived { from, .. }
            | InboundEvent::AnswerReceived { from, .. }
            | InboundEvent::IceCandidateReceived { from, .. }
            | InboundEvent::ByeReceived { from } => from,
            InboundEvent::ParticipantLeft { id } => id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            InboundEvent::OfferReceived { .. } => "offer-received",
            InboundEvent::AnswerReceived { .. } => "answer-received",
            InboundEvent::IceCandidateReceived { .. } => "ice-candidate-received",
            InboundEvent::ByeReceived { .. } => "bye-received",
            InboundEvent::ParticipantLeft { .. } => "participant-left",
        }
    }

    /// Whether the event ends the sender's connection
    pub fn is_departure(&self) -> bool {
        matches!(
            self,
            InboundEvent::ByeReceived { .. } | InboundEvent::ParticipantLeft { .. }
        )
    }
}

/// The event the addressee of a signal observes
impl From<OutboundSignal> for InboundEvent {
    fn from(signal: OutboundSignal) -> Self {
        let from = signal.from;
        match signal.artifact {
            SignalingArtifact::Offer { sdp } => InboundEvent::OfferReceived { from, sdp },
            SignalingArtifact::Answer { sdp } => InboundEvent::AnswerReceived { from, sdp },
            SignalingArtifact::IceCandidate { candidate } => {
                InboundEvent::IceCandidateReceived { from, candidate }
            }
            SignalingArtifact::Bye => InboundEvent::ByeReceived { from },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_outbound_keeps_sender() {
        let signal = OutboundSignal::new(
            ParticipantId::from("p2"),
            ParticipantId::from("p1"),
            SignalingArtifact::Answer { sdp: "v=0".into() },
        );
        let event = InboundEvent::from(signal);
        assert_eq!(event.participant().as_str(), "p2");
        assert_eq!(event.name(), "answer-received");
        assert!(!event.is_departure());
    }

    #[test]
    fn test_departures() {
        let bye = InboundEvent::ByeReceived {
            from: ParticipantId::from("p3"),
        };
        let left = InboundEvent::ParticipantLeft {
            id: ParticipantId::from("p3"),
        };
        assert!(bye.is_departure());
        assert!(left.is_departure());
        assert_eq!(left.participant(), bye.participant());
    }
}
