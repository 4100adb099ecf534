//! JSON socket event codec
//!
//! The meeting server relays signaling over socket events shaped as
//! `{"event": <name>, "data": {...}}`. Outbound events name their target
//! with `targetParticipantId`; inbound ones name their sender with
//! `fromParticipantId`. Events this crate does not handle (chat, reactions)
//! decode to `None`.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::Result;
use crate::peer::{IceCandidate, ParticipantId, SdpType, SessionDescription};

use super::artifact::{OutboundSignal, SignalingArtifact};
use super::event::InboundEvent;

/// A decoded inbound socket event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireEvent {
    /// A participant joined the meeting
    Joined(ParticipantId),
    /// A signaling event for the bridge
    Signal(InboundEvent),
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
struct ParticipantRef {
    id: ParticipantId,
}

#[derive(Deserialize)]
struct JoinedData {
    participant: ParticipantRef,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LeftData {
    participant_id: ParticipantId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OfferData {
    from_participant_id: ParticipantId,
    offer: SessionDescription,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnswerData {
    from_participant_id: ParticipantId,
    answer: SessionDescription,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CandidateData {
    from_participant_id: ParticipantId,
    candidate: IceCandidate,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ByeData {
    from_participant_id: ParticipantId,
}

/// Decode one inbound socket event
pub fn decode(text: &str) -> Result<Option<WireEvent>> {
    let envelope: Envelope = serde_json::from_str(text)?;
    let Envelope { event, data } = envelope;

    let decoded = match event.as_str() {
        "participant-joined" => {
            let data: JoinedData = serde_json::from_value(data)?;
            WireEvent::Joined(data.participant.id)
        }
        "participant-left" => {
            let data: LeftData = serde_json::from_value(data)?;
            WireEvent::Signal(InboundEvent::ParticipantLeft {
                id: data.participant_id,
            })
        }
        "offer-received" => {
            let data: OfferData = serde_json::from_value(data)?;
            WireEvent::Signal(InboundEvent::OfferReceived {
                from: data.from_participant_id,
                sdp: data.offer.sdp,
            })
        }
        "answer-received" => {
            let data: AnswerData = serde_json::from_value(data)?;
            WireEvent::Signal(InboundEvent::AnswerReceived {
                from: data.from_participant_id,
                sdp: data.answer.sdp,
            })
        }
        "ice-candidate-received" => {
            let data: CandidateData = serde_json::from_value(data)?;
            WireEvent::Signal(InboundEvent::IceCandidateReceived {
                from: data.from_participant_id,
                candidate: data.candidate,
            })
        }
        "bye-received" => {
            let data: ByeData = serde_json::from_value(data)?;
            WireEvent::Signal(InboundEvent::ByeReceived {
                from: data.from_participant_id,
            })
        }
        other => {
            tracing::trace!(event = other, "Ignoring unhandled socket event");
            return Ok(None);
        }
    };

    Ok(Some(decoded))
}

/// Encode an outbound signal as a socket event for `meeting_id`
pub fn encode(meeting_id: &str, signal: &OutboundSignal) -> Result<String> {
    let target = signal.to.as_str();

    let message = match &signal.artifact {
        SignalingArtifact::Offer { sdp } => json!({
            "event": "offer",
            "data": {
                "meetingId": meeting_id,
                "targetParticipantId": target,
                "offer": description(SdpType::Offer, sdp)?,
            },
        }),
        SignalingArtifact::Answer { sdp } => json!({
            "event": "answer",
            "data": {
                "meetingId": meeting_id,
                "targetParticipantId": target,
                "answer": description(SdpType::Answer, sdp)?,
            },
        }),
        SignalingArtifact::IceCandidate { candidate } => json!({
            "event": "ice-candidate",
            "data": {
                "meetingId": meeting_id,
                "targetParticipantId": target,
                "candidate": serde_json::to_value(candidate)?,
            },
        }),
        SignalingArtifact::Bye => json!({
            "event": "bye",
            "data": {
                "meetingId": meeting_id,
                "targetParticipantId": target,
            },
        }),
    };

    Ok(serde_json::to_string(&message)?)
}

fn description(sdp_type: SdpType, sdp: &str) -> Result<Value> {
    let desc = SessionDescription {
        sdp_type,
        sdp: sdp.to_string(),
    };
    Ok(serde_json::to_value(desc)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use tokio_test::assert_err;

    #[test]
    fn test_decode_joined() {
        let text = r#"{"event":"participant-joined","data":{"participant":{"id":"p2","displayName":"Bo"}}}"#;
        let event = decode(text).unwrap();
        assert_eq!(event, Some(WireEvent::Joined(ParticipantId::from("p2"))));
    }

    #[test]
    fn test_decode_offer() {
        let text = r#"{"event":"offer-received","data":{"fromParticipantId":"p2","offer":{"type":"offer","sdp":"v=0\r\n"}}}"#;
        let event = decode(text).unwrap();
        assert_eq!(
            event,
            Some(WireEvent::Signal(InboundEvent::OfferReceived {
                from: ParticipantId::from("p2"),
                sdp: "v=0\r\n".into(),
            }))
        );
    }

    #[test]
    fn test_decode_candidate_and_left() {
        let text = r#"{"event":"ice-candidate-received","data":{"fromParticipantId":"p3","candidate":{"candidate":"candidate:1","sdpMid":"0","sdpMLineIndex":0}}}"#;
        match decode(text).unwrap() {
            Some(WireEvent::Signal(InboundEvent::IceCandidateReceived { from, candidate })) => {
                assert_eq!(from.as_str(), "p3");
                assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
                assert_eq!(candidate.sdp_m_line_index, Some(0));
            }
            other => panic!("unexpected {:?}", other),
        }

        let text = r#"{"event":"participant-left","data":{"participantId":"p3"}}"#;
        assert_eq!(
            decode(text).unwrap(),
            Some(WireEvent::Signal(InboundEvent::ParticipantLeft {
                id: ParticipantId::from("p3"),
            }))
        );
    }

    #[test]
    fn test_decode_ignores_unrelated_events() {
        let text = r#"{"event":"message-received","data":{"text":"hi"}}"#;
        assert_eq!(decode(text).unwrap(), None);
    }

    #[test]
    fn test_decode_rejects_malformed() {
        let result = decode(r#"{"event":"offer-received","data":{"offer":{}}}"#);
        assert!(matches!(result, Err(Error::Wire(_))));
        assert_err!(decode("not json"));
    }

    #[test]
    fn test_encode_offer() {
        let signal = OutboundSignal::new(
            ParticipantId::from("p1"),
            ParticipantId::from("p2"),
            SignalingArtifact::Offer { sdp: "v=0".into() },
        );
        let text = encode("m-42", &signal).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();

        assert_eq!(value["event"], "offer");
        assert_eq!(value["data"]["meetingId"], "m-42");
        assert_eq!(value["data"]["targetParticipantId"], "p2");
        assert_eq!(value["data"]["offer"]["type"], "offer");
        assert_eq!(value["data"]["offer"]["sdp"], "v=0");
    }

    #[test]
    fn test_encode_bye() {
        let signal = OutboundSignal::new(
            ParticipantId::from("p1"),
            ParticipantId::from("p2"),
            SignalingArtifact::Bye,
        );
        let value: Value = serde_json::from_str(&encode("m-42", &signal).unwrap()).unwrap();
        assert_eq!(value["event"], "bye");
        assert_eq!(value["data"]["targetParticipantId"], "p2");
    }
}
