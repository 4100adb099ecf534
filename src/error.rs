//! Error types
//!
//! A failure inside one connection never escapes that connection: the
//! engine closes the slot and reports the error through the registry. The
//! variants here are what callers of the public API can observe.

use crate::negotiation::{NegotiationInput, NegotiationState};
use crate::peer::{ParticipantId, TransportError};
use crate::signaling::SignalingError;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for connection orchestration
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Session description could not be created or applied. Fatal for the
    /// connection.
    #[error("negotiation with {participant} failed: {source}")]
    Negotiation {
        participant: ParticipantId,
        #[source]
        source: TransportError,
    },

    /// Connectivity failure (ICE). Recoverable once through a restart.
    #[error("transport to {participant} failed: {source}")]
    Transport {
        participant: ParticipantId,
        #[source]
        source: TransportError,
    },

    /// Best-effort signaling send failed. Logged, never retried.
    #[error("signaling delivery to {target} failed: {source}")]
    SignalingDelivery {
        target: ParticipantId,
        #[source]
        source: SignalingError,
    },

    /// The session already holds the maximum number of connections
    #[error("participant limit reached ({max})")]
    CapacityReached { max: usize },

    /// Attempted to open a connection to the local participant
    #[error("cannot connect to self ({0})")]
    SelfConnection(ParticipantId),

    /// The state machine rejected an input
    #[error("invalid transition from {from:?} on {input:?}")]
    InvalidTransition {
        from: NegotiationState,
        input: NegotiationInput,
    },

    /// The connection was closed before the operation completed
    #[error("connection to {0} is closed")]
    ConnectionClosed(ParticipantId),

    /// Malformed signaling payload
    #[error("wire format error: {0}")]
    Wire(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn negotiation(participant: &ParticipantId, source: TransportError) -> Self {
        Error::Negotiation {
            participant: participant.clone(),
            source,
        }
    }

    pub(crate) fn transport(participant: &ParticipantId, source: TransportError) -> Self {
        Error::Transport {
            participant: participant.clone(),
            source,
        }
    }

    /// Whether this error ends the affected connection
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Negotiation { .. } | Error::Transport { .. } | Error::InvalidTransition { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_participant() {
        let err = Error::negotiation(
            &ParticipantId::from("p7"),
            TransportError::Malformed("missing v= line".into()),
        );
        let text = err.to_string();
        assert!(text.contains("p7"));
        assert!(text.contains("missing v= line"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_delivery_failure_not_fatal() {
        let err = Error::SignalingDelivery {
            target: ParticipantId::from("p2"),
            source: SignalingError::Disconnected,
        };
        assert!(!err.is_fatal());
        assert!(std::error::Error::source(&err).is_some());
    }
}
