//! Participant identity and negotiation role

use serde::{Deserialize, Serialize};

/// Opaque, stable identifier of a meeting participant
///
/// Ordering is lexicographic on the underlying string; the glare tie-break
/// depends on it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Create a new participant ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ParticipantId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Which side generates the offer for a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Initiates the offer
    Caller,
    /// Waits for the remote offer and answers it
    Callee,
}

impl Role {
    pub fn is_caller(self) -> bool {
        self == Role::Caller
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lexicographic_order() {
        assert!(ParticipantId::from("a") < ParticipantId::from("b"));
        assert!(ParticipantId::from("p1") < ParticipantId::from("p2"));
        // String order, not numeric
        assert!(ParticipantId::from("p10") < ParticipantId::from("p9"));
    }

    #[test]
    fn test_serde_transparent() {
        let id = ParticipantId::from("alice");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"alice\"");
    }
}
