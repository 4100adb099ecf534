//! Glare resolution
//!
//! When both sides send an offer at the same time, the side with the
//! lexicographically smaller identifier rolls back its own offer and answers
//! the incoming one. Both sides evaluate the same comparison, so exactly one
//! of them ends up as the caller.
//!
//! The same comparison picks the caller when two participants learn about
//! each other through join events, so glare only happens on explicit calls.

use crate::peer::ParticipantId;

/// Outcome of a glare tie-break, from the local side's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlareOutcome {
    /// Keep the local offer and ignore the remote one
    KeepLocalOffer,
    /// Roll back the local offer and answer the remote one
    YieldToRemote,
}

/// Decide which offer survives a collision between `local` and `remote`
pub fn resolve(local: &ParticipantId, remote: &ParticipantId) -> GlareOutcome {
    if local < remote {
        GlareOutcome::YieldToRemote
    } else {
        GlareOutcome::KeepLocalOffer
    }
}

/// Whether `local` sends the first offer to `remote` after a join
pub fn initiates(local: &ParticipantId, remote: &ParticipantId) -> bool {
    resolve(local, remote) == GlareOutcome::KeepLocalOffer
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smaller_yields() {
        let a = ParticipantId::from("a");
        let b = ParticipantId::from("b");

        assert_eq!(resolve(&a, &b), GlareOutcome::YieldToRemote);
        assert_eq!(resolve(&b, &a), GlareOutcome::KeepLocalOffer);
    }

    #[test]
    fn test_exactly_one_side_keeps_offer() {
        let pairs = [("p1", "p2"), ("alice", "bob"), ("x9", "x10"), ("A", "a")];
        for (l, r) in pairs {
            let (l, r) = (ParticipantId::from(l), ParticipantId::from(r));
            let kept = [resolve(&l, &r), resolve(&r, &l)]
                .iter()
                .filter(|o| **o == GlareOutcome::KeepLocalOffer)
                .count();
            assert_eq!(kept, 1, "{} vs {}", l, r);
        }
    }

    #[test]
    fn test_greater_id_initiates() {
        let p1 = ParticipantId::from("p1");
        let p2 = ParticipantId::from("p2");

        assert!(initiates(&p2, &p1));
        assert!(!initiates(&p1, &p2));
    }
}
