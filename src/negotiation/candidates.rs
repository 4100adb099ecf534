//! Remote ICE candidate buffering
//!
//! Candidates can only be applied once a remote description is in place.
//! Anything that arrives earlier waits here and is replayed in arrival
//! order.

use std::collections::VecDeque;

use crate::peer::IceCandidate;

/// What to do with an incoming candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateDisposition {
    /// Apply now
    Apply(IceCandidate),
    /// Held until the remote description is applied
    Buffered,
}

/// Buffer of remote candidates received ahead of the remote description
#[derive(Debug, Default)]
pub struct CandidateBuffer {
    pending: VecDeque<IceCandidate>,
    remote_description_applied: bool,
}

impl CandidateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept a candidate from the signaling channel
    pub fn accept(&mut self, candidate: IceCandidate) -> CandidateDisposition {
        if self.remote_description_applied {
            CandidateDisposition::Apply(candidate)
        } else {
            self.pending.push_back(candidate);
            CandidateDisposition::Buffered
        }
    }

    /// Record that a remote description was applied
    ///
    /// Returns the buffered candidates in arrival order. Later candidates
    /// are applied directly.
    pub fn on_remote_description(&mut self) -> Vec<IceCandidate> {
        self.remote_description_applied = true;
        self.pending.drain(..).collect()
    }

    pub fn remote_description_applied(&self) -> bool {
        self.remote_description_applied
    }

    /// Number of candidates waiting
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffers_until_remote_description() {
        let mut buffer = CandidateBuffer::new();

        for i in 1..=3 {
            let disposition = buffer.accept(IceCandidate::new(format!("candidate:{}", i)));
            assert_eq!(disposition, CandidateDisposition::Buffered);
        }
        assert_eq!(buffer.len(), 3);

        let replay = buffer.on_remote_description();
        let lines: Vec<_> = replay.iter().map(|c| c.candidate.as_str()).collect();
        assert_eq!(lines, ["candidate:1", "candidate:2", "candidate:3"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_applies_directly_afterwards() {
        let mut buffer = CandidateBuffer::new();
        assert!(buffer.on_remote_description().is_empty());

        let disposition = buffer.accept(IceCandidate::new("candidate:9"));
        assert_eq!(
            disposition,
            CandidateDisposition::Apply(IceCandidate::new("candidate:9"))
        );
        assert!(buffer.is_empty());
    }
}
