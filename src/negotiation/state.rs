//! Negotiation state machine
//!
//! Pure transition table for one connection. The engine feeds it inputs as
//! offer/answer steps complete and treats a rejected input as a fatal
//! defect for that connection.
//!
//! ```text
//!   Idle ──Start──► CreatingOffer ──OfferCreated──► OfferSent ──AnswerApplied──► Stable
//!   Idle ──RemoteOffer──► CreatingAnswer ──AnswerCreated──► Stable
//!   OfferSent ──GlareYield──► CreatingAnswer
//!   Stable ──Renegotiate──► CreatingOffer
//!   Stable ──RemoteOffer──► CreatingAnswer
//!   Stable ──IceFailure──► Restarting ──OfferCreated──► AwaitingAnswer ──AnswerApplied──► Stable
//!   *  ──Close──► Closed
//! ```

use crate::error::{Error, Result};

/// Negotiation state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NegotiationState {
    /// Slot exists, nothing exchanged yet
    Idle,
    /// Local offer being generated
    CreatingOffer,
    /// Offer sent, waiting for the answer
    OfferSent,
    /// ICE-restart offer sent, waiting for the answer
    AwaitingAnswer,
    /// Remote offer applied, local answer being generated
    CreatingAnswer,
    /// Both descriptions applied
    Stable,
    /// ICE restart offer being generated
    Restarting,
    /// Terminal
    Closed,
}

/// Input to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationInput {
    /// Caller begins the first offer
    Start,
    /// Local media changed on a stable connection
    Renegotiate,
    /// Local offer created and sent
    OfferCreated,
    /// Remote answer applied
    AnswerApplied,
    /// Remote offer received outside of glare
    RemoteOffer,
    /// Remote offer received during glare and the local offer was rolled back
    GlareYield,
    /// Local answer created and sent
    AnswerCreated,
    /// Transport failure requires an ICE restart
    IceFailure,
    /// Teardown, fatal error or remote goodbye
    Close,
}

impl NegotiationState {
    /// Apply an input, returning the next state
    pub fn apply(self, input: NegotiationInput) -> Result<NegotiationState> {
        use NegotiationInput as I;
        use NegotiationState as S;

        let next = match (self, input) {
            (_, I::Close) => S::Closed,
            (S::Idle, I::Start) => S::CreatingOffer,
            (S::Stable, I::Renegotiate) => S::CreatingOffer,
            (S::CreatingOffer, I::OfferCreated) => S::OfferSent,
            (S::Restarting, I::OfferCreated) => S::AwaitingAnswer,
            (S::OfferSent | S::AwaitingAnswer, I::AnswerApplied) => S::Stable,
            (S::Idle | S::Stable, I::RemoteOffer) => S::CreatingAnswer,
            (S::OfferSent | S::AwaitingAnswer, I::GlareYield) => S::CreatingAnswer,
            (S::CreatingAnswer, I::AnswerCreated) => S::Stable,
            (S::Stable, I::IceFailure) => S::Restarting,
            (from, input) => return Err(Error::InvalidTransition { from, input }),
        };

        Ok(next)
    }

    /// Whether a local offer is outstanding
    pub fn has_local_offer(self) -> bool {
        matches!(self, NegotiationState::OfferSent | NegotiationState::AwaitingAnswer)
    }

    /// Whether an ICE restart cycle is in progress
    pub fn is_restarting(self) -> bool {
        matches!(self, NegotiationState::Restarting | NegotiationState::AwaitingAnswer)
    }

    pub fn is_closed(self) -> bool {
        self == NegotiationState::Closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use NegotiationInput as I;
    use NegotiationState as S;

    fn run(start: S, inputs: &[I]) -> Result<S> {
        inputs.iter().try_fold(start, |state, input| state.apply(*input))
    }

    #[test]
    fn test_caller_path() {
        let end = run(S::Idle, &[I::Start, I::OfferCreated, I::AnswerApplied]).unwrap();
        assert_eq!(end, S::Stable);
    }

    #[test]
    fn test_callee_path() {
        let end = run(S::Idle, &[I::RemoteOffer, I::AnswerCreated]).unwrap();
        assert_eq!(end, S::Stable);
    }

    #[test]
    fn test_restart_path() {
        let end = run(
            S::Stable,
            &[I::IceFailure, I::OfferCreated, I::AnswerApplied],
        )
        .unwrap();
        assert_eq!(end, S::Stable);
        assert!(S::Restarting.is_restarting());
        assert!(S::AwaitingAnswer.is_restarting());
    }

    #[test]
    fn test_glare_yield() {
        let end = run(
            S::Idle,
            &[I::Start, I::OfferCreated, I::GlareYield, I::AnswerCreated],
        )
        .unwrap();
        assert_eq!(end, S::Stable);
    }

    #[test]
    fn test_close_from_every_state() {
        for state in [
            S::Idle,
            S::CreatingOffer,
            S::OfferSent,
            S::AwaitingAnswer,
            S::CreatingAnswer,
            S::Stable,
            S::Restarting,
            S::Closed,
        ] {
            assert_eq!(state.apply(I::Close).unwrap(), S::Closed);
        }
    }

    #[test]
    fn test_closed_is_terminal() {
        for input in [
            I::Start,
            I::Renegotiate,
            I::OfferCreated,
            I::AnswerApplied,
            I::RemoteOffer,
            I::GlareYield,
            I::AnswerCreated,
            I::IceFailure,
        ] {
            assert!(matches!(
                S::Closed.apply(input),
                Err(Error::InvalidTransition { from: S::Closed, .. })
            ));
        }
    }

    #[test]
    fn test_restart_requires_stable() {
        assert!(S::OfferSent.apply(I::IceFailure).is_err());
        assert!(S::Idle.apply(I::IceFailure).is_err());
    }

    #[test]
    fn test_answer_without_offer_rejected() {
        assert!(S::Stable.apply(I::AnswerApplied).is_err());
        assert!(S::Idle.apply(I::AnswerApplied).is_err());
    }
}
