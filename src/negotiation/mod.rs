//! Offer/answer negotiation
//!
//! - [`state`]: the pure transition table
//! - [`glare`]: deterministic tie-break for simultaneous offers
//! - [`candidates`]: buffering of early remote candidates
//! - [`engine`]: the task that drives one connection

pub mod candidates;
pub mod engine;
pub mod glare;
pub mod state;

pub use candidates::{CandidateBuffer, CandidateDisposition};
pub use engine::EngineOutput;
pub(crate) use engine::{Command, EngineContext, NegotiationEngine};
pub use glare::{initiates, resolve, GlareOutcome};
pub use state::{NegotiationInput, NegotiationState};
