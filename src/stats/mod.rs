//! Connection and session statistics

pub mod metrics;

pub use metrics::{ConnectionStats, SessionStats};
pub(crate) use metrics::SessionCounters;
