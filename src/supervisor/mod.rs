//! Connection supervision
//!
//! Watches transport health and recovers failed connections with an ICE
//! restart before giving up on them.

pub mod config;
pub mod health;

pub use config::SupervisorConfig;
pub use health::{ConnectionSupervisor, SupervisorAction};
