//! Session ownership
//!
//! A [`Session`] is created when the local participant joins a meeting and
//! torn down when they leave. It owns the connection registry and the local
//! capture state; nothing in the crate is global.

pub mod config;
pub mod runtime;

pub use config::SessionConfig;
pub use runtime::Session;
