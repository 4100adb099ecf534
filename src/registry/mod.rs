//! Connection registry
//!
//! The registry maps each remote participant to at most one live
//! connection slot and owns the lifecycle of those slots.
//!
//! # Architecture
//!
//! ```text
//!                       Arc<ConnectionRegistry>
//!                   ┌───────────────────────────────┐
//!                   │ connections: HashMap<Id,      │
//!                   │   ConnectionHandle {          │
//!                   │     commands: mpsc::Tx,       │──► engine task
//!                   │     snapshot: watch::Tx,      │◄── publishes state
//!                   │   }                           │
//!                   │ >                             │
//!                   │ view: watch<SessionView>      │──► UI
//!                   └───────────────────────────────┘
//! ```
//!
//! Creation and removal both hold the write lock, so a participant never has
//! two live slots, and the old transport is closed before a new one exists.

pub mod entry;
pub mod store;
pub mod view;

pub use entry::{ConnectionHandle, ConnectionSnapshot, ConnectionStatus};
pub use store::{ConnectionRegistry, RemovalCause};
pub use view::{ParticipantView, SessionView, ViewPublisher};
