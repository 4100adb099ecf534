//! Local and remote media
//!
//! This module provides:
//! - Track references ([`LocalTrack`], [`RemoteTrack`])
//! - The local capture state shared by every connection
//! - [`MediaBinding`], which applies local track changes to all connections

pub mod binding;
pub mod capture;
pub mod track;

pub use binding::MediaBinding;
pub use capture::LocalCaptureState;
pub use track::{LocalTrack, RemoteTrack, TrackId, TrackKind};
