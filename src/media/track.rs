//! Media track references
//!
//! The core never touches media samples; tracks are opaque handles owned by
//! the capture subsystem (local) or the WebRTC stack (remote).

use serde::{Deserialize, Serialize};

/// Identifier of a media track
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(String);

impl TrackId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TrackId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Kind of media carried by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    /// Microphone
    Audio,
    /// Camera
    Video,
    /// Display capture
    Screen,
}

/// A locally captured track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalTrack {
    pub id: TrackId,
    pub kind: TrackKind,
    /// Capture device the track comes from, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

impl LocalTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: TrackId::new(id),
            kind,
            device_id: None,
        }
    }

    pub fn audio(id: impl Into<String>) -> Self {
        Self::new(id, TrackKind::Audio)
    }

    pub fn video(id: impl Into<String>) -> Self {
        Self::new(id, TrackKind::Video)
    }

    pub fn screen(id: impl Into<String>) -> Self {
        Self::new(id, TrackKind::Screen)
    }

    /// Set the capture device
    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }
}

/// A track received from a remote participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTrack {
    pub id: TrackId,
    pub kind: TrackKind,
}

impl RemoteTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: TrackId::new(id),
            kind,
        }
    }
}
