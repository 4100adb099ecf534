//! Local capture state
//!
//! Process-wide record of what the local participant is sending. Only
//! [`MediaBinding`](super::MediaBinding) mutates it, under a lock that it
//! holds while reconciling every connection, so readers never observe a
//! half-applied toggle.

use super::track::{LocalTrack, TrackId, TrackKind};

/// Local capture state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalCaptureState {
    /// Microphone is unmuted
    pub audio_enabled: bool,

    /// Camera is on
    pub video_enabled: bool,

    /// A display capture track is being sent
    pub screen_sharing: bool,

    /// Tracks currently sent to every connection, in attach order
    active_tracks: Vec<LocalTrack>,

    /// Tracks muted by a toggle, kept for re-enabling
    parked_tracks: Vec<LocalTrack>,
}

impl Default for LocalCaptureState {
    fn default() -> Self {
        Self {
            audio_enabled: true,
            video_enabled: true,
            screen_sharing: false,
            active_tracks: Vec::new(),
            parked_tracks: Vec::new(),
        }
    }
}

impl LocalCaptureState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks new connections start with
    pub fn active_tracks(&self) -> &[LocalTrack] {
        &self.active_tracks
    }

    /// Tracks held back by a mute toggle
    pub fn parked_tracks(&self) -> &[LocalTrack] {
        &self.parked_tracks
    }

    pub fn is_active(&self, id: &TrackId) -> bool {
        self.active_tracks.iter().any(|t| &t.id == id)
    }

    /// First active track of the given kind
    pub fn active_of_kind(&self, kind: TrackKind) -> Option<&LocalTrack> {
        self.active_tracks.iter().find(|t| t.kind == kind)
    }

    /// Add a track. Returns `false` if it was already active.
    pub(crate) fn insert(&mut self, track: LocalTrack) -> bool {
        if self.is_active(&track.id) {
            return false;
        }
        if track.kind == TrackKind::Screen {
            self.screen_sharing = true;
        }
        self.active_tracks.push(track);
        true
    }

    /// Remove a track from the active set
    pub(crate) fn remove(&mut self, id: &TrackId) -> Option<LocalTrack> {
        let pos = self.active_tracks.iter().position(|t| &t.id == id)?;
        let track = self.active_tracks.remove(pos);
        if track.kind == TrackKind::Screen {
            self.screen_sharing = self.active_of_kind(TrackKind::Screen).is_some();
        }
        Some(track)
    }

    /// Swap `old` for `new`, keeping its position
    ///
    /// Returns `false` when `old` is not active; the caller then attaches
    /// `new` instead.
    pub(crate) fn replace(&mut self, old: &TrackId, new: LocalTrack) -> bool {
        match self.active_tracks.iter_mut().find(|t| &t.id == old) {
            Some(slot) => {
                *slot = new;
                true
            }
            None => false,
        }
    }

    /// Move every active track of `kind` to the parked list
    pub(crate) fn park(&mut self, kind: TrackKind) -> Vec<LocalTrack> {
        let (parked, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.active_tracks)
            .into_iter()
            .partition(|t| t.kind == kind);
        self.active_tracks = kept;
        self.parked_tracks.extend(parked.iter().cloned());
        parked
    }

    /// Move every parked track of `kind` back to the active set
    pub(crate) fn unpark(&mut self, kind: TrackKind) -> Vec<LocalTrack> {
        let (restored, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.parked_tracks)
            .into_iter()
            .partition(|t| t.kind == kind);
        self.parked_tracks = kept;
        self.active_tracks.extend(restored.iter().cloned());
        restored
    }

    /// Swap the parked track of the same kind for `track`
    ///
    /// Returns `false` when nothing of that kind is parked.
    pub(crate) fn replace_parked(&mut self, track: LocalTrack) -> bool {
        match self.parked_tracks.iter_mut().find(|t| t.kind == track.kind) {
            Some(slot) => {
                *slot = track;
                true
            }
            None => false,
        }
    }

    /// Drop every track and reset toggles
    pub(crate) fn clear(&mut self) -> Vec<LocalTrack> {
        self.parked_tracks.clear();
        self.screen_sharing = false;
        std::mem::take(&mut self.active_tracks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_unmuted_camera_on() {
        let state = LocalCaptureState::new();
        assert!(state.audio_enabled);
        assert!(state.video_enabled);
        assert!(!state.screen_sharing);
        assert!(state.active_tracks().is_empty());
    }

    #[test]
    fn test_insert_is_idempotent() {
        let mut state = LocalCaptureState::new();
        assert!(state.insert(LocalTrack::audio("mic")));
        assert!(!state.insert(LocalTrack::audio("mic")));
        assert_eq!(state.active_tracks().len(), 1);
    }

    #[test]
    fn test_replace_keeps_position() {
        let mut state = LocalCaptureState::new();
        state.insert(LocalTrack::audio("mic"));
        state.insert(LocalTrack::video("cam-a"));
        state.insert(LocalTrack::screen("screen"));

        assert!(state.replace(&TrackId::from("cam-a"), LocalTrack::video("cam-b")));
        let ids: Vec<_> = state.active_tracks().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["mic", "cam-b", "screen"]);

        assert!(!state.replace(&TrackId::from("missing"), LocalTrack::video("x")));
    }

    #[test]
    fn test_park_and_unpark() {
        let mut state = LocalCaptureState::new();
        state.insert(LocalTrack::audio("mic"));
        state.insert(LocalTrack::video("cam"));

        let parked = state.park(TrackKind::Audio);
        assert_eq!(parked.len(), 1);
        assert!(state.active_of_kind(TrackKind::Audio).is_none());
        assert_eq!(state.parked_tracks().len(), 1);

        let restored = state.unpark(TrackKind::Audio);
        assert_eq!(restored[0].id.as_str(), "mic");
        assert!(state.parked_tracks().is_empty());
        assert!(state.is_active(&TrackId::from("mic")));
    }

    #[test]
    fn test_screen_flag_follows_tracks() {
        let mut state = LocalCaptureState::new();
        state.insert(LocalTrack::screen("screen"));
        assert!(state.screen_sharing);

        state.remove(&TrackId::from("screen"));
        assert!(!state.screen_sharing);
    }
}
