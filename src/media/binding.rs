//! Local media binding
//!
//! Keeps every live connection's outgoing track set in line with the local
//! capture state. Each operation updates the capture state and queues the
//! matching command on every connection while holding the capture lock, so
//! connections created concurrently either start from the new track set or
//! receive the command, never neither.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::negotiation::Command;
use crate::registry::ConnectionRegistry;

use super::capture::LocalCaptureState;
use super::track::{LocalTrack, TrackId, TrackKind};

/// Applies local track changes to every connection
pub struct MediaBinding {
    capture: Arc<Mutex<LocalCaptureState>>,
    registry: Arc<ConnectionRegistry>,
}

impl MediaBinding {
    pub fn new(capture: Arc<Mutex<LocalCaptureState>>, registry: Arc<ConnectionRegistry>) -> Self {
        Self { capture, registry }
    }

    /// Start sending `track` on every connection
    ///
    /// Returns the number of connections notified. Attaching a track that
    /// is already active does nothing.
    pub async fn attach_local_track(&self, track: LocalTrack) -> usize {
        let mut capture = self.capture.lock().await;
        self.attach_locked(&mut capture, track).await
    }

    /// Stop sending a track on every connection
    pub async fn detach_local_track(&self, id: &TrackId) -> Option<LocalTrack> {
        let mut capture = self.capture.lock().await;
        let track = capture.remove(id)?;
        tracing::debug!(track = %id, "Detaching local track");
        self.broadcast(Command::DetachTrack(id.clone())).await;
        Some(track)
    }

    /// Swap an active track for `new` on every connection
    ///
    /// Connections replace the sender's track in place, so there is no
    /// instant where neither track is sent. If `old` is not active, `new`
    /// is attached instead.
    pub async fn replace_local_track(&self, old: &TrackId, new: LocalTrack) -> usize {
        let mut capture = self.capture.lock().await;
        self.replace_locked(&mut capture, old, new).await
    }

    async fn attach_locked(&self, capture: &mut LocalCaptureState, track: LocalTrack) -> usize {
        if !capture.insert(track.clone()) {
            return 0;
        }
        tracing::debug!(track = %track.id, kind = ?track.kind, "Attaching local track");
        self.broadcast(Command::AttachTrack(track)).await
    }

    async fn replace_locked(
        &self,
        capture: &mut LocalCaptureState,
        old: &TrackId,
        new: LocalTrack,
    ) -> usize {
        if !capture.replace(old, new.clone()) {
            return self.attach_locked(capture, new).await;
        }
        tracing::debug!(old = %old, new = %new.id, "Replacing local track");
        self.broadcast(Command::ReplaceTrack {
            old: old.clone(),
            new,
        })
        .await
    }

    /// Mute or unmute the microphone. Returns whether audio is now enabled.
    pub async fn toggle_audio(&self) -> bool {
        self.toggle(TrackKind::Audio).await
    }

    /// Turn the camera off or on. Returns whether video is now enabled.
    pub async fn toggle_video(&self) -> bool {
        self.toggle(TrackKind::Video).await
    }

    async fn toggle(&self, kind: TrackKind) -> bool {
        let mut capture = self.capture.lock().await;
        let enabled = match kind {
            TrackKind::Audio => capture.audio_enabled,
            _ => capture.video_enabled,
        };

        if enabled {
            for track in capture.park(kind) {
                self.broadcast(Command::DetachTrack(track.id)).await;
            }
        } else {
            for track in capture.unpark(kind) {
                self.broadcast(Command::AttachTrack(track)).await;
            }
        }

        match kind {
            TrackKind::Audio => capture.audio_enabled = !enabled,
            _ => capture.video_enabled = !enabled,
        }
        tracing::debug!(kind = ?kind, enabled = !enabled, "Capture toggled");
        !enabled
    }

    /// Start sending a display capture track
    pub async fn start_screen_share(&self, mut track: LocalTrack) -> usize {
        track.kind = TrackKind::Screen;
        self.attach_local_track(track).await
    }

    /// Stop every display capture track. Returns how many were stopped.
    pub async fn stop_screen_share(&self) -> usize {
        let mut capture = self.capture.lock().await;
        let screens: Vec<_> = capture
            .active_tracks()
            .iter()
            .filter(|t| t.kind == TrackKind::Screen)
            .map(|t| t.id.clone())
            .collect();

        for id in &screens {
            capture.remove(id);
            self.broadcast(Command::DetachTrack(id.clone())).await;
        }
        screens.len()
    }

    /// Switch the capture device for the track's kind
    ///
    /// Replaces the active track of the same kind. A muted kind only has its
    /// parked track swapped, so unmuting later sends the new device.
    pub async fn switch_device(&self, track: LocalTrack) -> usize {
        let mut capture = self.capture.lock().await;
        if capture.replace_parked(track.clone()) {
            return 0;
        }
        match capture.active_of_kind(track.kind).map(|t| t.id.clone()) {
            Some(old) => self.replace_locked(&mut capture, &old, track).await,
            None => self.attach_locked(&mut capture, track).await,
        }
    }

    /// Current capture state
    pub async fn capture_state(&self) -> LocalCaptureState {
        self.capture.lock().await.clone()
    }

    /// Drop every track and reset toggles, at session end
    pub(crate) async fn release_all(&self) -> Vec<LocalTrack> {
        self.capture.lock().await.clear()
    }

    async fn broadcast(&self, command: Command) -> usize {
        let mut notified = 0;
        for handle in self.registry.all().await {
            if handle.is_closed() {
                continue;
            }
            if handle.send(command.clone()).await {
                notified += 1;
            }
        }
        notified
    }
}
