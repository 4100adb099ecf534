//! Session-wide rendering view
//!
//! The UI renders from a single [`SessionView`]: which participants are
//! present, their connection status and the tracks received from them.
//! Engines publish into it as their connections change; subscribers get it
//! through a `watch` channel.

use std::collections::BTreeMap;

use tokio::sync::watch;

use crate::media::RemoteTrack;
use crate::peer::ParticipantId;

use super::entry::ConnectionStatus;

/// What the UI shows for one remote participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantView {
    pub status: ConnectionStatus,
    pub remote_tracks: Vec<RemoteTrack>,
}

/// Rendering view over every remote participant
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionView {
    pub participants: BTreeMap<ParticipantId, ParticipantView>,
}

impl SessionView {
    pub fn get(&self, participant: &ParticipantId) -> Option<&ParticipantView> {
        self.participants.get(participant)
    }

    pub fn status(&self, participant: &ParticipantId) -> Option<ConnectionStatus> {
        self.get(participant).map(|p| p.status)
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}

/// Write side of the view
#[derive(Debug)]
pub struct ViewPublisher {
    tx: watch::Sender<SessionView>,
}

impl ViewPublisher {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(SessionView::default());
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> SessionView {
        self.tx.borrow().clone()
    }

    /// Record the latest status of a participant. Subscribers are only
    /// woken when something visible changed.
    pub(crate) fn update(
        &self,
        participant: &ParticipantId,
        status: ConnectionStatus,
        remote_tracks: &[RemoteTrack],
    ) {
        self.tx.send_if_modified(|view| {
            let next = ParticipantView {
                status,
                remote_tracks: remote_tracks.to_vec(),
            };
            if view.participants.get(participant) == Some(&next) {
                return false;
            }
            view.participants.insert(participant.clone(), next);
            true
        });
    }

    /// Keep the participant visible as closed, with no media
    pub(crate) fn mark_closed(&self, participant: &ParticipantId) {
        self.update(participant, ConnectionStatus::Closed, &[]);
    }

    pub(crate) fn remove(&self, participant: &ParticipantId) {
        self.tx
            .send_if_modified(|view| view.participants.remove(participant).is_some());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::TrackKind;

    #[test]
    fn test_update_and_remove() {
        let publisher = ViewPublisher::new();
        let p2 = ParticipantId::from("p2");

        publisher.update(
            &p2,
            ConnectionStatus::Connected,
            &[RemoteTrack::new("p2-audio", TrackKind::Audio)],
        );
        let view = publisher.current();
        assert_eq!(view.status(&p2), Some(ConnectionStatus::Connected));
        assert_eq!(view.get(&p2).unwrap().remote_tracks.len(), 1);

        publisher.mark_closed(&p2);
        let view = publisher.current();
        assert_eq!(view.status(&p2), Some(ConnectionStatus::Closed));
        assert!(view.get(&p2).unwrap().remote_tracks.is_empty());

        publisher.remove(&p2);
        assert!(publisher.current().is_empty());
    }

    #[tokio::test]
    async fn test_subscribers_only_see_changes() {
        let publisher = ViewPublisher::new();
        let mut rx = publisher.subscribe();
        let p2 = ParticipantId::from("p2");

        publisher.update(&p2, ConnectionStatus::Connecting, &[]);
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        publisher.update(&p2, ConnectionStatus::Connecting, &[]);
        assert!(!rx.has_changed().unwrap());

        publisher.update(&p2, ConnectionStatus::Connected, &[]);
        assert!(rx.has_changed().unwrap());
    }
}
