//! Connection slot types
//!
//! A slot is the registry's record of one participant connection. The
//! negotiation task owns the mutable state; the [`ConnectionHandle`] kept in
//! the registry only reads the published [`ConnectionSnapshot`] and queues
//! commands.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::media::{LocalTrack, RemoteTrack};
use crate::negotiation::{Command, NegotiationState};
use crate::peer::{ParticipantId, PeerTransport, Role, TransportState};
use crate::stats::ConnectionStats;

/// User-facing connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    /// First negotiation in progress
    Connecting,
    /// Negotiated; media flows
    Connected,
    /// ICE restart in progress
    Reconnecting,
    /// Terminal
    Closed,
}

impl ConnectionStatus {
    /// Derive the status from the negotiation state and whether the slot
    /// has been stable before
    pub fn derive(state: NegotiationState, ever_stable: bool) -> Self {
        match state {
            NegotiationState::Stable => ConnectionStatus::Connected,
            NegotiationState::Restarting | NegotiationState::AwaitingAnswer => {
                ConnectionStatus::Reconnecting
            }
            NegotiationState::Closed => ConnectionStatus::Closed,
            _ if ever_stable => ConnectionStatus::Connected,
            _ => ConnectionStatus::Connecting,
        }
    }
}

/// Point-in-time view of a connection, published by its negotiation task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    pub participant: ParticipantId,

    /// Distinguishes successive slots for the same participant
    pub connection_id: u64,

    pub role: Role,
    pub state: NegotiationState,
    pub status: ConnectionStatus,

    /// Tracks currently sent on this connection
    pub local_tracks: Vec<LocalTrack>,

    /// Tracks received on this connection
    pub remote_tracks: Vec<RemoteTrack>,

    /// Remote candidates waiting for the remote description
    pub pending_candidates: usize,

    pub stats: ConnectionStats,
}

impl ConnectionSnapshot {
    pub(crate) fn new(participant: ParticipantId, connection_id: u64, role: Role) -> Self {
        Self {
            participant,
            connection_id,
            role,
            state: NegotiationState::Idle,
            status: ConnectionStatus::Connecting,
            local_tracks: Vec::new(),
            remote_tracks: Vec::new(),
            pending_candidates: 0,
            stats: ConnectionStats::new(),
        }
    }
}

/// Registry handle to one participant connection
pub struct ConnectionHandle {
    participant: ParticipantId,
    connection_id: u64,
    created_at: Instant,
    commands: mpsc::Sender<Command>,
    transport: Arc<dyn PeerTransport>,
    snapshot: Arc<watch::Sender<ConnectionSnapshot>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionHandle {
    pub(crate) fn new(
        participant: ParticipantId,
        connection_id: u64,
        commands: mpsc::Sender<Command>,
        transport: Arc<dyn PeerTransport>,
        snapshot: Arc<watch::Sender<ConnectionSnapshot>>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            participant,
            connection_id,
            created_at: Instant::now(),
            commands,
            transport,
            snapshot,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn participant(&self) -> &ParticipantId {
        &self.participant
    }

    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    /// Time since the slot was created
    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receive every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn role(&self) -> Role {
        self.snapshot.borrow().role
    }

    pub fn state(&self) -> NegotiationState {
        self.snapshot.borrow().state
    }

    pub fn status(&self) -> ConnectionStatus {
        self.snapshot.borrow().status
    }

    pub fn local_tracks(&self) -> Vec<LocalTrack> {
        self.snapshot.borrow().local_tracks.clone()
    }

    pub fn remote_tracks(&self) -> Vec<RemoteTrack> {
        self.snapshot.borrow().remote_tracks.clone()
    }

    pub fn pending_candidates(&self) -> usize {
        self.snapshot.borrow().pending_candidates
    }

    pub fn stats(&self) -> ConnectionStats {
        self.snapshot.borrow().stats.clone()
    }

    /// Connectivity as reported by the transport
    pub fn transport_state(&self) -> TransportState {
        self.transport.connection_state()
    }

    pub fn is_closed(&self) -> bool {
        self.state().is_closed()
    }

    /// Wait until the connection reaches `state`
    ///
    /// Fails with [`Error::ConnectionClosed`] if the connection closes
    /// first.
    pub async fn wait_for_state(&self, state: NegotiationState) -> Result<()> {
        let mut rx = self.subscribe();
        let reached = rx
            .wait_for(|s| s.state == state || s.state.is_closed())
            .await
            .map(|s| s.state == state)
            .unwrap_or(false);

        if reached {
            Ok(())
        } else {
            Err(Error::ConnectionClosed(self.participant.clone()))
        }
    }

    /// Queue a command. Returns `false` if the task is gone.
    pub(crate) async fn send(&self, command: Command) -> bool {
        self.commands.send(command).await.is_ok()
    }

    /// Ask the connection to renegotiate with fresh ICE credentials
    pub(crate) async fn restart_ice(&self) -> bool {
        self.send(Command::RestartIce).await
    }

    /// Stop the negotiation task and close the transport
    ///
    /// Returns once the task is gone, so nothing it had in flight can
    /// surface afterwards.
    pub(crate) async fn shutdown(&self) {
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }
        self.transport.close().await;
        self.mark_closed();
    }

    fn mark_closed(&self) {
        self.snapshot.send_modify(|s| {
            s.state = NegotiationState::Closed;
            s.status = ConnectionStatus::Closed;
            s.remote_tracks.clear();
        });
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("participant", &self.participant)
            .field("connection_id", &self.connection_id)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_derivation() {
        use NegotiationState as S;

        assert_eq!(ConnectionStatus::derive(S::Idle, false), ConnectionStatus::Connecting);
        assert_eq!(ConnectionStatus::derive(S::OfferSent, false), ConnectionStatus::Connecting);
        assert_eq!(ConnectionStatus::derive(S::Stable, false), ConnectionStatus::Connected);
        assert_eq!(ConnectionStatus::derive(S::Restarting, true), ConnectionStatus::Reconnecting);
        assert_eq!(
            ConnectionStatus::derive(S::AwaitingAnswer, true),
            ConnectionStatus::Reconnecting
        );
        // renegotiation after the first Stable keeps showing Connected
        assert_eq!(ConnectionStatus::derive(S::OfferSent, true), ConnectionStatus::Connected);
        assert_eq!(ConnectionStatus::derive(S::Closed, true), ConnectionStatus::Closed);
    }

    #[test]
    fn test_snapshot_starts_idle() {
        let snapshot = ConnectionSnapshot::new(ParticipantId::from("p2"), 7, Role::Caller);
        assert_eq!(snapshot.state, NegotiationState::Idle);
        assert_eq!(snapshot.status, ConnectionStatus::Connecting);
        assert_eq!(snapshot.connection_id, 7);
        assert_eq!(snapshot.pending_candidates, 0);
    }
}
