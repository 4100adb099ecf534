//! Connection health supervision
//!
//! Polls the transport state of every connection and applies one policy:
//! a disconnect shorter than the grace window is ignored, a failure gets
//! a bounded number of ICE restarts, and a connection that still fails is
//! removed with cause `Failure`. A failed connection stuck mid-negotiation
//! (a lost restart answer, say) is given up on after
//! `negotiation_timeout`.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::negotiation::NegotiationState;
use crate::peer::{ParticipantId, TransportState};
use crate::registry::{ConnectionRegistry, RemovalCause};

use super::config::SupervisorConfig;

/// Action taken by one supervision pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorAction {
    /// An ICE restart was queued on the connection
    RestartRequested(ParticipantId),
    /// Restarts were exhausted and the connection was removed
    GaveUp(ParticipantId),
    /// The transport closed by itself and the slot was removed
    Removed(ParticipantId),
}

/// Health record of one connection slot
#[derive(Debug)]
struct Health {
    connection_id: u64,
    disconnected_since: Option<Instant>,
    /// First poll that saw the transport failed while negotiating
    stalled_since: Option<Instant>,
    restarts: u32,
}

impl Health {
    fn new(connection_id: u64) -> Self {
        Self {
            connection_id,
            disconnected_since: None,
            stalled_since: None,
            restarts: 0,
        }
    }
}

/// Watches connection health and drives recovery
pub struct ConnectionSupervisor {
    registry: Arc<ConnectionRegistry>,
    config: SupervisorConfig,
    health: Mutex<HashMap<ParticipantId, Health>>,
}

impl ConnectionSupervisor {
    pub fn new(registry: Arc<ConnectionRegistry>, config: SupervisorConfig) -> Self {
        Self {
            registry,
            config,
            health: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Run one supervision pass over every connection
    pub async fn check(&self) -> Vec<SupervisorAction> {
        let now = Instant::now();
        let connections = self.registry.all().await;
        let mut health = self.health.lock().await;
        health.retain(|id, _| connections.iter().any(|c| c.participant() == id));

        let mut actions = Vec::new();
        for conn in connections {
            if conn.is_closed() {
                continue;
            }
            let participant = conn.participant().clone();
            let connection_id = conn.connection_id();

            let record = health
                .entry(participant.clone())
                .or_insert_with(|| Health::new(connection_id));
            if record.connection_id != connection_id {
                *record = Health::new(connection_id);
            }

            let failed = match conn.transport_state() {
                TransportState::Connected => {
                    if record.restarts > 0 {
                        tracing::info!(participant = %participant, "Connection recovered");
                    }
                    *record = Health::new(connection_id);
                    false
                }
                TransportState::New | TransportState::Connecting => false,
                TransportState::Disconnected => {
                    let since = *record.disconnected_since.get_or_insert(now);
                    now.duration_since(since) >= self.config.disconnect_grace
                }
                TransportState::Failed => true,
                TransportState::Closed => {
                    if self
                        .registry
                        .remove_connection(&participant, connection_id, RemovalCause::RemoteDeparture)
                        .await
                    {
                        actions.push(SupervisorAction::Removed(participant));
                    }
                    continue;
                }
            };

            if !failed {
                continue;
            }

            let state = conn.state();
            if state != NegotiationState::Stable {
                let since = *record.stalled_since.get_or_insert(now);
                if now.duration_since(since) < self.config.negotiation_timeout {
                    tracing::debug!(
                        participant = %participant,
                        state = ?state,
                        "Transport failed mid-negotiation, waiting"
                    );
                    continue;
                }
                tracing::warn!(
                    participant = %participant,
                    state = ?state,
                    restarts = record.restarts,
                    "Negotiation did not complete on failed transport, giving up"
                );
                self.give_up(&participant, connection_id, &mut actions).await;
                continue;
            }
            record.stalled_since = None;

            if record.restarts < self.config.max_ice_restarts {
                record.restarts += 1;
                record.disconnected_since = None;
                tracing::info!(
                    participant = %participant,
                    attempt = record.restarts,
                    "Requesting ICE restart"
                );
                if conn.restart_ice().await {
                    actions.push(SupervisorAction::RestartRequested(participant));
                }
            } else {
                tracing::warn!(
                    participant = %participant,
                    restarts = record.restarts,
                    "Connection did not recover, giving up"
                );
                self.give_up(&participant, connection_id, &mut actions).await;
            }
        }

        actions
    }

    async fn give_up(
        &self,
        participant: &ParticipantId,
        connection_id: u64,
        actions: &mut Vec<SupervisorAction>,
    ) {
        if self
            .registry
            .remove_connection(participant, connection_id, RemovalCause::Failure)
            .await
        {
            actions.push(SupervisorAction::GaveUp(participant.clone()));
        }
    }

    /// Spawn the poll loop
    ///
    /// Runs until the returned handle is aborted.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let supervisor = Arc::clone(self);
        let interval = supervisor.config.poll_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                supervisor.check().await;
            }
        })
    }
}
