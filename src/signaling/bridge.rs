//! Signaling bridge
//!
//! Routes inbound signaling events to the right connection and hands
//! outbound artifacts to the signaling channel. Events are validated
//! against the registry: anything addressed to a connection that no longer
//! exists is dropped and counted, never an error.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::negotiation::{Command, EngineOutput};
use crate::peer::ParticipantId;
use crate::registry::{ConnectionHandle, ConnectionRegistry, RemovalCause};
use crate::stats::SessionCounters;

use super::artifact::OutboundSignal;
use super::event::InboundEvent;

/// Failure of the signaling channel
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignalingError {
    #[error("signaling channel disconnected")]
    Disconnected,
    #[error("signal rejected: {0}")]
    Rejected(String),
}

/// Best-effort, unordered-across-participants message channel
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Send one signal. A single attempt; the bridge never retries.
    async fn send(&self, signal: &OutboundSignal) -> std::result::Result<(), SignalingError>;
}

/// Outcome of routing an inbound event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    /// Queued on the participant's connection
    Delivered,
    /// Held until the participant's slot is created
    Queued,
    /// The participant's connection was removed
    Removed,
    /// Stale or unroutable, dropped
    Discarded,
}

#[derive(Debug, Default)]
struct PendingJoin {
    events: Vec<InboundEvent>,
    departed: bool,
}

/// Routes signaling between the channel and the registry
pub struct SignalingBridge {
    local_id: ParticipantId,
    registry: Arc<ConnectionRegistry>,
    transport: Arc<dyn SignalingTransport>,
    pending: Mutex<HashMap<ParticipantId, PendingJoin>>,
    counters: Arc<SessionCounters>,
}

impl SignalingBridge {
    pub fn new(registry: Arc<ConnectionRegistry>, transport: Arc<dyn SignalingTransport>) -> Self {
        Self {
            local_id: registry.local_id().clone(),
            counters: registry.counters(),
            registry,
            transport,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Route one inbound event
    pub async fn route(&self, event: InboundEvent) -> Routed {
        let participant = event.participant().clone();
        if participant == self.local_id {
            return self.discard(&event, "event from local participant");
        }

        let mut pending = self.pending.lock().await;
        if let Some(join) = pending.get_mut(&participant) {
            if event.is_departure() {
                join.departed = true;
                join.events.clear();
            } else if !join.departed {
                join.events.push(event);
            }
            tracing::trace!(participant = %participant, "Event held for pending join");
            return Routed::Queued;
        }
        drop(pending);

        self.dispatch(event).await
    }

    /// Mark `participant` as joining; its events queue until
    /// [`complete_join`](Self::complete_join)
    pub(crate) async fn begin_join(&self, participant: &ParticipantId) {
        self.pending
            .lock()
            .await
            .entry(participant.clone())
            .or_default();
    }

    /// Replay the events queued during the join, in arrival order
    pub(crate) async fn complete_join(&self, participant: &ParticipantId) -> Vec<Routed> {
        // held across the replay so newer events cannot overtake queued ones
        let mut pending = self.pending.lock().await;
        let Some(join) = pending.remove(participant) else {
            return Vec::new();
        };

        if join.departed {
            tracing::debug!(participant = %participant, "Participant left while joining");
            self.registry
                .remove(participant, RemovalCause::RemoteDeparture)
                .await;
            return vec![Routed::Removed];
        }

        let mut routed = Vec::with_capacity(join.events.len());
        for event in join.events {
            routed.push(self.dispatch(event).await);
        }
        routed
    }

    async fn dispatch(&self, event: InboundEvent) -> Routed {
        match event {
            InboundEvent::ParticipantLeft { ref id } | InboundEvent::ByeReceived { from: ref id } => {
                if self.registry.remove(id, RemovalCause::RemoteDeparture).await {
                    Routed::Removed
                } else {
                    self.discard(&event, "no connection")
                }
            }
            InboundEvent::OfferReceived { ref from, ref sdp } => {
                match self.registry.accept(from).await {
                    Ok(handle) => self.forward(&handle, &event, Command::RemoteOffer(sdp.clone())).await,
                    Err(e) => {
                        tracing::warn!(participant = %from, error = %e, "Cannot accept offer");
                        self.discard(&event, "slot unavailable")
                    }
                }
            }
            InboundEvent::AnswerReceived { ref from, ref sdp } => match self.live(from).await {
                Some(handle) => {
                    self.forward(&handle, &event, Command::RemoteAnswer(sdp.clone()))
                        .await
                }
                None => self.discard(&event, "no connection"),
            },
            InboundEvent::IceCandidateReceived {
                ref from,
                ref candidate,
            } => match self.live(from).await {
                Some(handle) => {
                    self.forward(&handle, &event, Command::RemoteCandidate(candidate.clone()))
                        .await
                }
                None => self.discard(&event, "no connection"),
            },
        }
    }

    async fn live(&self, participant: &ParticipantId) -> Option<Arc<ConnectionHandle>> {
        self.registry
            .get(participant)
            .await
            .filter(|handle| !handle.is_closed())
    }

    async fn forward(
        &self,
        handle: &ConnectionHandle,
        event: &InboundEvent,
        command: Command,
    ) -> Routed {
        if handle.send(command).await {
            Routed::Delivered
        } else {
            self.discard(event, "connection task gone")
        }
    }

    fn discard(&self, event: &InboundEvent, reason: &'static str) -> Routed {
        SessionCounters::incr(&self.counters.stale_events);
        tracing::debug!(
            participant = %event.participant(),
            event = event.name(),
            reason = reason,
            "Discarding stale signaling event"
        );
        Routed::Discarded
    }

    /// Hand one signal to the channel
    ///
    /// Failures are logged and returned, never retried.
    pub async fn deliver(&self, signal: OutboundSignal) -> Result<()> {
        match self.transport.send(&signal).await {
            Ok(()) => {
                SessionCounters::incr(&self.counters.signals_sent);
                tracing::trace!(target_participant = %signal.to, kind = %signal.kind(), "Signal sent");
                Ok(())
            }
            Err(source) => {
                SessionCounters::incr(&self.counters.signaling_failures);
                tracing::warn!(
                    target_participant = %signal.to,
                    kind = %signal.kind(),
                    error = %source,
                    "Signaling delivery failed, dropping"
                );
                Err(Error::SignalingDelivery {
                    target: signal.to,
                    source,
                })
            }
        }
    }

    /// Spawn the task that drains engine outputs
    ///
    /// Signals go to the channel; connections that failed are removed from
    /// the registry.
    pub fn spawn_output_pump(
        self: &Arc<Self>,
        mut outputs: mpsc::UnboundedReceiver<EngineOutput>,
    ) -> JoinHandle<()> {
        let bridge = Arc::clone(self);

        tokio::spawn(async move {
            while let Some(output) = outputs.recv().await {
                match output {
                    EngineOutput::Signal(signal) => {
                        let _ = bridge.deliver(signal).await;
                    }
                    EngineOutput::Closed {
                        participant,
                        connection_id,
                        error,
                    } => {
                        tracing::debug!(
                            participant = %participant,
                            connection_id = connection_id,
                            error = %error,
                            "Removing failed connection"
                        );
                        bridge
                            .registry
                            .remove_connection(&participant, connection_id, RemovalCause::Failure)
                            .await;
                    }
                    EngineOutput::Barrier(ack) => {
                        let _ = ack.send(());
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_test::assert_ok;

    use super::*;
    use crate::loopback::{LoopbackFactory, LoopbackHub, LoopbackTransport};
    use crate::media::LocalCaptureState;
    use crate::negotiation::NegotiationState;
    use crate::peer::{IceCandidate, Role};
    use crate::session::SessionConfig;
    use crate::signaling::{SignalKind, SignalingArtifact};

    struct Fixture {
        bridge: Arc<SignalingBridge>,
        registry: Arc<ConnectionRegistry>,
        hub: LoopbackHub,
        _pump: JoinHandle<()>,
    }

    fn fixture(local: &str) -> Fixture {
        let factory = Arc::new(LoopbackFactory::new());
        let (registry, outputs) = ConnectionRegistry::new(
            ParticipantId::from(local),
            SessionConfig::default(),
            factory,
            Arc::new(Mutex::new(LocalCaptureState::new())),
        );
        let registry = Arc::new(registry);
        let hub = LoopbackHub::new();
        let bridge = Arc::new(SignalingBridge::new(Arc::clone(&registry), hub.endpoint()));
        let pump = bridge.spawn_output_pump(outputs);
        Fixture {
            bridge,
            registry,
            hub,
            _pump: pump,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn offer_from(id: &str) -> InboundEvent {
        InboundEvent::OfferReceived {
            from: ParticipantId::from(id),
            sdp: LoopbackTransport::sample_offer(id),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_offer_opens_callee_slot() {
        let fx = fixture("p1");
        let p2 = ParticipantId::from("p2");

        assert_eq!(fx.bridge.route(offer_from("p2")).await, Routed::Delivered);
        settle().await;

        let handle = fx.registry.get(&p2).await.unwrap();
        assert_eq!(handle.role(), Role::Callee);
        assert_eq!(handle.state(), NegotiationState::Stable);

        let sent = fx.hub.sent();
        assert!(sent
            .iter()
            .any(|s| s.to == p2 && s.kind() == SignalKind::Answer));
    }

    #[tokio::test(start_paused = true)]
    async fn test_answer_for_unknown_participant_discarded() {
        let fx = fixture("p1");
        let event = InboundEvent::AnswerReceived {
            from: ParticipantId::from("ghost"),
            sdp: "v=0".into(),
        };

        assert_eq!(fx.bridge.route(event).await, Routed::Discarded);
        assert!(fx.registry.is_empty().await);
        assert_eq!(fx.registry.stats().await.stale_events_discarded, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bye_removes_without_echo() {
        let fx = fixture("p1");
        let p2 = ParticipantId::from("p2");
        fx.bridge.route(offer_from("p2")).await;
        settle().await;

        let routed = fx
            .bridge
            .route(InboundEvent::ByeReceived { from: p2.clone() })
            .await;
        assert_eq!(routed, Routed::Removed);
        settle().await;

        assert!(fx.registry.get(&p2).await.is_none());
        assert!(fx.hub.sent().iter().all(|s| s.kind() != SignalKind::Bye));

        // a duplicate goodbye is stale
        let routed = fx.bridge.route(InboundEvent::ByeReceived { from: p2 }).await;
        assert_eq!(routed, Routed::Discarded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_queue_during_join() {
        let fx = fixture("p1");
        let p2 = ParticipantId::from("p2");

        fx.bridge.begin_join(&p2).await;
        let candidate = InboundEvent::IceCandidateReceived {
            from: p2.clone(),
            candidate: IceCandidate::new("candidate:1"),
        };
        assert_eq!(fx.bridge.route(candidate).await, Routed::Queued);

        let handle = fx.registry.ensure(&p2).await.unwrap();
        let routed = fx.bridge.complete_join(&p2).await;
        assert_eq!(routed, [Routed::Delivered]);
        settle().await;

        assert_eq!(handle.pending_candidates(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_departure_during_join_removes_slot() {
        let fx = fixture("p1");
        let p2 = ParticipantId::from("p2");

        fx.bridge.begin_join(&p2).await;
        fx.bridge
            .route(InboundEvent::ParticipantLeft { id: p2.clone() })
            .await;
        fx.registry.ensure(&p2).await.unwrap();

        assert_eq!(fx.bridge.complete_join(&p2).await, [Routed::Removed]);
        assert!(fx.registry.get(&p2).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivery_failure_is_reported_once() {
        let fx = fixture("p1");
        fx.hub.set_offline(true);

        let signal = OutboundSignal::new(
            ParticipantId::from("p1"),
            ParticipantId::from("p2"),
            SignalingArtifact::Bye,
        );
        let result = fx.bridge.deliver(signal.clone()).await;
        assert!(matches!(
            result,
            Err(Error::SignalingDelivery {
                source: SignalingError::Disconnected,
                ..
            })
        ));
        assert!(fx.hub.sent().is_empty());

        fx.hub.set_offline(false);
        assert_ok!(fx.bridge.deliver(signal).await);

        let stats = fx.registry.stats().await;
        assert_eq!(stats.signaling_failures, 1);
        assert_eq!(stats.signals_sent, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_offer_closes_connection() {
        let fx = fixture("p1");
        let p2 = ParticipantId::from("p2");

        let event = InboundEvent::OfferReceived {
            from: p2.clone(),
            sdp: "garbage".into(),
        };
        fx.bridge.route(event).await;
        settle().await;

        // the failed slot stays visible as closed and the remote side is told
        let view = fx.registry.view().borrow().clone();
        assert_eq!(
            view.status(&p2),
            Some(crate::registry::ConnectionStatus::Closed)
        );
        assert!(fx.registry.get(&p2).await.is_none());
        assert!(fx
            .hub
            .sent()
            .iter()
            .any(|s| s.to == p2 && s.kind() == SignalKind::Bye));
    }
}
