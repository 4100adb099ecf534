//! Connection registry implementation
//!
//! The registry owns every participant connection of a session. It is the
//! only place slots are created or destroyed, so it can guarantee at most
//! one live slot per participant and that a slot's transport is closed
//! before a replacement is created.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch, Mutex, RwLock};

use crate::error::{Error, Result};
use crate::media::LocalCaptureState;
use crate::negotiation::{Command, EngineContext, EngineOutput, NegotiationEngine};
use crate::peer::{ParticipantId, Role, TransportFactory};
use crate::session::SessionConfig;
use crate::signaling::{OutboundSignal, SignalingArtifact};
use crate::stats::{SessionCounters, SessionStats};

use super::entry::{ConnectionHandle, ConnectionSnapshot};
use super::view::{SessionView, ViewPublisher};

/// Why a connection is being removed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalCause {
    /// The local participant hung up or left the meeting
    LocalDeparture,
    /// The remote participant left or said goodbye
    RemoteDeparture,
    /// The connection failed and could not be recovered
    Failure,
}

impl RemovalCause {
    /// Whether the remote side is told with a `Bye`
    pub fn sends_bye(self) -> bool {
        !matches!(self, RemovalCause::RemoteDeparture)
    }
}

/// Registry of participant connections
pub struct ConnectionRegistry {
    local_id: ParticipantId,

    /// Live slots, keyed by remote participant
    connections: RwLock<HashMap<ParticipantId, Arc<ConnectionHandle>>>,

    factory: Arc<dyn TransportFactory>,

    /// Shared with `MediaBinding`; locked before `connections`
    capture: Arc<Mutex<LocalCaptureState>>,

    output: mpsc::UnboundedSender<EngineOutput>,
    view: Arc<ViewPublisher>,
    config: SessionConfig,
    next_connection_id: AtomicU64,
    counters: Arc<SessionCounters>,
    started_at: tokio::time::Instant,
}

impl ConnectionRegistry {
    /// Create a registry. Engine outputs (signals to send, connection
    /// failures) arrive on the returned receiver.
    pub fn new(
        local_id: ParticipantId,
        config: SessionConfig,
        factory: Arc<dyn TransportFactory>,
        capture: Arc<Mutex<LocalCaptureState>>,
    ) -> (Self, mpsc::UnboundedReceiver<EngineOutput>) {
        let (output, output_rx) = mpsc::unbounded_channel();

        let registry = Self {
            local_id,
            connections: RwLock::new(HashMap::new()),
            factory,
            capture,
            output,
            view: Arc::new(ViewPublisher::new()),
            config,
            next_connection_id: AtomicU64::new(1),
            counters: Arc::new(SessionCounters::default()),
            started_at: tokio::time::Instant::now(),
        };

        (registry, output_rx)
    }

    pub fn local_id(&self) -> &ParticipantId {
        &self.local_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Get or create the connection to `participant`, as caller
    ///
    /// Idempotent: while a live slot exists it is returned unchanged and no
    /// transport is created.
    pub async fn ensure(&self, participant: &ParticipantId) -> Result<Arc<ConnectionHandle>> {
        self.open(participant, Role::Caller).await
    }

    /// Get or create the connection to `participant`, as callee
    ///
    /// Used when an offer arrives from a participant without a slot.
    pub async fn accept(&self, participant: &ParticipantId) -> Result<Arc<ConnectionHandle>> {
        self.open(participant, Role::Callee).await
    }

    async fn open(&self, participant: &ParticipantId, role: Role) -> Result<Arc<ConnectionHandle>> {
        if participant == &self.local_id {
            return Err(Error::SelfConnection(participant.clone()));
        }

        let capture = self.capture.lock().await;
        let mut connections = self.connections.write().await;

        if let Some(existing) = connections.get(participant) {
            if !existing.is_closed() {
                return Ok(Arc::clone(existing));
            }
        }
        // still mapped but closed: its engine failed and the removal is queued
        if let Some(stale) = connections.remove(participant) {
            stale.shutdown().await;
            SessionCounters::incr(&self.counters.connections_closed);
            SessionCounters::incr(&self.counters.connection_failures);
            tracing::debug!(
                participant = %participant,
                connection_id = stale.connection_id(),
                "Replacing closed connection"
            );
        }

        // the meeting limit counts the local participant
        let max = self.config.max_participants;
        if connections.len() + 1 >= max {
            tracing::warn!(participant = %participant, max = max, "Participant limit reached");
            return Err(Error::CapacityReached { max });
        }

        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let transport = self
            .factory
            .create(participant, &self.config.transport, event_tx)
            .await
            .map_err(|e| Error::transport(participant, e))?;

        let (command_tx, command_rx) = mpsc::channel(self.config.command_queue_capacity);
        let (snapshot_tx, _) = watch::channel(ConnectionSnapshot::new(
            participant.clone(),
            connection_id,
            role,
        ));
        let snapshot = Arc::new(snapshot_tx);

        let engine = NegotiationEngine::new(
            EngineContext {
                local_id: self.local_id.clone(),
                remote_id: participant.clone(),
                connection_id,
                role,
                transport: Arc::clone(&transport),
                output: self.output.clone(),
                snapshot: Arc::clone(&snapshot),
                view: Arc::clone(&self.view),
            },
            capture.active_tracks().to_vec(),
        );
        let task = tokio::spawn(engine.run(command_rx, event_rx));

        let handle = Arc::new(ConnectionHandle::new(
            participant.clone(),
            connection_id,
            command_tx,
            transport,
            snapshot,
            task,
        ));
        if role.is_caller() {
            handle.send(Command::Start).await;
        }

        connections.insert(participant.clone(), Arc::clone(&handle));
        SessionCounters::incr(&self.counters.connections_created);

        tracing::info!(
            participant = %participant,
            connection_id = connection_id,
            role = ?role,
            connections = connections.len(),
            "Connection created"
        );

        Ok(handle)
    }

    /// Remove the connection to `participant`
    ///
    /// Any in-flight negotiation step is cancelled and the transport closed
    /// before this returns. Returns `false` if there was no slot.
    pub async fn remove(&self, participant: &ParticipantId, cause: RemovalCause) -> bool {
        let mut connections = self.connections.write().await;
        let Some(handle) = connections.remove(participant) else {
            return false;
        };
        self.finish_removal(&handle, cause).await;
        true
    }

    /// Remove the connection to `participant` only if it is still the slot
    /// identified by `connection_id`
    pub async fn remove_connection(
        &self,
        participant: &ParticipantId,
        connection_id: u64,
        cause: RemovalCause,
    ) -> bool {
        let mut connections = self.connections.write().await;
        match connections.get(participant) {
            Some(handle) if handle.connection_id() == connection_id => {}
            _ => {
                tracing::debug!(
                    participant = %participant,
                    connection_id = connection_id,
                    "Ignoring removal of superseded connection"
                );
                return false;
            }
        }
        let Some(handle) = connections.remove(participant) else {
            return false;
        };
        self.finish_removal(&handle, cause).await;
        true
    }

    /// Remove every connection. Returns how many were removed.
    pub async fn clear(&self, cause: RemovalCause) -> usize {
        let mut connections = self.connections.write().await;
        let mut removed: Vec<_> = connections.drain().map(|(_, handle)| handle).collect();
        removed.sort_by(|a, b| a.participant().cmp(b.participant()));

        for handle in &removed {
            self.finish_removal(handle, cause).await;
        }
        removed.len()
    }

    async fn finish_removal(&self, handle: &ConnectionHandle, cause: RemovalCause) {
        let participant = handle.participant();
        handle.shutdown().await;

        if cause.sends_bye() {
            let bye = OutboundSignal::new(
                self.local_id.clone(),
                participant.clone(),
                SignalingArtifact::Bye,
            );
            let _ = self.output.send(EngineOutput::Signal(bye));
        }

        match cause {
            RemovalCause::Failure => {
                self.view.mark_closed(participant);
                SessionCounters::incr(&self.counters.connection_failures);
            }
            RemovalCause::LocalDeparture | RemovalCause::RemoteDeparture => {
                self.view.remove(participant);
            }
        }
        SessionCounters::incr(&self.counters.connections_closed);

        tracing::info!(
            participant = %participant,
            connection_id = handle.connection_id(),
            cause = ?cause,
            "Connection removed"
        );
    }

    pub async fn get(&self, participant: &ParticipantId) -> Option<Arc<ConnectionHandle>> {
        self.connections.read().await.get(participant).cloned()
    }

    /// Every slot, ordered by participant
    pub async fn all(&self) -> Vec<Arc<ConnectionHandle>> {
        let connections = self.connections.read().await;
        let mut all: Vec<_> = connections.values().cloned().collect();
        all.sort_by(|a, b| a.participant().cmp(b.participant()));
        all
    }

    pub async fn participants(&self) -> Vec<ParticipantId> {
        let mut ids: Vec<_> = self.connections.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    /// Subscribe to the rendering view
    pub fn view(&self) -> watch::Receiver<SessionView> {
        self.view.subscribe()
    }

    /// Session statistics
    pub async fn stats(&self) -> SessionStats {
        let active = self
            .connections
            .read()
            .await
            .values()
            .filter(|h| !h.is_closed())
            .count();
        self.counters.snapshot(active, self.started_at.elapsed())
    }

    pub(crate) fn counters(&self) -> Arc<SessionCounters> {
        Arc::clone(&self.counters)
    }

    /// Wait until every output queued so far has been processed
    pub(crate) async fn flush_outputs(&self) {
        let (ack, done) = oneshot::channel();
        if self.output.send(EngineOutput::Barrier(ack)).is_ok() {
            let _ = done.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::loopback::{LoopbackFactory, Step};
    use crate::media::LocalTrack;
    use crate::negotiation::NegotiationState;
    use crate::peer::IceCandidate;
    use crate::registry::ConnectionStatus;

    struct Fixture {
        registry: Arc<ConnectionRegistry>,
        factory: Arc<LoopbackFactory>,
        outputs: mpsc::UnboundedReceiver<EngineOutput>,
    }

    fn fixture(local: &str) -> Fixture {
        fixture_with(local, SessionConfig::default(), LocalCaptureState::new())
    }

    fn fixture_with(local: &str, config: SessionConfig, capture: LocalCaptureState) -> Fixture {
        let factory = Arc::new(LoopbackFactory::new());
        let (registry, outputs) = ConnectionRegistry::new(
            ParticipantId::from(local),
            config,
            factory.clone(),
            Arc::new(Mutex::new(capture)),
        );
        Fixture {
            registry: Arc::new(registry),
            factory,
            outputs,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn drain(outputs: &mut mpsc::UnboundedReceiver<EngineOutput>) -> Vec<OutboundSignal> {
        let mut signals = Vec::new();
        while let Ok(output) = outputs.try_recv() {
            if let EngineOutput::Signal(signal) = output {
                signals.push(signal);
            }
        }
        signals
    }

    fn offer_sdp(signals: &[OutboundSignal]) -> Option<String> {
        signals.iter().find_map(|s| match &s.artifact {
            SignalingArtifact::Offer { sdp } => Some(sdp.clone()),
            _ => None,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_is_idempotent() {
        let fx = fixture("p1");
        let p2 = ParticipantId::from("p2");

        let first = assert_ok!(fx.registry.ensure(&p2).await);
        let second = assert_ok!(fx.registry.ensure(&p2).await);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.connection_id(), second.connection_id());
        assert_eq!(fx.factory.created_count(&p2), 1);
        assert_eq!(fx.registry.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_sends_offer() {
        let mut fx = fixture("p1");
        let p2 = ParticipantId::from("p2");

        let handle = fx.registry.ensure(&p2).await.unwrap();
        settle().await;

        assert_eq!(handle.role(), Role::Caller);
        assert_eq!(handle.state(), NegotiationState::OfferSent);
        assert_eq!(handle.status(), ConnectionStatus::Connecting);

        let signals = drain(&mut fx.outputs);
        assert_eq!(signals[0].to, p2);
        assert!(offer_sdp(&signals).unwrap().starts_with("v=0"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_self_connection_rejected() {
        let fx = fixture("p1");
        let result = fx.registry.ensure(&ParticipantId::from("p1")).await;
        assert!(matches!(result, Err(Error::SelfConnection(_))));
        assert!(fx.registry.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_counts_local_participant() {
        let fx = fixture_with(
            "p1",
            SessionConfig::default().max_participants(3),
            LocalCaptureState::new(),
        );

        assert_ok!(fx.registry.ensure(&ParticipantId::from("p2")).await);
        assert_ok!(fx.registry.ensure(&ParticipantId::from("p3")).await);
        let result = fx.registry.ensure(&ParticipantId::from("p4")).await;
        assert!(matches!(result, Err(Error::CapacityReached { max: 3 })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_factory_failure() {
        let fx = fixture("p1");
        let p2 = ParticipantId::from("p2");
        fx.factory.refuse(&p2);

        let result = fx.registry.ensure(&p2).await;
        assert!(matches!(result, Err(Error::Transport { .. })));
        assert!(fx.registry.get(&p2).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_slot_starts_with_active_tracks() {
        let mut capture = LocalCaptureState::new();
        capture.insert(LocalTrack::audio("mic"));
        capture.insert(LocalTrack::video("cam"));
        let mut fx = fixture_with("p1", SessionConfig::default(), capture);
        let p2 = ParticipantId::from("p2");

        let handle = fx.registry.ensure(&p2).await.unwrap();
        settle().await;

        assert_eq!(handle.local_tracks().len(), 2);
        let sdp = offer_sdp(&drain(&mut fx.outputs)).unwrap();
        assert!(sdp.contains("m=audio"));
        assert!(sdp.contains("m=video"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_candidates_buffered_until_remote_description() {
        let mut fx = fixture("p1");
        let p2 = ParticipantId::from("p2");
        let handle = fx.registry.accept(&p2).await.unwrap();

        for i in 1..=3 {
            let candidate = IceCandidate::new(format!("candidate:{} 1 udp 1 10.0.0.2 500{} typ host", i, i));
            assert!(handle.send(Command::RemoteCandidate(candidate)).await);
        }
        settle().await;
        assert_eq!(handle.pending_candidates(), 3);
        assert_eq!(handle.stats().candidates_applied, 0);
        assert_eq!(handle.stats().candidates_pending(), 3);

        let transport = fx.factory.latest(&p2).unwrap();
        assert!(transport.applied_candidates().is_empty());

        let remote = crate::loopback::LoopbackTransport::sample_offer("p2");
        assert!(handle.send(Command::RemoteOffer(remote)).await);
        settle().await;

        assert_eq!(handle.state(), NegotiationState::Stable);
        assert_eq!(handle.pending_candidates(), 0);
        let applied: Vec<_> = transport
            .applied_candidates()
            .into_iter()
            .map(|c| c.candidate)
            .collect();
        assert_eq!(applied.len(), 3);
        assert!(applied[0].starts_with("candidate:1"));
        assert!(applied[1].starts_with("candidate:2"));
        assert!(applied[2].starts_with("candidate:3"));
        assert_eq!(handle.stats().candidates_buffered, 3);
        assert_eq!(handle.stats().candidates_applied, 3);
        assert_eq!(handle.stats().candidates_pending(), 0);

        let signals = drain(&mut fx.outputs);
        assert!(signals
            .iter()
            .any(|s| matches!(s.artifact, SignalingArtifact::Answer { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_during_creating_answer_cancels() {
        let mut fx = fixture("p1");
        let p2 = ParticipantId::from("p2");
        let gate = fx.factory.gate_next(&p2, Step::CreateAnswer);

        let handle = fx.registry.accept(&p2).await.unwrap();
        let remote = crate::loopback::LoopbackTransport::sample_offer("p2");
        handle.send(Command::RemoteOffer(remote)).await;
        settle().await;
        assert_eq!(handle.state(), NegotiationState::CreatingAnswer);

        assert!(fx.registry.remove(&p2, RemovalCause::RemoteDeparture).await);
        gate.release();
        settle().await;

        assert!(fx.registry.get(&p2).await.is_none());
        assert!(fx.registry.view().borrow().get(&p2).is_none());
        assert!(handle.is_closed());
        assert!(fx.factory.latest(&p2).unwrap().is_closed());

        // no answer and no bye ever left
        let signals = drain(&mut fx.outputs);
        assert!(signals.iter().all(|s| !matches!(
            s.artifact,
            SignalingArtifact::Answer { .. } | SignalingArtifact::Bye
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_then_ensure_creates_fresh_transport() {
        let mut fx = fixture("p1");
        let p2 = ParticipantId::from("p2");

        let first = fx.registry.ensure(&p2).await.unwrap();
        assert!(fx.registry.remove(&p2, RemovalCause::LocalDeparture).await);
        let second = fx.registry.ensure(&p2).await.unwrap();

        assert_ne!(first.connection_id(), second.connection_id());
        assert_eq!(fx.factory.created_count(&p2), 2);
        assert!(fx.factory.transports_for(&p2)[0].is_closed());

        let signals = drain(&mut fx.outputs);
        assert!(signals
            .iter()
            .any(|s| s.artifact == SignalingArtifact::Bye && s.to == p2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_join_and_leave_keep_one_slot() {
        #[derive(Debug, Clone, Copy)]
        enum Op {
            Ensure,
            Accept,
            Remove,
        }
        use Op::*;

        let fx = fixture("p1");
        let p2 = ParticipantId::from("p2");
        let orders = [
            [Ensure, Accept, Remove],
            [Ensure, Remove, Accept],
            [Accept, Ensure, Remove],
            [Accept, Remove, Ensure],
            [Remove, Ensure, Accept],
            [Remove, Accept, Ensure],
        ];

        for order in orders.iter().cycle().take(18) {
            let tasks: Vec<_> = order
                .iter()
                .map(|&op| {
                    let registry = Arc::clone(&fx.registry);
                    let p2 = p2.clone();
                    tokio::spawn(async move {
                        match op {
                            Ensure => {
                                let _ = registry.ensure(&p2).await;
                            }
                            Accept => {
                                let _ = registry.accept(&p2).await;
                            }
                            Remove => {
                                registry.remove(&p2, RemovalCause::RemoteDeparture).await;
                            }
                        }
                    })
                })
                .collect();
            for task in tasks {
                task.await.unwrap();
            }

            let open = fx
                .factory
                .transports_for(&p2)
                .iter()
                .filter(|t| !t.is_closed())
                .count();
            match fx.registry.get(&p2).await {
                Some(handle) => {
                    assert_eq!(open, 1, "order {:?}", order);
                    assert!(!handle.is_closed());
                    assert!(!fx.factory.latest(&p2).unwrap().is_closed());
                }
                None => assert_eq!(open, 0, "order {:?}", order),
            }
        }

        let created = fx.factory.created_count(&p2);
        let closed = fx
            .factory
            .transports_for(&p2)
            .iter()
            .filter(|t| t.is_closed())
            .count();
        assert_eq!(created - closed, fx.registry.len().await);
        assert_eq!(fx.registry.stats().await.connections_created as usize, created);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_connection_ignores_superseded_slot() {
        let fx = fixture("p1");
        let p2 = ParticipantId::from("p2");

        let old = fx.registry.ensure(&p2).await.unwrap();
        fx.registry.remove(&p2, RemovalCause::LocalDeparture).await;
        let current = fx.registry.ensure(&p2).await.unwrap();

        let removed = fx
            .registry
            .remove_connection(&p2, old.connection_id(), RemovalCause::Failure)
            .await;
        assert!(!removed);
        assert_eq!(
            fx.registry.get(&p2).await.unwrap().connection_id(),
            current.connection_id()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_keeps_participant_visible() {
        let fx = fixture("p1");
        let p2 = ParticipantId::from("p2");

        let handle = fx.registry.ensure(&p2).await.unwrap();
        settle().await;
        fx.registry
            .remove_connection(&p2, handle.connection_id(), RemovalCause::Failure)
            .await;

        let view = fx.registry.view().borrow().clone();
        assert_eq!(view.status(&p2), Some(ConnectionStatus::Closed));
        let stats = fx.registry.stats().await;
        assert_eq!(stats.connection_failures, 1);
        assert_eq!(stats.active_connections, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_says_bye_to_everyone() {
        let mut fx = fixture("p1");
        for id in ["p2", "p3", "p4"] {
            fx.registry.ensure(&ParticipantId::from(id)).await.unwrap();
        }
        settle().await;
        drain(&mut fx.outputs);

        assert_eq!(fx.registry.clear(RemovalCause::LocalDeparture).await, 3);
        assert!(fx.registry.is_empty().await);

        let byes: Vec<_> = drain(&mut fx.outputs)
            .into_iter()
            .filter(|s| s.artifact == SignalingArtifact::Bye)
            .map(|s| s.to.to_string())
            .collect();
        assert_eq!(byes, ["p2", "p3", "p4"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_slot_is_replaced() {
        let mut fx = fixture("p1");
        let p2 = ParticipantId::from("p2");
        fx.factory.fail_next(&p2, Step::CreateOffer);

        let first = fx.registry.ensure(&p2).await.unwrap();
        settle().await;
        assert!(first.is_closed());
        assert_err!(first.wait_for_state(NegotiationState::Stable).await);

        let second = fx.registry.ensure(&p2).await.unwrap();
        assert_ne!(first.connection_id(), second.connection_id());
        assert!(!second.is_closed());

        let stats = fx.registry.stats().await;
        assert_eq!(stats.connections_closed, 1);
        assert_eq!(stats.connection_failures, 1);
        assert_eq!(stats.active_connections, 1);

        // the failure report for the replaced slot arrives late and is not counted twice
        let mut reported = false;
        while let Ok(output) = fx.outputs.try_recv() {
            if let EngineOutput::Closed { connection_id, .. } = output {
                reported |= connection_id == first.connection_id();
            }
        }
        assert!(reported);
        assert!(
            !fx.registry
                .remove_connection(&p2, first.connection_id(), RemovalCause::Failure)
                .await
        );
        assert_eq!(fx.registry.stats().await.connection_failures, 1);
    }
}
