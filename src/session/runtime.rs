//! Meeting session
//!
//! Owns the registry, the media binding, the signaling bridge and the
//! supervisor for one local participant, along with the background tasks
//! that connect them.

use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::media::{LocalCaptureState, MediaBinding};
use crate::negotiation;
use crate::peer::{ParticipantId, TransportFactory};
use crate::registry::{ConnectionHandle, ConnectionRegistry, RemovalCause, SessionView};
use crate::signaling::{wire, InboundEvent, Routed, SignalingBridge, SignalingTransport, WireEvent};
use crate::stats::SessionStats;
use crate::supervisor::ConnectionSupervisor;

use super::config::SessionConfig;

/// One local participant's view of a meeting
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use meshcall::loopback::{LoopbackFactory, LoopbackHub};
/// use meshcall::{Session, SessionConfig};
///
/// # async fn example() -> meshcall::Result<()> {
/// let hub = LoopbackHub::new();
/// let session = Session::start(
///     "p1",
///     SessionConfig::default(),
///     Arc::new(LoopbackFactory::new()),
///     hub.endpoint(),
/// );
///
/// session.participant_joined(&"p2".into()).await?;
/// let mut view = session.view();
/// view.changed().await.ok();
///
/// session.end().await;
/// # Ok(())
/// # }
/// ```
pub struct Session {
    local_id: ParticipantId,
    registry: Arc<ConnectionRegistry>,
    media: MediaBinding,
    bridge: Arc<SignalingBridge>,
    supervisor: Arc<ConnectionSupervisor>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl Session {
    /// Create a session and spawn its background tasks
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        local_id: impl Into<ParticipantId>,
        config: SessionConfig,
        factory: Arc<dyn TransportFactory>,
        signaling: Arc<dyn SignalingTransport>,
    ) -> Self {
        let local_id = local_id.into();
        let supervisor_config = config.supervisor.clone();
        let capture = Arc::new(Mutex::new(LocalCaptureState::new()));

        let (registry, outputs) =
            ConnectionRegistry::new(local_id.clone(), config, factory, Arc::clone(&capture));
        let registry = Arc::new(registry);
        let media = MediaBinding::new(capture, Arc::clone(&registry));
        let bridge = Arc::new(SignalingBridge::new(Arc::clone(&registry), signaling));
        let supervisor = Arc::new(ConnectionSupervisor::new(
            Arc::clone(&registry),
            supervisor_config,
        ));

        let mut tasks = vec![bridge.spawn_output_pump(outputs)];
        if supervisor.config().enabled {
            tasks.push(supervisor.spawn());
        }

        tracing::info!(participant = %local_id, "Session started");

        Self {
            local_id,
            registry,
            media,
            bridge,
            supervisor,
            tasks: StdMutex::new(tasks),
        }
    }

    pub fn local_id(&self) -> &ParticipantId {
        &self.local_id
    }

    /// A participant joined the meeting; open a connection to them
    ///
    /// Both sides of a pair see the other join, either as an event or in
    /// the roster. The side with the greater identifier calls; the other
    /// opens a callee slot and waits for the offer, so the roles do not
    /// depend on which side hears about the join first.
    ///
    /// Signaling from `participant` that arrives while the slot is being
    /// created is held and replayed afterwards in arrival order.
    pub async fn participant_joined(
        &self,
        participant: &ParticipantId,
    ) -> Result<Arc<ConnectionHandle>> {
        let calls = negotiation::initiates(&self.local_id, participant);
        tracing::debug!(participant = %participant, calls = calls, "Participant joined");

        self.bridge.begin_join(participant).await;
        let result = if calls {
            self.registry.ensure(participant).await
        } else {
            self.registry.accept(participant).await
        };
        self.bridge.complete_join(participant).await;
        result
    }

    /// Connect to everyone already in the meeting, at local join
    ///
    /// Each roster entry goes through
    /// [`participant_joined`](Self::participant_joined). Returns how many
    /// connections were opened. Failures are logged and skipped.
    pub async fn join_roster(&self, roster: &[ParticipantId]) -> usize {
        let mut opened = 0;
        for participant in roster.iter().filter(|p| **p != self.local_id) {
            match self.participant_joined(participant).await {
                Ok(_) => opened += 1,
                Err(e) => {
                    tracing::warn!(participant = %participant, error = %e, "Cannot call participant");
                }
            }
        }
        opened
    }

    /// Call a known participant, whatever the identifier order
    ///
    /// If they call back at the same time, glare resolution picks one offer.
    pub async fn call(&self, participant: &ParticipantId) -> Result<Arc<ConnectionHandle>> {
        self.registry.ensure(participant).await
    }

    /// Leave the call with one participant, sending them a `Bye`
    pub async fn hang_up(&self, participant: &ParticipantId) -> bool {
        self.registry
            .remove(participant, RemovalCause::LocalDeparture)
            .await
    }

    /// Route one inbound signaling event
    pub async fn handle_event(&self, event: InboundEvent) -> Routed {
        self.bridge.route(event).await
    }

    /// Decode and route one socket message
    ///
    /// Events this crate does not handle (chat, room state) are ignored.
    pub async fn handle_wire(&self, text: &str) -> Result<()> {
        match wire::decode(text)? {
            Some(WireEvent::Joined(participant)) => {
                if participant != self.local_id {
                    self.participant_joined(&participant).await?;
                }
            }
            Some(WireEvent::Signal(event)) => {
                self.handle_event(event).await;
            }
            None => {}
        }
        Ok(())
    }

    /// Leave the meeting
    ///
    /// Every connection is closed with a `Bye`, local tracks are released
    /// and background tasks stop once the `Bye`s are handed to signaling.
    pub async fn end(&self) {
        let closed = self.registry.clear(RemovalCause::LocalDeparture).await;
        let released = self.media.release_all().await;
        self.registry.flush_outputs().await;
        self.abort_tasks();

        tracing::info!(
            participant = %self.local_id,
            connections = closed,
            tracks = released.len(),
            "Session ended"
        );
    }

    /// Subscribe to the rendering view
    pub fn view(&self) -> watch::Receiver<SessionView> {
        self.registry.view()
    }

    pub fn media(&self) -> &MediaBinding {
        &self.media
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn supervisor(&self) -> &Arc<ConnectionSupervisor> {
        &self.supervisor
    }

    pub fn bridge(&self) -> &Arc<SignalingBridge> {
        &self.bridge
    }

    pub async fn stats(&self) -> SessionStats {
        self.registry.stats().await
    }

    fn abort_tasks(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("local_id", &self.local_id)
            .finish_non_exhaustive()
    }
}
