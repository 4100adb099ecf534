//! Per-connection negotiation task
//!
//! One engine runs per participant connection. It owns the transport, the
//! negotiation state and the candidate buffer, and consumes commands from
//! a bounded queue one at a time. Every offer/answer step runs to
//! completion (or failure) before the next command is looked at, so
//! transitions for a connection never interleave.
//!
//! Aborting the task is how a connection is cancelled: a step suspended on
//! the transport is dropped with the task and never resumes.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};

use crate::error::{Error, Result};
use crate::media::{LocalTrack, RemoteTrack, TrackId};
use crate::peer::{
    IceCandidate, ParticipantId, PeerTransport, Role, SessionDescription, TransportError,
    TransportEvent,
};
use crate::registry::{ConnectionSnapshot, ConnectionStatus, ViewPublisher};
use crate::signaling::{OutboundSignal, SignalingArtifact};
use crate::stats::ConnectionStats;

use super::candidates::{CandidateBuffer, CandidateDisposition};
use super::glare::{self, GlareOutcome};
use super::state::{NegotiationInput, NegotiationState};

/// Work item for an engine
#[derive(Debug, Clone)]
pub(crate) enum Command {
    /// Send the first offer (callers only)
    Start,
    RemoteOffer(String),
    RemoteAnswer(String),
    RemoteCandidate(IceCandidate),
    /// Transport failed; renegotiate with fresh ICE credentials
    RestartIce,
    AttachTrack(LocalTrack),
    DetachTrack(TrackId),
    ReplaceTrack { old: TrackId, new: LocalTrack },
}

/// Output of the engines, consumed by the session's output pump
#[derive(Debug)]
pub enum EngineOutput {
    /// Artifact to hand to the signaling channel
    Signal(OutboundSignal),
    /// The connection failed and closed itself
    Closed {
        participant: ParticipantId,
        connection_id: u64,
        error: Error,
    },
    /// Acknowledged once every earlier output has been processed
    Barrier(oneshot::Sender<()>),
}

/// Everything an engine needs from the registry
pub(crate) struct EngineContext {
    pub local_id: ParticipantId,
    pub remote_id: ParticipantId,
    pub connection_id: u64,
    pub role: Role,
    pub transport: Arc<dyn PeerTransport>,
    pub output: mpsc::UnboundedSender<EngineOutput>,
    pub snapshot: Arc<watch::Sender<ConnectionSnapshot>>,
    pub view: Arc<ViewPublisher>,
}

pub(crate) struct NegotiationEngine {
    ctx: EngineContext,
    role: Role,
    state: NegotiationState,
    ever_stable: bool,
    negotiation_needed: bool,
    candidates: CandidateBuffer,
    local_tracks: Vec<LocalTrack>,
    remote_tracks: Vec<RemoteTrack>,
    stats: ConnectionStats,
    initial_tracks: Vec<LocalTrack>,
}

impl NegotiationEngine {
    /// Create an engine that will send `initial_tracks` from the start
    pub fn new(ctx: EngineContext, initial_tracks: Vec<LocalTrack>) -> Self {
        let role = ctx.role;
        Self {
            ctx,
            role,
            state: NegotiationState::Idle,
            ever_stable: false,
            negotiation_needed: false,
            candidates: CandidateBuffer::new(),
            local_tracks: Vec::new(),
            remote_tracks: Vec::new(),
            stats: ConnectionStats::new(),
            initial_tracks,
        }
    }

    /// Run until the connection closes or the command queue is dropped
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        for track in std::mem::take(&mut self.initial_tracks) {
            self.add_track(track).await;
        }
        self.publish();

        loop {
            let result = tokio::select! {
                biased;

                Some(event) = events.recv() => {
                    self.on_transport_event(event);
                    Ok(())
                }
                command = commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
            };

            if let Err(error) = result {
                self.fail(error).await;
                break;
            }
        }

        tracing::debug!(
            participant = %self.ctx.remote_id,
            connection_id = self.ctx.connection_id,
            state = ?self.state,
            "Negotiation task finished"
        );
    }

    async fn handle(&mut self, command: Command) -> Result<()> {
        if self.state.is_closed() {
            return Ok(());
        }

        match command {
            Command::Start => self.start().await,
            Command::RemoteOffer(sdp) => self.on_remote_offer(sdp).await,
            Command::RemoteAnswer(sdp) => self.on_remote_answer(sdp).await,
            Command::RemoteCandidate(candidate) => {
                self.on_remote_candidate(candidate).await;
                Ok(())
            }
            Command::RestartIce => self.restart_ice().await,
            Command::AttachTrack(track) => self.attach_track(track).await,
            Command::DetachTrack(id) => self.detach_track(&id).await,
            Command::ReplaceTrack { old, new } => self.replace_track(&old, new).await,
        }
    }

    async fn start(&mut self) -> Result<()> {
        if self.state != NegotiationState::Idle || !self.role.is_caller() {
            tracing::debug!(
                participant = %self.ctx.remote_id,
                state = ?self.state,
                "Start ignored, negotiation already under way"
            );
            return Ok(());
        }

        self.advance(NegotiationInput::Start)?;
        self.offer_cycle(false).await
    }

    /// Create, apply and send an offer. The caller has already moved the
    /// state to `CreatingOffer` or `Restarting`.
    async fn offer_cycle(&mut self, ice_restart: bool) -> Result<()> {
        let remote = self.ctx.remote_id.clone();
        let fail = |e: TransportError| {
            if ice_restart {
                Error::transport(&remote, e)
            } else {
                Error::negotiation(&remote, e)
            }
        };

        if ice_restart {
            self.ctx.transport.restart_ice().await.map_err(fail)?;
        }
        let offer = self
            .ctx
            .transport
            .create_offer(ice_restart)
            .await
            .map_err(fail)?;
        let sdp = offer.sdp.clone();
        self.ctx
            .transport
            .set_local_description(offer)
            .await
            .map_err(fail)?;

        self.stats.offers_created += 1;
        self.advance(NegotiationInput::OfferCreated)?;
        self.signal(SignalingArtifact::Offer { sdp });
        Ok(())
    }

    async fn on_remote_offer(&mut self, sdp: String) -> Result<()> {
        if self.state.has_local_offer() {
            match glare::resolve(&self.ctx.local_id, &self.ctx.remote_id) {
                GlareOutcome::KeepLocalOffer => {
                    self.stats.glare_wins += 1;
                    tracing::debug!(
                        participant = %self.ctx.remote_id,
                        "Glare: keeping local offer, ignoring remote offer"
                    );
                    return Ok(());
                }
                GlareOutcome::YieldToRemote => {
                    self.ctx
                        .transport
                        .rollback()
                        .await
                        .map_err(|e| Error::negotiation(&self.ctx.remote_id, e))?;
                    self.stats.glare_yields += 1;
                    self.role = Role::Callee;
                    tracing::debug!(
                        participant = %self.ctx.remote_id,
                        "Glare: rolled back local offer, answering remote offer"
                    );
                    self.advance(NegotiationInput::GlareYield)?;
                }
            }
        } else {
            self.advance(NegotiationInput::RemoteOffer)?;
        }

        self.ctx
            .transport
            .set_remote_description(SessionDescription::offer(sdp))
            .await
            .map_err(|e| Error::negotiation(&self.ctx.remote_id, e))?;
        self.replay_candidates().await;

        let answer = self
            .ctx
            .transport
            .create_answer()
            .await
            .map_err(|e| Error::negotiation(&self.ctx.remote_id, e))?;
        let sdp = answer.sdp.clone();
        self.ctx
            .transport
            .set_local_description(answer)
            .await
            .map_err(|e| Error::negotiation(&self.ctx.remote_id, e))?;

        self.stats.answers_created += 1;
        self.signal(SignalingArtifact::Answer { sdp });
        self.advance(NegotiationInput::AnswerCreated)?;
        self.on_stable().await
    }

    async fn on_remote_answer(&mut self, sdp: String) -> Result<()> {
        if !self.state.has_local_offer() {
            self.stats.stale_events += 1;
            self.publish();
            tracing::debug!(
                participant = %self.ctx.remote_id,
                state = ?self.state,
                "Discarding answer with no outstanding offer"
            );
            return Ok(());
        }

        self.ctx
            .transport
            .set_remote_description(SessionDescription::answer(sdp))
            .await
            .map_err(|e| Error::negotiation(&self.ctx.remote_id, e))?;
        self.replay_candidates().await;

        self.advance(NegotiationInput::AnswerApplied)?;
        self.on_stable().await
    }

    async fn on_stable(&mut self) -> Result<()> {
        if !self.ever_stable {
            self.ever_stable = true;
            tracing::info!(
                participant = %self.ctx.remote_id,
                connection_id = self.ctx.connection_id,
                role = ?self.role,
                "Connection negotiated"
            );
            self.publish();
        } else {
            tracing::debug!(participant = %self.ctx.remote_id, "Negotiation complete");
        }

        if std::mem::take(&mut self.negotiation_needed) {
            self.renegotiate().await?;
        }
        Ok(())
    }

    async fn on_remote_candidate(&mut self, candidate: IceCandidate) {
        self.stats.candidates_received += 1;

        match self.candidates.accept(candidate) {
            CandidateDisposition::Apply(candidate) => self.apply_candidate(candidate).await,
            CandidateDisposition::Buffered => {
                self.stats.candidates_buffered += 1;
                tracing::trace!(
                    participant = %self.ctx.remote_id,
                    pending = self.candidates.len(),
                    "Buffered candidate ahead of remote description"
                );
            }
        }
        self.publish();
    }

    async fn replay_candidates(&mut self) {
        for candidate in self.candidates.on_remote_description() {
            self.apply_candidate(candidate).await;
        }
    }

    async fn apply_candidate(&mut self, candidate: IceCandidate) {
        match self.ctx.transport.add_ice_candidate(candidate).await {
            Ok(()) => self.stats.candidates_applied += 1,
            Err(e) => {
                self.stats.candidates_rejected += 1;
                tracing::warn!(
                    participant = %self.ctx.remote_id,
                    error = %e,
                    "Remote candidate rejected"
                );
            }
        }
    }

    async fn restart_ice(&mut self) -> Result<()> {
        if self.state != NegotiationState::Stable {
            tracing::debug!(
                participant = %self.ctx.remote_id,
                state = ?self.state,
                "ICE restart skipped, negotiation in progress"
            );
            return Ok(());
        }

        self.stats.ice_restarts += 1;
        tracing::info!(
            participant = %self.ctx.remote_id,
            connection_id = self.ctx.connection_id,
            "Restarting ICE"
        );
        self.advance(NegotiationInput::IceFailure)?;
        self.offer_cycle(true).await
    }

    async fn renegotiate(&mut self) -> Result<()> {
        self.stats.renegotiations += 1;
        self.advance(NegotiationInput::Renegotiate)?;
        self.offer_cycle(false).await
    }

    /// React to a change of the local track set
    async fn request_renegotiation(&mut self) -> Result<()> {
        match self.state {
            // the first offer or answer picks the change up
            NegotiationState::Idle => Ok(()),
            NegotiationState::Stable => self.renegotiate().await,
            _ => {
                self.negotiation_needed = true;
                Ok(())
            }
        }
    }

    async fn add_track(&mut self, track: LocalTrack) -> bool {
        if self.local_tracks.iter().any(|t| t.id == track.id) {
            return false;
        }
        if let Err(e) = self.ctx.transport.add_track(&track).await {
            tracing::warn!(
                participant = %self.ctx.remote_id,
                track = %track.id,
                error = %e,
                "Failed to attach local track"
            );
            return false;
        }
        self.local_tracks.push(track);
        true
    }

    async fn attach_track(&mut self, track: LocalTrack) -> Result<()> {
        if !self.add_track(track).await {
            return Ok(());
        }
        self.publish();
        self.request_renegotiation().await
    }

    async fn detach_track(&mut self, id: &TrackId) -> Result<()> {
        let Some(pos) = self.local_tracks.iter().position(|t| &t.id == id) else {
            return Ok(());
        };
        if let Err(e) = self.ctx.transport.remove_track(id).await {
            tracing::warn!(
                participant = %self.ctx.remote_id,
                track = %id,
                error = %e,
                "Failed to detach local track"
            );
            return Ok(());
        }
        self.local_tracks.remove(pos);
        self.publish();
        self.request_renegotiation().await
    }

    /// Swap a sent track in place. The old track stays in the set until the
    /// transport has confirmed the new one.
    async fn replace_track(&mut self, old: &TrackId, new: LocalTrack) -> Result<()> {
        let Some(pos) = self.local_tracks.iter().position(|t| &t.id == old) else {
            return self.attach_track(new).await;
        };

        match self.ctx.transport.replace_track(old, &new).await {
            Ok(()) => {
                self.local_tracks[pos] = new;
                self.publish();
            }
            Err(e) => {
                tracing::warn!(
                    participant = %self.ctx.remote_id,
                    track = %old,
                    error = %e,
                    "Track replacement failed, keeping previous track"
                );
            }
        }
        Ok(())
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        if self.state.is_closed() {
            return;
        }

        match event {
            TransportEvent::LocalCandidate(candidate) => {
                self.stats.candidates_sent += 1;
                self.signal(SignalingArtifact::IceCandidate { candidate });
            }
            TransportEvent::RemoteTrackAdded(track) => {
                if !self.remote_tracks.iter().any(|t| t.id == track.id) {
                    self.remote_tracks.push(track);
                    self.publish();
                }
            }
            TransportEvent::RemoteTrackRemoved(id) => {
                self.remote_tracks.retain(|t| t.id != id);
                self.publish();
            }
            TransportEvent::StateChanged(state) => {
                tracing::trace!(
                    participant = %self.ctx.remote_id,
                    transport_state = ?state,
                    "Transport state changed"
                );
            }
        }
    }

    async fn fail(&mut self, error: Error) {
        tracing::warn!(
            participant = %self.ctx.remote_id,
            connection_id = self.ctx.connection_id,
            state = ?self.state,
            error = %error,
            "Connection failed"
        );

        self.state = NegotiationState::Closed;
        self.ctx.transport.close().await;
        self.remote_tracks.clear();
        self.publish();

        let _ = self.ctx.output.send(EngineOutput::Closed {
            participant: self.ctx.remote_id.clone(),
            connection_id: self.ctx.connection_id,
            error,
        });
    }

    fn advance(&mut self, input: NegotiationInput) -> Result<()> {
        let next = self.state.apply(input)?;
        tracing::debug!(
            participant = %self.ctx.remote_id,
            from = ?self.state,
            to = ?next,
            "Negotiation transition"
        );
        self.state = next;
        self.publish();
        Ok(())
    }

    fn signal(&self, artifact: SignalingArtifact) {
        let signal = OutboundSignal::new(
            self.ctx.local_id.clone(),
            self.ctx.remote_id.clone(),
            artifact,
        );
        let _ = self.ctx.output.send(EngineOutput::Signal(signal));
    }

    fn publish(&self) {
        let status = ConnectionStatus::derive(self.state, self.ever_stable);
        self.ctx
            .view
            .update(&self.ctx.remote_id, status, &self.remote_tracks);

        let snapshot = ConnectionSnapshot {
            participant: self.ctx.remote_id.clone(),
            connection_id: self.ctx.connection_id,
            role: self.role,
            state: self.state,
            status,
            local_tracks: self.local_tracks.clone(),
            remote_tracks: self.remote_tracks.clone(),
            pending_candidates: self.candidates.len(),
            stats: self.stats.clone(),
        };
        self.ctx.snapshot.send_replace(snapshot);
    }
}
