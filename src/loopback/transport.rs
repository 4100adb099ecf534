//! In-memory peer transport
//!
//! Behaves like a minimal WebRTC peer connection: it fabricates session
//! descriptions, enforces the offer/answer signaling states, and reports
//! one gathered candidate per local description. Connectivity comes up as
//! soon as both descriptions are in place.
//!
//! Tests can hold any step on a [`StepGate`], make the next occurrence of a
//! step fail, or pin the reported connection state.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::media::{LocalTrack, RemoteTrack, TrackId, TrackKind};
use crate::peer::{
    IceCandidate, ParticipantId, PeerTransport, SdpType, SessionDescription, TransportConfig,
    TransportError, TransportEvent, TransportEventSender, TransportFactory, TransportState,
};

/// A transport operation that can be gated or failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    CreateOffer,
    CreateAnswer,
    SetLocalDescription,
    SetRemoteDescription,
    Rollback,
    AddIceCandidate,
    ReplaceTrack,
    RestartIce,
}

/// Holds one occurrence of a step until released
#[derive(Debug, Clone)]
pub struct StepGate(Arc<Semaphore>);

impl StepGate {
    fn new() -> Self {
        Self(Arc::new(Semaphore::new(0)))
    }

    /// Let the held step continue
    pub fn release(&self) {
        self.0.add_permits(1);
    }
}

#[derive(Debug)]
struct Inner {
    state: TransportState,
    pinned: Option<TransportState>,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    stable_local: Option<SessionDescription>,
    has_local_offer: bool,
    tracks: Vec<LocalTrack>,
    track_history: Vec<Vec<LocalTrack>>,
    remote_tracks: Vec<RemoteTrack>,
    applied: Vec<IceCandidate>,
    operations: Vec<Step>,
    ice_generation: u32,
    version: u64,
    failures: HashSet<Step>,
    gates: HashMap<Step, StepGate>,
    closed: bool,
}

/// In-memory [`PeerTransport`]
#[derive(Debug)]
pub struct LoopbackTransport {
    participant: ParticipantId,
    session_id: u64,
    events: TransportEventSender,
    inner: Mutex<Inner>,
}

impl LoopbackTransport {
    pub fn new(participant: ParticipantId, session_id: u64, events: TransportEventSender) -> Self {
        Self {
            participant,
            session_id,
            events,
            inner: Mutex::new(Inner {
                state: TransportState::New,
                pinned: None,
                local: None,
                remote: None,
                stable_local: None,
                has_local_offer: false,
                tracks: Vec::new(),
                track_history: Vec::new(),
                remote_tracks: Vec::new(),
                applied: Vec::new(),
                operations: Vec::new(),
                ice_generation: 0,
                version: 0,
                failures: HashSet::new(),
                gates: HashMap::new(),
                closed: false,
            }),
        }
    }

    /// A well-formed remote offer carrying one audio track
    pub fn sample_offer(label: &str) -> String {
        sample_description(label, "offer")
    }

    /// A well-formed remote answer carrying one audio track
    pub fn sample_answer(label: &str) -> String {
        sample_description(label, "answer")
    }

    /// ICE username fragment of a session description
    pub fn ice_ufrag(sdp: &str) -> Option<&str> {
        sdp.lines().find_map(|line| line.strip_prefix("a=ice-ufrag:"))
    }

    /// Participant this transport connects to
    pub fn participant(&self) -> &ParticipantId {
        &self.participant
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reported connection state
    pub fn state(&self) -> TransportState {
        let inner = self.lock();
        inner.pinned.unwrap_or(inner.state)
    }

    /// Simulate a network-driven state change
    pub fn set_state(&self, state: TransportState) {
        let mut inner = self.lock();
        self.transition(&mut inner, state);
    }

    /// Report `state` regardless of what happens underneath, until unpinned
    pub fn pin_state(&self, state: Option<TransportState>) {
        let mut inner = self.lock();
        inner.pinned = state;
        let visible = state.unwrap_or(inner.state);
        let _ = self.events.send(TransportEvent::StateChanged(visible));
    }

    /// Hold the next occurrence of `step` until the gate is released
    pub fn gate(&self, step: Step) -> StepGate {
        let gate = StepGate::new();
        self.lock().gates.insert(step, gate.clone());
        gate
    }

    /// Make the next occurrence of `step` fail
    pub fn fail_next(&self, step: Step) {
        self.lock().failures.insert(step);
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn local_description(&self) -> Option<SessionDescription> {
        self.lock().local.clone()
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.lock().remote.clone()
    }

    /// Remote candidates applied, in order
    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        self.lock().applied.clone()
    }

    /// Steps that went through, in order
    pub fn operations(&self) -> Vec<Step> {
        self.lock().operations.clone()
    }

    /// Tracks currently sent
    pub fn tracks(&self) -> Vec<LocalTrack> {
        self.lock().tracks.clone()
    }

    /// Every track set the transport has sent, one entry per change
    pub fn track_history(&self) -> Vec<Vec<LocalTrack>> {
        self.lock().track_history.clone()
    }

    async fn pass(&self, step: Step) -> Result<(), TransportError> {
        let gate = self.lock().gates.remove(&step);
        if let Some(StepGate(semaphore)) = gate {
            semaphore
                .acquire()
                .await
                .map_err(|_| TransportError::Closed)?
                .forget();
        }

        let mut inner = self.lock();
        if inner.closed {
            return Err(TransportError::Closed);
        }
        if inner.failures.remove(&step) {
            return Err(TransportError::Rejected(format!("{:?} failed", step)));
        }
        inner.operations.push(step);
        Ok(())
    }

    fn transition(&self, inner: &mut Inner, state: TransportState) {
        if inner.state == state {
            return;
        }
        inner.state = state;
        if inner.pinned.is_none() {
            let _ = self.events.send(TransportEvent::StateChanged(state));
        }
    }

    fn update_connectivity(&self, inner: &mut Inner) {
        if inner.closed {
            return;
        }
        if inner.local.is_some() && inner.remote.is_some() && !inner.has_local_offer {
            self.transition(inner, TransportState::Connected);
        } else if inner.state == TransportState::New {
            self.transition(inner, TransportState::Connecting);
        }
    }

    fn render(&self, inner: &Inner) -> String {
        let mut sdp = format!(
            "v=0\r\no=- {} {} IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\na=ice-ufrag:{}\r\n",
            self.session_id,
            inner.version,
            ufrag(self.session_id, inner.ice_generation)
        );
        for track in &inner.tracks {
            sdp.push_str(&format!(
                "m={} 9 UDP/TLS/RTP/SAVPF 96\r\na=msid:{} {}\r\n",
                media_name(track.kind),
                self.participant,
                track.id
            ));
        }
        sdp
    }

    fn record_tracks(inner: &mut Inner) {
        let snapshot = inner.tracks.clone();
        inner.track_history.push(snapshot);
    }

    /// Announce remote tracks that appeared or disappeared
    fn sync_remote_tracks(&self, inner: &mut Inner, sdp: &str) {
        let announced = parse_tracks(sdp);

        for track in &inner.remote_tracks {
            if !announced.iter().any(|t| t.id == track.id) {
                let _ = self
                    .events
                    .send(TransportEvent::RemoteTrackRemoved(track.id.clone()));
            }
        }
        for track in &announced {
            if !inner.remote_tracks.iter().any(|t| t.id == track.id) {
                let _ = self
                    .events
                    .send(TransportEvent::RemoteTrackAdded(track.clone()));
            }
        }
        inner.remote_tracks = announced;
    }
}

#[async_trait]
impl PeerTransport for LoopbackTransport {
    async fn create_offer(&self, _ice_restart: bool) -> Result<SessionDescription, TransportError> {
        self.pass(Step::CreateOffer).await?;
        let mut inner = self.lock();
        inner.version += 1;
        Ok(SessionDescription::offer(self.render(&inner)))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        self.pass(Step::CreateAnswer).await?;
        let mut inner = self.lock();
        let has_remote_offer = matches!(
            &inner.remote,
            Some(desc) if desc.sdp_type == SdpType::Offer
        );
        if !has_remote_offer || inner.has_local_offer {
            return Err(TransportError::InvalidState("no remote offer to answer".into()));
        }
        inner.version += 1;
        Ok(SessionDescription::answer(self.render(&inner)))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        self.pass(Step::SetLocalDescription).await?;
        let mut inner = self.lock();

        match desc.sdp_type {
            SdpType::Offer => inner.has_local_offer = true,
            SdpType::Answer => inner.stable_local = Some(desc.clone()),
        }
        inner.local = Some(desc);

        let candidate = IceCandidate {
            candidate: format!(
                "candidate:{} 1 udp 2122260223 127.0.0.1 {} typ host ufrag {}",
                inner.version,
                40000 + self.session_id * 100 + inner.version,
                ufrag(self.session_id, inner.ice_generation)
            ),
            sdp_mid: Some("0".into()),
            sdp_m_line_index: Some(0),
        };
        let _ = self.events.send(TransportEvent::LocalCandidate(candidate));

        self.update_connectivity(&mut inner);
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        self.pass(Step::SetRemoteDescription).await?;
        if !desc.sdp.starts_with("v=0") {
            return Err(TransportError::Malformed("missing v= line".into()));
        }

        let mut inner = self.lock();
        match desc.sdp_type {
            SdpType::Offer if inner.has_local_offer => {
                return Err(TransportError::InvalidState(
                    "remote offer while local offer pending".into(),
                ));
            }
            SdpType::Answer if !inner.has_local_offer => {
                return Err(TransportError::InvalidState("no local offer to answer".into()));
            }
            SdpType::Answer => {
                inner.has_local_offer = false;
                inner.stable_local = inner.local.clone();
            }
            SdpType::Offer => {}
        }

        self.sync_remote_tracks(&mut inner, &desc.sdp);
        inner.remote = Some(desc);
        self.update_connectivity(&mut inner);
        Ok(())
    }

    async fn rollback(&self) -> Result<(), TransportError> {
        self.pass(Step::Rollback).await?;
        let mut inner = self.lock();
        if !inner.has_local_offer {
            return Err(TransportError::InvalidState("nothing to roll back".into()));
        }
        inner.has_local_offer = false;
        inner.local = inner.stable_local.clone();
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        self.pass(Step::AddIceCandidate).await?;
        let mut inner = self.lock();
        if inner.remote.is_none() {
            return Err(TransportError::InvalidState("no remote description".into()));
        }
        inner.applied.push(candidate);
        Ok(())
    }

    async fn add_track(&self, track: &LocalTrack) -> Result<(), TransportError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(TransportError::Closed);
        }
        if inner.tracks.iter().any(|t| t.id == track.id) {
            return Err(TransportError::InvalidState(format!("{} already sent", track.id)));
        }
        inner.tracks.push(track.clone());
        Self::record_tracks(&mut inner);
        Ok(())
    }

    async fn remove_track(&self, track_id: &TrackId) -> Result<(), TransportError> {
        let mut inner = self.lock();
        let pos = inner
            .tracks
            .iter()
            .position(|t| &t.id == track_id)
            .ok_or_else(|| TransportError::InvalidState(format!("{} not sent", track_id)))?;
        inner.tracks.remove(pos);
        Self::record_tracks(&mut inner);
        Ok(())
    }

    async fn replace_track(&self, old: &TrackId, new: &LocalTrack) -> Result<(), TransportError> {
        self.pass(Step::ReplaceTrack).await?;
        let mut inner = self.lock();
        let slot = inner
            .tracks
            .iter_mut()
            .find(|t| &t.id == old)
            .ok_or_else(|| TransportError::InvalidState(format!("{} not sent", old)))?;
        *slot = new.clone();
        Self::record_tracks(&mut inner);
        Ok(())
    }

    async fn restart_ice(&self) -> Result<(), TransportError> {
        self.pass(Step::RestartIce).await?;
        self.lock().ice_generation += 1;
        Ok(())
    }

    fn connection_state(&self) -> TransportState {
        self.state()
    }

    async fn close(&self) {
        let mut inner = self.lock();
        if inner.closed {
            return;
        }
        inner.closed = true;
        self.transition(&mut inner, TransportState::Closed);
    }
}

#[derive(Debug, Default)]
struct FactoryInner {
    created: Vec<Arc<LoopbackTransport>>,
    gates: Vec<(ParticipantId, Step, StepGate)>,
    failures: Vec<(ParticipantId, Step)>,
    refused: HashSet<ParticipantId>,
    next_session: u64,
}

/// Creates [`LoopbackTransport`]s and keeps every one of them for inspection
#[derive(Debug, Default)]
pub struct LoopbackFactory {
    state: Mutex<FactoryInner>,
}

impl LoopbackFactory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FactoryInner> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every transport created for `participant`, oldest first
    pub fn transports_for(&self, participant: &ParticipantId) -> Vec<Arc<LoopbackTransport>> {
        self.lock()
            .created
            .iter()
            .filter(|t| t.participant() == participant)
            .cloned()
            .collect()
    }

    /// Most recent transport created for `participant`
    pub fn latest(&self, participant: &ParticipantId) -> Option<Arc<LoopbackTransport>> {
        self.transports_for(participant).pop()
    }

    pub fn created_count(&self, participant: &ParticipantId) -> usize {
        self.transports_for(participant).len()
    }

    /// Gate `step` on the next transport created for `participant`
    pub fn gate_next(&self, participant: &ParticipantId, step: Step) -> StepGate {
        let gate = StepGate::new();
        self.lock()
            .gates
            .push((participant.clone(), step, gate.clone()));
        gate
    }

    /// Fail `step` once on the next transport created for `participant`
    pub fn fail_next(&self, participant: &ParticipantId, step: Step) {
        self.lock().failures.push((participant.clone(), step));
    }

    /// Refuse to create the next transport for `participant`
    pub fn refuse(&self, participant: &ParticipantId) {
        self.lock().refused.insert(participant.clone());
    }
}

#[async_trait]
impl TransportFactory for LoopbackFactory {
    async fn create(
        &self,
        participant: &ParticipantId,
        _config: &TransportConfig,
        events: TransportEventSender,
    ) -> Result<Arc<dyn PeerTransport>, TransportError> {
        let mut state = self.lock();

        if state.refused.remove(participant) {
            return Err(TransportError::Rejected("transport refused".into()));
        }

        state.next_session += 1;
        let transport = Arc::new(LoopbackTransport::new(
            participant.clone(),
            state.next_session,
            events,
        ));

        let (gates, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut state.gates)
            .into_iter()
            .partition(|(p, _, _)| p == participant);
        state.gates = rest;
        for (_, step, gate) in gates {
            transport.lock().gates.insert(step, gate);
        }

        let (failures, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut state.failures)
            .into_iter()
            .partition(|(p, _)| p == participant);
        state.failures = rest;
        for (_, step) in failures {
            transport.fail_next(step);
        }

        state.created.push(Arc::clone(&transport));
        Ok(transport)
    }
}

fn ufrag(session_id: u64, generation: u32) -> String {
    format!("lb{}g{}", session_id, generation)
}

fn media_name(kind: TrackKind) -> &'static str {
    match kind {
        TrackKind::Audio => "audio",
        TrackKind::Video | TrackKind::Screen => "video",
    }
}

fn sample_description(label: &str, session: &str) -> String {
    format!(
        "v=0\r\no=- 0 1 IN IP4 127.0.0.1\r\ns={}\r\nt=0 0\r\na=ice-ufrag:{}-{}\r\n\
         m=audio 9 UDP/TLS/RTP/SAVPF 111\r\na=msid:{} {}-audio\r\n",
        session, label, session, label, label
    )
}

/// Tracks announced by `m=` / `a=msid:` line pairs
fn parse_tracks(sdp: &str) -> Vec<RemoteTrack> {
    let mut tracks = Vec::new();
    let mut kind = None;

    for line in sdp.lines() {
        if let Some(media) = line.strip_prefix("m=") {
            kind = match media.split(' ').next() {
                Some("audio") => Some(TrackKind::Audio),
                Some("video") => Some(TrackKind::Video),
                _ => None,
            };
        } else if let Some(msid) = line.strip_prefix("a=msid:") {
            if let (Some(kind), Some(id)) = (kind, msid.split(' ').nth(1)) {
                tracks.push(RemoteTrack::new(id, kind));
            }
        }
    }
    tracks
}
