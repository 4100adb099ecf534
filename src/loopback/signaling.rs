//! In-memory signaling relay
//!
//! Every [`LoopbackSignaling`] endpoint handed out by a [`LoopbackHub`]
//! feeds the same queue. [`LoopbackHub::flush`] plays the relay server:
//! it delivers each queued signal to the session it is addressed to.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::peer::ParticipantId;
use crate::session::Session;
use crate::signaling::{InboundEvent, OutboundSignal, SignalKind, SignalingError, SignalingTransport};

/// Rounds after which [`LoopbackHub::exchange`] stops waiting for quiet
const MAX_EXCHANGE_ROUNDS: usize = 64;

#[derive(Debug, Default)]
struct HubState {
    queue: VecDeque<OutboundSignal>,
    sent: Vec<OutboundSignal>,
    lose: Vec<SignalKind>,
    offline: bool,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<HubState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Shared in-memory relay
#[derive(Debug, Clone, Default)]
pub struct LoopbackHub {
    shared: Arc<Shared>,
}

/// One session's connection to a [`LoopbackHub`]
#[derive(Debug)]
pub struct LoopbackSignaling {
    shared: Arc<Shared>,
}

#[async_trait]
impl SignalingTransport for LoopbackSignaling {
    async fn send(&self, signal: &OutboundSignal) -> Result<(), SignalingError> {
        let mut state = self.shared.lock();
        if state.offline {
            return Err(SignalingError::Disconnected);
        }
        state.sent.push(signal.clone());

        if let Some(pos) = state.lose.iter().position(|k| *k == signal.kind()) {
            state.lose.remove(pos);
            tracing::trace!(kind = %signal.kind(), target_participant = %signal.to, "Relay lost signal");
            return Ok(());
        }
        state.queue.push_back(signal.clone());
        Ok(())
    }
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new endpoint for one session
    pub fn endpoint(&self) -> Arc<LoopbackSignaling> {
        Arc::new(LoopbackSignaling {
            shared: Arc::clone(&self.shared),
        })
    }

    /// Every signal accepted for sending, lost ones included
    pub fn sent(&self) -> Vec<OutboundSignal> {
        self.shared.lock().sent.clone()
    }

    /// Signals sent by `participant`
    pub fn sent_by(&self, participant: &ParticipantId) -> Vec<OutboundSignal> {
        self.shared
            .lock()
            .sent
            .iter()
            .filter(|s| &s.from == participant)
            .cloned()
            .collect()
    }

    /// Signals waiting for delivery
    pub fn queued(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Silently drop the next signal of `kind`
    pub fn lose_next(&self, kind: SignalKind) {
        self.shared.lock().lose.push(kind);
    }

    /// While offline, every send fails with [`SignalingError::Disconnected`]
    pub fn set_offline(&self, offline: bool) {
        self.shared.lock().offline = offline;
    }

    /// Deliver every queued signal to its addressee
    ///
    /// Signals for sessions not in `sessions` are dropped. Returns how many
    /// signals were taken from the queue.
    pub async fn flush(&self, sessions: &[&Session]) -> usize {
        let queued: Vec<_> = self.shared.lock().queue.drain(..).collect();
        let count = queued.len();

        for signal in queued {
            match sessions.iter().find(|s| s.local_id() == &signal.to) {
                Some(session) => {
                    session.handle_event(InboundEvent::from(signal)).await;
                }
                None => {
                    tracing::trace!(target_participant = %signal.to, "No session for signal");
                }
            }
        }
        count
    }

    /// Flush repeatedly, letting connection tasks run in between, until no
    /// signal is left in flight
    pub async fn exchange(&self, sessions: &[&Session]) {
        for _ in 0..MAX_EXCHANGE_ROUNDS {
            tokio::time::sleep(Duration::from_millis(1)).await;
            if self.flush(sessions).await == 0 {
                return;
            }
        }
        tracing::warn!("Signaling exchange did not settle");
    }
}
