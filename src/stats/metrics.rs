//! Statistics for connections and sessions

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Per-connection negotiation statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Offers created (initial, renegotiation and restart)
    pub offers_created: u64,
    /// Answers created
    pub answers_created: u64,
    /// Local candidates signaled to the remote side
    pub candidates_sent: u64,
    /// Remote candidates received
    pub candidates_received: u64,
    /// Remote candidates that arrived ahead of the remote description
    pub candidates_buffered: u64,
    /// Remote candidates the transport accepted
    pub candidates_applied: u64,
    /// Remote candidates the transport refused
    pub candidates_rejected: u64,
    /// ICE restarts started
    pub ice_restarts: u64,
    /// Renegotiations triggered by local track changes
    pub renegotiations: u64,
    /// Glare collisions where the local offer was rolled back
    pub glare_yields: u64,
    /// Glare collisions where the remote offer was ignored
    pub glare_wins: u64,
    /// Answers discarded because no offer was outstanding
    pub stale_events: u64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remote candidates neither applied nor rejected yet
    pub fn candidates_pending(&self) -> u64 {
        self.candidates_received
            .saturating_sub(self.candidates_applied + self.candidates_rejected)
    }
}

/// Session-wide statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Current live connections
    pub active_connections: u64,
    /// Connections ever created
    pub connections_created: u64,
    /// Connections removed, for any reason
    pub connections_closed: u64,
    /// Connections removed because of a failure
    pub connection_failures: u64,
    /// Signals handed to the signaling channel successfully
    pub signals_sent: u64,
    /// Signals the channel failed to send
    pub signaling_failures: u64,
    /// Inbound events discarded as stale
    pub stale_events_discarded: u64,
    /// Time since the session started
    pub uptime: Duration,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fraction of closed connections that ended in failure
    pub fn failure_rate(&self) -> f64 {
        if self.connections_closed == 0 {
            0.0
        } else {
            self.connection_failures as f64 / self.connections_closed as f64
        }
    }
}

/// Shared session counters, updated by the registry and the bridge
#[derive(Debug, Default)]
pub(crate) struct SessionCounters {
    pub connections_created: AtomicU64,
    pub connections_closed: AtomicU64,
    pub connection_failures: AtomicU64,
    pub signals_sent: AtomicU64,
    pub signaling_failures: AtomicU64,
    pub stale_events: AtomicU64,
}

impl SessionCounters {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, active_connections: usize, uptime: Duration) -> SessionStats {
        SessionStats {
            active_connections: active_connections as u64,
            connections_created: self.connections_created.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            connection_failures: self.connection_failures.load(Ordering::Relaxed),
            signals_sent: self.signals_sent.load(Ordering::Relaxed),
            signaling_failures: self.signaling_failures.load(Ordering::Relaxed),
            stale_events_discarded: self.stale_events.load(Ordering::Relaxed),
            uptime,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_stats_new() {
        let stats = ConnectionStats::new();
        assert_eq!(stats.offers_created, 0);
        assert_eq!(stats.candidates_received, 0);
        assert_eq!(stats.candidates_applied, 0);
        assert_eq!(stats.candidates_pending(), 0);
    }

    #[test]
    fn test_candidates_pending() {
        let stats = ConnectionStats {
            candidates_received: 5,
            candidates_applied: 1,
            candidates_rejected: 2,
            ..Default::default()
        };
        assert_eq!(stats.candidates_pending(), 2);
    }

    #[test]
    fn test_failure_rate() {
        let mut stats = SessionStats::new();
        assert_eq!(stats.failure_rate(), 0.0);

        stats.connections_closed = 4;
        stats.connection_failures = 1;
        assert!((stats.failure_rate() - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_counters_snapshot() {
        let counters = SessionCounters::default();
        SessionCounters::incr(&counters.connections_created);
        SessionCounters::incr(&counters.connections_created);
        SessionCounters::incr(&counters.signals_sent);

        let stats = counters.snapshot(2, Duration::from_secs(30));
        assert_eq!(stats.active_connections, 2);
        assert_eq!(stats.connections_created, 2);
        assert_eq!(stats.signals_sent, 1);
        assert_eq!(stats.connections_closed, 0);
        assert_eq!(stats.uptime, Duration::from_secs(30));
    }
}
