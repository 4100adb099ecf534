//! Session configuration

use crate::peer::{IceServer, TransportConfig};
use crate::supervisor::SupervisorConfig;

/// Participants allowed in one meeting, the local one included
pub const DEFAULT_MAX_PARTICIPANTS: usize = 50;

/// Per-connection command queue depth
pub const DEFAULT_COMMAND_QUEUE_CAPACITY: usize = 256;

/// Session configuration options
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Meeting size limit, counting the local participant
    pub max_participants: usize,

    /// Commands that may queue on one connection before senders wait
    pub command_queue_capacity: usize,

    /// Handed to the transport factory for every new connection
    pub transport: TransportConfig,

    /// Health supervision policy
    pub supervisor: SupervisorConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_participants: DEFAULT_MAX_PARTICIPANTS,
            command_queue_capacity: DEFAULT_COMMAND_QUEUE_CAPACITY,
            transport: TransportConfig::default(),
            supervisor: SupervisorConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Set the meeting size limit
    ///
    /// Values below 2 are raised to 2, one local and one remote participant.
    pub fn max_participants(mut self, max: usize) -> Self {
        self.max_participants = max.max(2);
        self
    }

    /// Set the per-connection command queue depth
    pub fn command_queue_capacity(mut self, capacity: usize) -> Self {
        self.command_queue_capacity = capacity.max(1);
        self
    }

    /// Replace the ICE server list
    pub fn ice_servers(mut self, servers: Vec<IceServer>) -> Self {
        self.transport.ice_servers = servers;
        self
    }

    /// Set the supervision policy
    pub fn supervisor(mut self, supervisor: SupervisorConfig) -> Self {
        self.supervisor = supervisor;
        self
    }

    /// Disable the background supervisor
    pub fn disable_supervisor(mut self) -> Self {
        self.supervisor = self.supervisor.disable();
        self
    }
}
