//! Supervisor configuration

use std::time::Duration;

/// Connection health policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Run the background poll loop
    pub enabled: bool,

    /// How often connection health is checked
    pub poll_interval: Duration,

    /// How long a `Disconnected` transport may stay that way before it is
    /// treated as failed
    pub disconnect_grace: Duration,

    /// ICE restarts attempted per failure episode before giving up
    pub max_ice_restarts: u32,

    /// How long a failed transport may wait on an unfinished negotiation,
    /// such as a restart whose answer never arrives
    pub negotiation_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: Duration::from_secs(2),
            disconnect_grace: Duration::from_secs(5),
            max_ice_restarts: 1,
            negotiation_timeout: Duration::from_secs(10),
        }
    }
}

impl SupervisorConfig {
    /// Set the poll interval
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Set the disconnect grace window
    pub fn disconnect_grace(mut self, grace: Duration) -> Self {
        self.disconnect_grace = grace;
        self
    }

    /// Set the number of ICE restarts per failure episode
    pub fn max_ice_restarts(mut self, max: u32) -> Self {
        self.max_ice_restarts = max;
        self
    }

    /// Set how long a failed connection may stay mid-negotiation
    pub fn negotiation_timeout(mut self, timeout: Duration) -> Self {
        self.negotiation_timeout = timeout;
        self
    }

    /// Disable the background poll loop. `check` still works when called
    /// directly.
    pub fn disable(mut self) -> Self {
        self.enabled = false;
        self
    }
}
