//! Endpoint configuration

use std::time::Duration;

/// Per-connection relay settings
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Upper bound on a single write to a client
    pub write_timeout: Duration,

    /// How many times to retry attaching when a session closes mid-attach
    pub subscribe_attempts: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            write_timeout: Duration::from_secs(5),
            subscribe_attempts: 3,
        }
    }
}

impl RelayConfig {
    /// Set the write timeout
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the attach attempts (at least 1)
    pub fn subscribe_attempts(mut self, attempts: usize) -> Self {
        self.subscribe_attempts = attempts.max(1);
        self
    }
}
