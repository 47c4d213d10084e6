//! Registry and session configuration

use std::time::Duration;

/// What a session does when a subscriber's queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Skip the chunk for that subscriber only
    #[default]
    DropChunk,
    /// Disconnect that subscriber
    Disconnect,
}

/// Configuration shared by every session in a registry
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Per-subscriber queue capacity, in chunks
    pub subscriber_queue_capacity: usize,

    /// Behavior when a subscriber queue is full
    pub overflow_policy: OverflowPolicy,

    /// A session nobody subscribes to within this window is torn down
    pub first_subscriber_timeout: Duration,

    /// Upper bound on waiting for a converter to be reaped on shutdown
    pub teardown_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            subscriber_queue_capacity: 512,
            overflow_policy: OverflowPolicy::DropChunk,
            first_subscriber_timeout: Duration::from_secs(10),
            teardown_timeout: Duration::from_secs(5),
        }
    }
}

impl RegistryConfig {
    /// Set the per-subscriber queue capacity (at least 1)
    pub fn subscriber_queue_capacity(mut self, capacity: usize) -> Self {
        self.subscriber_queue_capacity = capacity.max(1);
        self
    }

    /// Set the overflow policy
    pub fn overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.overflow_policy = policy;
        self
    }

    /// Set the first-subscriber timeout
    pub fn first_subscriber_timeout(mut self, timeout: Duration) -> Self {
        self.first_subscriber_timeout = timeout;
        self
    }

    /// Set the teardown timeout
    pub fn teardown_timeout(mut self, timeout: Duration) -> Self {
        self.teardown_timeout = timeout;
        self
    }
}
