//! Cluster tuning knobs.

use std::time::Duration;

/// Timeouts, retry policy and pool sizes for one cluster node.
#[derive(Clone, Debug)]
pub struct ClusterConfig {
    /// Bound on any single cross-node request, including activation.
    pub request_timeout: Duration,
    /// How long a resolver waits for another node's in-flight activation
    /// before giving up.
    pub activation_wait_timeout: Duration,
    /// Attempts to durably record an activation before compensating.
    pub store_attempts: u32,
    /// Base backoff between store attempts; jittered and scaled per attempt.
    pub store_backoff: Duration,
    /// Slots in the shared reply pool used by the resolution hot path.
    pub shared_future_pool_size: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            activation_wait_timeout: Duration::from_secs(3),
            store_attempts: 3,
            store_backoff: Duration::from_millis(50),
            shared_future_pool_size: 128,
        }
    }
}

impl ClusterConfig {
    /// Override the cross-node request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Override the wait for another node's in-flight activation.
    pub fn with_activation_wait_timeout(mut self, timeout: Duration) -> Self {
        self.activation_wait_timeout = timeout;
        self
    }

    /// Override the store retry policy.
    pub fn with_store_retries(mut self, attempts: u32, backoff: Duration) -> Self {
        self.store_attempts = attempts.max(1);
        self.store_backoff = backoff;
        self
    }

    /// Override the shared reply pool size.
    pub fn with_shared_future_pool_size(mut self, size: usize) -> Self {
        self.shared_future_pool_size = size.max(1);
        self
    }
}
