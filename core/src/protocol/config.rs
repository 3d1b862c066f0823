//! Relay configuration

use std::time::Duration;

use crate::network::discovery::RetryPolicy;
use crate::resilience::DedupConfig;

/// Configuration for the relay service
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// How long a seen alert id is remembered (seconds)
    /// Default: 3600 (1 hour)
    pub dedup_retention_secs: u64,

    /// Maximum number of remembered alert ids
    /// Default: 4096
    pub dedup_capacity: usize,

    /// How long a disconnected peer stays in the registry (seconds)
    /// Default: 30
    pub peer_grace_period_secs: u64,

    /// How often dedup eviction and peer pruning run (seconds)
    /// Default: 15
    pub maintenance_interval_secs: u64,

    /// Capacity of the presentation event channel
    /// Default: 1000
    pub event_channel_capacity: usize,

    /// Timeout for establishing a link to a peer (seconds)
    /// Default: 10
    pub connect_timeout_secs: u64,

    /// Timeout for a single send to a peer (seconds)
    /// Default: 5
    pub send_timeout_secs: u64,

    /// First retry delay after a radio failure (milliseconds)
    /// Default: 1000
    pub retry_base_delay_ms: u64,

    /// Upper bound on the retry delay (milliseconds)
    /// Default: 60000
    pub retry_max_delay_ms: u64,

    /// Consecutive radio failures before the service reports degraded health
    /// Default: 5
    pub unhealthy_after_failures: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            dedup_retention_secs: 3600,
            dedup_capacity: 4096,
            peer_grace_period_secs: 30,
            maintenance_interval_secs: 15,
            event_channel_capacity: 1000,
            connect_timeout_secs: 10,
            send_timeout_secs: 5,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 60_000,
            unhealthy_after_failures: 5,
        }
    }
}

impl RelayConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration for testing (short timers, small caches)
    pub fn for_testing() -> Self {
        Self {
            dedup_retention_secs: 60,
            dedup_capacity: 256,
            peer_grace_period_secs: 2,
            maintenance_interval_secs: 1,
            event_channel_capacity: 100,
            connect_timeout_secs: 1,
            send_timeout_secs: 1,
            retry_base_delay_ms: 50,
            retry_max_delay_ms: 400,
            unhealthy_after_failures: 3,
        }
    }

    pub fn with_dedup_retention(mut self, secs: u64) -> Self {
        self.dedup_retention_secs = secs;
        self
    }

    pub fn with_dedup_capacity(mut self, capacity: usize) -> Self {
        self.dedup_capacity = capacity;
        self
    }

    pub fn with_peer_grace_period(mut self, secs: u64) -> Self {
        self.peer_grace_period_secs = secs;
        self
    }

    pub fn with_maintenance_interval(mut self, secs: u64) -> Self {
        self.maintenance_interval_secs = secs;
        self
    }

    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    pub fn with_connect_timeout(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = secs;
        self
    }

    pub fn with_send_timeout(mut self, secs: u64) -> Self {
        self.send_timeout_secs = secs;
        self
    }

    /// Set retry backoff bounds (milliseconds)
    pub fn with_retry_delays(mut self, base_ms: u64, max_ms: u64) -> Self {
        self.retry_base_delay_ms = base_ms;
        self.retry_max_delay_ms = max_ms;
        self
    }

    pub fn with_unhealthy_after(mut self, failures: u32) -> Self {
        self.unhealthy_after_failures = failures;
        self
    }

    pub fn dedup_retention(&self) -> Duration {
        Duration::from_secs(self.dedup_retention_secs)
    }

    pub fn peer_grace_period(&self) -> Duration {
        Duration::from_secs(self.peer_grace_period_secs)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    pub fn dedup_config(&self) -> DedupConfig {
        DedupConfig {
            retention: self.dedup_retention(),
            capacity: self.dedup_capacity,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let base_delay = Duration::from_millis(self.retry_base_delay_ms.max(1));
        RetryPolicy {
            base_delay,
            max_delay: Duration::from_millis(self.retry_max_delay_ms).max(base_delay),
        }
    }
}
