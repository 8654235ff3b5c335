//! Safeguard configuration for the governor.
//!
//! All limits are immutable for the lifetime of a governor instance.
//! External naming is camelCase to match the observability contract.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Serialize `Duration` as whole seconds.
pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Configuration errors found by [`SafeguardConfig::validate`].
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    ZeroLimit { field: &'static str },

    #[error("backoffCap must not be below backoffBase")]
    BackoffCapBelowBase,
}

/// What to do when a call arrives and the queue is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueFullPolicy {
    /// Reject the new arrival with `QueueFull`. Composes with
    /// caller-visible backpressure and is the default.
    #[default]
    RejectNew,

    /// Evict the oldest pending calls to make room; evicted waiters are
    /// settled with `QueueFull` rather than dropped silently.
    DropOldest,
}

/// Immutable safeguard limits for one governor instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SafeguardConfig {
    /// Requests admitted per rolling wall-clock hour
    pub max_requests_per_hour: u32,

    /// Requests admitted per calendar day (UTC)
    pub max_requests_per_day: u32,

    /// Estimated spend cap per calendar day, in USD
    pub max_cost_per_day: f64,

    /// Flat cost estimate charged per attempt, in USD
    pub estimated_cost_per_request: f64,

    /// Consecutive failures before the circuit opens
    pub circuit_breaker_threshold: u32,

    /// Time the circuit stays open before a probe is allowed
    #[serde(with = "duration_secs")]
    pub circuit_breaker_cooldown: Duration,

    /// Calls allowed in flight at once
    pub max_concurrent_requests: u32,

    /// Per-attempt deadline for a provider call
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,

    /// Pending calls held before admission is denied
    pub max_queue_size: usize,

    /// Window within which rapid repeats count toward burst detection
    #[serde(with = "duration_secs")]
    pub burst_window: Duration,

    /// Hourly request count above which rapid repeats trip the burst check
    pub burst_threshold: u32,

    /// Minimum spacing between admitted attempts
    #[serde(with = "duration_secs")]
    pub min_request_interval: Duration,

    /// Retries after the first attempt (total attempts = maxRetries + 1)
    pub max_retries: u32,

    /// First backoff delay; doubles per retry
    #[serde(with = "duration_secs")]
    pub backoff_base: Duration,

    /// Upper bound on any single backoff delay
    #[serde(with = "duration_secs")]
    pub backoff_cap: Duration,

    /// Behavior when the queue is at capacity
    pub queue_full_policy: QueueFullPolicy,

    /// Queued calls launched per drain pass
    pub drain_batch_size: usize,

    /// Delay between drain passes while calls remain queued
    #[serde(with = "duration_secs")]
    pub drain_interval: Duration,
}

impl Default for SafeguardConfig {
    fn default() -> Self {
        Self {
            max_requests_per_hour: 50,
            max_requests_per_day: 200,
            max_cost_per_day: 10.0,
            estimated_cost_per_request: 0.05,
            circuit_breaker_threshold: 5,
            circuit_breaker_cooldown: Duration::from_secs(300),
            max_concurrent_requests: 3,
            request_timeout: Duration::from_secs(60),
            max_queue_size: 50,
            burst_window: Duration::from_secs(1),
            burst_threshold: 10,
            min_request_interval: Duration::from_secs(2),
            max_retries: 3,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(60),
            queue_full_policy: QueueFullPolicy::default(),
            drain_batch_size: 3,
            drain_interval: Duration::from_secs(1),
        }
    }
}

impl SafeguardConfig {
    /// Check the limits for internal consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_requests_per_hour == 0 {
            return Err(ConfigError::ZeroLimit {
                field: "maxRequestsPerHour",
            });
        }
        if self.max_requests_per_day == 0 {
            return Err(ConfigError::ZeroLimit {
                field: "maxRequestsPerDay",
            });
        }
        if self.max_cost_per_day <= 0.0 {
            return Err(ConfigError::ZeroLimit {
                field: "maxCostPerDay",
            });
        }
        if self.max_concurrent_requests == 0 {
            return Err(ConfigError::ZeroLimit {
                field: "maxConcurrentRequests",
            });
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::ZeroLimit {
                field: "requestTimeout",
            });
        }
        if self.max_queue_size == 0 {
            return Err(ConfigError::ZeroLimit {
                field: "maxQueueSize",
            });
        }
        if self.drain_batch_size == 0 {
            return Err(ConfigError::ZeroLimit {
                field: "drainBatchSize",
            });
        }
        if self.backoff_cap < self.backoff_base {
            return Err(ConfigError::BackoffCapBelowBase);
        }
        Ok(())
    }
}
