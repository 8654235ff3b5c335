//! Error taxonomy for the governor.
//!
//! Admission-layer errors never reach the provider and are kept distinct
//! from provider errors so callers can tell "you were refused" apart from
//! "the call failed". Provider failures are classified exactly once, at
//! the call boundary, into a closed set of variants.

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Why the admission gate refused a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// Hourly request budget exhausted
    HourlyLimit,

    /// Daily request budget exhausted
    DailyLimit,

    /// Estimated daily spend reached the configured cap
    CostLimit,

    /// All concurrency slots are occupied
    ConcurrencyLimit,

    /// Abnormally rapid repeated calls, likely a runaway loop
    BurstDetected,

    /// Circuit breaker is open after repeated provider failures
    CircuitOpen,
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            DenyReason::HourlyLimit => "hourly request limit reached",
            DenyReason::DailyLimit => "daily request limit reached",
            DenyReason::CostLimit => "daily cost limit reached",
            DenyReason::ConcurrencyLimit => "too many concurrent requests",
            DenyReason::BurstDetected => "burst of requests detected",
            DenyReason::CircuitOpen => "circuit breaker is open",
        };
        f.write_str(text)
    }
}

/// Errors surfaced by the governor, before or instead of a provider call.
#[derive(Error, Debug)]
pub enum GovernorError {
    /// The admission gate refused the call; no cost was incurred.
    #[error("admission denied: {reason}")]
    AdmissionDenied {
        reason: DenyReason,
        /// How long to wait before retrying, when the gate knows.
        retry_after: Option<Duration>,
    },

    /// The pending-call queue is at capacity.
    #[error("queue full ({capacity} calls pending)")]
    QueueFull { capacity: usize },

    /// The call was cancelled by an emergency stop before it started.
    #[error("cancelled by emergency stop")]
    Cancelled,

    /// The admitted call failed after exhausting its retry budget.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl GovernorError {
    /// True when the error came from the admission layer rather than the
    /// provider, i.e. the underlying call was never attempted.
    pub fn is_admission_error(&self) -> bool {
        !matches!(self, GovernorError::Provider(_))
    }
}

/// Errors from the completion provider, classified once at the call boundary.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// Provider signalled throttling; safe to retry after a pause.
    #[error("rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },

    /// Billing or plan hard stop; never retried.
    #[error("provider quota exhausted: {0}")]
    QuotaExceeded(String),

    /// The attempt exceeded the per-attempt deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Any other provider failure.
    #[error("provider call failed: {0}")]
    Other(String),
}

impl ProviderError {
    /// Whether the retry executor may attempt the call again.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ProviderError::QuotaExceeded(_))
    }

    /// Classify an HTTP-level provider failure.
    ///
    /// This is the single place where status codes and provider error
    /// codes become typed variants; nothing downstream re-derives the
    /// class from message text.
    pub fn from_status(
        status: u16,
        error_code: Option<&str>,
        message: impl Into<String>,
        retry_after: Option<Duration>,
    ) -> Self {
        match (status, error_code) {
            (429, Some("insufficient_quota")) => ProviderError::QuotaExceeded(message.into()),
            (429, _) => ProviderError::RateLimited { retry_after },
            _ => ProviderError::Other(format!("{}: {}", status, message.into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_errors_are_not_retryable() {
        assert!(!ProviderError::QuotaExceeded("billing hard stop".into()).is_retryable());
        assert!(ProviderError::RateLimited { retry_after: None }.is_retryable());
        assert!(ProviderError::Timeout(Duration::from_secs(30)).is_retryable());
        assert!(ProviderError::Other("connection reset".into()).is_retryable());
    }

    #[test]
    fn status_classification_discriminates_quota_from_throttle() {
        let quota = ProviderError::from_status(429, Some("insufficient_quota"), "no credit", None);
        assert!(matches!(quota, ProviderError::QuotaExceeded(_)));

        let throttled = ProviderError::from_status(
            429,
            Some("rate_limit_exceeded"),
            "slow down",
            Some(Duration::from_secs(20)),
        );
        assert_eq!(
            throttled,
            ProviderError::RateLimited {
                retry_after: Some(Duration::from_secs(20))
            }
        );

        let other = ProviderError::from_status(500, None, "internal error", None);
        assert!(matches!(other, ProviderError::Other(_)));
    }

    #[test]
    fn admission_errors_are_distinguishable_from_provider_errors() {
        let denied = GovernorError::AdmissionDenied {
            reason: DenyReason::HourlyLimit,
            retry_after: None,
        };
        assert!(denied.is_admission_error());

        let failed = GovernorError::Provider(ProviderError::Other("boom".into()));
        assert!(!failed.is_admission_error());
    }

    #[test]
    fn deny_reason_serializes_snake_case() {
        let json = serde_json::to_string(&DenyReason::BurstDetected).unwrap();
        assert_eq!(json, "\"burst_detected\"");
    }
}
