//! Pre-flight admission checks for completion calls.
//!
//! The gate combines the usage ledger, the circuit breaker, the in-flight
//! count, and burst detection into a single allow/deny decision. The whole
//! decision, including the increment of the in-flight count, happens
//! under one mutex, so two callers can never both pass the concurrency
//! check for the last free slot.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::config::SafeguardConfig;
use crate::error::{DenyReason, GovernorError};
use crate::resilience::{CircuitBreaker, UsageLedger};

/// Usage counters exposed through the status document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStats {
    pub requests_this_hour: u32,
    pub requests_this_day: u32,
    pub estimated_cost_today: f64,
    pub active_requests: u32,
    pub total_requests: u64,
    pub consecutive_failures: u32,
    pub circuit_breaker_open: bool,
}

/// Shared mutable safeguard state. Every mutation happens while holding
/// the gate's mutex; none of the critical sections suspend.
struct GateState {
    ledger: UsageLedger,
    breaker: CircuitBreaker,
    active_requests: u32,
    last_admitted: Option<Instant>,
    last_request_at: Option<DateTime<Utc>>,
}

/// Synchronous allow/deny decision in front of every provider call.
pub struct AdmissionGate {
    config: SafeguardConfig,
    state: Arc<Mutex<GateState>>,
}

impl AdmissionGate {
    pub fn new(config: SafeguardConfig) -> Self {
        let state = GateState {
            ledger: UsageLedger::new(),
            breaker: CircuitBreaker::new(
                config.circuit_breaker_threshold,
                config.circuit_breaker_cooldown,
            ),
            active_requests: 0,
            last_admitted: None,
            last_request_at: None,
        };
        Self {
            config,
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Run the admission checks in fixed order; the first failure wins.
    ///
    /// On allow, the in-flight count is incremented inside the same
    /// critical section and the returned permit decrements it on drop.
    pub fn check(&self) -> Result<AdmissionPermit, GovernorError> {
        let mut st = self.state.lock();
        let now = Utc::now();
        st.ledger.roll_windows_at(now);

        if let Err(wait) = st.breaker.allow() {
            return Err(GovernorError::AdmissionDenied {
                reason: DenyReason::CircuitOpen,
                retry_after: Some(wait),
            });
        }
        if st.ledger.requests_this_hour() >= self.config.max_requests_per_hour {
            return Err(deny(DenyReason::HourlyLimit));
        }
        if st.ledger.requests_this_day() >= self.config.max_requests_per_day {
            return Err(deny(DenyReason::DailyLimit));
        }
        if st.ledger.estimated_cost_today() >= self.config.max_cost_per_day {
            return Err(deny(DenyReason::CostLimit));
        }
        if st.active_requests >= self.config.max_concurrent_requests {
            return Err(deny(DenyReason::ConcurrencyLimit));
        }
        if let Some(previous) = st.last_admitted {
            if previous.elapsed() < self.config.burst_window
                && st.ledger.requests_this_hour() > self.config.burst_threshold
            {
                tracing::warn!(
                    requests_this_hour = st.ledger.requests_this_hour(),
                    "burst detected, denying admission"
                );
                return Err(deny(DenyReason::BurstDetected));
            }
        }

        let is_probe = st.breaker.is_open();
        if is_probe {
            st.breaker.begin_probe();
        }
        st.active_requests += 1;
        st.last_admitted = Some(Instant::now());
        st.last_request_at = Some(now);

        Ok(AdmissionPermit {
            state: Arc::clone(&self.state),
            cost: self.config.estimated_cost_per_request,
            is_probe,
            outcome_recorded: AtomicBool::new(false),
        })
    }

    pub fn active_requests(&self) -> u32 {
        self.state.lock().active_requests
    }

    pub fn last_request_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().last_request_at
    }

    pub fn usage_stats(&self) -> UsageStats {
        let mut st = self.state.lock();
        st.ledger.roll_windows_at(Utc::now());
        let snapshot = st.ledger.snapshot();
        UsageStats {
            requests_this_hour: snapshot.requests_this_hour,
            requests_this_day: snapshot.requests_this_day,
            estimated_cost_today: snapshot.estimated_cost_today,
            active_requests: st.active_requests,
            total_requests: snapshot.total_requests,
            consecutive_failures: st.breaker.consecutive_failures(),
            circuit_breaker_open: st.breaker.is_open(),
        }
    }

    /// Zero the transient windows and close the breaker (emergency stop).
    /// Lifetime counters survive; in-flight calls keep their permits.
    pub fn reset(&self) {
        let mut st = self.state.lock();
        st.ledger.reset_hourly();
        st.ledger.reset_daily();
        st.breaker.force_close();
        st.last_admitted = None;
        st.last_request_at = None;
    }
}

fn deny(reason: DenyReason) -> GovernorError {
    GovernorError::AdmissionDenied {
        reason,
        retry_after: None,
    }
}

/// Proof of admission for one call. Dropping the permit releases the
/// concurrency slot, on every exit path.
pub struct AdmissionPermit {
    state: Arc<Mutex<GateState>>,
    cost: f64,
    is_probe: bool,
    outcome_recorded: AtomicBool,
}

impl std::fmt::Debug for AdmissionPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionPermit")
            .field("cost", &self.cost)
            .field("is_probe", &self.is_probe)
            .finish()
    }
}

impl AdmissionPermit {
    /// Record a successful terminal outcome against ledger and breaker.
    pub fn record_success(&self) {
        self.outcome_recorded.store(true, Ordering::SeqCst);
        let mut st = self.state.lock();
        st.ledger.record_attempt(true, self.cost);
        st.breaker.record_outcome(true);
        tracing::info!(
            action = "completion_success",
            requests_this_hour = st.ledger.requests_this_hour(),
            estimated_cost_today = st.ledger.estimated_cost_today(),
            consecutive_failures = st.breaker.consecutive_failures(),
            circuit_open = st.breaker.is_open(),
            "recorded completion outcome"
        );
    }

    /// Record a failed terminal outcome against ledger and breaker.
    pub fn record_failure(&self) {
        self.outcome_recorded.store(true, Ordering::SeqCst);
        let mut st = self.state.lock();
        st.ledger.record_attempt(false, self.cost);
        st.breaker.record_outcome(false);
        tracing::warn!(
            action = "completion_failure",
            requests_this_hour = st.ledger.requests_this_hour(),
            estimated_cost_today = st.ledger.estimated_cost_today(),
            consecutive_failures = st.breaker.consecutive_failures(),
            circuit_open = st.breaker.is_open(),
            "recorded completion outcome"
        );
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        let mut st = self.state.lock();
        st.active_requests = st.active_requests.saturating_sub(1);
        if self.is_probe && !self.outcome_recorded.load(Ordering::SeqCst) {
            st.breaker.abandon_probe();
        }
    }
}
