//! Rolling usage counters for completion-API spend.
//!
//! Windows are wall-clock: the hourly counter covers the current calendar
//! hour and the daily counter the current UTC day. Membership is computed
//! lazily from stored anchors on every access, so there are no background
//! timers to leak or shut down.

use chrono::{DateTime, Timelike, Utc};
use serde::Serialize;

/// Read-only copy of the ledger counters.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    pub requests_this_hour: u32,
    pub requests_this_day: u32,
    pub estimated_cost_today: f64,
    pub total_requests: u64,
}

/// Mutable request/cost counters within rolling hour and day windows.
///
/// Not internally synchronized; the admission gate owns the ledger behind
/// its mutex and all mutation happens inside that critical section.
#[derive(Debug, Clone)]
pub struct UsageLedger {
    requests_this_hour: u32,
    requests_this_day: u32,
    estimated_cost_today: f64,
    total_requests: u64,
    hour_started: DateTime<Utc>,
    day_started: DateTime<Utc>,
}

fn same_hour(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    a.date_naive() == b.date_naive() && a.hour() == b.hour()
}

fn same_day(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    a.date_naive() == b.date_naive()
}

impl UsageLedger {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            requests_this_hour: 0,
            requests_this_day: 0,
            estimated_cost_today: 0.0,
            total_requests: 0,
            hour_started: now,
            day_started: now,
        }
    }

    /// Reset counters whose wall-clock window has rolled over since the
    /// last access. Called before every read or write.
    pub fn roll_windows_at(&mut self, now: DateTime<Utc>) {
        if !same_hour(self.hour_started, now) {
            tracing::debug!(
                expired = self.requests_this_hour,
                "hourly usage window rolled over"
            );
            self.reset_hourly();
            self.hour_started = now;
        }
        if !same_day(self.day_started, now) {
            tracing::debug!(
                expired = self.requests_this_day,
                "daily usage window rolled over"
            );
            self.reset_daily();
            self.day_started = now;
        }
    }

    /// Record one completed attempt. Counters and the cost estimate are
    /// charged whether or not the attempt succeeded, mirroring billing.
    pub fn record_attempt(&mut self, success: bool, cost: f64) {
        self.record_attempt_at(Utc::now(), success, cost);
    }

    pub fn record_attempt_at(&mut self, now: DateTime<Utc>, success: bool, cost: f64) {
        self.roll_windows_at(now);
        self.requests_this_hour += 1;
        self.requests_this_day += 1;
        self.estimated_cost_today += cost;
        self.total_requests += 1;
        tracing::debug!(
            success,
            requests_this_hour = self.requests_this_hour,
            estimated_cost_today = self.estimated_cost_today,
            "recorded completion attempt"
        );
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            requests_this_hour: self.requests_this_hour,
            requests_this_day: self.requests_this_day,
            estimated_cost_today: self.estimated_cost_today,
            total_requests: self.total_requests,
        }
    }

    pub fn reset_hourly(&mut self) {
        self.requests_this_hour = 0;
    }

    pub fn reset_daily(&mut self) {
        self.requests_this_day = 0;
        self.estimated_cost_today = 0.0;
    }

    pub fn requests_this_hour(&self) -> u32 {
        self.requests_this_hour
    }

    pub fn requests_this_day(&self) -> u32 {
        self.requests_this_day
    }

    pub fn estimated_cost_today(&self) -> f64 {
        self.estimated_cost_today
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests
    }
}

impl Default for UsageLedger {
    fn default() -> Self {
        Self::new()
    }
}
