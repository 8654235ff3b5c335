//! Minimum-interval pacing of admitted attempts.
//!
//! Runs after admission and independently of it: even when every budget
//! check passes, attempts are spaced at least `minRequestInterval` apart.
//! This is the only mechanism that bounds the per-minute request rate;
//! the hourly and daily counters cannot prevent a burst within a minute.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};

#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_slot: Mutex::new(None),
        }
    }

    /// Wait until this attempt's slot. Slots are reserved under the lock
    /// so concurrent callers stay strictly spaced, then awaited outside it.
    pub async fn pace(&self) {
        if self.min_interval.is_zero() {
            return;
        }
        let slot = {
            let mut next = self.next_slot.lock();
            let now = Instant::now();
            let slot = match *next {
                Some(at) if at > now => at,
                _ => now,
            };
            *next = Some(slot + self.min_interval);
            slot
        };
        sleep_until(slot).await;
    }

    /// Forget the reserved slot (emergency stop).
    pub fn reset(&self) {
        *self.next_slot.lock() = None;
    }
}
