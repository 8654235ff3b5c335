//! Circuit breaker to shed load from a failing provider.
//!
//! After repeated consecutive failures the circuit opens and calls are
//! denied without querying the provider. Once the cooldown elapses a
//! single probe call is allowed; its outcome decides whether the circuit
//! closes or reopens.

use std::time::{Duration, Instant};

/// State of the circuit.
#[derive(Debug, Clone, Copy)]
pub enum CircuitState {
    /// Normal operation
    Closed,

    /// Calls are denied until the cooldown elapses
    Open { opened_at: Instant },

    /// Cooldown elapsed; one probe call decides recovery
    HalfOpen {
        opened_at: Instant,
        probe_in_flight: bool,
    },
}

/// Tracks consecutive provider failures and blocks calls while open.
///
/// Not internally synchronized; the admission gate owns the breaker
/// behind its mutex.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: CircuitState,
    consecutive_failures: u32,
    threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            threshold,
            cooldown,
        }
    }

    /// Whether a call may proceed. `Err` carries the remaining wait.
    ///
    /// An open circuit whose cooldown has elapsed moves to half-open and
    /// allows the caller through as probe-eligible; the probe slot itself
    /// is claimed by [`begin_probe`](Self::begin_probe) once the rest of
    /// the admission checks pass.
    pub fn allow(&mut self) -> Result<(), Duration> {
        match self.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open { opened_at } => {
                let elapsed = opened_at.elapsed();
                if elapsed >= self.cooldown {
                    self.state = CircuitState::HalfOpen {
                        opened_at,
                        probe_in_flight: false,
                    };
                    tracing::info!("circuit half-open, next call probes the provider");
                    Ok(())
                } else {
                    Err(self.cooldown - elapsed)
                }
            }
            CircuitState::HalfOpen {
                probe_in_flight: false,
                ..
            } => Ok(()),
            CircuitState::HalfOpen {
                opened_at,
                probe_in_flight: true,
            } => Err(self.cooldown.saturating_sub(opened_at.elapsed())),
        }
    }

    /// Claim the single half-open probe slot.
    pub fn begin_probe(&mut self) {
        if let CircuitState::HalfOpen {
            opened_at,
            probe_in_flight: false,
        } = self.state
        {
            self.state = CircuitState::HalfOpen {
                opened_at,
                probe_in_flight: true,
            };
        }
    }

    /// Release a claimed probe slot without an outcome, e.g. when the
    /// probing call was abandoned before completing.
    pub fn abandon_probe(&mut self) {
        if let CircuitState::HalfOpen {
            opened_at,
            probe_in_flight: true,
        } = self.state
        {
            self.state = CircuitState::HalfOpen {
                opened_at,
                probe_in_flight: false,
            };
        }
    }

    /// Record the outcome of an admitted call.
    pub fn record_outcome(&mut self, success: bool) {
        if success {
            if !matches!(self.state, CircuitState::Closed) {
                tracing::info!("circuit closed after successful probe");
            }
            self.consecutive_failures = 0;
            self.state = CircuitState::Closed;
            return;
        }

        self.consecutive_failures += 1;
        match self.state {
            CircuitState::HalfOpen { .. } => {
                tracing::warn!("circuit reopened after failed probe");
                self.state = CircuitState::Open {
                    opened_at: Instant::now(),
                };
            }
            CircuitState::Closed if self.consecutive_failures >= self.threshold => {
                tracing::warn!(
                    failures = self.consecutive_failures,
                    "circuit opened after repeated failures"
                );
                self.state = CircuitState::Open {
                    opened_at: Instant::now(),
                };
            }
            _ => {}
        }
    }

    /// Force the circuit closed and forget past failures (emergency stop).
    pub fn force_close(&mut self) {
        self.consecutive_failures = 0;
        self.state = CircuitState::Closed;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// True until the circuit has fully closed again.
    pub fn is_open(&self) -> bool {
        !matches!(self.state, CircuitState::Closed)
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }
}
