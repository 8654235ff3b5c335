//! # warden-core
//!
//! Admission control, rate limiting, and failure isolation in front of a
//! costly external completion API.
//!
//! A [`Governor`] sits between a bursty caller population and the
//! provider, answering:
//! - May this call proceed right now?
//! - If not, should it wait in line or be refused?
//! - Is the provider healthy enough to be worth querying at all?
//!
//! ## Key Guarantees
//!
//! 1. **Budgets hold**: hourly, daily, and cost caps are never exceeded
//! 2. **Failures are isolated**: repeated provider failures open a
//!    circuit that sheds load without querying the provider
//! 3. **Backpressure is visible**: excess demand queues FIFO up to a
//!    bound, then admission is denied deterministically
//! 4. **Every refusal is typed**: admission denials are never conflated
//!    with provider errors
//!
//! ## Example
//!
//! ```rust,ignore
//! use warden_core::{Governor, SafeguardConfig};
//!
//! let governor = Governor::new(SafeguardConfig::default())?;
//!
//! let completion = governor
//!     .submit(|| async { client.complete(prompt.clone()).await })
//!     .await?;
//!
//! println!("{}", serde_json::to_string_pretty(&governor.status())?);
//! ```

pub mod admission;
pub mod config;
pub mod error;
pub mod governor;
pub mod resilience;

mod queue;

// Re-export main types at crate root
pub use admission::{AdmissionGate, AdmissionPermit, UsageStats};
pub use config::{ConfigError, QueueFullPolicy, SafeguardConfig};
pub use error::{DenyReason, GovernorError, ProviderError};
pub use governor::{Callable, Governor, GovernorStatus};
pub use resilience::{
    CircuitBreaker, CircuitState, RateLimiter, RetryExecutor, UsageLedger, UsageSnapshot,
};
