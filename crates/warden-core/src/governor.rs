//! Composition root: admission, pacing, retry, and the drain loop behind
//! a single handle.
//!
//! A governor owns all mutable safeguard state explicitly, with no
//! process-wide singletons, so independent governors (e.g. one per API
//! key) can coexist and tear down cleanly.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::oneshot;

use crate::admission::{AdmissionGate, AdmissionPermit, UsageStats};
use crate::config::{ConfigError, SafeguardConfig};
use crate::error::{DenyReason, GovernorError, ProviderError};
use crate::queue::{BoundedQueue, QueueItem};
use crate::resilience::{RateLimiter, RetryExecutor};

/// An opaque, re-invokable unit of work against the completion provider.
/// The governor imposes no contract on it beyond its classified errors.
pub type Callable<T> = Box<dyn Fn() -> BoxFuture<'static, Result<T, ProviderError>> + Send + Sync>;

/// Observability document for the status endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernorStatus {
    pub queue_length: usize,
    pub is_processing: bool,
    pub last_request_time: Option<DateTime<Utc>>,
    pub safeguards: SafeguardConfig,
    pub usage_stats: UsageStats,
}

/// Public entry point for governed completion calls.
pub struct Governor<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Governor<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<T> {
    config: SafeguardConfig,
    gate: AdmissionGate,
    limiter: RateLimiter,
    retry: RetryExecutor,
    queue: BoundedQueue<T>,
    draining: AtomicBool,
}

impl<T: Send + 'static> Governor<T> {
    pub fn new(config: SafeguardConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                gate: AdmissionGate::new(config.clone()),
                limiter: RateLimiter::new(config.min_request_interval),
                retry: RetryExecutor::from_config(&config),
                queue: BoundedQueue::new(config.max_queue_size, config.queue_full_policy),
                draining: AtomicBool::new(false),
                config,
            }),
        })
    }

    /// Submit a call for governed execution.
    ///
    /// Runs inline when the queue is empty and the gate admits; otherwise
    /// the call is queued and resolved by the drain loop when a slot
    /// frees. A full queue denies deterministically with `QueueFull`.
    pub async fn submit<F, Fut>(&self, call: F) -> Result<T, GovernorError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ProviderError>> + Send + 'static,
    {
        let call: Callable<T> = Box::new(move || {
            let fut: BoxFuture<'static, Result<T, ProviderError>> = Box::pin(call());
            fut
        });
        self.submit_boxed(call).await
    }

    async fn submit_boxed(&self, call: Callable<T>) -> Result<T, GovernorError> {
        if self.inner.queue.is_empty() {
            if let Ok(permit) = self.inner.gate.check() {
                return self.inner.execute(call, permit).await;
            }
        }

        let (tx, rx) = oneshot::channel();
        let item = QueueItem {
            call,
            enqueued_at: Instant::now(),
            tx,
        };
        if self.inner.queue.try_push(item).is_err() {
            tracing::warn!(
                capacity = self.inner.config.max_queue_size,
                "queue full, rejecting new call"
            );
            return Err(GovernorError::QueueFull {
                capacity: self.inner.config.max_queue_size,
            });
        }
        self.inner.kick_drain();

        match rx.await {
            Ok(result) => result,
            // The sender only disappears when pending work is discarded.
            Err(_) => Err(GovernorError::Cancelled),
        }
    }

    /// Clear the queue, reset transient safeguard state, and close the
    /// circuit breaker. Lifetime counters survive; in-flight calls run to
    /// completion and their usage still records. Idempotent.
    pub fn emergency_stop(&self) -> DateTime<Utc> {
        let pending = self.inner.queue.drain_all();
        let cancelled = pending.len();
        for item in pending {
            let _ = item.tx.send(Err(GovernorError::Cancelled));
        }
        self.inner.gate.reset();
        self.inner.limiter.reset();
        tracing::warn!(cancelled, "emergency stop: queue cleared, safeguards reset");
        Utc::now()
    }

    /// Snapshot for the status endpoint.
    pub fn status(&self) -> GovernorStatus {
        GovernorStatus {
            queue_length: self.inner.queue.len(),
            is_processing: self.inner.draining.load(Ordering::SeqCst),
            last_request_time: self.inner.gate.last_request_at(),
            safeguards: self.inner.config.clone(),
            usage_stats: self.inner.gate.usage_stats(),
        }
    }
}

impl<T: Send + 'static> Inner<T> {
    async fn execute(
        self: &Arc<Self>,
        call: Callable<T>,
        permit: AdmissionPermit,
    ) -> Result<T, GovernorError> {
        self.limiter.pace().await;
        let result = self.retry.run(&call, &permit).await;
        drop(permit);
        // A freed slot may make queued work admissible.
        self.kick_drain();
        result.map_err(GovernorError::Provider)
    }

    /// Start the drain loop unless one is already running.
    fn kick_drain(self: &Arc<Self>) {
        if self.queue.is_empty() {
            return;
        }
        if self.draining.swap(true, Ordering::SeqCst) {
            return;
        }
        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.drain_loop().await });
    }

    async fn drain_loop(self: Arc<Self>) {
        loop {
            if self.queue.is_empty() {
                break;
            }
            let free = self
                .config
                .max_concurrent_requests
                .saturating_sub(self.gate.active_requests()) as usize;
            if free == 0 {
                tokio::time::sleep(self.config.drain_interval).await;
                continue;
            }

            let batch = self.queue.pop_batch(free.min(self.config.drain_batch_size));
            if batch.is_empty() {
                break;
            }
            tracing::debug!(
                batch = batch.len(),
                queued = self.queue.len(),
                "draining queued calls"
            );
            futures::future::join_all(batch.into_iter().map(|item| self.run_item(item))).await;

            if self.queue.is_empty() {
                break;
            }
            tokio::time::sleep(self.config.drain_interval).await;
        }
        self.draining.store(false, Ordering::SeqCst);
        // An item may have arrived between the last pop and the flag clearing.
        self.kick_drain();
    }

    async fn run_item(self: &Arc<Self>, item: QueueItem<T>) {
        match self.gate.check() {
            Ok(permit) => {
                let QueueItem {
                    call,
                    enqueued_at,
                    tx,
                } = item;
                tracing::debug!(waited = ?enqueued_at.elapsed(), "queued call admitted");
                self.limiter.pace().await;
                let result = self.retry.run(&call, &permit).await;
                drop(permit);
                let _ = tx.send(result.map_err(GovernorError::Provider));
            }
            Err(GovernorError::AdmissionDenied {
                reason: DenyReason::ConcurrencyLimit,
                ..
            }) => {
                // A slot was taken between the batch sizing and this check;
                // the item stays next in line.
                self.queue.push_front(item);
            }
            Err(err) => {
                let _ = item.tx.send(Err(err));
            }
        }
    }
}
