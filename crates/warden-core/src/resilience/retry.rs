//! Timeout, classification, and backoff around a single admitted call.
//!
//! Runs only after the admission gate has admitted and the rate limiter
//! has paced. Each attempt is raced against the per-attempt deadline;
//! retryable failures back off exponentially with jitter. The terminal
//! outcome, and only the terminal outcome, is recorded against the
//! ledger and the circuit breaker.

use backon::{ExponentialBuilder, Retryable};
use std::time::Duration;

use crate::admission::AdmissionPermit;
use crate::config::SafeguardConfig;
use crate::error::ProviderError;
use crate::governor::Callable;

#[derive(Debug)]
pub struct RetryExecutor {
    request_timeout: Duration,
    max_retries: u32,
    backoff_base: Duration,
    backoff_cap: Duration,
}

impl RetryExecutor {
    pub fn from_config(config: &SafeguardConfig) -> Self {
        Self {
            request_timeout: config.request_timeout,
            max_retries: config.max_retries,
            backoff_base: config.backoff_base,
            backoff_cap: config.backoff_cap,
        }
    }

    /// Drive one admitted call to a terminal outcome.
    ///
    /// `QuotaExceeded` is surfaced immediately; `RateLimited`, `Timeout`,
    /// and other failures are retried while attempts remain. Intermediate
    /// retried attempts touch neither the ledger nor the breaker;
    /// provider-side throttling is not a service fault.
    pub async fn run<T>(
        &self,
        call: &Callable<T>,
        permit: &AdmissionPermit,
    ) -> Result<T, ProviderError> {
        let timeout = self.request_timeout;
        let attempt = || {
            let fut = call();
            async move {
                match tokio::time::timeout(timeout, fut).await {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::Timeout(timeout)),
                }
            }
        };

        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.backoff_base)
            .with_max_delay(self.backoff_cap)
            .with_factor(2.0)
            .with_max_times(self.max_retries as usize)
            .with_jitter();

        let result = attempt
            .retry(backoff)
            .when(|err: &ProviderError| err.is_retryable())
            .notify(|err: &ProviderError, delay: Duration| {
                tracing::warn!(error = %err, backoff = ?delay, "completion attempt failed, backing off");
            })
            .await;

        match &result {
            Ok(_) => permit.record_success(),
            Err(_) => permit.record_failure(),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::AdmissionGate;
    use futures::future::BoxFuture;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn permissive_config() -> SafeguardConfig {
        SafeguardConfig {
            max_requests_per_hour: 10_000,
            max_requests_per_day: 10_000,
            max_cost_per_day: 1_000.0,
            burst_threshold: 10_000,
            min_request_interval: Duration::ZERO,
            request_timeout: Duration::from_secs(5),
            max_retries: 2,
            backoff_base: Duration::from_millis(100),
            backoff_cap: Duration::from_secs(2),
            ..Default::default()
        }
    }

    fn counting_call<F>(counter: Arc<AtomicU32>, f: F) -> Callable<&'static str>
    where
        F: Fn(u32) -> Result<&'static str, ProviderError> + Send + Sync + 'static,
    {
        Box::new(move || {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            let outcome = f(attempt);
            let fut: BoxFuture<'static, Result<&'static str, ProviderError>> =
                Box::pin(async move { outcome });
            fut
        })
    }

    #[tokio::test(start_paused = true)]
    async fn first_attempt_success_records_once() {
        let gate = AdmissionGate::new(permissive_config());
        let permit = gate.check().unwrap();
        let executor = RetryExecutor::from_config(&permissive_config());

        let attempts = Arc::new(AtomicU32::new(0));
        let call = counting_call(attempts.clone(), |_| Ok("done"));

        let result = executor.run(&call, &permit).await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        drop(permit);

        let stats = gate.usage_stats();
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_until_success() {
        let gate = AdmissionGate::new(permissive_config());
        let permit = gate.check().unwrap();
        let executor = RetryExecutor::from_config(&permissive_config());

        let attempts = Arc::new(AtomicU32::new(0));
        let call = counting_call(attempts.clone(), |attempt| {
            if attempt < 2 {
                Err(ProviderError::Other("transient".into()))
            } else {
                Ok("recovered")
            }
        });

        let result = executor.run(&call, &permit).await;
        assert_eq!(result.unwrap(), "recovered");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        drop(permit);

        // Intermediate failures never reach the breaker.
        assert_eq!(gate.usage_stats().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn quota_exhaustion_is_never_retried() {
        let gate = AdmissionGate::new(permissive_config());
        let permit = gate.check().unwrap();
        let executor = RetryExecutor::from_config(&permissive_config());

        let attempts = Arc::new(AtomicU32::new(0));
        let call = counting_call(attempts.clone(), |_| {
            Err(ProviderError::QuotaExceeded("plan exhausted".into()))
        });

        let result = executor.run(&call, &permit).await;
        assert!(matches!(result, Err(ProviderError::QuotaExceeded(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        drop(permit);

        let stats = gate.usage_stats();
        assert_eq!(stats.consecutive_failures, 1);
        assert_eq!(stats.total_requests, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_surface_the_last_error() {
        let gate = AdmissionGate::new(permissive_config());
        let permit = gate.check().unwrap();
        let executor = RetryExecutor::from_config(&permissive_config());

        let attempts = Arc::new(AtomicU32::new(0));
        let call = counting_call(attempts.clone(), |_| {
            Err(ProviderError::RateLimited { retry_after: None })
        });

        let result = executor.run(&call, &permit).await;
        assert!(matches!(result, Err(ProviderError::RateLimited { .. })));
        // maxRetries = 2 means three attempts in total.
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        drop(permit);

        assert_eq!(gate.usage_stats().consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_calls_time_out_per_attempt() {
        let config = SafeguardConfig {
            request_timeout: Duration::from_millis(200),
            max_retries: 1,
            ..permissive_config()
        };
        let gate = AdmissionGate::new(config.clone());
        let permit = gate.check().unwrap();
        let executor = RetryExecutor::from_config(&config);

        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let call: Callable<&'static str> = Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            let fut: BoxFuture<'static, Result<&'static str, ProviderError>> =
                Box::pin(std::future::pending());
            fut
        });

        let result = executor.run(&call, &permit).await;
        assert!(matches!(result, Err(ProviderError::Timeout(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
