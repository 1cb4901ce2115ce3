//! Retry with exponential backoff and jitter for provider and transport
//! calls.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use crate::error::Error;
use crate::types::RetryConfig;

/// Errors that know whether a retry can help.
pub trait Retryable {
    fn is_recoverable(&self) -> bool;
}

impl Retryable for Error {
    fn is_recoverable(&self) -> bool {
        self.is_recoverable()
    }
}

/// Counters for retry outcomes.
#[derive(Debug, Default)]
pub struct RetryMetrics {
    total: AtomicU64,
    success: AtomicU64,
    failure: AtomicU64,
}

impl RetryMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_retry(&self, succeeded: bool) {
        self.total.fetch_add(1, Ordering::SeqCst);
        if succeeded {
            self.success.fetch_add(1, Ordering::SeqCst);
        } else {
            self.failure.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn success_count(&self) -> u64 {
        self.success.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn failure_count(&self) -> u64 {
        self.failure.load(Ordering::SeqCst)
    }
}

/// Executes operations under a [`RetryConfig`] policy.
///
/// Only recoverable errors are retried. Delay for attempt `n` is
/// `min(max_delay, base_delay * exponential_base^(n-1))` with multiplicative
/// jitter of up to `jitter` in either direction. Retry outcomes are
/// recorded in the attached [`RetryMetrics`], if any.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    metrics: Option<Arc<RetryMetrics>>,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            metrics: None,
        }
    }

    /// Attach shared retry counters.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<RetryMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn record_retry(&self, succeeded: bool) {
        if let Some(metrics) = &self.metrics {
            metrics.record_retry(succeeded);
        }
    }

    fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = self.config.exponential_base.powi(exponent as i32);
        let raw_ms = self.config.base_delay.as_millis() as f64 * factor;
        let capped_ms = raw_ms.min(self.config.max_delay.as_millis() as f64);
        if self.config.jitter > 0.0 {
            let jitter = (rand::random::<f64>() - 0.5) * 2.0 * self.config.jitter;
            let adjusted = (capped_ms * (1.0 + jitter)).max(0.0);
            Duration::from_millis(adjusted as u64)
        } else {
            Duration::from_millis(capped_ms as u64)
        }
    }

    /// Run `operation` until it succeeds, exhausts `max_attempts`, or fails
    /// with a non-recoverable error.
    pub async fn execute<F, T, E, Fut>(&self, operation: F) -> Result<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::fmt::Debug,
    {
        let mut attempt: u32 = 1;
        loop {
            match operation().await {
                Ok(result) => {
                    if attempt > 1 {
                        self.record_retry(true);
                    }
                    return Ok(result);
                }
                Err(e) => {
                    if !e.is_recoverable() || attempt >= self.config.max_attempts {
                        return Err(e);
                    }
                    let delay = self.calculate_delay(attempt);
                    warn!(
                        attempt,
                        max_attempts = self.config.max_attempts,
                        ?delay,
                        error = ?e,
                        "retrying after recoverable failure"
                    );
                    self.record_retry(false);
                    attempt += 1;
                    sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            exponential_base: 2.0,
            jitter: 0.0,
        }
    }

    #[tokio::test]
    async fn recoverable_errors_are_retried_until_success() {
        let policy = RetryPolicy::new(fast_config(3));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_op = Arc::clone(&calls);
        let result: Result<u32, Error> = policy
            .execute(|| {
                let calls = Arc::clone(&calls_in_op);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(Error::Storage("transient".into()))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_recoverable_errors_fail_fast() {
        let policy = RetryPolicy::new(fast_config(5));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_op = Arc::clone(&calls);
        let result: Result<(), Error> = policy
            .execute(|| {
                let calls = Arc::clone(&calls_in_op);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Error::Validation("bad input".into()))
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn attempts_are_bounded() {
        let policy = RetryPolicy::new(fast_config(3));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_op = Arc::clone(&calls);
        let result: Result<(), Error> = policy
            .execute(|| {
                let calls = Arc::clone(&calls_in_op);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Error::Storage("still down".into()))
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn delay_grows_and_caps() {
        let policy = RetryPolicy::new(RetryConfig {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            exponential_base: 2.0,
            jitter: 0.0,
        });
        assert_eq!(policy.calculate_delay(1), Duration::from_millis(100));
        assert_eq!(policy.calculate_delay(2), Duration::from_millis(200));
        assert_eq!(policy.calculate_delay(3), Duration::from_millis(350));
        assert_eq!(policy.calculate_delay(8), Duration::from_millis(350));
    }

    #[test]
    fn metrics_count_outcomes() {
        let metrics = RetryMetrics::new();
        metrics.record_retry(true);
        metrics.record_retry(false);
        metrics.record_retry(false);
        assert_eq!(metrics.total(), 3);
        assert_eq!(metrics.success_count(), 1);
        assert_eq!(metrics.failure_count(), 2);
    }

    #[tokio::test]
    async fn attached_metrics_observe_the_retry_loop() {
        let metrics = Arc::new(RetryMetrics::new());
        let policy = RetryPolicy::new(fast_config(3)).with_metrics(Arc::clone(&metrics));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_op = Arc::clone(&calls);
        let result: Result<u32, Error> = policy
            .execute(|| {
                let calls = Arc::clone(&calls_in_op);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(Error::Storage("transient".into()))
                    } else {
                        Ok(9)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 9);
        // Two backoffs recorded as failed retries, one eventual success.
        assert_eq!(metrics.failure_count(), 2);
        assert_eq!(metrics.success_count(), 1);
        assert_eq!(metrics.total(), 3);
    }

    #[tokio::test]
    async fn first_try_success_records_nothing() {
        let metrics = Arc::new(RetryMetrics::new());
        let policy = RetryPolicy::new(fast_config(3)).with_metrics(Arc::clone(&metrics));
        let result: Result<(), Error> = policy.execute(|| async { Ok(()) }).await;
        assert!(result.is_ok());
        assert_eq!(metrics.total(), 0);
    }
}
