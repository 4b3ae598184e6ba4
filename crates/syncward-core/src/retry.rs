// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bounded exponential-backoff retries for idempotent remote calls.
//!
//! Only wrap calls that are safe to repeat (get, create-or-update, cancel).
//! A plain "create" must never go through [`RetryExecutor`].

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::error::ApiError;
use crate::metrics::{Metric, MetricClient, NoopMetricClient};

/// Retry policy for remote calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of calls, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Create a policy.
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to wait after failed call number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .saturating_mul(multiplier)
            .min(self.max_delay)
    }
}

/// Executes remote calls under a [`RetryPolicy`].
#[derive(Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    metrics: Arc<dyn MetricClient>,
}

impl RetryExecutor {
    /// Create an executor that reports retries to `metrics`.
    pub fn new(policy: RetryPolicy, metrics: Arc<dyn MetricClient>) -> Self {
        Self { policy, metrics }
    }

    /// The active policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Same metrics sink, different policy.
    pub fn with_policy(&self, policy: RetryPolicy) -> Self {
        Self {
            policy,
            metrics: self.metrics.clone(),
        }
    }

    /// Run `call`, retrying while `is_transient` classifies the error as transient.
    ///
    /// `call` must build a fresh future per attempt. Non-transient errors are
    /// returned after the first failure; transient ones after `max_attempts` calls.
    pub async fn with_retries<T, E, F, Fut, C>(
        &self,
        operation: &str,
        mut call: F,
        is_transient: C,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> bool,
        E: Display,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < max_attempts && is_transient(&e) => {
                    let delay = self.policy.delay_for_attempt(attempt);
                    warn!(
                        operation,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    self.metrics
                        .count(Metric::ApiRetryAttempt, 1, &[("operation", operation)]);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// [`with_retries`](Self::with_retries) using [`ApiError::is_transient`].
    pub async fn with_api_retries<T, F, Fut>(&self, operation: &str, call: F) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        self.with_retries(operation, call, ApiError::is_transient)
            .await
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryPolicy::default(), Arc::new(NoopMetricClient))
    }
}

impl std::fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::RecordingMetricClient;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn executor(max_attempts: u32) -> (RetryExecutor, Arc<RecordingMetricClient>) {
        let metrics = Arc::new(RecordingMetricClient::new());
        let policy = RetryPolicy::new(
            max_attempts,
            Duration::from_millis(100),
            Duration::from_millis(250),
        );
        (RetryExecutor::new(policy, metrics.clone()), metrics)
    }

    #[test]
    fn test_delay_doubles_up_to_cap() {
        let policy = RetryPolicy::new(10, Duration::from_millis(100), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(800));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(64), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_error_retried_until_max_attempts() {
        let (executor, metrics) = executor(3);
        let calls = AtomicU32::new(0);

        let result: Result<(), ApiError> = executor
            .with_api_retries("get_state", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ApiError::Unavailable("503".into()))
            })
            .await;

        assert!(matches!(result, Err(ApiError::Unavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(metrics.total(Metric::ApiRetryAttempt), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_transient_error_not_retried() {
        let (executor, metrics) = executor(5);
        let calls = AtomicU32::new(0);

        let result: Result<(), ApiError> = executor
            .with_api_retries("get_state", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ApiError::NotFound("connection".into()))
            })
            .await;

        assert!(matches!(result, Err(ApiError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.total(Metric::ApiRetryAttempt), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let (executor, _) = executor(5);
        let calls = AtomicU32::new(0);
        let start = tokio::time::Instant::now();

        let value = executor
            .with_api_retries("get_state", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ApiError::Unavailable("503".into()))
                } else {
                    Ok(42)
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 42);
        // 100ms + 200ms of backoff
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_custom_classification() {
        let (executor, _) = executor(2);
        let calls = AtomicU32::new(0);

        let result: Result<(), String> = executor
            .with_retries(
                "anything",
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("boom".to_string())
                },
                |_| false,
            )
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
