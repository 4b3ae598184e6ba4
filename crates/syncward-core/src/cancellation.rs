// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bridge between an orchestrator's cancellation signal and a running attempt.
//!
//! A [`CancellationBridge`] periodically probes its host for cancellation and
//! runs a cleanup callback when the attempt must stop. Ambiguous completion
//! errors are classified by [`TaskClass`]:
//!
//! | Probe result | `TaskClass::Sync` | `TaskClass::Other` |
//! |--------------|-------------------|--------------------|
//! | cancelled / timed out | cleanup | cleanup |
//! | completion error | retryable error, no cleanup | cleanup |
//!
//! An ambiguous signal never tears down a sync attempt.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::BridgeError;
use crate::metrics::{Metric, MetricClient, NoopMetricClient};

/// Class of the task hosting a bridge, fixed at registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskClass {
    /// A data-replication attempt.
    Sync,
    /// Any other task (check, discover, spec, ...).
    Other,
}

/// Failure reported by a cancellation probe.
#[derive(Debug, Clone, Error)]
pub enum ProbeError {
    /// The orchestrator requested cancellation.
    #[error("task {task_id} was cancelled")]
    Cancelled {
        /// Task identifier
        task_id: String,
    },

    /// The orchestrator gave up on the task.
    #[error("task {task_id} timed out")]
    TimedOut {
        /// Task identifier
        task_id: String,
    },

    /// The probe call itself failed without a cancellation signal.
    #[error("completion error for task {task_id}: {message}")]
    Completion {
        /// Task identifier
        task_id: String,
        /// Error message
        message: String,
    },
}

/// Asks the hosting execution context whether cancellation was requested.
#[async_trait]
pub trait CancellationProbe: Send + Sync {
    /// Returns `Ok(())` when the task should keep running.
    async fn probe(&self) -> Result<(), ProbeError>;
}

/// Result of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// No cancellation requested.
    Alive,
    /// The task was cancelled and cleanup has run.
    Cancelled,
    /// The task timed out and cleanup has run.
    TimedOut,
}

type Cleanup = Box<dyn FnOnce() + Send>;

/// Periodic cancellation probe with an at-most-once cleanup callback.
pub struct CancellationBridge {
    task_id: String,
    class: TaskClass,
    probe: Arc<dyn CancellationProbe>,
    cleanup: Mutex<Option<Cleanup>>,
    metrics: Arc<dyn MetricClient>,
}

impl CancellationBridge {
    /// Create a bridge for `task_id`. `cleanup` runs at most once.
    pub fn new<F>(
        task_id: impl Into<String>,
        class: TaskClass,
        probe: Arc<dyn CancellationProbe>,
        cleanup: F,
    ) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            task_id: task_id.into(),
            class,
            probe,
            cleanup: Mutex::new(Some(Box::new(cleanup))),
            metrics: Arc::new(NoopMetricClient),
        }
    }

    /// Report cleanups to `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricClient>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Identifier of the bridged task.
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Whether cleanup has already run.
    pub fn has_cleaned_up(&self) -> bool {
        self.cleanup
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Probe once and act on the result.
    pub async fn check(&self) -> Result<ProbeOutcome, BridgeError> {
        match self.probe.probe().await {
            Ok(()) => Ok(ProbeOutcome::Alive),
            Err(ProbeError::Cancelled { .. }) => {
                self.fire_cleanup("cancelled");
                Ok(ProbeOutcome::Cancelled)
            }
            Err(ProbeError::TimedOut { .. }) => {
                self.fire_cleanup("timed_out");
                Ok(ProbeOutcome::TimedOut)
            }
            Err(ProbeError::Completion { task_id, message }) => match self.class {
                TaskClass::Sync => Err(BridgeError::Retryable { task_id, message }),
                TaskClass::Other => {
                    warn!(
                        task_id = %task_id,
                        error = %message,
                        "Completion error on non-sync task, cleaning up"
                    );
                    self.fire_cleanup("completion_error");
                    Ok(ProbeOutcome::Cancelled)
                }
            },
        }
    }

    /// Probe every `interval` until cleanup has run or `stop` is cancelled.
    ///
    /// Returns [`ProbeOutcome::Alive`] when stopped without cancellation.
    pub async fn run(&self, interval: Duration, stop: CancellationToken) -> ProbeOutcome {
        debug!(task_id = %self.task_id, interval_ms = interval.as_millis() as u64, "Cancellation bridge started");

        loop {
            tokio::select! {
                biased;

                _ = stop.cancelled() => return ProbeOutcome::Alive,

                _ = tokio::time::sleep(interval) => {}
            }

            match self.check().await {
                Ok(ProbeOutcome::Alive) => {}
                Ok(outcome) => return outcome,
                Err(e) => warn!(task_id = %self.task_id, error = %e, "Cancellation probe failed, retrying"),
            }
        }
    }

    fn fire_cleanup(&self, reason: &'static str) {
        let cleanup = self
            .cleanup
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match cleanup {
            Some(cleanup) => {
                info!(task_id = %self.task_id, reason, "Running cancellation cleanup");
                self.metrics
                    .count(Metric::CancellationCleanup, 1, &[("reason", reason)]);
                cleanup();
            }
            None => debug!(task_id = %self.task_id, reason, "Cancellation cleanup already ran"),
        }
    }
}

/// Probe backed by an orchestrator-held [`CancellationToken`].
///
/// Reports [`ProbeError::TimedOut`] once an optional deadline has passed.
pub struct TokenProbe {
    task_id: String,
    token: CancellationToken,
    deadline: Option<Instant>,
    reported: AtomicBool,
}

impl TokenProbe {
    /// Probe that reports cancellation of `token`.
    pub fn new(task_id: impl Into<String>, token: CancellationToken) -> Self {
        Self {
            task_id: task_id.into(),
            token,
            deadline: None,
            reported: AtomicBool::new(false),
        }
    }

    /// Also report a timeout once `deadline` has passed.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Whether the probe has reported a cancellation or timeout.
    pub fn has_reported(&self) -> bool {
        self.reported.load(Ordering::Acquire)
    }
}

#[async_trait]
impl CancellationProbe for TokenProbe {
    async fn probe(&self) -> Result<(), ProbeError> {
        let task_id = self.task_id.clone();
        let result = if self.token.is_cancelled() {
            Err(ProbeError::Cancelled { task_id })
        } else if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            Err(ProbeError::TimedOut { task_id })
        } else {
            Ok(())
        };

        if result.is_err() {
            self.reported.store(true, Ordering::Release);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ScriptedProbe;
    use std::sync::atomic::AtomicU32;

    fn counting_bridge(
        class: TaskClass,
        probe: Arc<dyn CancellationProbe>,
    ) -> (CancellationBridge, Arc<AtomicU32>) {
        let cleanups = Arc::new(AtomicU32::new(0));
        let counter = cleanups.clone();
        let bridge = CancellationBridge::new("task-1", class, probe, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (bridge, cleanups)
    }

    fn completion_error() -> ProbeError {
        ProbeError::Completion {
            task_id: "task-1".into(),
            message: "heartbeat rpc failed".into(),
        }
    }

    #[tokio::test]
    async fn test_completion_error_on_sync_task_is_retryable() {
        let probe = Arc::new(ScriptedProbe::new(vec![Err(completion_error())]));
        let (bridge, cleanups) = counting_bridge(TaskClass::Sync, probe);

        let result = bridge.check().await;

        assert!(matches!(result, Err(BridgeError::Retryable { .. })));
        assert_eq!(cleanups.load(Ordering::SeqCst), 0);
        assert!(!bridge.has_cleaned_up());
    }

    #[tokio::test]
    async fn test_completion_error_on_other_task_cleans_up() {
        let probe = Arc::new(ScriptedProbe::new(vec![Err(completion_error())]));
        let (bridge, cleanups) = counting_bridge(TaskClass::Other, probe);

        let outcome = bridge.check().await.unwrap();

        assert_eq!(outcome, ProbeOutcome::Cancelled);
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_cleans_up_for_both_classes() {
        for class in [TaskClass::Sync, TaskClass::Other] {
            let probe = Arc::new(ScriptedProbe::new(vec![Err(ProbeError::TimedOut {
                task_id: "task-1".into(),
            })]));
            let (bridge, cleanups) = counting_bridge(class, probe);

            assert_eq!(bridge.check().await.unwrap(), ProbeOutcome::TimedOut);
            assert_eq!(cleanups.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn test_token_probe_reports_cancellation() {
        let token = CancellationToken::new();
        let probe = TokenProbe::new("sync-1", token.clone());

        assert!(probe.probe().await.is_ok());
        token.cancel();
        assert!(matches!(probe.probe().await, Err(ProbeError::Cancelled { .. })));
        assert!(probe.has_reported());
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_probe_reports_deadline() {
        let probe = TokenProbe::new("sync-1", CancellationToken::new())
            .with_deadline(Instant::now() + Duration::from_secs(5));

        assert!(probe.probe().await.is_ok());
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(matches!(probe.probe().await, Err(ProbeError::TimedOut { .. })));
    }
}
