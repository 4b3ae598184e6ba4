// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Submit a sync workload and poll it to a terminal status.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::api::{DocumentStore, WorkloadApi};
use super::types::{CreateOutcome, SyncWorkloadInput, WorkloadResult, WorkloadStatus};
use crate::error::WorkloadError;
use crate::metrics::{Metric, MetricClient, NoopMetricClient};
use crate::retry::RetryExecutor;

const CANCEL_SOURCE: &str = "syncward";

/// Configuration for [`WorkloadPoller`].
#[derive(Debug, Clone)]
pub struct WorkloadPollerConfig {
    /// Delay between status fetches.
    pub poll_interval: Duration,
    /// How often to log while the status does not change.
    pub status_log_interval: Duration,
    /// Expected heartbeat rate of a running workload.
    pub heartbeat_rate: Duration,
    /// Output fetch cutoff, in heartbeats.
    pub output_fetch_cutoff_heartbeats: u32,
    /// Delay between output document reads.
    pub output_poll_interval: Duration,
}

impl Default for WorkloadPollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            status_log_interval: Duration::from_secs(600),
            heartbeat_rate: Duration::from_secs(60),
            output_fetch_cutoff_heartbeats: 5,
            output_poll_interval: Duration::from_secs(1),
        }
    }
}

impl WorkloadPollerConfig {
    /// How long to wait for the output document after a terminal status.
    pub fn output_fetch_cutoff(&self) -> Duration {
        self.heartbeat_rate
            .saturating_mul(self.output_fetch_cutoff_heartbeats)
    }
}

/// Location of the output document of an attempt.
pub fn output_document_key(job_id: i64, attempt_number: u32) -> String {
    format!("job-output/{job_id}/{attempt_number}")
}

/// Runs a sync attempt as a remote workload.
///
/// No overall deadline is enforced here; the hosting context owns it and
/// stops polling through the cancellation token.
pub struct WorkloadPoller {
    api: Arc<dyn WorkloadApi>,
    documents: Arc<dyn DocumentStore>,
    config: WorkloadPollerConfig,
    executor: RetryExecutor,
    metrics: Arc<dyn MetricClient>,
    submitted: Mutex<Option<String>>,
}

impl WorkloadPoller {
    /// Create a poller.
    pub fn new(
        api: Arc<dyn WorkloadApi>,
        documents: Arc<dyn DocumentStore>,
        mut config: WorkloadPollerConfig,
    ) -> Self {
        let defaults = WorkloadPollerConfig::default();
        if config.poll_interval.is_zero() {
            warn!("Workload poll interval must be non-zero, using the default");
            config.poll_interval = defaults.poll_interval;
        }
        if config.output_poll_interval.is_zero() {
            warn!("Output poll interval must be non-zero, using the default");
            config.output_poll_interval = defaults.output_poll_interval;
        }
        Self {
            api,
            documents,
            config,
            executor: RetryExecutor::default(),
            metrics: Arc::new(NoopMetricClient),
            submitted: Mutex::new(None),
        }
    }

    /// Retry idempotent calls (get, cancel) with `executor`.
    pub fn with_executor(mut self, executor: RetryExecutor) -> Self {
        self.executor = executor;
        self
    }

    /// Report to `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricClient>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Id of the submitted workload, if any.
    pub fn submitted_workload_id(&self) -> Option<String> {
        self.submitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Submit the workload for `input`, wait for a terminal status and fetch its output.
    ///
    /// Cancelling `token` while polling cancels the workload and returns
    /// [`WorkloadError::Interrupted`].
    #[instrument(skip_all, fields(workload_id = %input.workload_id()))]
    pub async fn run(
        &self,
        input: &SyncWorkloadInput,
        token: &CancellationToken,
    ) -> Result<WorkloadResult, WorkloadError> {
        let request = input.to_create_request();
        let workload_id = request.workload_id.clone();

        // Not idempotent, never retried.
        match self.api.create(&request).await? {
            CreateOutcome::Created => info!("Workload created"),
            CreateOutcome::AlreadyExists => {
                info!("Workload already exists, resuming polling");
                self.metrics.count(Metric::WorkloadAlreadyExists, 1, &[]);
            }
        }
        *self.submitted.lock().unwrap_or_else(PoisonError::into_inner) = Some(workload_id.clone());

        let status = self.wait_for_terminal(&workload_id, token).await?;
        let output = self.fetch_output(input.job_id, input.attempt_number).await?;

        Ok(WorkloadResult {
            workload_id,
            status,
            output,
        })
    }

    /// Best-effort cancellation of the submitted workload; no-op before submission.
    pub async fn cancel(&self, reason: &str) -> Result<(), WorkloadError> {
        let Some(workload_id) = self.submitted_workload_id() else {
            debug!("No workload submitted, nothing to cancel");
            return Ok(());
        };

        info!(workload_id = %workload_id, reason, "Cancelling workload");
        let api = &self.api;
        self.executor
            .with_api_retries("cancel_workload", || {
                api.cancel(&workload_id, reason, CANCEL_SOURCE)
            })
            .await?;
        Ok(())
    }

    async fn wait_for_terminal(
        &self,
        workload_id: &str,
        token: &CancellationToken,
    ) -> Result<WorkloadStatus, WorkloadError> {
        let api = &self.api;
        let mut last_status: Option<WorkloadStatus> = None;
        let mut last_logged = Instant::now();

        loop {
            let workload = tokio::select! {
                biased;

                _ = token.cancelled() => return Err(self.interrupt(workload_id).await),

                fetched = self.executor.with_api_retries("get_workload", || api.get(workload_id)) => fetched?,
            };

            if last_status != Some(workload.status) {
                info!(
                    status = %workload.status,
                    previous = ?last_status,
                    "Workload status changed"
                );
                last_status = Some(workload.status);
                last_logged = Instant::now();
            } else if last_logged.elapsed() >= self.config.status_log_interval {
                info!(
                    status = %workload.status,
                    last_heartbeat_at = ?workload.last_heartbeat_at,
                    "Workload still in progress"
                );
                last_logged = Instant::now();
            }

            if workload.status.is_terminal() {
                return Ok(workload.status);
            }

            tokio::select! {
                biased;

                _ = token.cancelled() => return Err(self.interrupt(workload_id).await),

                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    async fn interrupt(&self, workload_id: &str) -> WorkloadError {
        if let Err(e) = self.cancel("attempt cancelled").await {
            warn!(error = %e, "Failed to cancel workload");
        }
        WorkloadError::Interrupted {
            workload_id: workload_id.to_string(),
        }
    }

    async fn fetch_output(
        &self,
        job_id: i64,
        attempt_number: u32,
    ) -> Result<Option<serde_json::Value>, WorkloadError> {
        let key = output_document_key(job_id, attempt_number);
        let cutoff = self.config.output_fetch_cutoff();
        let deadline = Instant::now() + cutoff;

        loop {
            match self.documents.read(&key).await {
                Ok(Some(bytes)) => {
                    let output = serde_json::from_slice(&bytes)
                        .map_err(|e| WorkloadError::Decode(e.to_string()))?;
                    return Ok(Some(output));
                }
                Ok(None) => {}
                Err(e) => warn!(key = %key, error = %e, "Failed to read workload output"),
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(
                    key = %key,
                    cutoff_secs = cutoff.as_secs(),
                    "Workload output not found within cutoff"
                );
                self.metrics.count(Metric::WorkloadOutputMissing, 1, &[]);
                return Ok(None);
            }
            tokio::time::sleep(self.config.output_poll_interval.min(deadline - now)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_cutoff_scales_with_heartbeats() {
        let config = WorkloadPollerConfig {
            heartbeat_rate: Duration::from_secs(30),
            output_fetch_cutoff_heartbeats: 4,
            ..WorkloadPollerConfig::default()
        };
        assert_eq!(config.output_fetch_cutoff(), Duration::from_secs(120));
    }

    #[test]
    fn test_output_document_key() {
        assert_eq!(output_document_key(12, 3), "job-output/12/3");
    }
}
