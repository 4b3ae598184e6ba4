// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wiring of a single sync attempt.
//!
//! ```text
//!                       attempt token
//!          ┌──────────────────┼───────────────────┐
//!          │ cancels          │ cancels           │ observes
//!   ┌──────┴───────┐  ┌───────┴────────┐  ┌───────┴────────┐
//!   │ Cancellation │  │   Heartbeat    │  │   sync work    │──► heartbeat.beat()
//!   │    bridge    │  │   chaperone    │  │ (or workload   │──► state.persist()
//!   └──────────────┘  └────────────────┘  │    poller)     │
//!                                         └────────────────┘
//! ```
//!
//! Whatever ends the attempt, the state store is closed before returning.

use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::cancellation::{CancellationBridge, CancellationProbe, ProbeOutcome, TaskClass};
use crate::config::RuntimeConfig;
use crate::error::{AttemptError, ChaperoneError, WorkloadError};
use crate::heartbeat::{HeartbeatMonitor, HeartbeatTimeoutChaperone};
use crate::metrics::{MetricClient, NoopMetricClient};
use crate::state::StateCheckpointStore;
use crate::workload::{SyncWorkloadInput, WorkloadPoller, WorkloadResult};

/// How an attempt ended, when it did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome<T> {
    /// The work ran to completion.
    Completed(T),
    /// The orchestrator cancelled the attempt.
    Cancelled,
    /// The producer went stale, or the orchestrator timed the attempt out.
    TimedOut,
}

/// Handles available to the sync work.
#[derive(Clone)]
pub struct AttemptContext {
    /// Call `beat()` for every message read from the source.
    pub heartbeat: Arc<HeartbeatMonitor>,
    /// Persist state messages here.
    pub state: StateCheckpointStore,
    /// Cancelled when the attempt must stop.
    pub token: CancellationToken,
}

/// Builder for [`SyncAttempt`].
pub struct SyncAttemptBuilder {
    config: RuntimeConfig,
    state: StateCheckpointStore,
    probe: Option<(String, TaskClass, Arc<dyn CancellationProbe>)>,
    metrics: Arc<dyn MetricClient>,
}

impl SyncAttemptBuilder {
    /// Watch `probe` for cancellation of task `task_id`.
    pub fn cancellation_probe(
        mut self,
        task_id: impl Into<String>,
        class: TaskClass,
        probe: Arc<dyn CancellationProbe>,
    ) -> Self {
        self.probe = Some((task_id.into(), class, probe));
        self
    }

    /// Report to `metrics`.
    pub fn metrics(mut self, metrics: Arc<dyn MetricClient>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Build the attempt.
    pub fn build(self) -> SyncAttempt {
        let token = CancellationToken::new();
        let bridge = self.probe.map(|(task_id, class, probe)| {
            let cleanup_token = token.clone();
            Arc::new(
                CancellationBridge::new(task_id, class, probe, move || cleanup_token.cancel())
                    .with_metrics(self.metrics.clone()),
            )
        });

        SyncAttempt {
            config: self.config,
            state: self.state,
            bridge,
            metrics: self.metrics,
            heartbeat: Arc::new(HeartbeatMonitor::new()),
            token,
        }
    }
}

/// One sync attempt with liveness, cancellation and checkpointing wired together.
pub struct SyncAttempt {
    config: RuntimeConfig,
    state: StateCheckpointStore,
    bridge: Option<Arc<CancellationBridge>>,
    metrics: Arc<dyn MetricClient>,
    heartbeat: Arc<HeartbeatMonitor>,
    token: CancellationToken,
}

impl SyncAttempt {
    /// Start building an attempt that checkpoints into `state`.
    pub fn builder(config: RuntimeConfig, state: StateCheckpointStore) -> SyncAttemptBuilder {
        SyncAttemptBuilder {
            config,
            state,
            probe: None,
            metrics: Arc::new(NoopMetricClient),
        }
    }

    /// Token cancelled when the attempt must stop.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Run `work` in-process under the heartbeat chaperone.
    ///
    /// `work` should stop promptly once the context token is cancelled; it is
    /// dropped if it does not.
    #[instrument(skip_all)]
    pub async fn run<T, W, Fut>(self, work: W) -> Result<AttemptOutcome<T>, AttemptError>
    where
        W: FnOnce(AttemptContext) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let context = AttemptContext {
            heartbeat: self.heartbeat.clone(),
            state: self.state.clone(),
            token: self.token.clone(),
        };
        let (stop_bridge, bridge_task) = self.spawn_bridge();

        let chaperone = HeartbeatTimeoutChaperone::new(
            self.heartbeat.clone(),
            self.config.chaperone_config(),
        )
        .with_metrics(self.metrics.clone());
        let timeout_token = self.token.clone();
        let token = self.token.clone();

        let result = chaperone
            .run_with_timeout(
                async move {
                    tokio::select! {
                        biased;

                        _ = token.cancelled() => None,

                        output = work(context) => Some(output),
                    }
                },
                move || timeout_token.cancel(),
            )
            .await;

        let bridge_outcome = Self::stop_bridge(stop_bridge, bridge_task).await;
        let outcome = match result {
            Err(ChaperoneError::HeartbeatTimeout { .. }) => Ok(AttemptOutcome::TimedOut),
            Ok(None) => Ok(Self::interrupted(bridge_outcome)),
            Ok(Some(Ok(value))) => Ok(AttemptOutcome::Completed(value)),
            Ok(Some(Err(e))) => Err(AttemptError::Work(e)),
        };

        self.finish(&outcome).await;
        outcome
    }

    /// Run the attempt as a remote workload polled by `poller`.
    ///
    /// Cancellation of the attempt cancels the workload.
    #[instrument(skip_all, fields(workload_id = %input.workload_id()))]
    pub async fn run_remote(
        self,
        poller: &WorkloadPoller,
        input: &SyncWorkloadInput,
    ) -> Result<AttemptOutcome<WorkloadResult>, AttemptError> {
        let (stop_bridge, bridge_task) = self.spawn_bridge();

        let result = poller.run(input, &self.token).await;

        let bridge_outcome = Self::stop_bridge(stop_bridge, bridge_task).await;
        let outcome = match result {
            Ok(result) => Ok(AttemptOutcome::Completed(result)),
            Err(WorkloadError::Interrupted { .. }) => Ok(Self::interrupted(bridge_outcome)),
            Err(e) => Err(AttemptError::Workload(e)),
        };

        self.finish(&outcome).await;
        outcome
    }

    fn spawn_bridge(&self) -> (CancellationToken, Option<JoinHandle<ProbeOutcome>>) {
        let stop = CancellationToken::new();
        let task = self.bridge.clone().map(|bridge| {
            let interval = self.config.cancellation_check_interval;
            let stop = stop.clone();
            tokio::spawn(async move { bridge.run(interval, stop).await })
        });
        (stop, task)
    }

    async fn stop_bridge(
        stop: CancellationToken,
        task: Option<JoinHandle<ProbeOutcome>>,
    ) -> ProbeOutcome {
        stop.cancel();
        match task {
            Some(task) => task.await.unwrap_or_else(|e| {
                warn!(error = %e, "Cancellation bridge task failed");
                ProbeOutcome::Alive
            }),
            None => ProbeOutcome::Alive,
        }
    }

    fn interrupted<T>(bridge_outcome: ProbeOutcome) -> AttemptOutcome<T> {
        match bridge_outcome {
            ProbeOutcome::TimedOut => AttemptOutcome::TimedOut,
            ProbeOutcome::Alive | ProbeOutcome::Cancelled => AttemptOutcome::Cancelled,
        }
    }

    async fn finish<T>(&self, outcome: &Result<AttemptOutcome<T>, AttemptError>) {
        self.token.cancel();
        let close = self.state.close().await;

        match outcome {
            Ok(AttemptOutcome::Completed(_)) => info!(close = ?close, "Sync attempt completed"),
            Ok(AttemptOutcome::Cancelled) => info!(close = ?close, "Sync attempt cancelled"),
            Ok(AttemptOutcome::TimedOut) => warn!(close = ?close, "Sync attempt timed out"),
            Err(e) => warn!(close = ?close, error = %e, "Sync attempt failed"),
        }
    }
}
