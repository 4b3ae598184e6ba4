// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Counters emitted by the attempt runtime.
//!
//! Counters are for operational visibility only; nothing in the runtime
//! depends on a metric being recorded.

use std::collections::HashMap;

use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;

/// Every counter emitted by syncward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    /// A state message was buffered.
    StateBuffering,
    /// A state write to the persistence API was attempted.
    StateCommitAttempt,
    /// A state write succeeded.
    StateCommitAttemptSuccessful,
    /// A state write failed.
    StateCommitAttemptFailed,
    /// Pending state was left unpersisted at close.
    StateCommitNotAttempted,
    /// Close left no state unpersisted.
    StateCommitCloseSuccessful,
    /// A stats write was attempted.
    StatsCommitAttempt,
    /// A stats write succeeded.
    StatsCommitAttemptSuccessful,
    /// A stats write failed.
    StatsCommitAttemptFailed,
    /// Pending stats were left unpersisted at close.
    StatsCommitNotAttempted,
    /// A transient API failure was retried.
    ApiRetryAttempt,
    /// The chaperone interrupted a stale run.
    HeartbeatTimeout,
    /// The chaperone observed staleness without interrupting.
    HeartbeatTimeoutObserved,
    /// The cancellation bridge ran its cleanup callback.
    CancellationCleanup,
    /// A workload create returned "already exists".
    WorkloadAlreadyExists,
    /// Workload output was not found within the fetch cutoff.
    WorkloadOutputMissing,
}

impl Metric {
    /// All metrics, in declaration order.
    pub const ALL: [Metric; 16] = [
        Metric::StateBuffering,
        Metric::StateCommitAttempt,
        Metric::StateCommitAttemptSuccessful,
        Metric::StateCommitAttemptFailed,
        Metric::StateCommitNotAttempted,
        Metric::StateCommitCloseSuccessful,
        Metric::StatsCommitAttempt,
        Metric::StatsCommitAttemptSuccessful,
        Metric::StatsCommitAttemptFailed,
        Metric::StatsCommitNotAttempted,
        Metric::ApiRetryAttempt,
        Metric::HeartbeatTimeout,
        Metric::HeartbeatTimeoutObserved,
        Metric::CancellationCleanup,
        Metric::WorkloadAlreadyExists,
        Metric::WorkloadOutputMissing,
    ];

    /// Exported counter name.
    pub fn name(&self) -> &'static str {
        match self {
            Metric::StateBuffering => "syncward.state_buffering",
            Metric::StateCommitAttempt => "syncward.state_commit_attempt",
            Metric::StateCommitAttemptSuccessful => "syncward.state_commit_attempt_successful",
            Metric::StateCommitAttemptFailed => "syncward.state_commit_attempt_failed",
            Metric::StateCommitNotAttempted => "syncward.state_commit_not_attempted",
            Metric::StateCommitCloseSuccessful => "syncward.state_commit_close_successful",
            Metric::StatsCommitAttempt => "syncward.stats_commit_attempt",
            Metric::StatsCommitAttemptSuccessful => "syncward.stats_commit_attempt_successful",
            Metric::StatsCommitAttemptFailed => "syncward.stats_commit_attempt_failed",
            Metric::StatsCommitNotAttempted => "syncward.stats_commit_not_attempted",
            Metric::ApiRetryAttempt => "syncward.api_retry_attempt",
            Metric::HeartbeatTimeout => "syncward.heartbeat_timeout",
            Metric::HeartbeatTimeoutObserved => "syncward.heartbeat_timeout_observed",
            Metric::CancellationCleanup => "syncward.cancellation_cleanup",
            Metric::WorkloadAlreadyExists => "syncward.workload_already_exists",
            Metric::WorkloadOutputMissing => "syncward.workload_output_missing",
        }
    }
}

/// Counter sink.
pub trait MetricClient: Send + Sync {
    /// Add `value` to `metric`, tagged with `attributes`.
    fn count(&self, metric: Metric, value: u64, attributes: &[(&'static str, &str)]);
}

/// Metric client that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricClient;

impl MetricClient for NoopMetricClient {
    fn count(&self, _metric: Metric, _value: u64, _attributes: &[(&'static str, &str)]) {}
}

/// Metric client backed by the global OpenTelemetry meter provider.
///
/// Counters are created once at construction, so the global provider must be
/// installed before this client is built.
pub struct OtelMetricClient {
    counters: HashMap<Metric, Counter<u64>>,
}

impl OtelMetricClient {
    /// Build counters for every [`Metric`] on the `syncward` meter.
    pub fn new() -> Self {
        let meter = global::meter("syncward");
        let counters = Metric::ALL
            .iter()
            .map(|metric| (*metric, meter.u64_counter(metric.name()).build()))
            .collect();
        Self { counters }
    }
}

impl Default for OtelMetricClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricClient for OtelMetricClient {
    fn count(&self, metric: Metric, value: u64, attributes: &[(&'static str, &str)]) {
        if let Some(counter) = self.counters.get(&metric) {
            let attributes: Vec<KeyValue> = attributes
                .iter()
                .map(|(key, value)| KeyValue::new(*key, value.to_string()))
                .collect();
            counter.add(value, &attributes);
        }
    }
}
