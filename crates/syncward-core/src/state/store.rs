// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Buffered, periodically flushed state checkpoints.
//!
//! # Lifecycle
//!
//! ```text
//! persist() ──► first call: remote state check ──┬─► scheduler running (flush every period)
//!                                                 │
//!                                                 └─► remote LEGACY + new format:
//!                                                     wait for set_configured_catalog()
//!                                                     then scheduler running
//! close() ──► stop scheduler ──► wait (grace) ──► final flush (one retry) ──► stats
//! ```
//!
//! `persist()` only touches the in-memory buffer once the first remote check
//! has succeeded. Flushes (scheduled, explicit or final) are serialized by the
//! flush lock, which also owns the carry of state a previous flush failed to
//! write.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::aggregator::StateAggregator;
use super::api::{AttemptApi, StateApi};
use super::stats::{SaveStatsRequest, SyncStatsTracker};
use super::types::{ConfiguredCatalog, ConnectionStateType, StateMessage, StateType};
use crate::error::{ApiError, Result, StateError};
use crate::metrics::{Metric, MetricClient, NoopMetricClient};
use crate::retry::{RetryExecutor, RetryPolicy};

/// Configuration for [`StateCheckpointStore`].
#[derive(Debug, Clone)]
pub struct StateStoreConfig {
    /// Period of the scheduled flush.
    pub flush_period: Duration,
    /// How long `close()` waits for an in-flight flush.
    pub close_grace: Duration,
}

impl Default for StateStoreConfig {
    fn default() -> Self {
        Self {
            flush_period: Duration::from_secs(10),
            close_grace: Duration::from_secs(60),
        }
    }
}

/// Job and attempt the buffered state belongs to, used for stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobContext {
    /// Job id
    pub job_id: i64,
    /// Attempt number
    pub attempt_number: u32,
}

/// Result of [`StateCheckpointStore::close`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// No state was pending.
    NothingToFlush,
    /// Pending state was written.
    Flushed,
    /// An in-flight flush did not finish in time; the final flush was skipped.
    Abandoned,
    /// The final flush failed; pending state was not written.
    Failed,
}

#[derive(Debug, Default)]
struct Buffer {
    connection_id: Option<Uuid>,
    state_type: Option<StateType>,
    pending: StateAggregator,
}

#[derive(Debug, Default)]
struct FlushState {
    carry: StateAggregator,
    pending_stats: Option<SaveStatsRequest>,
}

enum Scheduler {
    NotStarted,
    AwaitingCatalog,
    Running(JoinHandle<()>),
    Closed,
}

struct Inner {
    config: StateStoreConfig,
    state_api: Arc<dyn StateApi>,
    attempt_api: Option<(Arc<dyn AttemptApi>, JobContext)>,
    executor: RetryExecutor,
    metrics: Arc<dyn MetricClient>,
    buffer: Mutex<Buffer>,
    catalog: Mutex<Option<ConfiguredCatalog>>,
    flush: tokio::sync::Mutex<FlushState>,
    scheduler: tokio::sync::Mutex<Scheduler>,
    /// Set once the first remote state check has decided how to flush.
    scheduling_decided: AtomicBool,
    /// Remote state is legacy and buffered state is not.
    migrating: AtomicBool,
    stats: SyncStatsTracker,
    shutdown: CancellationToken,
}

/// Builder for [`StateCheckpointStore`].
pub struct StateStoreBuilder {
    state_api: Arc<dyn StateApi>,
    config: StateStoreConfig,
    retry_policy: RetryPolicy,
    metrics: Arc<dyn MetricClient>,
    attempt_api: Option<(Arc<dyn AttemptApi>, JobContext)>,
}

impl StateStoreBuilder {
    /// Set the flush configuration.
    pub fn config(mut self, config: StateStoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the retry policy for state API calls.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Set the metrics sink.
    pub fn metrics(mut self, metrics: Arc<dyn MetricClient>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Persist sync stats of `job` through `attempt_api` alongside state.
    pub fn attempt_stats(mut self, attempt_api: Arc<dyn AttemptApi>, job: JobContext) -> Self {
        self.attempt_api = Some((attempt_api, job));
        self
    }

    /// Build the store. No background task runs until the first `persist()`.
    pub fn build(self) -> StateCheckpointStore {
        let mut config = self.config;
        if config.flush_period.is_zero() {
            warn!("State flush period must be non-zero, using the default");
            config.flush_period = StateStoreConfig::default().flush_period;
        }

        let executor = RetryExecutor::new(self.retry_policy, self.metrics.clone());
        StateCheckpointStore {
            inner: Arc::new(Inner {
                config,
                state_api: self.state_api,
                attempt_api: self.attempt_api,
                executor,
                metrics: self.metrics,
                buffer: Mutex::new(Buffer::default()),
                catalog: Mutex::new(None),
                flush: tokio::sync::Mutex::new(FlushState::default()),
                scheduler: tokio::sync::Mutex::new(Scheduler::NotStarted),
                scheduling_decided: AtomicBool::new(false),
                migrating: AtomicBool::new(false),
                stats: SyncStatsTracker::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }
}

/// Buffers state messages of one connection and persists them asynchronously.
///
/// Cloning is cheap; clones share the same buffer and scheduler.
#[derive(Clone)]
pub struct StateCheckpointStore {
    inner: Arc<Inner>,
}

impl StateCheckpointStore {
    /// Start building a store that persists through `state_api`.
    pub fn builder(state_api: Arc<dyn StateApi>) -> StateStoreBuilder {
        StateStoreBuilder {
            state_api,
            config: StateStoreConfig::default(),
            retry_policy: RetryPolicy::default(),
            metrics: Arc::new(NoopMetricClient),
            attempt_api: None,
        }
    }

    /// Buffer `message` for `connection_id`.
    ///
    /// Fails if the store is bound to another connection or already buffers
    /// state of another type. The first successful call checks the remote
    /// state and starts the flush scheduler (or waits for the catalog during a
    /// legacy migration); after that no call awaits network I/O.
    pub async fn persist(&self, connection_id: Uuid, message: StateMessage) -> Result<()> {
        let incoming = message.state_type();
        self.inner.buffer_message(connection_id, message)?;

        if !self.inner.scheduling_decided.load(Ordering::Acquire) {
            self.decide_scheduling(connection_id, incoming).await;
        }
        Ok(())
    }

    /// Provide the catalog needed to flush state migrated from the legacy format.
    ///
    /// When the store is waiting for it, the scheduler starts with an immediate flush.
    pub async fn set_configured_catalog(&self, catalog: ConfiguredCatalog) {
        *lock(&self.inner.catalog) = Some(catalog);

        let mut scheduler = self.inner.scheduler.lock().await;
        if matches!(*scheduler, Scheduler::AwaitingCatalog) {
            info!("Configured catalog received, starting deferred state flush");
            *scheduler = Scheduler::Running(self.inner.clone().spawn_scheduler());
        }
    }

    /// Flush buffered and carried state now.
    ///
    /// Serialized with scheduled flushes. On failure the state stays in the carry.
    /// While a legacy migration waits for the catalog this is a no-op.
    pub async fn flush(&self) -> Result<()> {
        if matches!(*self.inner.scheduler.lock().await, Scheduler::AwaitingCatalog) {
            debug!("Skipping state flush until the configured catalog is set");
            return Ok(());
        }
        self.inner.flush_once().await
    }

    /// Stop the scheduler and make one final, best-effort flush.
    ///
    /// Never fails: the outcome only reports what happened.
    #[instrument(skip(self), fields(connection_id = ?self.inner.connection_id()))]
    pub async fn close(&self) -> CloseOutcome {
        let previous = {
            let mut scheduler = self.inner.scheduler.lock().await;
            std::mem::replace(&mut *scheduler, Scheduler::Closed)
        };
        self.inner.scheduling_decided.store(true, Ordering::Release);
        self.inner.shutdown.cancel();

        match previous {
            Scheduler::Closed => {
                debug!("State store already closed");
                return CloseOutcome::NothingToFlush;
            }
            Scheduler::Running(handle) => {
                match tokio::time::timeout(self.inner.config.close_grace, handle).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        error!(error = %e, "State flush task failed, skipping final flush");
                        self.inner.metrics.count(Metric::StateCommitNotAttempted, 1, &[]);
                        return CloseOutcome::Abandoned;
                    }
                    Err(_) => {
                        error!(
                            grace_secs = self.inner.config.close_grace.as_secs(),
                            "In-flight state flush did not finish in time, skipping final flush"
                        );
                        self.inner.metrics.count(Metric::StateCommitNotAttempted, 1, &[]);
                        return CloseOutcome::Abandoned;
                    }
                }
            }
            Scheduler::NotStarted | Scheduler::AwaitingCatalog => {}
        }

        self.inner.final_flush().await
    }

    /// Stats collected for this attempt.
    pub fn stats(&self) -> &SyncStatsTracker {
        &self.inner.stats
    }

    async fn decide_scheduling(&self, connection_id: Uuid, incoming: StateType) {
        let mut scheduler = self.inner.scheduler.lock().await;
        if !matches!(*scheduler, Scheduler::NotStarted) {
            return;
        }

        let api = &self.inner.state_api;
        let remote = match self
            .inner
            .executor
            .with_api_retries("get_state", || api.get_state(connection_id))
            .await
        {
            Ok(state) => state,
            Err(e) => {
                warn!(
                    connection_id = %connection_id,
                    error = %e,
                    "Failed to read persisted state type, will retry on next persist"
                );
                return;
            }
        };

        self.inner.scheduling_decided.store(true, Ordering::Release);

        if remote.state_type == ConnectionStateType::Legacy
            && !remote.is_state_empty()
            && incoming != StateType::Legacy
        {
            self.inner.migrating.store(true, Ordering::Release);
            if lock(&self.inner.catalog).is_none() {
                info!(
                    connection_id = %connection_id,
                    state_type = %incoming,
                    "Migrating from legacy state, deferring flush until catalog is set"
                );
                *scheduler = Scheduler::AwaitingCatalog;
                return;
            }
        }

        debug!(connection_id = %connection_id, "Starting state flush scheduler");
        *scheduler = Scheduler::Running(self.inner.clone().spawn_scheduler());
    }
}

impl Inner {
    fn connection_id(&self) -> Option<Uuid> {
        lock(&self.buffer).connection_id
    }

    fn buffer_message(&self, connection_id: Uuid, message: StateMessage) -> Result<()> {
        let mut buffer = lock(&self.buffer);

        match buffer.connection_id {
            Some(bound) if bound != connection_id => {
                return Err(StateError::ConnectionMismatch {
                    expected: bound.to_string(),
                    actual: connection_id.to_string(),
                });
            }
            Some(_) => {}
            None => buffer.connection_id = Some(connection_id),
        }

        let incoming = message.state_type();
        match buffer.state_type {
            Some(expected) if expected != incoming => {
                return Err(StateError::StateTypeMismatch {
                    expected,
                    actual: incoming,
                });
            }
            Some(_) => {}
            None => buffer.state_type = Some(incoming),
        }

        buffer.pending.ingest(message)?;
        self.metrics.count(Metric::StateBuffering, 1, &[]);
        Ok(())
    }

    fn spawn_scheduler(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.flush_period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;

                    _ = self.shutdown.cancelled() => break,

                    _ = ticker.tick() => {}
                }

                if let Err(e) = self.flush_once().await {
                    warn!(error = %e, "Scheduled state flush failed, state carried to next flush");
                }
            }

            debug!("State flush scheduler stopped");
        })
    }

    async fn flush_once(&self) -> Result<()> {
        let mut flush = self.flush.lock().await;
        self.prepare(&mut flush)?;

        let executor = &self.executor;
        self.write_state(&mut flush, executor, ApiError::is_transient)
            .await?;
        // Stats left over from an earlier failed save go out even without new state.
        self.write_stats(&mut flush, executor, ApiError::is_transient)
            .await;
        Ok(())
    }

    async fn final_flush(&self) -> CloseOutcome {
        // One retry of the underlying call, whatever the error.
        let executor = self.executor.with_policy(RetryPolicy {
            max_attempts: 2,
            ..self.executor.policy().clone()
        });
        let retry_any = |_: &ApiError| true;

        let mut flush = self.flush.lock().await;
        let outcome = match self.prepare(&mut flush) {
            Err(e) => {
                error!(error = %e, "Failed to prepare final state flush");
                CloseOutcome::Failed
            }
            Ok(()) if flush.carry.is_empty() => CloseOutcome::NothingToFlush,
            Ok(()) => match self.write_state(&mut flush, &executor, retry_any).await {
                Ok(()) => CloseOutcome::Flushed,
                Err(e) => {
                    error!(error = %e, "Final state flush failed, state not persisted");
                    CloseOutcome::Failed
                }
            },
        };

        match outcome {
            CloseOutcome::Failed => self.metrics.count(Metric::StateCommitNotAttempted, 1, &[]),
            _ => self.metrics.count(Metric::StateCommitCloseSuccessful, 1, &[]),
        }

        if flush.pending_stats.is_some() && !self.write_stats(&mut flush, &executor, retry_any).await {
            self.metrics.count(Metric::StatsCommitNotAttempted, 1, &[]);
        }

        info!(outcome = ?outcome, "State store closed");
        outcome
    }

    /// Move the buffer into the carry and snapshot stats for the outgoing payload.
    fn prepare(&self, flush: &mut FlushState) -> Result<()> {
        let fresh = lock(&self.buffer).pending.take();
        flush.carry.merge_newer(fresh)?;

        if !flush.carry.is_empty()
            && let Some((_, job)) = &self.attempt_api
            && let Some(snapshot) = self.stats.snapshot(job.job_id, job.attempt_number)
        {
            flush.pending_stats = Some(snapshot);
        }
        Ok(())
    }

    /// Write the carry, if any.
    async fn write_state<C>(
        &self,
        flush: &mut FlushState,
        executor: &RetryExecutor,
        is_transient: C,
    ) -> Result<()>
    where
        C: Fn(&ApiError) -> bool,
    {
        let Some(connection_id) = self.connection_id() else {
            return Ok(());
        };
        let Some(state) = flush.carry.to_connection_state(connection_id) else {
            return Ok(());
        };
        if self.migrating.load(Ordering::Acquire) {
            self.validate_migration(&flush.carry)?;
        }

        self.metrics.count(Metric::StateCommitAttempt, 1, &[]);
        let api = &self.state_api;
        match executor
            .with_retries(
                "create_or_update_state",
                || api.create_or_update_state(&state),
                is_transient,
            )
            .await
        {
            Ok(()) => {
                flush.carry = StateAggregator::Empty;
                self.migrating.store(false, Ordering::Release);
                self.metrics
                    .count(Metric::StateCommitAttemptSuccessful, 1, &[]);
                debug!(connection_id = %connection_id, "State flushed");
                Ok(())
            }
            Err(e) => {
                self.metrics.count(Metric::StateCommitAttemptFailed, 1, &[]);
                Err(e.into())
            }
        }
    }

    /// Write pending stats. Returns false if they remain pending.
    async fn write_stats<C>(&self, flush: &mut FlushState, executor: &RetryExecutor, is_transient: C) -> bool
    where
        C: Fn(&ApiError) -> bool,
    {
        let (Some((api, _)), Some(request)) = (&self.attempt_api, flush.pending_stats.take()) else {
            return true;
        };

        self.metrics.count(Metric::StatsCommitAttempt, 1, &[]);
        match executor
            .with_retries("save_stats", || api.save_stats(&request), is_transient)
            .await
        {
            Ok(()) => {
                self.metrics
                    .count(Metric::StatsCommitAttemptSuccessful, 1, &[]);
                true
            }
            Err(e) => {
                warn!(error = %e, "Failed to save sync stats, will retry on next flush");
                self.metrics.count(Metric::StatsCommitAttemptFailed, 1, &[]);
                flush.pending_stats = Some(request);
                false
            }
        }
    }

    /// Nothing replaces legacy state before the catalog is known, and every
    /// incremental stream must be present in per-stream state replacing it.
    fn validate_migration(&self, carry: &StateAggregator) -> Result<()> {
        let catalog = lock(&self.catalog);
        let catalog = catalog.as_ref().ok_or(StateError::MissingCatalog)?;
        let StateAggregator::Streams(streams) = carry else {
            return Ok(());
        };

        match catalog
            .incremental_streams()
            .find(|stream| !streams.contains_key(stream))
        {
            Some(missing) => Err(StateError::MigrationIncomplete {
                stream: missing.clone(),
            }),
            None => Ok(()),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
