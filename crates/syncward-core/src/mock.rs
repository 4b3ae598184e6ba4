// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory test doubles for every collaborator of the runtime.
//!
//! The doubles record the calls they receive and can be scripted to fail, so
//! flush, retry and polling behavior can be exercised without a server.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::cancellation::{CancellationProbe, ProbeError};
use crate::error::{ApiError, DocumentStoreError};
use crate::metrics::{Metric, MetricClient};
use crate::state::{AttemptApi, ConnectionState, SaveStatsRequest, StateApi};
use crate::workload::{
    CreateOutcome, DocumentStore, Workload, WorkloadApi, WorkloadCreateRequest, WorkloadStatus,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn scripted_failure(remaining: &AtomicU32) -> bool {
    remaining
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn server_error() -> ApiError {
    ApiError::Http {
        status: 500,
        message: "scripted failure".to_string(),
    }
}

/// Mock state persistence API.
#[derive(Default)]
pub struct MockStateApi {
    remote: Mutex<Option<ConnectionState>>,
    writes: Mutex<Vec<ConnectionState>>,
    write_attempts: AtomicU32,
    gets: AtomicU32,
    failing_gets: AtomicU32,
    failing_writes: AtomicU32,
    transient_writes: AtomicU32,
    write_delay: Mutex<Option<Duration>>,
}

impl MockStateApi {
    /// Create a mock with no persisted state.
    pub fn new() -> Self {
        Self::default()
    }

    /// State returned by `get_state`.
    pub fn set_remote_state(&self, state: ConnectionState) {
        *lock(&self.remote) = Some(state);
    }

    /// Fail the next `n` `get_state` calls with a non-transient error.
    pub fn fail_next_gets(&self, n: u32) {
        self.failing_gets.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` writes with a non-transient error.
    pub fn fail_next_writes(&self, n: u32) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` writes with [`ApiError::Unavailable`].
    pub fn fail_next_writes_transiently(&self, n: u32) {
        self.transient_writes.store(n, Ordering::SeqCst);
    }

    /// Delay every write by `delay`.
    pub fn set_write_delay(&self, delay: Duration) {
        *lock(&self.write_delay) = Some(delay);
    }

    /// Successful writes, oldest first.
    pub fn writes(&self) -> Vec<ConnectionState> {
        lock(&self.writes).clone()
    }

    /// Number of successful writes.
    pub fn write_count(&self) -> usize {
        lock(&self.writes).len()
    }

    /// Number of write calls, failed and in-flight ones included.
    pub fn write_attempts(&self) -> u32 {
        self.write_attempts.load(Ordering::SeqCst)
    }

    /// Number of `get_state` calls, failed ones included.
    pub fn get_count(&self) -> u32 {
        self.gets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StateApi for MockStateApi {
    async fn get_state(&self, connection_id: Uuid) -> Result<ConnectionState, ApiError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if scripted_failure(&self.failing_gets) {
            return Err(server_error());
        }
        Ok(lock(&self.remote)
            .clone()
            .unwrap_or_else(|| ConnectionState::not_set(connection_id)))
    }

    async fn create_or_update_state(&self, state: &ConnectionState) -> Result<(), ApiError> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        let delay = *lock(&self.write_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if scripted_failure(&self.transient_writes) {
            return Err(ApiError::Unavailable("scripted outage".to_string()));
        }
        if scripted_failure(&self.failing_writes) {
            return Err(server_error());
        }
        lock(&self.writes).push(state.clone());
        *lock(&self.remote) = Some(state.clone());
        Ok(())
    }
}

/// Mock attempt stats API.
#[derive(Default)]
pub struct MockAttemptApi {
    saved: Mutex<Vec<SaveStatsRequest>>,
    failing: AtomicU32,
}

impl MockAttemptApi {
    /// Create a mock that accepts every request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` saves with a non-transient error.
    pub fn fail_next(&self, n: u32) {
        self.failing.store(n, Ordering::SeqCst);
    }

    /// Successfully saved requests, oldest first.
    pub fn saved(&self) -> Vec<SaveStatsRequest> {
        lock(&self.saved).clone()
    }
}

#[async_trait]
impl AttemptApi for MockAttemptApi {
    async fn save_stats(&self, request: &SaveStatsRequest) -> Result<(), ApiError> {
        if scripted_failure(&self.failing) {
            return Err(server_error());
        }
        lock(&self.saved).push(request.clone());
        Ok(())
    }
}

/// Mock workload API.
///
/// `get` pops scripted statuses per workload; once the script is exhausted the
/// last status is repeated.
#[derive(Default)]
pub struct MockWorkloadApi {
    workloads: Mutex<HashMap<String, Workload>>,
    scripts: Mutex<HashMap<String, VecDeque<WorkloadStatus>>>,
    creates: Mutex<Vec<WorkloadCreateRequest>>,
    cancels: Mutex<Vec<(String, String)>>,
    gets: AtomicU32,
    transient_gets: AtomicU32,
}

impl MockWorkloadApi {
    /// Create a mock without workloads.
    pub fn new() -> Self {
        Self::default()
    }

    /// Statuses returned by successive `get` calls for `workload_id`.
    pub fn script_statuses(&self, workload_id: &str, statuses: Vec<WorkloadStatus>) {
        lock(&self.scripts).insert(workload_id.to_string(), statuses.into());
    }

    /// Fail the next `n` `get` calls with [`ApiError::Unavailable`].
    pub fn fail_next_gets_transiently(&self, n: u32) {
        self.transient_gets.store(n, Ordering::SeqCst);
    }

    /// Every create request received, duplicates included.
    pub fn creates(&self) -> Vec<WorkloadCreateRequest> {
        lock(&self.creates).clone()
    }

    /// Number of distinct workloads created.
    pub fn workload_count(&self) -> usize {
        lock(&self.workloads).len()
    }

    /// Cancel requests as `(workload_id, reason)`.
    pub fn cancels(&self) -> Vec<(String, String)> {
        lock(&self.cancels).clone()
    }

    /// Number of `get` calls, failed ones included.
    pub fn get_count(&self) -> u32 {
        self.gets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkloadApi for MockWorkloadApi {
    async fn create(&self, request: &WorkloadCreateRequest) -> Result<CreateOutcome, ApiError> {
        lock(&self.creates).push(request.clone());
        let mut workloads = lock(&self.workloads);
        if workloads.contains_key(&request.workload_id) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        workloads.insert(
            request.workload_id.clone(),
            Workload {
                id: request.workload_id.clone(),
                status: WorkloadStatus::Pending,
                labels: request.labels.clone(),
                log_path: Some(request.log_path.clone()),
                geography: Some(request.geography.clone()),
                last_heartbeat_at: None,
            },
        );
        Ok(CreateOutcome::Created)
    }

    async fn get(&self, workload_id: &str) -> Result<Workload, ApiError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if scripted_failure(&self.transient_gets) {
            return Err(ApiError::Unavailable("scripted outage".to_string()));
        }

        let mut workloads = lock(&self.workloads);
        let workload = workloads
            .get_mut(workload_id)
            .ok_or_else(|| ApiError::NotFound(workload_id.to_string()))?;

        let mut scripts = lock(&self.scripts);
        if let Some(script) = scripts.get_mut(workload_id) {
            let next = if script.len() > 1 {
                script.pop_front()
            } else {
                script.front().copied()
            };
            if let Some(status) = next {
                workload.status = status;
                if status == WorkloadStatus::Running {
                    workload.last_heartbeat_at = Some(chrono::Utc::now());
                }
            }
        }
        Ok(workload.clone())
    }

    async fn cancel(&self, workload_id: &str, reason: &str, _source: &str) -> Result<(), ApiError> {
        lock(&self.cancels).push((workload_id.to_string(), reason.to_string()));
        if let Some(workload) = lock(&self.workloads).get_mut(workload_id)
            && !workload.status.is_terminal()
        {
            workload.status = WorkloadStatus::Cancelled;
        }
        Ok(())
    }
}

/// Document store held in memory.
#[derive(Default)]
pub struct InMemoryDocumentStore {
    documents: Mutex<HashMap<String, Vec<u8>>>,
    reads: AtomicU32,
}

impl InMemoryDocumentStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `bytes` under `key`.
    pub fn insert(&self, key: &str, bytes: impl Into<Vec<u8>>) {
        lock(&self.documents).insert(key.to_string(), bytes.into());
    }

    /// Number of `read` calls.
    pub fn read_count(&self) -> u32 {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, DocumentStoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(lock(&self.documents).get(key).cloned())
    }

    async fn write(&self, key: &str, bytes: &[u8]) -> Result<(), DocumentStoreError> {
        self.insert(key, bytes);
        Ok(())
    }
}

/// Cancellation probe replaying a script; returns `Ok(())` once exhausted.
pub struct ScriptedProbe {
    script: Mutex<VecDeque<Result<(), ProbeError>>>,
    calls: AtomicU32,
}

impl ScriptedProbe {
    /// Probe replaying `script` in order.
    pub fn new(script: Vec<Result<(), ProbeError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicU32::new(0),
        }
    }

    /// Number of probes made.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CancellationProbe for ScriptedProbe {
    async fn probe(&self) -> Result<(), ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.script).pop_front().unwrap_or(Ok(()))
    }
}

/// Metric client recording every count.
#[derive(Default)]
pub struct RecordingMetricClient {
    counts: Mutex<Vec<(Metric, u64)>>,
}

impl RecordingMetricClient {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of all values counted for `metric`.
    pub fn total(&self, metric: Metric) -> u64 {
        lock(&self.counts)
            .iter()
            .filter(|(m, _)| *m == metric)
            .map(|(_, v)| v)
            .sum()
    }
}

impl MetricClient for RecordingMetricClient {
    fn count(&self, metric: Metric, value: u64, _attributes: &[(&'static str, &str)]) {
        lock(&self.counts).push((metric, value));
    }
}
