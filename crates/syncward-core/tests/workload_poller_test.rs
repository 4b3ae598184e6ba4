// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for submitting and polling remote sync workloads.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use syncward_core::mock::{InMemoryDocumentStore, MockWorkloadApi, RecordingMetricClient};
use syncward_core::workload::{
    SyncWorkloadInput, WorkloadPoller, WorkloadPollerConfig, output_document_key,
};
use syncward_core::{Metric, RetryExecutor, RetryPolicy, WorkloadError, WorkloadStatus};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

struct Fixture {
    api: Arc<MockWorkloadApi>,
    documents: Arc<InMemoryDocumentStore>,
    metrics: Arc<RecordingMetricClient>,
    poller: WorkloadPoller,
    input: SyncWorkloadInput,
}

impl Fixture {
    fn new() -> Self {
        Self::with_config(WorkloadPollerConfig::default())
    }

    fn with_config(config: WorkloadPollerConfig) -> Self {
        common::init_tracing();
        let api = Arc::new(MockWorkloadApi::new());
        let documents = Arc::new(InMemoryDocumentStore::new());
        let metrics = Arc::new(RecordingMetricClient::new());
        let executor = RetryExecutor::new(
            RetryPolicy::new(4, Duration::from_millis(100), Duration::from_secs(1)),
            metrics.clone(),
        );
        let poller = WorkloadPoller::new(api.clone(), documents.clone(), config)
            .with_executor(executor)
            .with_metrics(metrics.clone());

        Self {
            api,
            documents,
            metrics,
            poller,
            input: SyncWorkloadInput {
                connection_id: Uuid::new_v4(),
                job_id: 42,
                attempt_number: 1,
                payload: json!({ "source": "postgres", "destination": "bigquery" }),
                log_path: "/logs/42/1".to_string(),
                geography: "eu".to_string(),
            },
        }
    }

    fn workload_id(&self) -> String {
        self.input.workload_id()
    }

    fn write_output(&self, output: serde_json::Value) {
        self.documents.insert(
            &output_document_key(self.input.job_id, self.input.attempt_number),
            output.to_string(),
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_polls_until_terminal_and_reads_output() {
    let fixture = Fixture::new();
    fixture.api.script_statuses(
        &fixture.workload_id(),
        vec![
            WorkloadStatus::Claimed,
            WorkloadStatus::Running,
            WorkloadStatus::Running,
            WorkloadStatus::Success,
        ],
    );
    fixture.write_output(json!({ "recordsSynced": 1200 }));

    let started = tokio::time::Instant::now();
    let result = fixture
        .poller
        .run(&fixture.input, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.workload_id, fixture.workload_id());
    assert_eq!(result.status, WorkloadStatus::Success);
    assert_eq!(result.output, Some(json!({ "recordsSynced": 1200 })));
    assert_eq!(fixture.api.get_count(), 4);
    assert!(started.elapsed() >= Duration::from_secs(180));
    assert_eq!(fixture.documents.read_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_create_request_is_labelled_and_serialized_per_connection() {
    let fixture = Fixture::new();
    fixture
        .api
        .script_statuses(&fixture.workload_id(), vec![WorkloadStatus::Success]);
    fixture.write_output(json!({}));

    fixture
        .poller
        .run(&fixture.input, &CancellationToken::new())
        .await
        .unwrap();

    let creates = fixture.api.creates();
    assert_eq!(creates.len(), 1);
    let request = &creates[0];
    assert_eq!(request.workload_id, fixture.workload_id());
    assert_eq!(
        request.mutex_key.as_deref(),
        Some(fixture.input.connection_id.to_string().as_str())
    );
    assert!(
        request
            .labels
            .iter()
            .any(|label| label.key == "job_id" && label.value == "42")
    );
    assert_eq!(
        serde_json::from_str::<serde_json::Value>(&request.workload_input).unwrap(),
        fixture.input.payload
    );
}

#[tokio::test(start_paused = true)]
async fn test_resubmission_resumes_existing_workload() {
    let fixture = Fixture::new();
    fixture
        .api
        .script_statuses(&fixture.workload_id(), vec![WorkloadStatus::Failure]);
    fixture.write_output(json!({ "failureReason": "source unreachable" }));

    let token = CancellationToken::new();
    let first = fixture.poller.run(&fixture.input, &token).await.unwrap();
    let second = fixture.poller.run(&fixture.input, &token).await.unwrap();

    assert_eq!(first.workload_id, second.workload_id);
    assert_eq!(second.status, WorkloadStatus::Failure);
    assert_eq!(fixture.api.creates().len(), 2);
    assert_eq!(fixture.api.workload_count(), 1);
    assert_eq!(fixture.metrics.total(Metric::WorkloadAlreadyExists), 1);
}

#[tokio::test(start_paused = true)]
async fn test_missing_output_gives_up_after_cutoff() {
    let fixture = Fixture::with_config(WorkloadPollerConfig {
        heartbeat_rate: Duration::from_secs(10),
        output_fetch_cutoff_heartbeats: 2,
        ..WorkloadPollerConfig::default()
    });
    fixture
        .api
        .script_statuses(&fixture.workload_id(), vec![WorkloadStatus::Success]);

    let started = tokio::time::Instant::now();
    let result = fixture
        .poller
        .run(&fixture.input, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.status, WorkloadStatus::Success);
    assert_eq!(result.output, None);
    assert!(started.elapsed() >= Duration::from_secs(20));
    assert!(started.elapsed() < Duration::from_secs(22));
    assert!(fixture.documents.read_count() > 1);
    assert_eq!(fixture.metrics.total(Metric::WorkloadOutputMissing), 1);
}

#[tokio::test(start_paused = true)]
async fn test_output_written_late_is_picked_up() {
    let fixture = Fixture::new();
    fixture
        .api
        .script_statuses(&fixture.workload_id(), vec![WorkloadStatus::Success]);

    let documents = fixture.documents.clone();
    let key = output_document_key(fixture.input.job_id, fixture.input.attempt_number);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(4500)).await;
        documents.insert(&key, r#"{"done":true}"#);
    });

    let result = fixture
        .poller
        .run(&fixture.input, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.output, Some(json!({ "done": true })));
    assert_eq!(fixture.metrics.total(Metric::WorkloadOutputMissing), 0);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_output_is_a_decode_error() {
    let fixture = Fixture::new();
    fixture
        .api
        .script_statuses(&fixture.workload_id(), vec![WorkloadStatus::Success]);
    fixture.documents.insert(
        &output_document_key(fixture.input.job_id, fixture.input.attempt_number),
        "not json",
    );

    let err = fixture
        .poller
        .run(&fixture.input, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, WorkloadError::Decode(_)));
}

#[tokio::test]
async fn test_cancel_before_submission_is_noop() {
    let fixture = Fixture::new();

    fixture.poller.cancel("attempt cancelled").await.unwrap();

    assert!(fixture.poller.submitted_workload_id().is_none());
    assert!(fixture.api.cancels().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_token_cancels_workload() {
    let fixture = Fixture::new();
    fixture
        .api
        .script_statuses(&fixture.workload_id(), vec![WorkloadStatus::Running]);

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(90)).await;
        canceller.cancel();
    });

    let err = fixture
        .poller
        .run(&fixture.input, &token)
        .await
        .unwrap_err();

    match err {
        WorkloadError::Interrupted { workload_id } => {
            assert_eq!(workload_id, fixture.workload_id())
        }
        other => panic!("expected interruption, got {other}"),
    }
    assert_eq!(
        fixture.api.cancels(),
        vec![(fixture.workload_id(), "attempt cancelled".to_string())]
    );
    assert_eq!(fixture.api.get_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_transient_status_errors_are_retried() {
    let fixture = Fixture::new();
    fixture
        .api
        .script_statuses(&fixture.workload_id(), vec![WorkloadStatus::Success]);
    fixture.write_output(json!({}));
    fixture.api.fail_next_gets_transiently(2);

    let result = fixture
        .poller
        .run(&fixture.input, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.status, WorkloadStatus::Success);
    assert_eq!(fixture.api.get_count(), 3);
    assert_eq!(fixture.metrics.total(Metric::ApiRetryAttempt), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_is_not_delayed_by_status_retries() {
    let fixture = Fixture::new();
    fixture
        .api
        .script_statuses(&fixture.workload_id(), vec![WorkloadStatus::Running]);
    fixture.api.fail_next_gets_transiently(10);
    let poller = WorkloadPoller::new(
        fixture.api.clone(),
        fixture.documents.clone(),
        WorkloadPollerConfig::default(),
    )
    .with_executor(RetryExecutor::new(
        RetryPolicy::new(5, Duration::from_secs(10), Duration::from_secs(60)),
        fixture.metrics.clone(),
    ));

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        canceller.cancel();
    });

    let started = tokio::time::Instant::now();
    let err = poller.run(&fixture.input, &token).await.unwrap_err();

    assert!(matches!(err, WorkloadError::Interrupted { .. }));
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(
        fixture.api.cancels(),
        vec![(fixture.workload_id(), "attempt cancelled".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn test_zero_poll_interval_falls_back_to_default() {
    let fixture = Fixture::with_config(WorkloadPollerConfig {
        poll_interval: Duration::ZERO,
        ..WorkloadPollerConfig::default()
    });
    fixture.api.script_statuses(
        &fixture.workload_id(),
        vec![WorkloadStatus::Running, WorkloadStatus::Success],
    );
    fixture.write_output(json!({}));

    let started = tokio::time::Instant::now();
    fixture
        .poller
        .run(&fixture.input, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(fixture.api.get_count(), 2);
    assert!(started.elapsed() >= WorkloadPollerConfig::default().poll_interval);
}
