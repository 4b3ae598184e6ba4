// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workload types exchanged with the workload API.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Status of a workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadStatus {
    /// Created, waiting to be claimed
    Pending,
    /// Claimed by a launcher
    Claimed,
    /// Process started
    Launched,
    /// Process is heartbeating
    Running,
    /// Completed successfully
    Success,
    /// Completed with an error
    Failure,
    /// Cancelled before completion
    Cancelled,
}

impl WorkloadStatus {
    /// Whether no further transition can happen.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkloadStatus::Success | WorkloadStatus::Failure | WorkloadStatus::Cancelled
        )
    }
}

impl fmt::Display for WorkloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WorkloadStatus::Pending => "pending",
            WorkloadStatus::Claimed => "claimed",
            WorkloadStatus::Launched => "launched",
            WorkloadStatus::Running => "running",
            WorkloadStatus::Success => "success",
            WorkloadStatus::Failure => "failure",
            WorkloadStatus::Cancelled => "cancelled",
        })
    }
}

/// Kind of work a workload performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadType {
    /// Data replication
    Sync,
    /// Connection check
    Check,
    /// Schema discovery
    Discover,
    /// Connector spec
    Spec,
}

impl fmt::Display for WorkloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WorkloadType::Sync => "sync",
            WorkloadType::Check => "check",
            WorkloadType::Discover => "discover",
            WorkloadType::Spec => "spec",
        })
    }
}

/// Derives deterministic workload ids.
pub struct WorkloadIdGenerator;

impl WorkloadIdGenerator {
    /// `{connection_id}_{job_id}_{attempt_number}_{workload_type}`.
    pub fn generate(
        connection_id: Uuid,
        job_id: i64,
        attempt_number: u32,
        workload_type: WorkloadType,
    ) -> String {
        format!("{connection_id}_{job_id}_{attempt_number}_{workload_type}")
    }

    /// Id of the sync workload of an attempt.
    pub fn generate_sync_workload_id(connection_id: Uuid, job_id: i64, attempt_number: u32) -> String {
        Self::generate(connection_id, job_id, attempt_number, WorkloadType::Sync)
    }
}

/// Key/value label attached to a workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadLabel {
    /// Label key
    pub key: String,
    /// Label value
    pub value: String,
}

impl WorkloadLabel {
    /// Create a label.
    pub fn new(key: impl Into<String>, value: impl fmt::Display) -> Self {
        Self {
            key: key.into(),
            value: value.to_string(),
        }
    }
}

/// Body of a workload create request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadCreateRequest {
    /// Deterministic workload id
    pub workload_id: String,
    /// Labels for lookup and routing
    pub labels: Vec<WorkloadLabel>,
    /// Serialized input of the workload
    pub workload_input: String,
    /// Where the workload writes its logs
    pub log_path: String,
    /// Data plane geography
    pub geography: String,
    /// Kind of work
    #[serde(rename = "type")]
    pub workload_type: WorkloadType,
    /// Workloads sharing a key never run concurrently
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mutex_key: Option<String>,
}

/// Result of a create request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// A new workload was created.
    Created,
    /// A workload with this id already exists.
    AlreadyExists,
}

/// A workload as reported by the workload API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workload {
    /// Workload id
    pub id: String,
    /// Current status
    pub status: WorkloadStatus,
    /// Labels
    #[serde(default)]
    pub labels: Vec<WorkloadLabel>,
    /// Log location
    #[serde(default)]
    pub log_path: Option<String>,
    /// Geography
    #[serde(default)]
    pub geography: Option<String>,
    /// Last heartbeat received from the running workload
    #[serde(default)]
    pub last_heartbeat_at: Option<DateTime<Utc>>,
}

/// Input of a remotely executed sync attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncWorkloadInput {
    /// Connection being synced
    pub connection_id: Uuid,
    /// Job id
    pub job_id: i64,
    /// Attempt number within the job
    pub attempt_number: u32,
    /// Replication input handed to the workload
    pub payload: Value,
    /// Log location
    pub log_path: String,
    /// Data plane geography
    pub geography: String,
}

impl SyncWorkloadInput {
    /// Deterministic id of the workload for this input.
    pub fn workload_id(&self) -> String {
        WorkloadIdGenerator::generate_sync_workload_id(
            self.connection_id,
            self.job_id,
            self.attempt_number,
        )
    }

    pub(crate) fn to_create_request(&self) -> WorkloadCreateRequest {
        WorkloadCreateRequest {
            workload_id: self.workload_id(),
            labels: vec![
                WorkloadLabel::new("connection_id", self.connection_id),
                WorkloadLabel::new("job_id", self.job_id),
                WorkloadLabel::new("attempt_number", self.attempt_number),
            ],
            workload_input: self.payload.to_string(),
            log_path: self.log_path.clone(),
            geography: self.geography.clone(),
            workload_type: WorkloadType::Sync,
            mutex_key: Some(self.connection_id.to_string()),
        }
    }
}

/// Terminal result of a remote workload.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadResult {
    /// Workload id
    pub workload_id: String,
    /// Terminal status
    pub status: WorkloadStatus,
    /// Output document, `None` if it did not appear within the fetch cutoff
    pub output: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sync_workload_id_is_deterministic() {
        let connection_id = Uuid::parse_str("8d3c2a4e-7b9f-4e21-a0b8-0c5d6e7f8a9b").unwrap();
        assert_eq!(
            WorkloadIdGenerator::generate_sync_workload_id(connection_id, 42, 1),
            "8d3c2a4e-7b9f-4e21-a0b8-0c5d6e7f8a9b_42_1_sync"
        );
    }

    #[test]
    fn test_terminal_statuses() {
        let terminal: Vec<_> = [
            WorkloadStatus::Pending,
            WorkloadStatus::Claimed,
            WorkloadStatus::Launched,
            WorkloadStatus::Running,
            WorkloadStatus::Success,
            WorkloadStatus::Failure,
            WorkloadStatus::Cancelled,
        ]
        .into_iter()
        .filter(WorkloadStatus::is_terminal)
        .collect();

        assert_eq!(
            terminal,
            vec![
                WorkloadStatus::Success,
                WorkloadStatus::Failure,
                WorkloadStatus::Cancelled
            ]
        );
    }

    #[test]
    fn test_create_request_wire_format() {
        let input = SyncWorkloadInput {
            connection_id: Uuid::nil(),
            job_id: 7,
            attempt_number: 0,
            payload: json!({ "source": "pg" }),
            log_path: "/logs/7/0".into(),
            geography: "auto".into(),
        };

        let value = serde_json::to_value(input.to_create_request()).unwrap();
        assert_eq!(value["type"], json!("sync"));
        assert_eq!(value["workloadInput"], json!(r#"{"source":"pg"}"#));
        assert_eq!(value["labels"][1], json!({ "key": "job_id", "value": "7" }));
    }
}
