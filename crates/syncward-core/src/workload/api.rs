// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Remote collaborators of the workload poller.

use async_trait::async_trait;

use super::types::{CreateOutcome, Workload, WorkloadCreateRequest};
use crate::error::{ApiError, DocumentStoreError};

/// Workload API of the remote execution surface.
#[async_trait]
pub trait WorkloadApi: Send + Sync {
    /// Submit a workload. Not idempotent from the caller's point of view:
    /// a second submission reports [`CreateOutcome::AlreadyExists`].
    async fn create(&self, request: &WorkloadCreateRequest) -> Result<CreateOutcome, ApiError>;

    /// Fetch a workload by id.
    async fn get(&self, workload_id: &str) -> Result<Workload, ApiError>;

    /// Request cancellation. Cancelling a terminal workload succeeds.
    async fn cancel(&self, workload_id: &str, reason: &str, source: &str) -> Result<(), ApiError>;
}

/// Blob storage where workloads leave their output.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read the document at `key`, `None` if it does not exist.
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, DocumentStoreError>;

    /// Write the document at `key`, replacing any previous one.
    async fn write(&self, key: &str, bytes: &[u8]) -> Result<(), DocumentStoreError>;
}
