// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Remote collaborators of the state checkpoint store.

use async_trait::async_trait;
use uuid::Uuid;

use super::stats::SaveStatsRequest;
use super::types::ConnectionState;
use crate::error::ApiError;

/// State persistence API.
///
/// `create_or_update_state` must be idempotent: the store retries it.
#[async_trait]
pub trait StateApi: Send + Sync {
    /// Currently persisted state; [`ConnectionState::not_set`] when nothing was saved.
    async fn get_state(&self, connection_id: Uuid) -> Result<ConnectionState, ApiError>;

    /// Persist `state`. Stream states are upserted per stream.
    async fn create_or_update_state(&self, state: &ConnectionState) -> Result<(), ApiError>;
}

/// Attempt bookkeeping API.
#[async_trait]
pub trait AttemptApi: Send + Sync {
    /// Save the latest sync stats of an attempt, replacing earlier ones.
    async fn save_stats(&self, request: &SaveStatsRequest) -> Result<(), ApiError>;
}
