// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed state and attempt-stats storage.

use std::path::Path;

use async_trait::async_trait;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::{
    AttemptApi, ConnectionState, ConnectionStateType, SaveStatsRequest, StateApi, StreamState,
};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// SQLite implementation of [`StateApi`] and [`AttemptApi`].
#[derive(Debug, Clone)]
pub struct SqliteStateApi {
    pool: SqlitePool,
}

impl SqliteStateApi {
    /// Wrap an existing pool. Call [`migrate`](Self::migrate) before use.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database at `path` and run migrations.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, ApiError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                ApiError::Storage(format!("failed to create directory {parent:?}: {e}"))
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let api = Self::new(pool);
        api.migrate().await?;
        Ok(api)
    }

    /// Apply pending migrations.
    pub async fn migrate(&self) -> Result<(), ApiError> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| ApiError::Storage(format!("failed to run migrations: {e}")))
    }
}

fn state_type_name(state_type: ConnectionStateType) -> &'static str {
    match state_type {
        ConnectionStateType::Legacy => "legacy",
        ConnectionStateType::Global => "global",
        ConnectionStateType::Stream => "stream",
        ConnectionStateType::NotSet => "not_set",
    }
}

/// Upsert stream states of `update` into `existing`; any other combination replaces.
fn merge_states(existing: Option<ConnectionState>, update: &ConnectionState) -> ConnectionState {
    match existing {
        Some(mut existing)
            if existing.state_type == ConnectionStateType::Stream
                && update.state_type == ConnectionStateType::Stream =>
        {
            let mut streams: Vec<StreamState> = existing.stream_state.take().unwrap_or_default();
            for incoming in update.stream_state.iter().flatten() {
                match streams
                    .iter_mut()
                    .find(|s| s.stream_descriptor == incoming.stream_descriptor)
                {
                    Some(current) => current.stream_state = incoming.stream_state.clone(),
                    None => streams.push(incoming.clone()),
                }
            }
            existing.stream_state = Some(streams);
            existing
        }
        _ => update.clone(),
    }
}

#[async_trait]
impl StateApi for SqliteStateApi {
    async fn get_state(&self, connection_id: Uuid) -> Result<ConnectionState, ApiError> {
        let payload: Option<String> = sqlx::query_scalar(
            r#"
            SELECT payload FROM connection_state
            WHERE connection_id = ?
            "#,
        )
        .bind(connection_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match payload {
            Some(payload) => Ok(serde_json::from_str(&payload)?),
            None => Ok(ConnectionState::not_set(connection_id)),
        }
    }

    async fn create_or_update_state(&self, state: &ConnectionState) -> Result<(), ApiError> {
        let connection_id = state.connection_id.to_string();
        let mut tx = self.pool.begin().await?;

        let existing: Option<String> = sqlx::query_scalar(
            r#"
            SELECT payload FROM connection_state
            WHERE connection_id = ?
            "#,
        )
        .bind(&connection_id)
        .fetch_optional(&mut *tx)
        .await?;
        let existing = existing
            .map(|payload| serde_json::from_str::<ConnectionState>(&payload))
            .transpose()?;

        let merged = merge_states(existing, state);
        sqlx::query(
            r#"
            INSERT INTO connection_state (connection_id, state_type, payload, updated_at)
            VALUES (?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT (connection_id) DO UPDATE SET
                state_type = excluded.state_type,
                payload = excluded.payload,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&connection_id)
        .bind(state_type_name(merged.state_type))
        .bind(serde_json::to_string(&merged)?)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl AttemptApi for SqliteStateApi {
    async fn save_stats(&self, request: &SaveStatsRequest) -> Result<(), ApiError> {
        sqlx::query(
            r#"
            INSERT INTO attempt_stats (job_id, attempt_number, stats, updated_at)
            VALUES (?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT (job_id, attempt_number) DO UPDATE SET
                stats = excluded.stats,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(request.job_id)
        .bind(i64::from(request.attempt_number))
        .bind(serde_json::to_string(request)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

impl SqliteStateApi {
    /// Latest stats saved for an attempt.
    pub async fn get_stats(
        &self,
        job_id: i64,
        attempt_number: u32,
    ) -> Result<Option<SaveStatsRequest>, ApiError> {
        let stats: Option<String> = sqlx::query_scalar(
            r#"
            SELECT stats FROM attempt_stats
            WHERE job_id = ? AND attempt_number = ?
            "#,
        )
        .bind(job_id)
        .bind(i64::from(attempt_number))
        .fetch_optional(&self.pool)
        .await?;

        Ok(stats.map(|s| serde_json::from_str(&s)).transpose()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StreamDescriptor;
    use serde_json::json;

    #[test]
    fn test_stream_states_are_upserted() {
        let id = Uuid::new_v4();
        let stream = |name: &str, value: i64| StreamState {
            stream_descriptor: StreamDescriptor::new(name, None),
            stream_state: Some(json!(value)),
        };
        let existing = ConnectionState {
            state_type: ConnectionStateType::Stream,
            stream_state: Some(vec![stream("a", 1), stream("b", 1)]),
            ..ConnectionState::not_set(id)
        };
        let update = ConnectionState {
            state_type: ConnectionStateType::Stream,
            stream_state: Some(vec![stream("b", 2), stream("c", 1)]),
            ..ConnectionState::not_set(id)
        };

        let merged = merge_states(Some(existing), &update);
        assert_eq!(merged.stream(&StreamDescriptor::new("a", None)), Some(&json!(1)));
        assert_eq!(merged.stream(&StreamDescriptor::new("b", None)), Some(&json!(2)));
        assert_eq!(merged.stream(&StreamDescriptor::new("c", None)), Some(&json!(1)));
    }

    #[test]
    fn test_stream_state_replaces_legacy() {
        let id = Uuid::new_v4();
        let legacy = ConnectionState {
            state_type: ConnectionStateType::Legacy,
            state: Some(json!({ "cursor": 5 })),
            ..ConnectionState::not_set(id)
        };
        let update = ConnectionState {
            state_type: ConnectionStateType::Stream,
            stream_state: Some(vec![]),
            ..ConnectionState::not_set(id)
        };

        let merged = merge_states(Some(legacy), &update);
        assert_eq!(merged, update);
    }
}
