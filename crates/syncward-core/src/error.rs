// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for syncward-core.
//!
//! Each component reports its own error enum. Remote collaborators (state
//! persistence, attempt stats, workload API) all report [`ApiError`], whose
//! [`ApiError::is_transient`] classification drives the retry executor.

use std::time::Duration;

use thiserror::Error;

use crate::state::StreamDescriptor;
use crate::state::StateType;

/// Errors returned by remote collaborators.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ApiError {
    /// The remote service is temporarily unavailable (503, refused connection, timeout).
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// The requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The resource exists but is no longer modifiable.
    #[error("gone: {0}")]
    Gone(String),

    /// Any other non-success HTTP status.
    #[error("HTTP {status}: {message}")]
    Http {
        /// HTTP status code
        status: u16,
        /// Response body or reason phrase
        message: String,
    },

    /// Request could not be sent or the response could not be read.
    #[error("transport error: {0}")]
    Transport(String),

    /// Response payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// Local storage backend failure.
    #[error("storage error: {0}")]
    Storage(String),
}

impl ApiError {
    /// Whether the error is a transient network failure worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Unavailable(_))
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Decode(err.to_string())
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            ApiError::Unavailable(err.to_string())
        } else if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Transport(err.to_string())
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => ApiError::Unavailable("database pool timed out".to_string()),
            other => ApiError::Storage(other.to_string()),
        }
    }
}

/// Errors raised by the state checkpoint store.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StateError {
    /// State was persisted for a different connection than the one already buffered.
    #[error("state for connection {actual} persisted to a store bound to connection {expected}")]
    ConnectionMismatch {
        /// Connection the store is bound to
        expected: String,
        /// Connection of the rejected message
        actual: String,
    },

    /// A state message of a different type than the buffered one.
    #[error("state type {actual} does not match buffered state type {expected}")]
    StateTypeMismatch {
        /// Type already buffered
        expected: StateType,
        /// Type of the rejected message
        actual: StateType,
    },

    /// A migration from legacy state would drop an incremental stream.
    #[error(
        "job ran during migration from legacy state to per-stream state; stream {stream} has no state"
    )]
    MigrationIncomplete {
        /// First incremental stream missing from the payload
        stream: StreamDescriptor,
    },

    /// Migration mode requires a configured catalog before flushing.
    #[error("configured catalog is required to flush migrated state")]
    MissingCatalog,

    /// The persistence API rejected the call.
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Errors produced by the heartbeat timeout chaperone.
#[derive(Debug, Error)]
pub enum ChaperoneError {
    /// The monitored producer stopped beating.
    #[error("heartbeat timed out: no message for {since_last_beat:?} (threshold {threshold:?})")]
    HeartbeatTimeout {
        /// Configured staleness threshold
        threshold: Duration,
        /// Time since the last observed beat
        since_last_beat: Duration,
    },
}

/// Errors produced by the cancellation bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// An ambiguous completion error on a sync-class task; the probe should be retried.
    #[error("retryable completion error for task {task_id}: {message}")]
    Retryable {
        /// Task identifier reported by the probe
        task_id: String,
        /// Underlying error message
        message: String,
    },
}

/// Errors produced by a document store.
#[derive(Debug, Error)]
pub enum DocumentStoreError {
    /// Underlying I/O failure.
    #[error("document store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The key is not a valid relative document location.
    #[error("invalid document key: {0}")]
    InvalidKey(String),
}

/// Errors produced by the remote workload poller.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WorkloadError {
    /// The workload API rejected the call.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The output document could not be read.
    #[error(transparent)]
    Document(#[from] DocumentStoreError),

    /// The output document is not valid JSON.
    #[error("failed to decode workload output: {0}")]
    Decode(String),

    /// Polling was interrupted by cancellation of the attempt.
    #[error("polling of workload {workload_id} was interrupted")]
    Interrupted {
        /// Workload being polled
        workload_id: String,
    },
}

/// Errors surfaced by a sync attempt.
#[derive(Debug, Error)]
pub enum AttemptError {
    /// The replication work itself failed.
    #[error("sync work failed: {0}")]
    Work(#[source] anyhow::Error),

    /// The remote workload failed to run.
    #[error(transparent)]
    Workload(#[from] WorkloadError),
}

/// Result type for state store operations.
pub type Result<T> = std::result::Result<T, StateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unavailable_is_transient() {
        assert!(ApiError::Unavailable("503".into()).is_transient());
        assert!(!ApiError::NotFound("x".into()).is_transient());
        assert!(
            !ApiError::Http {
                status: 500,
                message: "boom".into()
            }
            .is_transient()
        );
        assert!(!ApiError::Transport("reset".into()).is_transient());
    }

    #[test]
    fn test_migration_error_names_stream() {
        let err = StateError::MigrationIncomplete {
            stream: StreamDescriptor::new("users", Some("public")),
        };
        assert!(err.to_string().contains("public.users"));
    }
}
