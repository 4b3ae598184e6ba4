// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Syncward Core - Sync Attempt Runtime
//!
//! This crate keeps a long-running, remotely orchestrated replication attempt
//! alive, checkpointed and safely cancellable. It is a library consumed by an
//! orchestrator; it has no API surface of its own.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Orchestrator (external)                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │ starts attempt / requests cancel
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      SyncAttempt (this crate)                           │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐  ┌─────────────┐  │
//! │  │  Heartbeat   │  │ Cancellation │  │    State     │  │  Workload   │  │
//! │  │  Chaperone   │  │    Bridge    │  │  Checkpoint  │  │   Poller    │  │
//! │  │              │  │              │  │    Store     │  │             │  │
//! │  └──────────────┘  └──────────────┘  └──────────────┘  └─────────────┘  │
//! │                         RetryExecutor (all remote calls)                │
//! └─────────────────────────────────────────────────────────────────────────┘
//!            │                                  │                 │
//!            ▼                                  ▼                 ▼
//!   ┌─────────────────┐               ┌──────────────────┐  ┌─────────────┐
//!   │ State / attempt │               │   Workload API   │  │  Document   │
//!   │  API (HTTP or   │               │      (HTTP)      │  │    store    │
//!   │    SQLite)      │               └──────────────────┘  └─────────────┘
//!   └─────────────────┘
//! ```
//!
//! # Components
//!
//! | Component | Module | Role |
//! |-----------|--------|------|
//! | [`StateCheckpointStore`](state::StateCheckpointStore) | [`state`] | Buffers state messages, flushes them on a schedule and on close |
//! | [`HeartbeatMonitor`](heartbeat::HeartbeatMonitor) | [`heartbeat`] | Records the time of the last observed message |
//! | [`HeartbeatTimeoutChaperone`](heartbeat::HeartbeatTimeoutChaperone) | [`heartbeat`] | Fails a run whose producer went stale |
//! | [`CancellationBridge`](cancellation::CancellationBridge) | [`cancellation`] | Turns an external cancel request into cleanup |
//! | [`RetryExecutor`](retry::RetryExecutor) | [`retry`] | Bounded backoff for idempotent remote calls |
//! | [`WorkloadPoller`](workload::WorkloadPoller) | [`workload`] | Runs an attempt as a remote workload |
//!
//! # Features
//!
//! - `http` (default): reqwest client for the state, attempt and workload APIs
//! - `sqlite` (default): SQLite storage for state and attempt stats
//!
//! # Configuration
//!
//! [`RuntimeConfig::from_env`] reads `SYNCWARD_*` environment variables; see
//! [`config`] for the full list.

#![deny(missing_docs)]

pub mod attempt;
pub mod backend;
pub mod cancellation;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod metrics;
pub mod mock;
pub mod retry;
pub mod state;
pub mod workload;

pub use attempt::{AttemptContext, AttemptOutcome, SyncAttempt, SyncAttemptBuilder};
pub use cancellation::{CancellationBridge, CancellationProbe, ProbeError, TaskClass};
pub use config::{ConfigError, FeatureFlags, RuntimeConfig};
pub use error::{
    ApiError, AttemptError, BridgeError, ChaperoneError, DocumentStoreError, StateError,
    WorkloadError,
};
pub use heartbeat::{HeartbeatMonitor, HeartbeatTimeoutChaperone};
pub use metrics::{Metric, MetricClient, NoopMetricClient, OtelMetricClient};
pub use retry::{RetryExecutor, RetryPolicy};
pub use state::{StateCheckpointStore, StateMessage};
pub use workload::{WorkloadPoller, WorkloadStatus};
