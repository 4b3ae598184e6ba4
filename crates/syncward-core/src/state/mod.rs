// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! State checkpointing.
//!
//! The producer emits [`StateMessage`]s while a sync runs. A
//! [`StateCheckpointStore`] buffers them and writes the merged result to the
//! state persistence API on a fixed schedule and once more on close. Failed
//! writes are carried into the next flush, so a failure only delays progress.

mod aggregator;
mod api;
mod stats;
mod store;
mod types;

pub use aggregator::StateAggregator;
pub use api::{AttemptApi, StateApi};
pub use stats::{SaveStatsRequest, StreamSyncStats, SyncStats, SyncStatsTracker};
pub use store::{
    CloseOutcome, JobContext, StateCheckpointStore, StateStoreBuilder, StateStoreConfig,
};
pub use types::{
    ConfiguredCatalog, ConfiguredStream, ConnectionState, ConnectionStateType, StateMessage,
    StateType, StreamDescriptor, StreamState, SyncMode,
};
