// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared helpers for syncward-core integration tests.

#![allow(dead_code)]

use std::sync::Once;
use std::time::Duration;

use serde_json::json;
use syncward_core::state::{ConfiguredCatalog, ConfiguredStream, StreamDescriptor, SyncMode};
use syncward_core::StateMessage;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Route test logs through `RUST_LOG`.
pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// STREAM state message for `name` with an integer cursor.
pub fn stream_state(name: &str, cursor: i64) -> StateMessage {
    StateMessage::stream(StreamDescriptor::new(name, None), json!({ "cursor": cursor }))
}

/// Catalog syncing every stream in `names` incrementally.
pub fn incremental_catalog(names: &[&str]) -> ConfiguredCatalog {
    ConfiguredCatalog {
        streams: names
            .iter()
            .map(|name| ConfiguredStream {
                stream: StreamDescriptor::new(*name, None),
                sync_mode: SyncMode::Incremental,
            })
            .collect(),
    }
}

/// Poll `condition` every 10ms until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
