// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Heartbeat liveness tracking.
//!
//! The producer's read loop calls [`HeartbeatMonitor::beat`] for every message
//! it observes. A [`HeartbeatTimeoutChaperone`] watches the monitor from a
//! separate task and interrupts the run once the producer goes quiet for
//! longer than the configured threshold.

mod chaperone;
mod monitor;

pub use chaperone::{ChaperoneConfig, HeartbeatTimeoutChaperone, TimeoutMode};
pub use monitor::HeartbeatMonitor;
