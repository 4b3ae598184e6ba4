// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-stream sync statistics persisted next to state checkpoints.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use super::types::StreamDescriptor;

/// Record and byte counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
    /// Records emitted by the source
    pub records_emitted: u64,
    /// Bytes emitted by the source
    pub bytes_emitted: u64,
    /// Source-reported record estimate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_records: Option<u64>,
    /// Source-reported byte estimate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_bytes: Option<u64>,
}

impl SyncStats {
    fn add(&mut self, other: &SyncStats) {
        self.records_emitted += other.records_emitted;
        self.bytes_emitted += other.bytes_emitted;
        if let Some(records) = other.estimated_records {
            *self.estimated_records.get_or_insert(0) += records;
        }
        if let Some(bytes) = other.estimated_bytes {
            *self.estimated_bytes.get_or_insert(0) += bytes;
        }
    }
}

/// Stats of one stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSyncStats {
    /// Stream name
    pub stream_name: String,
    /// Stream namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_namespace: Option<String>,
    /// Counters
    pub stats: SyncStats,
}

/// Request body of the attempt stats API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveStatsRequest {
    /// Job the attempt belongs to
    pub job_id: i64,
    /// Attempt number within the job
    pub attempt_number: u32,
    /// Totals across streams
    pub stats: SyncStats,
    /// Per-stream counters
    pub stream_stats: Vec<StreamSyncStats>,
}

/// Collects per-stream counters from the producer path.
#[derive(Debug, Default)]
pub struct SyncStatsTracker {
    streams: Mutex<BTreeMap<StreamDescriptor, SyncStats>>,
    receiving: AtomicBool,
}

impl SyncStatsTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one emitted record of `bytes` size.
    pub fn record_emitted(&self, stream: &StreamDescriptor, bytes: u64) {
        self.update(stream, |stats| {
            stats.records_emitted += 1;
            stats.bytes_emitted += bytes;
        });
    }

    /// Replace the source's estimate for `stream`.
    pub fn record_estimate(&self, stream: &StreamDescriptor, records: u64, bytes: u64) {
        self.update(stream, |stats| {
            stats.estimated_records = Some(records);
            stats.estimated_bytes = Some(bytes);
        });
    }

    /// Whether any counter has been recorded.
    pub fn is_receiving(&self) -> bool {
        self.receiving.load(Ordering::Acquire)
    }

    /// Snapshot the counters as a save request, `None` if nothing was recorded.
    pub fn snapshot(&self, job_id: i64, attempt_number: u32) -> Option<SaveStatsRequest> {
        if !self.is_receiving() {
            return None;
        }

        let streams = self.streams.lock().unwrap_or_else(PoisonError::into_inner);
        let mut totals = SyncStats::default();
        let stream_stats = streams
            .iter()
            .map(|(descriptor, stats)| {
                totals.add(stats);
                StreamSyncStats {
                    stream_name: descriptor.name.clone(),
                    stream_namespace: descriptor.namespace.clone(),
                    stats: stats.clone(),
                }
            })
            .collect();

        Some(SaveStatsRequest {
            job_id,
            attempt_number,
            stats: totals,
            stream_stats,
        })
    }

    fn update(&self, stream: &StreamDescriptor, apply: impl FnOnce(&mut SyncStats)) {
        let mut streams = self.streams.lock().unwrap_or_else(PoisonError::into_inner);
        apply(streams.entry(stream.clone()).or_default());
        self.receiving.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_totals_streams() {
        let tracker = SyncStatsTracker::new();
        assert!(tracker.snapshot(1, 0).is_none());

        let users = StreamDescriptor::new("users", Some("public"));
        let orders = StreamDescriptor::new("orders", None);
        tracker.record_emitted(&users, 100);
        tracker.record_emitted(&users, 50);
        tracker.record_emitted(&orders, 10);
        tracker.record_estimate(&orders, 1000, 10_000);

        let snapshot = tracker.snapshot(7, 2).unwrap();
        assert_eq!(snapshot.job_id, 7);
        assert_eq!(snapshot.attempt_number, 2);
        assert_eq!(snapshot.stats.records_emitted, 3);
        assert_eq!(snapshot.stats.bytes_emitted, 160);
        assert_eq!(snapshot.stats.estimated_records, Some(1000));
        assert_eq!(snapshot.stream_stats.len(), 2);
        assert_eq!(snapshot.stream_stats[0].stream_name, "orders");
    }
}
