// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;

const NEVER_BEATEN: u64 = u64::MAX;

/// Tracks the time of the most recently observed upstream message.
///
/// `beat()` is a single atomic store, so it is safe to call on every record.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    origin: Instant,
    /// Nanoseconds since `origin` of the last beat, or `NEVER_BEATEN`.
    last_beat: AtomicU64,
}

impl HeartbeatMonitor {
    /// Create a monitor that has not seen any message yet.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_beat: AtomicU64::new(NEVER_BEATEN),
        }
    }

    /// Record "now" as the time of the last observed message.
    pub fn beat(&self) {
        let offset = u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(NEVER_BEATEN - 1);
        self.last_beat.store(offset, Ordering::Release);
    }

    /// Time elapsed since the last beat, `None` before the first one.
    pub fn time_since_last_beat(&self) -> Option<Duration> {
        match self.last_beat.load(Ordering::Acquire) {
            NEVER_BEATEN => None,
            offset => Some(
                self.origin
                    .elapsed()
                    .saturating_sub(Duration::from_nanos(offset)),
            ),
        }
    }

    /// Whether the last beat happened less than `threshold` ago.
    ///
    /// Always true before the first beat: there is no evidence of staleness yet.
    pub fn is_beating(&self, threshold: Duration) -> bool {
        match self.time_since_last_beat() {
            None => true,
            Some(elapsed) => elapsed < threshold,
        }
    }
}

impl Default for HeartbeatMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_beating_before_first_beat() {
        let monitor = HeartbeatMonitor::new();
        tokio::time::advance(Duration::from_secs(3600)).await;

        assert!(monitor.is_beating(Duration::from_secs(1)));
        assert_eq!(monitor.time_since_last_beat(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_staleness_boundary() {
        let monitor = HeartbeatMonitor::new();
        let threshold = Duration::from_secs(10);
        monitor.beat();

        tokio::time::advance(Duration::from_millis(9_999)).await;
        assert!(monitor.is_beating(threshold));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(!monitor.is_beating(threshold));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(!monitor.is_beating(threshold));
    }

    #[tokio::test(start_paused = true)]
    async fn test_beat_resets_staleness() {
        let monitor = HeartbeatMonitor::new();
        let threshold = Duration::from_secs(10);
        monitor.beat();

        tokio::time::advance(Duration::from_secs(15)).await;
        assert!(!monitor.is_beating(threshold));

        monitor.beat();
        assert!(monitor.is_beating(threshold));
        assert_eq!(monitor.time_since_last_beat(), Some(Duration::ZERO));
    }
}
