// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for the heartbeat timeout chaperone.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use syncward_core::heartbeat::{ChaperoneConfig, HeartbeatTimeoutChaperone, TimeoutMode};
use syncward_core::mock::RecordingMetricClient;
use syncward_core::{ChaperoneError, HeartbeatMonitor, Metric};

struct Fixture {
    monitor: Arc<HeartbeatMonitor>,
    metrics: Arc<RecordingMetricClient>,
    fired: Arc<AtomicU32>,
    chaperone: HeartbeatTimeoutChaperone,
}

impl Fixture {
    fn new(mode: TimeoutMode) -> Self {
        common::init_tracing();
        let monitor = Arc::new(HeartbeatMonitor::new());
        let metrics = Arc::new(RecordingMetricClient::new());
        let chaperone = HeartbeatTimeoutChaperone::new(
            monitor.clone(),
            ChaperoneConfig {
                check_period: Duration::from_secs(1),
                heartbeat_timeout: Duration::from_secs(5),
                mode,
            },
        )
        .with_metrics(metrics.clone());

        Self {
            monitor,
            metrics,
            fired: Arc::new(AtomicU32::new(0)),
            chaperone,
        }
    }

    fn on_timeout(&self) -> impl FnOnce() + Send + 'static {
        let fired = self.fired.clone();
        move || {
            fired.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn fired(&self) -> u32 {
        self.fired.load(Ordering::SeqCst)
    }
}

#[tokio::test(start_paused = true)]
async fn test_no_timeout_before_first_beat() {
    let fixture = Fixture::new(TimeoutMode::Enforce);

    let result = fixture
        .chaperone
        .run_with_timeout(
            async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                "done"
            },
            fixture.on_timeout(),
        )
        .await;

    assert_eq!(result.unwrap(), "done");
    assert_eq!(fixture.fired(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_regular_beats_keep_work_running() {
    let fixture = Fixture::new(TimeoutMode::Enforce);
    let monitor = fixture.monitor.clone();

    let result = fixture
        .chaperone
        .run_with_timeout(
            async move {
                for _ in 0..20 {
                    monitor.beat();
                    tokio::time::sleep(Duration::from_millis(1500)).await;
                }
                20
            },
            fixture.on_timeout(),
        )
        .await;

    assert_eq!(result.unwrap(), 20);
    assert_eq!(fixture.fired(), 0);
    assert_eq!(fixture.metrics.total(Metric::HeartbeatTimeout), 0);
}

#[tokio::test(start_paused = true)]
async fn test_enforced_timeout_fires_once_and_drops_work() {
    let fixture = Fixture::new(TimeoutMode::Enforce);
    fixture.monitor.beat();

    let started = tokio::time::Instant::now();
    let result = fixture
        .chaperone
        .run_with_timeout(std::future::pending::<()>(), fixture.on_timeout())
        .await;

    match result {
        Err(ChaperoneError::HeartbeatTimeout {
            threshold,
            since_last_beat,
        }) => {
            assert_eq!(threshold, Duration::from_secs(5));
            assert!(since_last_beat >= threshold);
        }
        other => panic!("expected heartbeat timeout, got {other:?}"),
    }
    assert!(started.elapsed() < Duration::from_secs(7));
    assert_eq!(fixture.fired(), 1);
    assert_eq!(fixture.metrics.total(Metric::HeartbeatTimeout), 1);
}

#[tokio::test(start_paused = true)]
async fn test_observe_only_never_interrupts() {
    let fixture = Fixture::new(TimeoutMode::ObserveOnly);
    let monitor = fixture.monitor.clone();

    let result = fixture
        .chaperone
        .run_with_timeout(
            async move {
                monitor.beat();
                tokio::time::sleep(Duration::from_millis(10_500)).await;
                monitor.beat();
                tokio::time::sleep(Duration::from_millis(10_500)).await;
                "survived"
            },
            fixture.on_timeout(),
        )
        .await;

    assert_eq!(result.unwrap(), "survived");
    assert_eq!(fixture.fired(), 0);
    // One report per stale episode, not per check.
    assert_eq!(fixture.metrics.total(Metric::HeartbeatTimeoutObserved), 2);
    assert_eq!(fixture.metrics.total(Metric::HeartbeatTimeout), 0);
}

#[tokio::test(start_paused = true)]
async fn test_completion_stops_watchdog() {
    let fixture = Fixture::new(TimeoutMode::Enforce);
    fixture.monitor.beat();

    let result = fixture
        .chaperone
        .run_with_timeout(async { 7 }, fixture.on_timeout())
        .await;
    assert_eq!(result.unwrap(), 7);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(fixture.fired(), 0);
    assert_eq!(fixture.metrics.total(Metric::HeartbeatTimeout), 0);
}

#[tokio::test(start_paused = true)]
async fn test_zero_check_period_falls_back_to_default() {
    let monitor = Arc::new(HeartbeatMonitor::new());
    let chaperone = HeartbeatTimeoutChaperone::new(
        monitor.clone(),
        ChaperoneConfig {
            check_period: Duration::ZERO,
            heartbeat_timeout: Duration::from_secs(5),
            mode: TimeoutMode::Enforce,
        },
    );

    monitor.beat();
    let started = tokio::time::Instant::now();
    let result = chaperone
        .run_with_timeout(std::future::pending::<()>(), || {})
        .await;

    assert!(matches!(result, Err(ChaperoneError::HeartbeatTimeout { .. })));
    assert!(started.elapsed() >= ChaperoneConfig::default().check_period);
}
