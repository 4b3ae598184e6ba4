// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::HeartbeatMonitor;
use crate::error::ChaperoneError;
use crate::metrics::{Metric, MetricClient, NoopMetricClient};

/// What the chaperone does when the monitor goes stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutMode {
    /// Fire the timeout callback and fail the run.
    Enforce,
    /// Log and count staleness, but let the run continue.
    ObserveOnly,
}

/// Configuration for [`HeartbeatTimeoutChaperone`].
#[derive(Debug, Clone)]
pub struct ChaperoneConfig {
    /// How often the watchdog checks the monitor. The first check happens one period after start.
    pub check_period: Duration,
    /// Maximum silence before the run is considered stale.
    pub heartbeat_timeout: Duration,
    /// Enforcement mode, driven by a feature flag.
    pub mode: TimeoutMode,
}

impl Default for ChaperoneConfig {
    fn default() -> Self {
        Self {
            check_period: Duration::from_secs(60),
            heartbeat_timeout: Duration::from_secs(3 * 60 * 60),
            mode: TimeoutMode::Enforce,
        }
    }
}

/// Runs a unit of work while a watchdog task checks a [`HeartbeatMonitor`].
pub struct HeartbeatTimeoutChaperone {
    monitor: Arc<HeartbeatMonitor>,
    config: ChaperoneConfig,
    metrics: Arc<dyn MetricClient>,
}

impl HeartbeatTimeoutChaperone {
    /// Create a chaperone over `monitor`.
    pub fn new(monitor: Arc<HeartbeatMonitor>, mut config: ChaperoneConfig) -> Self {
        if config.check_period.is_zero() {
            warn!("Heartbeat check period must be non-zero, using the default");
            config.check_period = ChaperoneConfig::default().check_period;
        }
        Self {
            monitor,
            config,
            metrics: Arc::new(NoopMetricClient),
        }
    }

    /// Report timeouts to `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricClient>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Run `work` to completion unless the monitor goes stale first.
    ///
    /// On staleness in [`TimeoutMode::Enforce`], `on_timeout` is invoked exactly
    /// once, `work` is dropped and [`ChaperoneError::HeartbeatTimeout`] is
    /// returned. Completion of `work` always stops the watchdog.
    pub async fn run_with_timeout<T, W, F>(&self, work: W, on_timeout: F) -> Result<T, ChaperoneError>
    where
        W: Future<Output = T>,
        F: FnOnce() + Send + 'static,
    {
        let stop = CancellationToken::new();
        let _stop_watchdog = stop.clone().drop_guard();
        let (timed_out_tx, timed_out_rx) = oneshot::channel();

        tokio::spawn(watch(
            self.monitor.clone(),
            self.config.clone(),
            self.metrics.clone(),
            stop,
            on_timeout,
            timed_out_tx,
        ));

        tokio::pin!(work);

        tokio::select! {
            biased;

            output = &mut work => Ok(output),

            Ok(since_last_beat) = timed_out_rx => Err(ChaperoneError::HeartbeatTimeout {
                threshold: self.config.heartbeat_timeout,
                since_last_beat,
            }),
        }
    }
}

async fn watch<F>(
    monitor: Arc<HeartbeatMonitor>,
    config: ChaperoneConfig,
    metrics: Arc<dyn MetricClient>,
    stop: CancellationToken,
    on_timeout: F,
    timed_out: oneshot::Sender<Duration>,
) where
    F: FnOnce() + Send + 'static,
{
    let mut ticker = tokio::time::interval_at(Instant::now() + config.check_period, config.check_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut stale_reported = false;

    loop {
        tokio::select! {
            biased;

            _ = stop.cancelled() => {
                debug!("Heartbeat watchdog stopped");
                return;
            }

            _ = ticker.tick() => {}
        }

        if monitor.is_beating(config.heartbeat_timeout) {
            stale_reported = false;
            continue;
        }

        let since_last_beat = monitor.time_since_last_beat().unwrap_or_default();
        match config.mode {
            TimeoutMode::Enforce => {
                warn!(
                    since_last_beat_secs = since_last_beat.as_secs(),
                    threshold_secs = config.heartbeat_timeout.as_secs(),
                    "Heartbeat timed out, interrupting run"
                );
                metrics.count(Metric::HeartbeatTimeout, 1, &[]);
                on_timeout();
                let _ = timed_out.send(since_last_beat);
                return;
            }
            TimeoutMode::ObserveOnly => {
                if !stale_reported {
                    warn!(
                        since_last_beat_secs = since_last_beat.as_secs(),
                        threshold_secs = config.heartbeat_timeout.as_secs(),
                        "Heartbeat is stale, timeout enforcement disabled"
                    );
                    metrics.count(Metric::HeartbeatTimeoutObserved, 1, &[]);
                    stale_reported = true;
                }
            }
        }
    }
}
