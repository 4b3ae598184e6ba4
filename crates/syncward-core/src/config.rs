// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for sync attempts.
//!
//! All values have defaults; [`RuntimeConfig::from_env`] overrides them from
//! `SYNCWARD_*` environment variables.

use std::str::FromStr;
use std::time::Duration;

use crate::heartbeat::{ChaperoneConfig, TimeoutMode};
use crate::retry::RetryPolicy;
use crate::state::StateStoreConfig;
use crate::workload::WorkloadPollerConfig;

/// Feature flags that change runtime behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureFlags {
    /// When false, the heartbeat chaperone only logs staleness.
    pub enforce_heartbeat_timeout: bool,
    /// Output fetch cutoff of the workload poller, in heartbeats.
    pub output_fetch_cutoff_heartbeats: u32,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enforce_heartbeat_timeout: true,
            output_fetch_cutoff_heartbeats: 5,
        }
    }
}

/// Configuration of every component of a sync attempt.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Period of the scheduled state flush
    pub state_flush_period: Duration,
    /// How long closing the state store waits for an in-flight flush
    pub state_close_grace: Duration,
    /// Silence after which the producer is considered stale
    pub heartbeat_timeout: Duration,
    /// How often the chaperone checks the heartbeat
    pub heartbeat_check_period: Duration,
    /// How often the cancellation bridge probes
    pub cancellation_check_interval: Duration,
    /// Delay between workload status fetches
    pub workload_poll_interval: Duration,
    /// How often to log an unchanged workload status
    pub workload_status_log_interval: Duration,
    /// Expected heartbeat rate of a remote workload
    pub workload_heartbeat_rate: Duration,
    /// Delay between output document reads
    pub output_fetch_poll_interval: Duration,
    /// Retry policy for remote calls
    pub retry: RetryPolicy,
    /// Feature flags
    pub flags: FeatureFlags,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            state_flush_period: Duration::from_secs(10),
            state_close_grace: Duration::from_secs(60),
            heartbeat_timeout: Duration::from_secs(3 * 60 * 60),
            heartbeat_check_period: Duration::from_secs(60),
            cancellation_check_interval: Duration::from_secs(10),
            workload_poll_interval: Duration::from_secs(60),
            workload_status_log_interval: Duration::from_secs(600),
            workload_heartbeat_rate: Duration::from_secs(60),
            output_fetch_poll_interval: Duration::from_secs(1),
            retry: RetryPolicy::default(),
            flags: FeatureFlags::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from environment variables.
    ///
    /// Unset variables keep their default; set but unparseable ones are an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            state_flush_period: env_nonzero_secs("SYNCWARD_STATE_FLUSH_PERIOD_SECS", defaults.state_flush_period)?,
            state_close_grace: env_secs("SYNCWARD_STATE_CLOSE_GRACE_SECS", defaults.state_close_grace)?,
            heartbeat_timeout: env_nonzero_secs("SYNCWARD_HEARTBEAT_TIMEOUT_SECS", defaults.heartbeat_timeout)?,
            heartbeat_check_period: env_nonzero_secs(
                "SYNCWARD_HEARTBEAT_CHECK_PERIOD_SECS",
                defaults.heartbeat_check_period,
            )?,
            cancellation_check_interval: env_nonzero_secs(
                "SYNCWARD_CANCELLATION_CHECK_INTERVAL_SECS",
                defaults.cancellation_check_interval,
            )?,
            workload_poll_interval: env_nonzero_secs(
                "SYNCWARD_WORKLOAD_POLL_INTERVAL_SECS",
                defaults.workload_poll_interval,
            )?,
            workload_status_log_interval: env_nonzero_secs(
                "SYNCWARD_WORKLOAD_STATUS_LOG_INTERVAL_SECS",
                defaults.workload_status_log_interval,
            )?,
            workload_heartbeat_rate: env_nonzero_secs(
                "SYNCWARD_WORKLOAD_HEARTBEAT_RATE_SECS",
                defaults.workload_heartbeat_rate,
            )?,
            output_fetch_poll_interval: env_nonzero_millis(
                "SYNCWARD_OUTPUT_FETCH_POLL_MS",
                defaults.output_fetch_poll_interval,
            )?,
            retry: RetryPolicy {
                max_attempts: env_parse("SYNCWARD_API_MAX_ATTEMPTS", defaults.retry.max_attempts)?,
                base_delay: env_millis("SYNCWARD_API_RETRY_BASE_DELAY_MS", defaults.retry.base_delay)?,
                max_delay: env_millis("SYNCWARD_API_RETRY_MAX_DELAY_MS", defaults.retry.max_delay)?,
            },
            flags: FeatureFlags {
                enforce_heartbeat_timeout: env_bool(
                    "SYNCWARD_HEARTBEAT_TIMEOUT_ENFORCED",
                    defaults.flags.enforce_heartbeat_timeout,
                )?,
                output_fetch_cutoff_heartbeats: env_parse(
                    "SYNCWARD_OUTPUT_FETCH_CUTOFF_HEARTBEATS",
                    defaults.flags.output_fetch_cutoff_heartbeats,
                )?,
            },
        })
    }

    /// Set the state flush period.
    pub fn with_state_flush_period(mut self, period: Duration) -> Self {
        self.state_flush_period = period;
        self
    }

    /// Set the heartbeat staleness threshold and check period.
    pub fn with_heartbeat(mut self, timeout: Duration, check_period: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self.heartbeat_check_period = check_period;
        self
    }

    /// Set the cancellation probe interval.
    pub fn with_cancellation_check_interval(mut self, interval: Duration) -> Self {
        self.cancellation_check_interval = interval;
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the feature flags.
    pub fn with_flags(mut self, flags: FeatureFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Config of the state checkpoint store.
    pub fn state_store_config(&self) -> StateStoreConfig {
        StateStoreConfig {
            flush_period: self.state_flush_period,
            close_grace: self.state_close_grace,
        }
    }

    /// Config of the heartbeat chaperone.
    pub fn chaperone_config(&self) -> ChaperoneConfig {
        ChaperoneConfig {
            check_period: self.heartbeat_check_period,
            heartbeat_timeout: self.heartbeat_timeout,
            mode: if self.flags.enforce_heartbeat_timeout {
                TimeoutMode::Enforce
            } else {
                TimeoutMode::ObserveOnly
            },
        }
    }

    /// Config of the workload poller.
    pub fn poller_config(&self) -> WorkloadPollerConfig {
        WorkloadPollerConfig {
            poll_interval: self.workload_poll_interval,
            status_log_interval: self.workload_status_log_interval,
            heartbeat_rate: self.workload_heartbeat_rate,
            output_fetch_cutoff_heartbeats: self.flags.output_fetch_cutoff_heartbeats,
            output_poll_interval: self.output_fetch_poll_interval,
        }
    }
}

fn env_parse<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value }),
        Err(_) => Ok(default),
    }
}

fn env_secs(name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    env_parse(name, default.as_secs()).map(Duration::from_secs)
}

fn env_millis(name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    env_parse(name, default.as_millis() as u64).map(Duration::from_millis)
}

/// Like [`env_secs`], rejecting zero. Used for periods that drive timers.
fn env_nonzero_secs(name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    nonzero(name, env_secs(name, default)?)
}

fn env_nonzero_millis(name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    nonzero(name, env_millis(name, default)?)
}

fn nonzero(name: &'static str, duration: Duration) -> Result<Duration, ConfigError> {
    if duration.is_zero() {
        return Err(ConfigError::InvalidValue {
            name,
            value: "0".to_string(),
        });
    }
    Ok(duration)
}

fn env_bool(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(name) {
        Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(ConfigError::InvalidValue { name, value }),
        },
        Err(_) => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable has a value that cannot be parsed.
    #[error("Invalid value for {name}: {value:?}")]
    InvalidValue {
        /// Variable name
        name: &'static str,
        /// Rejected value
        value: String,
    },
}
