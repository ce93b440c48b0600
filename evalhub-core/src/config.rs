//! Service configuration.
//!
//! Built once at startup and passed into the service and sweeper; nothing
//! reads ambient state at call time.

use std::time::Duration;

use chrono::{DateTime, Utc};
use evalhub_store::RetryPolicy;
use serde::{Deserialize, Serialize};

/// Configuration for the evaluation service and its background sweeper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalHubConfig {
    /// Retry policy applied to every store operation.
    #[serde(default)]
    pub retry: RetryPolicy,

    /// How long an evaluation may stay running before the sweeper fails it.
    #[serde(default = "default_evaluation_timeout", with = "humantime_serde")]
    pub evaluation_timeout: Duration,

    /// Interval between sweeper passes.
    #[serde(default = "default_sweep_interval", with = "humantime_serde")]
    pub sweep_interval: Duration,

    /// Metric rollups older than this many days are purged.
    #[serde(default = "default_metrics_retention_days")]
    pub metrics_retention_days: u32,
}

fn default_evaluation_timeout() -> Duration {
    Duration::from_secs(3600)
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_metrics_retention_days() -> u32 {
    30
}

impl Default for EvalHubConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            evaluation_timeout: default_evaluation_timeout(),
            sweep_interval: default_sweep_interval(),
            metrics_retention_days: default_metrics_retention_days(),
        }
    }
}

impl EvalHubConfig {
    /// Override the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Override the evaluation timeout.
    #[must_use]
    pub fn with_evaluation_timeout(mut self, timeout: Duration) -> Self {
        self.evaluation_timeout = timeout;
        self
    }

    /// Override the sweep interval.
    #[must_use]
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Override the metrics retention window.
    #[must_use]
    pub fn with_metrics_retention_days(mut self, days: u32) -> Self {
        self.metrics_retention_days = days;
        self
    }

    /// The instant before which metric rollups are considered expired.
    #[must_use]
    pub fn retention_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - chrono::Duration::days(i64::from(self.metrics_retention_days))
    }
}
