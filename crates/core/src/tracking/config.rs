//! Tracking worker configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the tracking worker and trigger delays.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackingConfig {
    /// Enable/disable the background worker.
    /// When disabled, jobs are still queued but nothing executes them.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// How often to poll the job queue (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Maximum steps executing at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Delay before the first step after a shipment is created or updated.
    #[serde(default = "default_kickoff_delay")]
    pub kickoff_delay_secs: u64,

    /// Delay between consecutive steps of one shipment.
    #[serde(default = "default_follow_up_delay")]
    pub follow_up_delay_secs: u64,

    /// Attempts per job before it is marked failed.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First retry delay for retryable step errors; doubles per attempt.
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_secs: u64,

    /// Upper bound for the retry delay.
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_secs: u64,

    /// How often to look for stalled chains (seconds, 0 = never).
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,

    /// A tracked, non-terminal shipment unchanged for this long with no
    /// pending job is considered stalled.
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,

    /// Finished jobs older than this are purged during reconciliation
    /// (seconds, 0 = keep forever).
    #[serde(default = "default_job_retention")]
    pub job_retention_secs: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    1000 // 1 second
}

fn default_concurrency() -> usize {
    4
}

fn default_kickoff_delay() -> u64 {
    60
}

fn default_follow_up_delay() -> u64 {
    300 // 5 minutes
}

fn default_max_attempts() -> u32 {
    5
}

fn default_retry_base_delay() -> u64 {
    30
}

fn default_retry_max_delay() -> u64 {
    900 // 15 minutes
}

fn default_reconcile_interval() -> u64 {
    600 // 10 minutes
}

fn default_stale_after() -> u64 {
    900 // 15 minutes
}

fn default_job_retention() -> u64 {
    7 * 24 * 3600 // 7 days
}

impl TrackingConfig {
    pub fn kickoff_delay(&self) -> Duration {
        Duration::from_secs(self.kickoff_delay_secs)
    }

    pub fn follow_up_delay(&self) -> Duration {
        Duration::from_secs(self.follow_up_delay_secs)
    }

    /// Backoff before retry number `attempt` (1-based), capped at
    /// `retry_max_delay_secs`.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let secs = self
            .retry_base_delay_secs
            .saturating_mul(1u64 << exponent)
            .min(self.retry_max_delay_secs);
        Duration::from_secs(secs)
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            poll_interval_ms: default_poll_interval(),
            concurrency: default_concurrency(),
            kickoff_delay_secs: default_kickoff_delay(),
            follow_up_delay_secs: default_follow_up_delay(),
            max_attempts: default_max_attempts(),
            retry_base_delay_secs: default_retry_base_delay(),
            retry_max_delay_secs: default_retry_max_delay(),
            reconcile_interval_secs: default_reconcile_interval(),
            stale_after_secs: default_stale_after(),
            job_retention_secs: default_job_retention(),
        }
    }
}
