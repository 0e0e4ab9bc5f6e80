//! Deferred job data types.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub i64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Named job types understood by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Advance the tracking status of one shipment.
    RunTrackingStep,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::RunTrackingStep => "run_tracking_step",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "run_tracking_step" => Some(JobKind::RunTrackingStep),
            _ => None,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for `run_at`.
    Queued,
    /// Claimed by a worker.
    Running,
    /// Finished (any step outcome other than a retryable error).
    Done,
    /// Gave up after a permanent error or exhausted attempts.
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Done => "done",
            JobState::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(JobState::Queued),
            "running" => Some(JobState::Running),
            "done" => Some(JobState::Done),
            "failed" => Some(JobState::Failed),
            _ => None,
        }
    }
}

/// Request to schedule a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    pub kind: JobKind,
    pub shipment_id: i64,
    /// How long to wait before the job becomes due.
    pub delay: Duration,
}

impl JobRequest {
    /// A tracking step for `shipment_id`, due after `delay`.
    pub fn tracking_step(shipment_id: i64, delay: Duration) -> Self {
        Self {
            kind: JobKind::RunTrackingStep,
            shipment_id,
            delay,
        }
    }
}

/// A job row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub shipment_id: i64,
    pub state: JobState,
    /// Earliest time the job may run.
    pub run_at: DateTime<Utc>,
    /// Number of times the job has been claimed.
    pub attempts: u32,
    pub max_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Returns true if another attempt is allowed after the current one.
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }
}

/// Job counts by state.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueStats {
    pub queued: i64,
    /// Queued jobs whose `run_at` has passed.
    pub due: i64,
    pub running: i64,
    pub done: i64,
    pub failed: i64,
}

/// Errors from the job queue.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The queue is closed or otherwise not accepting jobs.
    #[error("job scheduler unavailable: {0}")]
    Unavailable(String),

    /// Job not found.
    #[error("job not found: {0}")]
    NotFound(JobId),

    /// The requested delay cannot be represented as a run time.
    #[error("invalid job delay: {0:?}")]
    InvalidDelay(Duration),

    /// Storage error.
    #[error("job queue database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for SchedulerError {
    fn from(e: rusqlite::Error) -> Self {
        SchedulerError::Database(e.to_string())
    }
}
