//! Types for the tracking workflow.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::jobs::{JobId, QueueStats, SchedulerError};
use crate::shipment::{ShipmentError, ShipmentStatus};

/// What happened to the next link of the job chain after a status write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FollowUp {
    /// Another step is queued.
    Scheduled { job_id: JobId },
    /// The new status is terminal; the chain ends here.
    NotNeeded,
    /// The status was written but the next step could not be queued.
    EnqueueFailed { error: String },
}

/// Outcome of one tracking step. Exactly one case applies per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepResult {
    /// The shipment does not exist or was deleted.
    NotFound { shipment_id: i64 },

    /// The shipment has no tracking number.
    NoTracking { shipment_id: i64 },

    /// The shipment is already in a terminal status.
    Terminal {
        shipment_id: i64,
        current_status: ShipmentStatus,
    },

    /// The status advanced.
    Updated {
        shipment_id: i64,
        old_status: Option<ShipmentStatus>,
        new_status: ShipmentStatus,
        follow_up: FollowUp,
    },

    /// The stored status changed between read and write; nothing was written.
    Conflict {
        shipment_id: i64,
        expected: Option<ShipmentStatus>,
        found: Option<ShipmentStatus>,
    },

    /// Loading or persisting failed.
    Error {
        shipment_id: i64,
        error: String,
        /// True if running the step again later may succeed.
        retryable: bool,
    },
}

impl StepResult {
    pub fn shipment_id(&self) -> i64 {
        match self {
            StepResult::NotFound { shipment_id }
            | StepResult::NoTracking { shipment_id }
            | StepResult::Terminal { shipment_id, .. }
            | StepResult::Updated { shipment_id, .. }
            | StepResult::Conflict { shipment_id, .. }
            | StepResult::Error { shipment_id, .. } => *shipment_id,
        }
    }

    /// Short label used for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            StepResult::NotFound { .. } => "not_found",
            StepResult::NoTracking { .. } => "no_tracking",
            StepResult::Terminal { .. } => "terminal",
            StepResult::Updated { .. } => "updated",
            StepResult::Conflict { .. } => "conflict",
            StepResult::Error { .. } => "error",
        }
    }

    /// Returns true for an error the job runner should retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StepResult::Error { retryable: true, .. })
    }

    pub(crate) fn from_store_error(shipment_id: i64, error: &ShipmentError) -> Self {
        StepResult::Error {
            shipment_id,
            error: error.to_string(),
            retryable: error.is_transient(),
        }
    }
}

/// Errors from caller-facing tracking operations.
#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("Shipment not found")]
    NotFound(i64),

    #[error("Shipment has no tracking number")]
    NoTrackingNumber(i64),

    /// The job scheduler is not accepting work.
    #[error("Job scheduler not available: {0}")]
    ServiceUnavailable(String),

    #[error("Scheduler error: {0}")]
    Scheduler(SchedulerError),

    #[error("Store error: {0}")]
    Store(#[from] ShipmentError),
}

impl From<SchedulerError> for TrackingError {
    fn from(e: SchedulerError) -> Self {
        match e {
            SchedulerError::Unavailable(reason) => TrackingError::ServiceUnavailable(reason),
            other => TrackingError::Scheduler(other),
        }
    }
}

/// Errors from the tracking worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Job queue error: {0}")]
    Queue(#[from] SchedulerError),

    #[error("Store error: {0}")]
    Store(#[from] ShipmentError),
}

/// Current status of the tracking worker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerStatus {
    /// Whether the worker loops are running.
    pub running: bool,
    /// Steps executing right now.
    pub active_steps: usize,
    /// Maximum concurrent steps.
    pub concurrency: usize,
    /// Job counts by state.
    pub queue: QueueStats,
}
