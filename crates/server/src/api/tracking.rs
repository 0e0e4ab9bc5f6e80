//! Tracking worker API handlers.

use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;
use waybill_core::QueueStats;

use crate::state::AppState;

/// Tracking worker status response
#[derive(Debug, Serialize)]
pub struct TrackingStatusResponse {
    /// Whether the worker is enabled in config
    pub enabled: bool,
    /// Whether the worker loops are currently running
    pub running: bool,
    /// Steps executing right now
    pub active_steps: usize,
    pub concurrency: usize,
    /// Job counts by state
    pub queue: QueueStats,
    /// Whether the job queue accepts new jobs
    pub accepting_jobs: bool,
}

/// Get tracking worker status
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<TrackingStatusResponse> {
    let status = state.tracking_status();

    Json(TrackingStatusResponse {
        enabled: state.config().tracking.enabled,
        running: status.running,
        active_steps: status.active_steps,
        concurrency: status.concurrency,
        queue: status.queue,
        accepting_jobs: state.job_queue().is_open(),
    })
}
