//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Tracking steps (outcomes, durations, status transitions)
//! - Job chain (follow-ups, enqueue failures, kickoffs)
//! - Worker (retries, failed jobs, reconciliation)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Tracking Step Metrics
// =============================================================================

/// Tracking steps executed by result.
pub static STEPS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("waybill_tracking_steps_total", "Total tracking steps executed"),
        &["result"], // "not_found", "no_tracking", "terminal", "updated", "conflict", "error"
    )
    .unwrap()
});

/// Tracking step duration in seconds.
pub static STEP_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "waybill_tracking_step_duration_seconds",
            "Duration of a tracking step",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
        &["result"],
    )
    .unwrap()
});

/// Status transitions written by tracking steps.
pub static STATUS_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "waybill_status_transitions_total",
            "Shipment status transitions written by tracking steps",
        ),
        &["to"],
    )
    .unwrap()
});

// =============================================================================
// Job Chain Metrics
// =============================================================================

/// Follow-up steps queued after a status change.
pub static FOLLOW_UPS_SCHEDULED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "waybill_follow_ups_scheduled_total",
        "Follow-up tracking steps queued",
    )
    .unwrap()
});

/// Follow-up steps that could not be queued after a successful status write.
pub static FOLLOW_UP_ENQUEUE_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "waybill_follow_up_enqueue_failures_total",
        "Follow-up tracking steps that failed to enqueue",
    )
    .unwrap()
});

/// Kickoff requests by result.
pub static KICKOFFS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("waybill_tracking_kickoffs_total", "Tracking kickoff requests"),
        &["result"], // "queued", "not_found", "no_tracking", "unavailable", "error"
    )
    .unwrap()
});

// =============================================================================
// Worker Metrics
// =============================================================================

/// Jobs requeued after a retryable error.
pub static JOB_RETRIES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "waybill_job_retries_total",
        "Jobs requeued after a retryable error",
    )
    .unwrap()
});

/// Jobs that gave up.
pub static JOBS_FAILED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("waybill_jobs_failed_total", "Jobs marked as failed"),
        &["reason"], // "permanent", "exhausted"
    )
    .unwrap()
});

/// Stalled chains restarted by the reconciliation sweep.
pub static CHAINS_RECONCILED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "waybill_chains_reconciled_total",
        "Stalled tracking chains restarted by reconciliation",
    )
    .unwrap()
});

/// Get all core metrics for registration.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Steps
        Box::new(STEPS_TOTAL.clone()),
        Box::new(STEP_DURATION.clone()),
        Box::new(STATUS_TRANSITIONS.clone()),
        // Job chain
        Box::new(FOLLOW_UPS_SCHEDULED.clone()),
        Box::new(FOLLOW_UP_ENQUEUE_FAILURES.clone()),
        Box::new(KICKOFFS.clone()),
        // Worker
        Box::new(JOB_RETRIES.clone()),
        Box::new(JOBS_FAILED.clone()),
        Box::new(CHAINS_RECONCILED.clone()),
    ]
}
