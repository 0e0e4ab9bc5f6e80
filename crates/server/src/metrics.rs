//! Prometheus metrics for observability.
//!
//! This module provides metrics for monitoring the Waybill server:
//! - HTTP request metrics (latency, counts)
//! - Shipment write metrics
//! - Shipment, job queue and tracking worker status (collected dynamically)

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use regex_lite::Regex;
use waybill_core::{ShipmentFilter, ShipmentStatus};

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "waybill_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("waybill_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "waybill_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// Shipment Metrics
// =============================================================================

/// Shipment writes through the API by operation.
pub static SHIPMENT_WRITES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("waybill_shipment_writes_total", "Shipment writes through the API"),
        &["operation"], // "create", "update", "delete"
    )
    .unwrap()
});

/// Live shipments by status.
pub static SHIPMENTS_BY_STATUS: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("waybill_shipments_by_status", "Live shipments by status"),
        &["status"],
    )
    .unwrap()
});

// =============================================================================
// Tracking Worker Metrics
// =============================================================================

/// Whether the tracking worker is running.
pub static TRACKING_WORKER_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "waybill_tracking_worker_running",
        "Whether the tracking worker is running (1) or not (0)",
    )
    .unwrap()
});

/// Tracking steps executing right now.
pub static TRACKING_ACTIVE_STEPS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "waybill_tracking_active_steps",
        "Tracking steps currently executing",
    )
    .unwrap()
});

/// Jobs by queue state.
pub static JOBS_BY_STATE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("waybill_jobs_by_state", "Jobs in the queue by state"),
        &["state"], // "queued", "due", "running", "done", "failed"
    )
    .unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    // HTTP
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();

    // Shipments
    registry
        .register(Box::new(SHIPMENT_WRITES.clone()))
        .unwrap();
    registry
        .register(Box::new(SHIPMENTS_BY_STATUS.clone()))
        .unwrap();

    // Tracking worker
    registry
        .register(Box::new(TRACKING_WORKER_RUNNING.clone()))
        .unwrap();
    registry
        .register(Box::new(TRACKING_ACTIVE_STEPS.clone()))
        .unwrap();
    registry.register(Box::new(JOBS_BY_STATE.clone())).unwrap();

    // Core metrics (tracking steps, job chain, worker)
    for metric in waybill_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics in Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Collect dynamic metrics from current application state.
///
/// This is called before encoding metrics to update gauges with current values
/// from the worker, the job queue and the shipment store.
pub fn collect_dynamic_metrics(state: &crate::state::AppState) {
    let status = state.tracking_status();
    TRACKING_WORKER_RUNNING.set(if status.running { 1 } else { 0 });
    TRACKING_ACTIVE_STEPS.set(status.active_steps as i64);

    for (label, count) in [
        ("queued", status.queue.queued),
        ("due", status.queue.due),
        ("running", status.queue.running),
        ("done", status.queue.done),
        ("failed", status.queue.failed),
    ] {
        JOBS_BY_STATE.with_label_values(&[label]).set(count);
    }

    let store = state.shipment_store();
    for shipment_status in ShipmentStatus::ALL {
        let filter = ShipmentFilter::new().with_status(shipment_status);
        if let Ok(count) = store.count(&filter) {
            SHIPMENTS_BY_STATUS
                .with_label_values(&[shipment_status.as_str()])
                .set(count);
        }
    }
}

static NUMERIC_SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"/\d+(/|$)").unwrap());

/// Replace numeric path segments with `{id}` to keep label cardinality bounded.
pub fn normalize_path(path: &str) -> String {
    NUMERIC_SEGMENT.replace_all(path, "/{id}$1").to_string()
}
