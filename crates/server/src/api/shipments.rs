//! Shipment API handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use waybill_core::shipment::UnknownStatus;
use waybill_core::{
    CreateShipmentRequest, Job, Shipment, ShipmentError, ShipmentFilter, ShipmentPatch,
    ShipmentStatus, TrackingError,
};

use crate::metrics::SHIPMENT_WRITES;
use crate::state::AppState;

/// Maximum allowed page size
const MAX_ITEMS_PER_PAGE: i64 = 100;

/// Default page size
const DEFAULT_ITEMS_PER_PAGE: i64 = 10;

/// Jobs returned per shipment
const JOBS_LIMIT: i64 = 50;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for creating a shipment
#[derive(Debug, Deserialize)]
pub struct CreateShipmentBody {
    pub carrier: Option<String>,
    pub service_code: Option<String>,
    pub tracking_number: Option<String>,
    pub status: Option<ShipmentStatus>,
}

/// Request body for updating a shipment. Absent fields stay unchanged.
#[derive(Debug, Deserialize)]
pub struct UpdateShipmentBody {
    pub carrier: Option<String>,
    pub service_code: Option<String>,
    /// An empty string removes the tracking number
    pub tracking_number: Option<String>,
    pub status: Option<ShipmentStatus>,
}

/// Query parameters for listing shipments
#[derive(Debug, Deserialize)]
pub struct ListShipmentsParams {
    /// 1-based page number
    pub page: Option<i64>,
    pub items_per_page: Option<i64>,
    /// Filter by status
    pub status: Option<String>,
}

/// Response for shipment operations
#[derive(Debug, Serialize)]
pub struct ShipmentResponse {
    pub id: i64,
    pub carrier: Option<String>,
    pub service_code: Option<String>,
    pub tracking_number: Option<String>,
    pub status: Option<ShipmentStatus>,
    pub created_at: String,
    pub updated_at: Option<String>,
}

impl From<Shipment> for ShipmentResponse {
    fn from(shipment: Shipment) -> Self {
        Self {
            id: shipment.id,
            carrier: shipment.carrier,
            service_code: shipment.service_code,
            tracking_number: shipment.tracking_number,
            status: shipment.status,
            created_at: shipment.created_at.to_rfc3339(),
            updated_at: shipment.updated_at.map(|t| t.to_rfc3339()),
        }
    }
}

/// Paginated list of shipments
#[derive(Debug, Serialize)]
pub struct ListShipmentsResponse {
    pub data: Vec<ShipmentResponse>,
    pub total_count: i64,
    pub has_more: bool,
    pub page: i64,
    pub items_per_page: i64,
}

/// Tracking jobs of a shipment, newest first
#[derive(Debug, Serialize)]
pub struct ShipmentJobsResponse {
    pub shipment_id: i64,
    pub jobs: Vec<Job>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ShipmentErrorResponse {
    pub error: String,
}

pub type ApiError = (StatusCode, Json<ShipmentErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ShipmentErrorResponse {
            error: error.into(),
        }),
    )
}

fn not_found() -> ApiError {
    api_error(StatusCode::NOT_FOUND, "Shipment not found")
}

fn store_error(e: ShipmentError) -> ApiError {
    match e {
        ShipmentError::NotFound(_) => not_found(),
        other => api_error(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
    }
}

fn tracking_error(e: TrackingError) -> ApiError {
    let status = match e {
        TrackingError::NotFound(_) => StatusCode::NOT_FOUND,
        TrackingError::NoTrackingNumber(_) => StatusCode::BAD_REQUEST,
        TrackingError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        TrackingError::Scheduler(_) | TrackingError::Store(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    api_error(status, e.to_string())
}

// ============================================================================
// Handlers
// ============================================================================

/// Create a new shipment
///
/// Tracking starts after the configured kickoff delay when a tracking number
/// is present. A failed kickoff does not fail the request.
pub async fn create_shipment(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateShipmentBody>,
) -> Result<(StatusCode, Json<ShipmentResponse>), ApiError> {
    let request = CreateShipmentRequest {
        carrier: body.carrier,
        service_code: body.service_code,
        tracking_number: body.tracking_number,
        status: body.status,
    };

    let shipment = state
        .shipment_store()
        .create(request)
        .map_err(store_error)?;
    SHIPMENT_WRITES.with_label_values(&["create"]).inc();
    info!("Created shipment {}", shipment.id);

    if shipment.has_tracking_number() {
        state.tracking().kickoff_after_change(shipment.id).await;
    }

    Ok((StatusCode::CREATED, Json(ShipmentResponse::from(shipment))))
}

/// List shipments, newest first
pub async fn list_shipments(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListShipmentsParams>,
) -> Result<Json<ListShipmentsResponse>, ApiError> {
    let page = params.page.unwrap_or(1).max(1);
    let items_per_page = params
        .items_per_page
        .unwrap_or(DEFAULT_ITEMS_PER_PAGE)
        .clamp(1, MAX_ITEMS_PER_PAGE);

    let mut filter = ShipmentFilter::new()
        .with_limit(items_per_page)
        .with_offset((page - 1).saturating_mul(items_per_page));

    if let Some(ref status) = params.status {
        let status: ShipmentStatus = status
            .parse()
            .map_err(|e: UnknownStatus| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;
        filter = filter.with_status(status);
    }

    let store = state.shipment_store();
    let shipments = store.list(&filter).map_err(store_error)?;
    let total_count = store.count(&filter).map_err(store_error)?;

    Ok(Json(ListShipmentsResponse {
        has_more: page.saturating_mul(items_per_page) < total_count,
        data: shipments.into_iter().map(ShipmentResponse::from).collect(),
        total_count,
        page,
        items_per_page,
    }))
}

/// Get a shipment by ID
pub async fn get_shipment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<ShipmentResponse>, ApiError> {
    match state.shipment_store().get(id) {
        Ok(Some(shipment)) => Ok(Json(ShipmentResponse::from(shipment))),
        Ok(None) => Err(not_found()),
        Err(e) => Err(store_error(e)),
    }
}

/// Update a shipment
///
/// Restarts tracking when the shipment still has a tracking number after the
/// update.
pub async fn update_shipment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateShipmentBody>,
) -> Result<StatusCode, ApiError> {
    let patch = ShipmentPatch {
        carrier: body.carrier,
        service_code: body.service_code,
        tracking_number: body.tracking_number,
        status: body.status,
    };

    let shipment = state
        .shipment_store()
        .update(id, patch)
        .map_err(store_error)?;
    SHIPMENT_WRITES.with_label_values(&["update"]).inc();
    info!("Updated shipment {}", id);

    if shipment.has_tracking_number() {
        state.tracking().kickoff_after_change(shipment.id).await;
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Soft-delete a shipment
pub async fn delete_shipment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.shipment_store().delete(id).map_err(store_error)?;
    SHIPMENT_WRITES.with_label_values(&["delete"]).inc();
    info!("Deleted shipment {}", id);

    Ok(StatusCode::NO_CONTENT)
}

/// Queue an immediate tracking step
pub async fn update_tracking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state
        .tracking()
        .trigger_now(id)
        .await
        .map_err(tracking_error)?;

    Ok(StatusCode::NO_CONTENT)
}

/// List tracking jobs of a shipment
pub async fn list_shipment_jobs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<ShipmentJobsResponse>, ApiError> {
    if state
        .shipment_store()
        .get(id)
        .map_err(store_error)?
        .is_none()
    {
        return Err(not_found());
    }

    let jobs = state
        .job_queue()
        .list_for_shipment(id, JOBS_LIMIT)
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(ShipmentJobsResponse {
        shipment_id: id,
        jobs,
    }))
}
