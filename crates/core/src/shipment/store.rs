//! Shipment storage trait and types.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::shipment::{Shipment, ShipmentStatus};

/// Error type for shipment storage operations.
#[derive(Debug, Error)]
pub enum ShipmentError {
    /// Shipment not found (or soft-deleted).
    #[error("Shipment not found: {0}")]
    NotFound(i64),

    /// The database could not be reached or the statement failed.
    #[error("Database error: {0}")]
    Database(String),

    /// A stored row could not be decoded (e.g. an unknown status value).
    #[error("Invalid shipment data for {id}: {reason}")]
    InvalidData { id: i64, reason: String },
}

impl ShipmentError {
    /// Returns true if retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ShipmentError::Database(_))
    }
}

impl From<rusqlite::Error> for ShipmentError {
    fn from(e: rusqlite::Error) -> Self {
        ShipmentError::Database(e.to_string())
    }
}

/// Request to create a new shipment.
#[derive(Debug, Clone, Default)]
pub struct CreateShipmentRequest {
    pub carrier: Option<String>,
    pub service_code: Option<String>,
    pub tracking_number: Option<String>,
    pub status: Option<ShipmentStatus>,
}

/// Partial update. `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default)]
pub struct ShipmentPatch {
    pub carrier: Option<String>,
    pub service_code: Option<String>,
    /// `Some("")` clears the tracking number.
    pub tracking_number: Option<String>,
    pub status: Option<ShipmentStatus>,
}

impl ShipmentPatch {
    /// Returns true if the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        self.carrier.is_none()
            && self.service_code.is_none()
            && self.tracking_number.is_none()
            && self.status.is_none()
    }
}

/// Filter for querying shipments.
#[derive(Debug, Clone, Default)]
pub struct ShipmentFilter {
    /// Filter by status.
    pub status: Option<ShipmentStatus>,
    /// Maximum number of results.
    pub limit: i64,
    /// Offset for pagination.
    pub offset: i64,
}

impl ShipmentFilter {
    /// Create a new filter with defaults.
    pub fn new() -> Self {
        Self {
            status: None,
            limit: 100,
            offset: 0,
        }
    }

    pub fn with_status(mut self, status: ShipmentStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Result of a conditional status write.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusTransition {
    /// The stored status matched and was replaced.
    Applied(Shipment),
    /// The stored status no longer matched the expected one.
    Conflict { found: Option<ShipmentStatus> },
    /// The shipment disappeared between read and write.
    NotFound,
}

/// Trait for shipment storage backends.
pub trait ShipmentStore: Send + Sync {
    /// Create a new shipment.
    fn create(&self, request: CreateShipmentRequest) -> Result<Shipment, ShipmentError>;

    /// Get a live (not deleted) shipment by ID.
    fn get(&self, id: i64) -> Result<Option<Shipment>, ShipmentError>;

    /// List live shipments matching the filter, newest first.
    fn list(&self, filter: &ShipmentFilter) -> Result<Vec<Shipment>, ShipmentError>;

    /// Count live shipments matching the filter (ignores limit/offset).
    fn count(&self, filter: &ShipmentFilter) -> Result<i64, ShipmentError>;

    /// Apply a partial update and bump `updated_at`.
    fn update(&self, id: i64, patch: ShipmentPatch) -> Result<Shipment, ShipmentError>;

    /// Soft-delete a shipment. Returns the shipment as it was before deletion.
    fn delete(&self, id: i64) -> Result<Shipment, ShipmentError>;

    /// Set `status = new` and `updated_at = now` only if the stored status is
    /// still `expected`. The check and the write happen in one statement.
    fn transition_status(
        &self,
        id: i64,
        expected: Option<ShipmentStatus>,
        new: ShipmentStatus,
    ) -> Result<StatusTransition, ShipmentError>;

    /// Live shipments with a tracking number and a non-terminal status that
    /// have not changed since `before`, oldest first.
    fn list_stale_tracked(
        &self,
        before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Shipment>, ShipmentError>;
}
