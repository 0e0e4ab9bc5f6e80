//! Tracking status progression.
//!
//! ```text
//! Pending -> Processing -> Shipped -> InTransit -> Delivered
//! ```
//!
//! Terminal statuses map to themselves.

use crate::shipment::ShipmentStatus;

/// Compute the status a tracking step moves a shipment to.
///
/// Without a tracking number, or with no stored status, the result is always
/// `Pending`.
pub fn next_status(current: Option<ShipmentStatus>, has_tracking_number: bool) -> ShipmentStatus {
    let current = match current {
        Some(status) if has_tracking_number => status,
        _ => return ShipmentStatus::Pending,
    };

    match current {
        ShipmentStatus::Pending => ShipmentStatus::Processing,
        ShipmentStatus::Processing => ShipmentStatus::Shipped,
        ShipmentStatus::Shipped => ShipmentStatus::InTransit,
        ShipmentStatus::InTransit => ShipmentStatus::Delivered,
        ShipmentStatus::Delivered => ShipmentStatus::Delivered,
        ShipmentStatus::Cancelled => ShipmentStatus::Cancelled,
        ShipmentStatus::Failed => ShipmentStatus::Failed,
    }
}
