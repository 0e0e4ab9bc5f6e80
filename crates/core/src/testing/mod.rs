//! Testing utilities and test doubles.
//!
//! # Example
//!
//! ```rust,ignore
//! use waybill_core::testing::{FailingShipmentStore, MockJobScheduler, StoreFailure};
//!
//! let store = Arc::new(FailingShipmentStore::in_memory()?);
//! let scheduler = Arc::new(MockJobScheduler::new());
//!
//! store.fail_writes(Some(StoreFailure::Database("disk I/O error".into())));
//! let result = service.run_step(id).await;
//! assert!(result.is_retryable());
//! ```

mod failing_store;
mod mock_scheduler;

pub use failing_store::{FailingShipmentStore, StoreFailure};
pub use mock_scheduler::{MockJobScheduler, RecordedEnqueue};

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::shipment::{CreateShipmentRequest, ShipmentStatus};

    /// A shipment with a tracking number and the given status.
    pub fn tracked_shipment(
        tracking_number: &str,
        status: Option<ShipmentStatus>,
    ) -> CreateShipmentRequest {
        CreateShipmentRequest {
            carrier: Some("usps".to_string()),
            service_code: Some("usps_priority".to_string()),
            tracking_number: Some(tracking_number.to_string()),
            status,
        }
    }

    /// A shipment without a tracking number.
    pub fn untracked_shipment(status: Option<ShipmentStatus>) -> CreateShipmentRequest {
        CreateShipmentRequest {
            carrier: Some("ups".to_string()),
            service_code: None,
            tracking_number: None,
            status,
        }
    }
}
