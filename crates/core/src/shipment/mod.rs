//! Shipments and their storage.

mod sqlite_store;
mod store;
mod types;

pub(crate) use sqlite_store::{format_timestamp, parse_timestamp};
pub use sqlite_store::SqliteShipmentStore;
pub use store::{
    CreateShipmentRequest, ShipmentError, ShipmentFilter, ShipmentPatch, ShipmentStore,
    StatusTransition,
};
pub use types::{Shipment, ShipmentStatus, UnknownStatus};
