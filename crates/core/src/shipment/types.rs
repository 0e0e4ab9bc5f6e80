//! Core shipment data types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a shipment.
///
/// Automatic progression:
/// ```text
/// Pending -> Processing -> Shipped -> InTransit -> Delivered
/// ```
///
/// `Delivered`, `Cancelled` and `Failed` are terminal. `Cancelled` and `Failed`
/// are only ever set through an explicit shipment update.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ShipmentStatus {
    Pending,
    Processing,
    Shipped,
    InTransit,
    Delivered,
    Cancelled,
    Failed,
}

impl ShipmentStatus {
    /// Every status, in progression order followed by the side exits.
    pub const ALL: [ShipmentStatus; 7] = [
        ShipmentStatus::Pending,
        ShipmentStatus::Processing,
        ShipmentStatus::Shipped,
        ShipmentStatus::InTransit,
        ShipmentStatus::Delivered,
        ShipmentStatus::Cancelled,
        ShipmentStatus::Failed,
    ];

    /// Returns true if no further automatic transition happens from this status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ShipmentStatus::Delivered | ShipmentStatus::Cancelled | ShipmentStatus::Failed
        )
    }

    /// Returns the status as stored in the database and sent over the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            ShipmentStatus::Pending => "pending",
            ShipmentStatus::Processing => "processing",
            ShipmentStatus::Shipped => "shipped",
            ShipmentStatus::InTransit => "in_transit",
            ShipmentStatus::Delivered => "delivered",
            ShipmentStatus::Cancelled => "cancelled",
            ShipmentStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ShipmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown shipment status: {}", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl FromStr for ShipmentStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ShipmentStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// A shipment as seen by the tracking workflow and the API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Shipment {
    /// Database identifier.
    pub id: i64,

    /// Carrier code (e.g. "usps").
    #[serde(default)]
    pub carrier: Option<String>,

    /// Carrier service level (e.g. "usps_priority").
    #[serde(default)]
    pub service_code: Option<String>,

    /// Carrier tracking number. Tracking only runs when this is present.
    #[serde(default)]
    pub tracking_number: Option<String>,

    /// Current status. `None` is treated as pending by the state machine.
    #[serde(default)]
    pub status: Option<ShipmentStatus>,

    /// When the shipment was created.
    pub created_at: DateTime<Utc>,

    /// Last mutation timestamp.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Shipment {
    /// Returns true if the shipment has a non-empty tracking number.
    pub fn has_tracking_number(&self) -> bool {
        self.tracking_number
            .as_deref()
            .is_some_and(|number| !number.is_empty())
    }

    /// Timestamp of the last observed change (falls back to creation time).
    pub fn last_changed_at(&self) -> DateTime<Utc> {
        self.updated_at.unwrap_or(self.created_at)
    }
}
