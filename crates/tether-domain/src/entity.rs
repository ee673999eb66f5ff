use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A physical field device registered with the directory.
///
/// `token` is the stable hardware identifier reported on the wire; it is the
/// key devices are cached under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: Uuid,
    pub token: String,
    pub area_id: Option<Uuid>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Status of a device assignment. Events are only accepted against an
/// `Active` assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignmentStatus {
    Active,
    Missing,
    Released,
}

/// The binding of a device to a logical role/location for a period of time.
/// Events are always recorded against an assignment, not a bare device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceAssignment {
    pub id: Uuid,
    pub token: String,
    pub device_id: Uuid,
    /// Hardware token of the assigned device, used to resolve the device
    /// through the cache without a second directory round trip.
    pub device_token: String,
    pub area_id: Option<Uuid>,
    pub customer_id: Option<Uuid>,
    pub status: AssignmentStatus,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl DeviceAssignment {
    pub fn is_active(&self) -> bool {
        self.status == AssignmentStatus::Active
    }
}
