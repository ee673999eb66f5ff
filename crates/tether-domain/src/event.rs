use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The kinds of telemetry event a device can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceEventType {
    Measurements,
    Location,
    Alert,
    CommandInvocation,
    CommandResponse,
    StateChange,
    StreamData,
}

/// Severity of a device alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
    Critical,
}

/// Type-specific payload carried by a [`DeviceEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EventPayload {
    Measurements {
        values: BTreeMap<String, f64>,
    },
    Location {
        latitude: f64,
        longitude: f64,
        elevation: Option<f64>,
    },
    Alert {
        alert_type: String,
        level: AlertLevel,
        message: String,
    },
    CommandInvocation {
        command: String,
        parameters: BTreeMap<String, String>,
    },
    CommandResponse {
        originating_event_id: Uuid,
        response: Option<String>,
    },
    StateChange {
        attribute: String,
        previous_value: Option<String>,
        new_value: String,
    },
    StreamData {
        stream_id: String,
        sequence_number: u64,
        data: Vec<u8>,
    },
}

impl EventPayload {
    pub fn event_type(&self) -> DeviceEventType {
        match self {
            EventPayload::Measurements { .. } => DeviceEventType::Measurements,
            EventPayload::Location { .. } => DeviceEventType::Location,
            EventPayload::Alert { .. } => DeviceEventType::Alert,
            EventPayload::CommandInvocation { .. } => DeviceEventType::CommandInvocation,
            EventPayload::CommandResponse { .. } => DeviceEventType::CommandResponse,
            EventPayload::StateChange { .. } => DeviceEventType::StateChange,
            EventPayload::StreamData { .. } => DeviceEventType::StreamData,
        }
    }
}

/// A persisted telemetry event. Immutable once handed to storage.
///
/// `id` and `received_date` are server-assigned; `alternate_id` is the
/// caller's idempotency key, unique per device when present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEvent {
    pub id: Uuid,
    pub alternate_id: Option<String>,
    pub device_id: Uuid,
    pub device_assignment_id: Uuid,
    pub event_date: DateTime<Utc>,
    pub received_date: DateTime<Utc>,
    pub payload: EventPayload,
}

impl DeviceEvent {
    pub fn event_type(&self) -> DeviceEventType {
        self.payload.event_type()
    }
}
