use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DomainError, DomainResult};
use crate::event::{AlertLevel, EventPayload};

/// Caller-supplied data for creating one event. `id` and `received_date`
/// are assigned by the server and never appear here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEventCreateRequest {
    pub alternate_id: Option<String>,
    pub event_date: DateTime<Utc>,
    pub payload: EventPayload,
}

impl DeviceEventCreateRequest {
    /// Validate the type-specific required fields. Failures mean the request
    /// is never persisted.
    pub fn validate(&self) -> DomainResult<()> {
        match &self.payload {
            EventPayload::Measurements { values } => {
                if values.is_empty() {
                    return Err(DomainError::InvalidRequest(
                        "Measurements require at least one name/value pair".to_string(),
                    ));
                }
            }
            EventPayload::Location {
                latitude,
                longitude,
                ..
            } => {
                if !(-90.0..=90.0).contains(latitude) {
                    return Err(DomainError::InvalidRequest(format!(
                        "Latitude out of range: {latitude}"
                    )));
                }
                if !(-180.0..=180.0).contains(longitude) {
                    return Err(DomainError::InvalidRequest(format!(
                        "Longitude out of range: {longitude}"
                    )));
                }
            }
            EventPayload::Alert { alert_type, .. } => {
                if alert_type.is_empty() {
                    return Err(DomainError::InvalidRequest(
                        "Alert type cannot be empty".to_string(),
                    ));
                }
            }
            EventPayload::CommandInvocation { command, .. } => {
                if command.is_empty() {
                    return Err(DomainError::InvalidRequest(
                        "Command cannot be empty".to_string(),
                    ));
                }
            }
            EventPayload::CommandResponse { .. } => {}
            EventPayload::StateChange {
                attribute,
                new_value,
                ..
            } => {
                if attribute.is_empty() || new_value.is_empty() {
                    return Err(DomainError::InvalidRequest(
                        "State change requires an attribute and a new value".to_string(),
                    ));
                }
            }
            EventPayload::StreamData { stream_id, .. } => {
                if stream_id.is_empty() {
                    return Err(DomainError::InvalidRequest(
                        "Stream id cannot be empty".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// A batch of create requests submitted in one call. Items succeed or fail
/// independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEventBatch {
    pub requests: Vec<DeviceEventCreateRequest>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementsCreateRequest {
    pub alternate_id: Option<String>,
    pub event_date: DateTime<Utc>,
    pub values: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationCreateRequest {
    pub alternate_id: Option<String>,
    pub event_date: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertCreateRequest {
    pub alternate_id: Option<String>,
    pub event_date: DateTime<Utc>,
    pub alert_type: String,
    pub level: AlertLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandInvocationCreateRequest {
    pub alternate_id: Option<String>,
    pub event_date: DateTime<Utc>,
    pub command: String,
    pub parameters: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponseCreateRequest {
    pub alternate_id: Option<String>,
    pub event_date: DateTime<Utc>,
    pub originating_event_id: Uuid,
    pub response: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChangeCreateRequest {
    pub alternate_id: Option<String>,
    pub event_date: DateTime<Utc>,
    pub attribute: String,
    pub previous_value: Option<String>,
    pub new_value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDataCreateRequest {
    pub alternate_id: Option<String>,
    pub event_date: DateTime<Utc>,
    pub stream_id: String,
    pub sequence_number: u64,
    pub data: Vec<u8>,
}

impl From<MeasurementsCreateRequest> for DeviceEventCreateRequest {
    fn from(request: MeasurementsCreateRequest) -> Self {
        DeviceEventCreateRequest {
            alternate_id: request.alternate_id,
            event_date: request.event_date,
            payload: EventPayload::Measurements {
                values: request.values,
            },
        }
    }
}

impl From<LocationCreateRequest> for DeviceEventCreateRequest {
    fn from(request: LocationCreateRequest) -> Self {
        DeviceEventCreateRequest {
            alternate_id: request.alternate_id,
            event_date: request.event_date,
            payload: EventPayload::Location {
                latitude: request.latitude,
                longitude: request.longitude,
                elevation: request.elevation,
            },
        }
    }
}

impl From<AlertCreateRequest> for DeviceEventCreateRequest {
    fn from(request: AlertCreateRequest) -> Self {
        DeviceEventCreateRequest {
            alternate_id: request.alternate_id,
            event_date: request.event_date,
            payload: EventPayload::Alert {
                alert_type: request.alert_type,
                level: request.level,
                message: request.message,
            },
        }
    }
}

impl From<CommandInvocationCreateRequest> for DeviceEventCreateRequest {
    fn from(request: CommandInvocationCreateRequest) -> Self {
        DeviceEventCreateRequest {
            alternate_id: request.alternate_id,
            event_date: request.event_date,
            payload: EventPayload::CommandInvocation {
                command: request.command,
                parameters: request.parameters,
            },
        }
    }
}

impl From<CommandResponseCreateRequest> for DeviceEventCreateRequest {
    fn from(request: CommandResponseCreateRequest) -> Self {
        DeviceEventCreateRequest {
            alternate_id: request.alternate_id,
            event_date: request.event_date,
            payload: EventPayload::CommandResponse {
                originating_event_id: request.originating_event_id,
                response: request.response,
            },
        }
    }
}

impl From<StateChangeCreateRequest> for DeviceEventCreateRequest {
    fn from(request: StateChangeCreateRequest) -> Self {
        DeviceEventCreateRequest {
            alternate_id: request.alternate_id,
            event_date: request.event_date,
            payload: EventPayload::StateChange {
                attribute: request.attribute,
                previous_value: request.previous_value,
                new_value: request.new_value,
            },
        }
    }
}

impl From<StreamDataCreateRequest> for DeviceEventCreateRequest {
    fn from(request: StreamDataCreateRequest) -> Self {
        DeviceEventCreateRequest {
            alternate_id: request.alternate_id,
            event_date: request.event_date,
            payload: EventPayload::StreamData {
                stream_id: request.stream_id,
                sequence_number: request.sequence_number,
                data: request.data,
            },
        }
    }
}
