use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::event::{DeviceEvent, DeviceEventType, EventPayload};
use crate::repository::EventPublisher;

pub const TOPIC_MEASUREMENTS_ADDED: &str = "measurements-added";
pub const TOPIC_LOCATION_ADDED: &str = "location-added";
pub const TOPIC_ALERT_ADDED: &str = "alert-added";
pub const TOPIC_COMMAND_INVOCATION_ADDED: &str = "command-invocation-added";
pub const TOPIC_COMMAND_RESPONSE_ADDED: &str = "command-response-added";
pub const TOPIC_STATE_CHANGE_ADDED: &str = "state-change-added";
pub const TOPIC_STREAM_DATA_ADDED: &str = "stream-data-added";

/// Broadcast topic for an event type.
pub fn topic_for(event_type: DeviceEventType) -> &'static str {
    match event_type {
        DeviceEventType::Measurements => TOPIC_MEASUREMENTS_ADDED,
        DeviceEventType::Location => TOPIC_LOCATION_ADDED,
        DeviceEventType::Alert => TOPIC_ALERT_ADDED,
        DeviceEventType::CommandInvocation => TOPIC_COMMAND_INVOCATION_ADDED,
        DeviceEventType::CommandResponse => TOPIC_COMMAND_RESPONSE_ADDED,
        DeviceEventType::StateChange => TOPIC_STATE_CHANGE_ADDED,
        DeviceEventType::StreamData => TOPIC_STREAM_DATA_ADDED,
    }
}

/// Wire-shaped copy of a persisted event published to downstream consumers.
/// Index keys and other internal-only state are stripped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEvent {
    pub id: Uuid,
    pub alternate_id: Option<String>,
    pub tenant_id: String,
    pub device_id: Uuid,
    pub device_assignment_id: Uuid,
    pub event_date: DateTime<Utc>,
    pub received_date: DateTime<Utc>,
    pub payload: EventPayload,
}

impl WireEvent {
    pub fn from_event(tenant_id: &str, event: &DeviceEvent) -> Self {
        Self {
            id: event.id,
            alternate_id: event.alternate_id.clone(),
            tenant_id: tenant_id.to_string(),
            device_id: event.device_id,
            device_assignment_id: event.device_assignment_id,
            event_date: event.event_date,
            received_date: event.received_date,
            payload: event.payload.clone(),
        }
    }
}

/// Republishes persisted events on per-type broadcast topics.
///
/// Publishing is fire-and-forget on a spawned task: delivery is
/// at-most-once, failures are logged and dropped, and the ingest caller's
/// response never waits on it. The processor keeps no queue of its own; if
/// publish throughput falls behind, backpressure belongs to the transport.
pub struct FanoutProcessor {
    tenant_id: String,
    publisher: Arc<dyn EventPublisher>,
}

impl FanoutProcessor {
    pub fn new(tenant_id: String, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            tenant_id,
            publisher,
        }
    }

    /// Invoked by the event channel after persistence is durable, never
    /// before.
    pub fn on_persisted(&self, event: &DeviceEvent) {
        let wire = WireEvent::from_event(&self.tenant_id, event);
        let subject = format!("{}.{}", self.tenant_id, topic_for(event.event_type()));

        let payload = match serde_json::to_vec(&wire) {
            Ok(payload) => Bytes::from(payload),
            Err(e) => {
                warn!(event_id = %event.id, error = %e, "Failed to marshal event for fan-out");
                return;
            }
        };

        debug!(
            subject = %subject,
            event_id = %event.id,
            size_bytes = payload.len(),
            "Publishing persisted event"
        );

        let publisher = self.publisher.clone();
        let event_id = event.id;
        tokio::spawn(async move {
            if let Err(e) = publisher.publish(subject.clone(), payload).await {
                warn!(
                    subject = %subject,
                    event_id = %event_id,
                    error = %e,
                    "Fan-out publish failed, dropping event copy"
                );
            }
        });
    }
}
