use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::{DeviceEvent, EventPayload};

/// Per-assignment rollup of most-recent-event references, used for presence
/// tracking and "last known value" queries. Exactly one live snapshot exists
/// per assignment; it is updated in place, never appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStateSnapshot {
    pub device_id: Uuid,
    pub device_assignment_id: Uuid,
    pub last_interaction_date: DateTime<Utc>,
    pub presence_missing_date: Option<DateTime<Utc>>,
    pub last_location_event_id: Option<Uuid>,
    /// Last event id per measurement name. Names are chosen by the device's
    /// specification, not a fixed enum.
    pub last_measurement_event_ids: BTreeMap<String, Uuid>,
    /// Last event id per alert type.
    pub last_alert_event_ids: BTreeMap<String, Uuid>,
}

/// Delta the event channel derives from one persisted event. Merging is
/// last-writer-wins on `received_date`: an update older than the snapshot's
/// watermark must be ignored by the repository.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceStateUpdate {
    pub device_id: Uuid,
    pub device_assignment_id: Uuid,
    pub received_date: DateTime<Utc>,
    pub last_location_event_id: Option<Uuid>,
    pub measurement_event_ids: BTreeMap<String, Uuid>,
    pub alert_event_ids: BTreeMap<String, Uuid>,
}

impl DeviceStateUpdate {
    /// Derive the snapshot delta for a persisted event. Every event type
    /// refreshes the interaction watermark; location, measurement, and alert
    /// events additionally record their event id.
    pub fn from_event(event: &DeviceEvent) -> Self {
        let mut update = DeviceStateUpdate {
            device_id: event.device_id,
            device_assignment_id: event.device_assignment_id,
            received_date: event.received_date,
            last_location_event_id: None,
            measurement_event_ids: BTreeMap::new(),
            alert_event_ids: BTreeMap::new(),
        };
        match &event.payload {
            EventPayload::Location { .. } => {
                update.last_location_event_id = Some(event.id);
            }
            EventPayload::Measurements { values } => {
                for name in values.keys() {
                    update.measurement_event_ids.insert(name.clone(), event.id);
                }
            }
            EventPayload::Alert { alert_type, .. } => {
                update.alert_event_ids.insert(alert_type.clone(), event.id);
            }
            _ => {}
        }
        update
    }
}

impl DeviceStateSnapshot {
    /// Empty snapshot for an assignment that has not reported yet.
    pub fn new(device_id: Uuid, device_assignment_id: Uuid, seen_at: DateTime<Utc>) -> Self {
        Self {
            device_id,
            device_assignment_id,
            last_interaction_date: seen_at,
            presence_missing_date: None,
            last_location_event_id: None,
            last_measurement_event_ids: BTreeMap::new(),
            last_alert_event_ids: BTreeMap::new(),
        }
    }

    /// Apply an update, returning false when it was ignored as stale.
    ///
    /// `last_interaction_date` doubles as the last-writer-wins watermark: an
    /// update whose `received_date` is older than it carries values already
    /// superseded by a later event.
    pub fn apply(&mut self, update: &DeviceStateUpdate) -> bool {
        if update.received_date < self.last_interaction_date {
            return false;
        }
        self.last_interaction_date = update.received_date;
        self.presence_missing_date = None;
        if update.last_location_event_id.is_some() {
            self.last_location_event_id = update.last_location_event_id;
        }
        for (name, event_id) in &update.measurement_event_ids {
            self.last_measurement_event_ids
                .insert(name.clone(), *event_id);
        }
        for (alert_type, event_id) in &update.alert_event_ids {
            self.last_alert_event_ids
                .insert(alert_type.clone(), *event_id);
        }
        true
    }
}
