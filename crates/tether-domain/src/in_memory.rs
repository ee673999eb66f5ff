use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::trace;
use uuid::Uuid;

use crate::entity::{Device, DeviceAssignment};
use crate::error::DomainResult;
use crate::event::{DeviceEvent, DeviceEventType, EventPayload};
use crate::index::{DeviceEventIndex, IndexKey};
use crate::repository::{
    DeviceDirectory, DeviceStateRepository, EventPublisher, EventRepository, TenantBootstrap,
};
use crate::search::{DateRangeCriteria, EventPage, PageRequest};
use crate::snapshot::{DeviceStateSnapshot, DeviceStateUpdate};

struct StoredEvent {
    event: DeviceEvent,
    index_keys: Vec<IndexKey>,
}

#[derive(Default)]
struct StoreInner {
    events: Vec<StoredEvent>,
    by_id: HashMap<Uuid, usize>,
    by_alternate_id: HashMap<(Uuid, String), usize>,
}

/// Event storage held entirely in process memory. Suitable for tests and
/// single-node deployments; nothing survives a restart.
#[derive(Default)]
pub struct InMemoryEventStore {
    inner: RwLock<StoreInner>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().events.is_empty()
    }

    fn page_of(mut matches: Vec<DeviceEvent>, page: PageRequest) -> EventPage {
        // Ties on event_date break on received_date then id so paging is
        // stable across calls.
        matches.sort_by(|a, b| {
            a.event_date
                .cmp(&b.event_date)
                .then(a.received_date.cmp(&b.received_date))
                .then(a.id.cmp(&b.id))
        });
        let total = matches.len() as u64;
        let start = page.offset().min(matches.len());
        let end = (start + page.page_size).min(matches.len());
        EventPage {
            events: matches[start..end].to_vec(),
            total,
        }
    }
}

#[async_trait]
impl EventRepository for InMemoryEventStore {
    async fn persist(
        &self,
        event: DeviceEvent,
        index_keys: Vec<IndexKey>,
    ) -> DomainResult<DeviceEvent> {
        let mut inner = self.inner.write();

        // First-writer-wins on alternate id: the check and the insert happen
        // under the same write lock.
        if let Some(alternate_id) = &event.alternate_id {
            let key = (event.device_id, alternate_id.clone());
            if let Some(&position) = inner.by_alternate_id.get(&key) {
                return Ok(inner.events[position].event.clone());
            }
            let position = inner.events.len();
            inner.by_alternate_id.insert(key, position);
        }

        let position = inner.events.len();
        inner.by_id.insert(event.id, position);
        inner.events.push(StoredEvent {
            event: event.clone(),
            index_keys,
        });
        Ok(event)
    }

    async fn get_by_id(
        &self,
        device_id: Uuid,
        event_id: Uuid,
    ) -> DomainResult<Option<DeviceEvent>> {
        let inner = self.inner.read();
        Ok(inner
            .by_id
            .get(&event_id)
            .map(|&position| inner.events[position].event.clone())
            .filter(|event| event.device_id == device_id))
    }

    async fn get_by_alternate_id(
        &self,
        device_id: Uuid,
        alternate_id: String,
    ) -> DomainResult<Option<DeviceEvent>> {
        let inner = self.inner.read();
        Ok(inner
            .by_alternate_id
            .get(&(device_id, alternate_id))
            .map(|&position| inner.events[position].event.clone()))
    }

    async fn query(
        &self,
        event_type: DeviceEventType,
        index: DeviceEventIndex,
        entity_ids: Vec<Uuid>,
        criteria: DateRangeCriteria,
        page: PageRequest,
    ) -> DomainResult<EventPage> {
        let inner = self.inner.read();
        let matches: Vec<DeviceEvent> = inner
            .events
            .iter()
            .filter(|stored| {
                stored.event.event_type() == event_type
                    && criteria.contains(stored.event.event_date)
                    && stored
                        .index_keys
                        .iter()
                        .any(|key| key.index == index && entity_ids.contains(&key.entity_id))
            })
            .map(|stored| stored.event.clone())
            .collect();
        Ok(Self::page_of(matches, page))
    }

    async fn query_command_responses(
        &self,
        device_id: Uuid,
        invocation_id: Uuid,
        page: PageRequest,
    ) -> DomainResult<EventPage> {
        let inner = self.inner.read();
        let matches: Vec<DeviceEvent> = inner
            .events
            .iter()
            .filter(|stored| {
                stored.event.device_id == device_id
                    && matches!(
                        stored.event.payload,
                        EventPayload::CommandResponse { originating_event_id, .. }
                            if originating_event_id == invocation_id
                    )
            })
            .map(|stored| stored.event.clone())
            .collect();
        Ok(Self::page_of(matches, page))
    }

    async fn get_stream_data(
        &self,
        assignment_id: Uuid,
        stream_id: String,
        sequence_number: u64,
    ) -> DomainResult<Option<DeviceEvent>> {
        let inner = self.inner.read();
        Ok(inner
            .events
            .iter()
            .find(|stored| {
                stored.event.device_assignment_id == assignment_id
                    && matches!(
                        &stored.event.payload,
                        EventPayload::StreamData { stream_id: sid, sequence_number: seq, .. }
                            if *sid == stream_id && *seq == sequence_number
                    )
            })
            .map(|stored| stored.event.clone()))
    }

    async fn query_stream_data(
        &self,
        assignment_id: Uuid,
        stream_id: String,
        criteria: DateRangeCriteria,
        page: PageRequest,
    ) -> DomainResult<EventPage> {
        let inner = self.inner.read();
        let matches: Vec<DeviceEvent> = inner
            .events
            .iter()
            .filter(|stored| {
                stored.event.device_assignment_id == assignment_id
                    && criteria.contains(stored.event.event_date)
                    && matches!(
                        &stored.event.payload,
                        EventPayload::StreamData { stream_id: sid, .. } if *sid == stream_id
                    )
            })
            .map(|stored| stored.event.clone())
            .collect();
        Ok(Self::page_of(matches, page))
    }

    async fn ping(&self) -> DomainResult<()> {
        Ok(())
    }
}

/// Device/assignment directory backed by process memory. Entries are loaded
/// up front through the `register_*` methods.
#[derive(Default)]
pub struct InMemoryDeviceDirectory {
    devices: DashMap<String, Device>,
    assignments: DashMap<Uuid, DeviceAssignment>,
}

impl InMemoryDeviceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_device(&self, device: Device) {
        self.devices.insert(device.token.clone(), device);
    }

    pub fn register_assignment(&self, assignment: DeviceAssignment) {
        self.assignments.insert(assignment.id, assignment);
    }
}

#[async_trait]
impl DeviceDirectory for InMemoryDeviceDirectory {
    async fn assignment_by_id(
        &self,
        assignment_id: Uuid,
    ) -> DomainResult<Option<DeviceAssignment>> {
        Ok(self.assignments.get(&assignment_id).map(|a| a.clone()))
    }

    async fn device_by_token(&self, token: &str) -> DomainResult<Option<Device>> {
        Ok(self.devices.get(token).map(|d| d.clone()))
    }
}

/// Snapshot store keyed by assignment id. Merges are atomic per assignment
/// through the map's entry lock.
#[derive(Default)]
pub struct InMemoryDeviceStateRepository {
    snapshots: DashMap<Uuid, DeviceStateSnapshot>,
}

impl InMemoryDeviceStateRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeviceStateRepository for InMemoryDeviceStateRepository {
    async fn merge(&self, update: DeviceStateUpdate) -> DomainResult<()> {
        match self.snapshots.entry(update.device_assignment_id) {
            Entry::Occupied(mut occupied) => {
                occupied.get_mut().apply(&update);
            }
            Entry::Vacant(vacant) => {
                let mut snapshot = DeviceStateSnapshot::new(
                    update.device_id,
                    update.device_assignment_id,
                    update.received_date,
                );
                snapshot.apply(&update);
                vacant.insert(snapshot);
            }
        }
        Ok(())
    }

    async fn get(&self, assignment_id: Uuid) -> DomainResult<Option<DeviceStateSnapshot>> {
        Ok(self.snapshots.get(&assignment_id).map(|s| s.clone()))
    }
}

/// Bootstrap gate that is always ready. Used when tenant topology is static.
#[derive(Default)]
pub struct ReadyBootstrap;

#[async_trait]
impl TenantBootstrap for ReadyBootstrap {
    async fn await_ready(&self, _tenant_id: &str) -> DomainResult<()> {
        Ok(())
    }
}

/// Publisher that drops every message. Used when fan-out is disabled.
#[derive(Default)]
pub struct NoopPublisher;

#[async_trait]
impl EventPublisher for NoopPublisher {
    async fn publish(&self, subject: String, payload: Bytes) -> DomainResult<()> {
        trace!(subject = %subject, size_bytes = payload.len(), "Dropping fan-out message");
        Ok(())
    }
}
