use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

use crate::entity::{Device, DeviceAssignment};
use crate::error::DomainResult;
use crate::event::{DeviceEvent, DeviceEventType};
use crate::index::{DeviceEventIndex, IndexKey};
use crate::search::{DateRangeCriteria, EventPage, PageRequest};
use crate::snapshot::{DeviceStateSnapshot, DeviceStateUpdate};

/// Storage collaborator for durable event persistence and index-driven
/// queries. The event channel is the only writer.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Persist an event with its write-time index keys. When the event
    /// carries an alternate id already persisted for the same device, the
    /// earlier event is returned instead of a duplicate (first-writer-wins).
    async fn persist(
        &self,
        event: DeviceEvent,
        index_keys: Vec<IndexKey>,
    ) -> DomainResult<DeviceEvent>;

    async fn get_by_id(&self, device_id: Uuid, event_id: Uuid)
        -> DomainResult<Option<DeviceEvent>>;

    async fn get_by_alternate_id(
        &self,
        device_id: Uuid,
        alternate_id: String,
    ) -> DomainResult<Option<DeviceEvent>>;

    /// Query one page of events of the given type under an index axis.
    /// Results are ordered by `event_date` ascending, merged across all
    /// supplied entity ids.
    async fn query(
        &self,
        event_type: DeviceEventType,
        index: DeviceEventIndex,
        entity_ids: Vec<Uuid>,
        criteria: DateRangeCriteria,
        page: PageRequest,
    ) -> DomainResult<EventPage>;

    /// Command responses correlated to an invocation event.
    async fn query_command_responses(
        &self,
        device_id: Uuid,
        invocation_id: Uuid,
        page: PageRequest,
    ) -> DomainResult<EventPage>;

    /// Exact-match stream chunk lookup; the one read path that is not
    /// index-driven.
    async fn get_stream_data(
        &self,
        assignment_id: Uuid,
        stream_id: String,
        sequence_number: u64,
    ) -> DomainResult<Option<DeviceEvent>>;

    async fn query_stream_data(
        &self,
        assignment_id: Uuid,
        stream_id: String,
        criteria: DateRangeCriteria,
        page: PageRequest,
    ) -> DomainResult<EventPage>;

    /// Liveness probe used by the channel's Degraded -> Ready health check.
    async fn ping(&self) -> DomainResult<()>;
}

/// Authoritative device/assignment directory, consulted on cache misses.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    async fn assignment_by_id(&self, assignment_id: Uuid)
        -> DomainResult<Option<DeviceAssignment>>;

    async fn device_by_token(&self, token: &str) -> DomainResult<Option<Device>>;
}

/// Holds the per-assignment state snapshots. `merge` must apply
/// last-writer-wins on `received_date` atomically per assignment.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DeviceStateRepository: Send + Sync {
    async fn merge(&self, update: DeviceStateUpdate) -> DomainResult<()>;

    async fn get(&self, assignment_id: Uuid) -> DomainResult<Option<DeviceStateSnapshot>>;
}

/// Broadcast transport behind the fan-out processor. At-most-once,
/// no acknowledgment, no ordering contract.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, subject: String, payload: Bytes) -> DomainResult<()>;
}

/// Configuration bootstrap gate. A tenant channel must not reach Ready until
/// this reports the tenant's topology loaded.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait TenantBootstrap: Send + Sync {
    async fn await_ready(&self, tenant_id: &str) -> DomainResult<()>;
}
