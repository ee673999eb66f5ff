use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::{OwnedRwLockReadGuard, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cache::DeviceManagementCache;
use crate::entity::{Device, DeviceAssignment};
use crate::error::{DomainError, DomainResult};
use crate::event::{DeviceEvent, DeviceEventType};
use crate::fanout::FanoutProcessor;
use crate::index::{DeviceEventIndex, IndexPolicy};
use crate::repository::{
    DeviceDirectory, DeviceStateRepository, EventPublisher, EventRepository, TenantBootstrap,
};
use crate::request::{
    AlertCreateRequest, CommandInvocationCreateRequest, CommandResponseCreateRequest,
    DeviceEventBatch, DeviceEventCreateRequest, LocationCreateRequest, MeasurementsCreateRequest,
    StateChangeCreateRequest, StreamDataCreateRequest,
};
use crate::search::{DateRangeCriteria, EventPage, PageRequest};
use crate::snapshot::DeviceStateUpdate;
use crate::stream::{event_stream, EventStream};

/// Connection state of a tenant channel. Operations are only accepted in
/// `Ready`; anything else fails fast with `ChannelUnavailable` so callers
/// retry with backoff instead of queuing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Ready,
    Degraded,
}

/// Single synchronized gate for all connection-state reads and writes on a
/// channel. Cloning shares the gate.
#[derive(Clone)]
pub(crate) struct ConnectionGate {
    inner: Arc<Mutex<GateInner>>,
}

struct GateInner {
    state: ChannelState,
    failed_health_checks: u32,
}

impl ConnectionGate {
    fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(GateInner {
                state: ChannelState::Disconnected,
                failed_health_checks: 0,
            })),
        }
    }

    pub(crate) fn state(&self) -> ChannelState {
        self.inner.lock().state
    }

    fn set_connecting(&self) {
        self.inner.lock().state = ChannelState::Connecting;
    }

    fn set_disconnected(&self) {
        self.inner.lock().state = ChannelState::Disconnected;
    }

    fn mark_ready(&self) {
        let mut inner = self.inner.lock();
        inner.state = ChannelState::Ready;
        inner.failed_health_checks = 0;
    }

    /// Transition Ready -> Degraded on a transport-level error. Has no
    /// effect once the channel is Disconnected.
    pub(crate) fn mark_degraded(&self) {
        let mut inner = self.inner.lock();
        if inner.state == ChannelState::Ready {
            inner.state = ChannelState::Degraded;
            inner.failed_health_checks = 0;
        }
    }

    fn record_health_failure(&self) -> u32 {
        let mut inner = self.inner.lock();
        inner.failed_health_checks += 1;
        inner.failed_health_checks
    }
}

/// Tuning knobs for one tenant channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Deadline applied to each storage/directory round trip.
    pub operation_timeout: Duration,
    /// Page size used when streaming index queries.
    pub page_size: usize,
    /// Buffered events between the pager task and the stream consumer.
    pub stream_buffer: usize,
    /// Interval between Degraded -> Ready probes.
    pub health_check_interval: Duration,
    /// Consecutive failed probes before the channel disconnects.
    pub max_failed_health_checks: u32,
    /// Entity cache capacity per kind.
    pub cache_capacity: usize,
    /// Optional staleness backstop for cached entities.
    pub cache_ttl: Option<Duration>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            operation_timeout: Duration::from_secs(30),
            page_size: 100,
            stream_buffer: 64,
            health_check_interval: Duration::from_secs(5),
            max_failed_health_checks: 3,
            cache_capacity: 10_000,
            cache_ttl: Some(Duration::from_secs(300)),
        }
    }
}

/// External collaborators a channel is wired with. Shared across tenants;
/// per-tenant state (cache, gate) lives on the channel itself.
#[derive(Clone)]
pub struct ChannelCollaborators {
    pub directory: Arc<dyn DeviceDirectory>,
    pub events: Arc<dyn EventRepository>,
    pub device_state: Arc<dyn DeviceStateRepository>,
    pub publisher: Arc<dyn EventPublisher>,
    pub bootstrap: Arc<dyn TenantBootstrap>,
}

type PageFetcher = Box<dyn Fn(PageRequest) -> BoxFuture<'static, DomainResult<EventPage>> + Send>;

/// Per-tenant ingestion and query channel.
///
/// Owns its entity cache and connection gate. Every add operation resolves
/// the assignment and device through the cache, applies the write-time index
/// policy, persists through the storage collaborator, then performs the
/// best-effort side effects (state snapshot merge, fan-out emission) that
/// are logged but never surfaced to the caller.
pub struct TenantEventChannel {
    tenant_id: String,
    config: ChannelConfig,
    gate: ConnectionGate,
    cache: DeviceManagementCache,
    index_policy: IndexPolicy,
    directory: Arc<dyn DeviceDirectory>,
    events: Arc<dyn EventRepository>,
    device_state: Arc<dyn DeviceStateRepository>,
    bootstrap: Arc<dyn TenantBootstrap>,
    fanout: FanoutProcessor,
    /// Read side held by in-flight operations; the write side is the drain
    /// barrier taken on teardown.
    drain: Arc<RwLock<()>>,
    health_token: CancellationToken,
}

impl TenantEventChannel {
    pub fn new(
        tenant_id: String,
        collaborators: ChannelCollaborators,
        config: ChannelConfig,
    ) -> Self {
        let fanout = FanoutProcessor::new(tenant_id.clone(), collaborators.publisher);
        Self {
            cache: DeviceManagementCache::new(config.cache_capacity, config.cache_ttl),
            tenant_id,
            config,
            gate: ConnectionGate::new(),
            index_policy: IndexPolicy::default(),
            directory: collaborators.directory,
            events: collaborators.events,
            device_state: collaborators.device_state,
            bootstrap: collaborators.bootstrap,
            fanout,
            drain: Arc::new(RwLock::new(())),
            health_token: CancellationToken::new(),
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn state(&self) -> ChannelState {
        self.gate.state()
    }

    /// Open the channel: wait for the tenant bootstrap to confirm its
    /// topology is loaded, then accept operations and start the health
    /// probe.
    pub async fn start(&self) -> DomainResult<()> {
        info!(tenant = %self.tenant_id, "Opening event channel");
        self.gate.set_connecting();

        if let Err(e) = self.bootstrap.await_ready(&self.tenant_id).await {
            error!(tenant = %self.tenant_id, error = %e, "Tenant bootstrap failed");
            self.gate.set_disconnected();
            return Err(e);
        }

        self.gate.mark_ready();
        self.spawn_health_loop();
        info!(tenant = %self.tenant_id, "Event channel ready");
        Ok(())
    }

    /// Close the channel: refuse new operations, drain in-flight ones, then
    /// release the cache. Safe to call more than once.
    pub async fn stop(&self) {
        info!(tenant = %self.tenant_id, "Closing event channel");
        self.gate.set_disconnected();
        self.health_token.cancel();

        // Waits for every in-flight operation (including pager tasks) to
        // release its read guard.
        let _barrier = self.drain.write().await;
        self.cache.clear();
        info!(tenant = %self.tenant_id, "Event channel closed");
    }

    pub fn cache(&self) -> &DeviceManagementCache {
        &self.cache
    }

    fn spawn_health_loop(&self) {
        let tenant_id = self.tenant_id.clone();
        let gate = self.gate.clone();
        let events = self.events.clone();
        let interval = self.config.health_check_interval;
        let max_failures = self.config.max_failed_health_checks;
        let token = self.health_token.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }

                match gate.state() {
                    ChannelState::Degraded => {}
                    ChannelState::Disconnected => break,
                    _ => continue,
                }

                match events.ping().await {
                    Ok(()) => {
                        info!(tenant = %tenant_id, "Health check passed, channel ready");
                        gate.mark_ready();
                    }
                    Err(e) => {
                        let failures = gate.record_health_failure();
                        warn!(
                            tenant = %tenant_id,
                            failures,
                            max_failures,
                            error = %e,
                            "Health check failed"
                        );
                        if failures >= max_failures {
                            error!(
                                tenant = %tenant_id,
                                "Health check budget exhausted, disconnecting channel"
                            );
                            gate.set_disconnected();
                            break;
                        }
                    }
                }
            }
        });
    }

    /// Admission check for every operation: the gate must be Ready and the
    /// channel must not be draining. Returns the guard in-flight work holds
    /// until completion.
    fn begin_operation(&self) -> DomainResult<OwnedRwLockReadGuard<()>> {
        if self.gate.state() != ChannelState::Ready {
            return Err(DomainError::ChannelUnavailable(self.tenant_id.clone()));
        }
        self.drain
            .clone()
            .try_read_owned()
            .map_err(|_| DomainError::ChannelUnavailable(self.tenant_id.clone()))
    }

    /// Run a collaborator round trip under the operation deadline. A
    /// transport-level failure degrades the channel; a deadline expiry
    /// surfaces `Timeout` without rolling back whatever the collaborator
    /// may still complete.
    async fn call_collaborator<T>(
        &self,
        call: impl Future<Output = DomainResult<T>>,
    ) -> DomainResult<T> {
        match tokio::time::timeout(self.config.operation_timeout, call).await {
            Err(_) => Err(DomainError::Timeout(format!(
                "Collaborator call exceeded {:?}",
                self.config.operation_timeout
            ))),
            Ok(Err(DomainError::Transport(e))) => {
                warn!(tenant = %self.tenant_id, error = %e, "Transport error, channel degraded");
                self.gate.mark_degraded();
                Err(DomainError::Transport(e))
            }
            Ok(result) => result,
        }
    }

    /// Resolve assignment and device through the per-tenant cache, fetching
    /// from the directory and populating the cache on miss. Non-live
    /// assignments are rejected so no orphan event is ever persisted.
    async fn resolve(&self, assignment_id: Uuid) -> DomainResult<(Device, DeviceAssignment)> {
        let assignment = match self.cache.assignments().get(&assignment_id) {
            Some(assignment) => assignment,
            None => {
                let assignment = self
                    .call_collaborator(self.directory.assignment_by_id(assignment_id))
                    .await?
                    .ok_or_else(|| DomainError::AssignmentNotFound(assignment_id.to_string()))?;
                self.cache
                    .assignments()
                    .put(assignment_id, assignment.clone());
                assignment
            }
        };

        if !assignment.is_active() {
            return Err(DomainError::AssignmentNotFound(format!(
                "Assignment {} is not active",
                assignment.id
            )));
        }

        let device = match self.cache.devices().get(&assignment.device_token) {
            Some(device) => device,
            None => {
                let device = self
                    .call_collaborator(self.directory.device_by_token(&assignment.device_token))
                    .await?
                    .ok_or_else(|| {
                        DomainError::DeviceNotFound(assignment.device_token.clone())
                    })?;
                self.cache
                    .devices()
                    .put(assignment.device_token.clone(), device.clone());
                device
            }
        };

        Ok((device, assignment))
    }

    /// Ingest one event. See the type-level docs for the processing order.
    pub async fn add_event(
        &self,
        assignment_id: Uuid,
        request: DeviceEventCreateRequest,
    ) -> DomainResult<DeviceEvent> {
        let _guard = self.begin_operation()?;
        self.add_event_inner(assignment_id, request).await
    }

    async fn add_event_inner(
        &self,
        assignment_id: Uuid,
        request: DeviceEventCreateRequest,
    ) -> DomainResult<DeviceEvent> {
        request.validate()?;

        let (device, assignment) = self.resolve(assignment_id).await?;

        // First-writer-wins idempotency on the caller's alternate id: a
        // retry after an ambiguous timeout converges on the original event.
        if let Some(alternate_id) = &request.alternate_id {
            if let Some(existing) = self
                .call_collaborator(
                    self.events
                        .get_by_alternate_id(device.id, alternate_id.clone()),
                )
                .await?
            {
                debug!(
                    tenant = %self.tenant_id,
                    event_id = %existing.id,
                    alternate_id = %alternate_id,
                    "Alternate id already persisted, returning existing event"
                );
                return Ok(existing);
            }
        }

        // received_date never precedes event_date, even when the caller's
        // clock runs ahead of ours.
        let received_date = Utc::now().max(request.event_date);
        let event = DeviceEvent {
            id: Uuid::new_v4(),
            alternate_id: request.alternate_id,
            device_id: device.id,
            device_assignment_id: assignment.id,
            event_date: request.event_date,
            received_date,
            payload: request.payload,
        };

        let index_keys = self.index_policy.compute_keys(&device, &assignment);
        let persisted = self
            .call_collaborator(self.events.persist(event, index_keys))
            .await?;

        debug!(
            tenant = %self.tenant_id,
            event_id = %persisted.id,
            event_type = ?persisted.event_type(),
            assignment = %assignment.id,
            "Event persisted"
        );

        // Best-effort side effects: the event is already durable, so their
        // failure is logged rather than surfaced.
        let update = DeviceStateUpdate::from_event(&persisted);
        if let Err(e) = self.device_state.merge(update).await {
            warn!(
                tenant = %self.tenant_id,
                event_id = %persisted.id,
                error = %e,
                "State snapshot update failed after persistence"
            );
        }
        self.fanout.on_persisted(&persisted);

        Ok(persisted)
    }

    /// Ingest a batch; every item succeeds or fails independently. Only a
    /// channel-level problem fails the batch wholesale.
    pub async fn add_event_batch(
        &self,
        assignment_id: Uuid,
        batch: DeviceEventBatch,
    ) -> DomainResult<Vec<DomainResult<DeviceEvent>>> {
        let _guard = self.begin_operation()?;
        let mut results = Vec::with_capacity(batch.requests.len());
        for request in batch.requests {
            results.push(self.add_event_inner(assignment_id, request).await);
        }
        Ok(results)
    }

    pub async fn add_measurements(
        &self,
        assignment_id: Uuid,
        request: MeasurementsCreateRequest,
    ) -> DomainResult<DeviceEvent> {
        self.add_event(assignment_id, request.into()).await
    }

    pub async fn add_location(
        &self,
        assignment_id: Uuid,
        request: LocationCreateRequest,
    ) -> DomainResult<DeviceEvent> {
        self.add_event(assignment_id, request.into()).await
    }

    pub async fn add_alert(
        &self,
        assignment_id: Uuid,
        request: AlertCreateRequest,
    ) -> DomainResult<DeviceEvent> {
        self.add_event(assignment_id, request.into()).await
    }

    pub async fn add_command_invocation(
        &self,
        assignment_id: Uuid,
        request: CommandInvocationCreateRequest,
    ) -> DomainResult<DeviceEvent> {
        self.add_event(assignment_id, request.into()).await
    }

    pub async fn add_command_response(
        &self,
        assignment_id: Uuid,
        request: CommandResponseCreateRequest,
    ) -> DomainResult<DeviceEvent> {
        self.add_event(assignment_id, request.into()).await
    }

    pub async fn add_state_change(
        &self,
        assignment_id: Uuid,
        request: StateChangeCreateRequest,
    ) -> DomainResult<DeviceEvent> {
        self.add_event(assignment_id, request.into()).await
    }

    pub async fn add_stream_data(
        &self,
        assignment_id: Uuid,
        request: StreamDataCreateRequest,
    ) -> DomainResult<DeviceEvent> {
        self.add_event(assignment_id, request.into()).await
    }

    pub async fn get_event_by_id(
        &self,
        device_id: Uuid,
        event_id: Uuid,
    ) -> DomainResult<DeviceEvent> {
        let _guard = self.begin_operation()?;
        self.call_collaborator(self.events.get_by_id(device_id, event_id))
            .await?
            .ok_or_else(|| {
                DomainError::NotFound(format!("Event {event_id} for device {device_id}"))
            })
    }

    pub async fn get_event_by_alternate_id(
        &self,
        device_id: Uuid,
        alternate_id: &str,
    ) -> DomainResult<DeviceEvent> {
        let _guard = self.begin_operation()?;
        self.call_collaborator(
            self.events
                .get_by_alternate_id(device_id, alternate_id.to_string()),
        )
        .await?
        .ok_or_else(|| {
            DomainError::NotFound(format!("Event {alternate_id} for device {device_id}"))
        })
    }

    /// Exact-match stream chunk lookup on `(assignment, stream, sequence)`.
    pub async fn get_stream_data(
        &self,
        assignment_id: Uuid,
        stream_id: &str,
        sequence_number: u64,
    ) -> DomainResult<DeviceEvent> {
        let _guard = self.begin_operation()?;
        self.call_collaborator(self.events.get_stream_data(
            assignment_id,
            stream_id.to_string(),
            sequence_number,
        ))
        .await?
        .ok_or_else(|| {
            DomainError::NotFound(format!(
                "Stream chunk {stream_id}/{sequence_number} for assignment {assignment_id}"
            ))
        })
    }

    /// Stream events of one type under an index axis, page-by-page in
    /// `event_date` order, merged across the supplied entity ids. The full
    /// result set is never materialized; dropping the stream cancels the
    /// query.
    pub fn list_events_for_index(
        &self,
        event_type: DeviceEventType,
        index: DeviceEventIndex,
        entity_ids: Vec<Uuid>,
        criteria: DateRangeCriteria,
    ) -> DomainResult<EventStream> {
        let guard = self.begin_operation()?;
        criteria.validate()?;

        let events = self.events.clone();
        let fetch: PageFetcher = Box::new(move |page| {
            let events = events.clone();
            let entity_ids = entity_ids.clone();
            Box::pin(
                async move { events.query(event_type, index, entity_ids, criteria, page).await },
            )
        });
        Ok(self.spawn_pager(guard, fetch))
    }

    pub fn list_measurements_for_index(
        &self,
        index: DeviceEventIndex,
        entity_ids: Vec<Uuid>,
        criteria: DateRangeCriteria,
    ) -> DomainResult<EventStream> {
        self.list_events_for_index(DeviceEventType::Measurements, index, entity_ids, criteria)
    }

    pub fn list_locations_for_index(
        &self,
        index: DeviceEventIndex,
        entity_ids: Vec<Uuid>,
        criteria: DateRangeCriteria,
    ) -> DomainResult<EventStream> {
        self.list_events_for_index(DeviceEventType::Location, index, entity_ids, criteria)
    }

    pub fn list_alerts_for_index(
        &self,
        index: DeviceEventIndex,
        entity_ids: Vec<Uuid>,
        criteria: DateRangeCriteria,
    ) -> DomainResult<EventStream> {
        self.list_events_for_index(DeviceEventType::Alert, index, entity_ids, criteria)
    }

    pub fn list_command_invocations_for_index(
        &self,
        index: DeviceEventIndex,
        entity_ids: Vec<Uuid>,
        criteria: DateRangeCriteria,
    ) -> DomainResult<EventStream> {
        self.list_events_for_index(
            DeviceEventType::CommandInvocation,
            index,
            entity_ids,
            criteria,
        )
    }

    pub fn list_command_responses_for_index(
        &self,
        index: DeviceEventIndex,
        entity_ids: Vec<Uuid>,
        criteria: DateRangeCriteria,
    ) -> DomainResult<EventStream> {
        self.list_events_for_index(DeviceEventType::CommandResponse, index, entity_ids, criteria)
    }

    pub fn list_state_changes_for_index(
        &self,
        index: DeviceEventIndex,
        entity_ids: Vec<Uuid>,
        criteria: DateRangeCriteria,
    ) -> DomainResult<EventStream> {
        self.list_events_for_index(DeviceEventType::StateChange, index, entity_ids, criteria)
    }

    /// Responses correlated to a command invocation event.
    pub fn list_command_responses_for_invocation(
        &self,
        device_id: Uuid,
        invocation_id: Uuid,
    ) -> DomainResult<EventStream> {
        let guard = self.begin_operation()?;

        let events = self.events.clone();
        let fetch: PageFetcher = Box::new(move |page| {
            let events = events.clone();
            Box::pin(async move {
                events
                    .query_command_responses(device_id, invocation_id, page)
                    .await
            })
        });
        Ok(self.spawn_pager(guard, fetch))
    }

    /// Chunks of one device stream within a date range, sequence order
    /// following event-date order.
    pub fn list_stream_data_for_assignment(
        &self,
        assignment_id: Uuid,
        stream_id: &str,
        criteria: DateRangeCriteria,
    ) -> DomainResult<EventStream> {
        let guard = self.begin_operation()?;
        criteria.validate()?;

        let events = self.events.clone();
        let stream_id = stream_id.to_string();
        let fetch: PageFetcher = Box::new(move |page| {
            let events = events.clone();
            let stream_id = stream_id.clone();
            Box::pin(async move {
                events
                    .query_stream_data(assignment_id, stream_id, criteria, page)
                    .await
            })
        });
        Ok(self.spawn_pager(guard, fetch))
    }

    /// Drive a paged query into a bounded stream from a background task.
    /// The task holds the drain guard for its lifetime and exits as soon as
    /// the consumer drops the stream or the channel shuts down.
    fn spawn_pager(&self, guard: OwnedRwLockReadGuard<()>, fetch: PageFetcher) -> EventStream {
        let (sender, stream) = event_stream(self.config.stream_buffer);
        let tenant_id = self.tenant_id.clone();
        let gate = self.gate.clone();
        let timeout = self.config.operation_timeout;
        let page_size = self.config.page_size;
        let token = self.health_token.clone();

        tokio::spawn(async move {
            let _guard = guard;
            let mut page = PageRequest::first(page_size);
            loop {
                let fetched = tokio::select! {
                    _ = token.cancelled() => return,
                    result = tokio::time::timeout(timeout, fetch(page)) => match result {
                        Err(_) => {
                            let _ = sender
                                .send(Err(DomainError::Timeout(format!(
                                    "Query page {} exceeded {:?}",
                                    page.page, timeout
                                ))))
                                .await;
                            return;
                        }
                        Ok(Err(e)) => {
                            if matches!(e, DomainError::Transport(_)) {
                                warn!(
                                    tenant = %tenant_id,
                                    error = %e,
                                    "Transport error while paging, channel degraded"
                                );
                                gate.mark_degraded();
                            }
                            let _ = sender.send(Err(e)).await;
                            return;
                        }
                        Ok(Ok(event_page)) => {
                            let count = event_page.events.len();
                            for event in event_page.events {
                                tokio::select! {
                                    _ = token.cancelled() => return,
                                    sent = sender.send(Ok(event)) => {
                                        if sent.is_err() {
                                            // Consumer dropped the stream.
                                            return;
                                        }
                                    }
                                }
                            }
                            count
                        }
                    },
                };

                if fetched < page_size {
                    return;
                }
                page = page.next();
            }
        });

        stream
    }
}
