use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{TimeDelta, Utc};
use tether_domain::{
    AlertCreateRequest, AlertLevel, AssignmentStatus, ChannelCollaborators, ChannelConfig,
    ChannelRegistry, ChannelState, CommandInvocationCreateRequest, CommandResponseCreateRequest,
    DateRangeCriteria, Device, DeviceAssignment, DeviceEventBatch, DeviceEventIndex,
    DeviceStateRepository, DomainError, DomainResult, EventPayload, EventPublisher,
    InMemoryDeviceDirectory,
    InMemoryDeviceStateRepository, InMemoryEventStore, LocationCreateRequest, ReadyBootstrap,
    StreamDataCreateRequest, WireEvent,
};
use uuid::Uuid;

/// Records fan-out publishes so tests can assert on them.
struct CapturingPublisher {
    published: Mutex<Vec<(String, Bytes)>>,
}

impl CapturingPublisher {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            published: Mutex::new(Vec::new()),
        })
    }

    fn subjects(&self) -> Vec<String> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|(subject, _)| subject.clone())
            .collect()
    }

    async fn wait_for(&self, count: usize) -> Vec<(String, Bytes)> {
        for _ in 0..200 {
            {
                let published = self.published.lock().unwrap();
                if published.len() >= count {
                    return published.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {count} fan-out publishes");
    }
}

#[async_trait]
impl EventPublisher for CapturingPublisher {
    async fn publish(&self, subject: String, payload: Bytes) -> DomainResult<()> {
        self.published.lock().unwrap().push((subject, payload));
        Ok(())
    }
}

struct Harness {
    store: Arc<InMemoryEventStore>,
    directory: Arc<InMemoryDeviceDirectory>,
    device_state: Arc<InMemoryDeviceStateRepository>,
    publisher: Arc<CapturingPublisher>,
    registry: ChannelRegistry,
    device: Device,
    assignment: DeviceAssignment,
}

fn harness() -> Harness {
    let store = Arc::new(InMemoryEventStore::new());
    let directory = Arc::new(InMemoryDeviceDirectory::new());
    let device_state = Arc::new(InMemoryDeviceStateRepository::new());
    let publisher = CapturingPublisher::new();

    let device = Device {
        id: Uuid::new_v4(),
        token: "hw-0001".to_string(),
        area_id: None,
        created_at: Some(Utc::now()),
        updated_at: None,
    };
    let assignment = DeviceAssignment {
        id: Uuid::new_v4(),
        token: "asn-0001".to_string(),
        device_id: device.id,
        device_token: device.token.clone(),
        area_id: Some(Uuid::new_v4()),
        customer_id: Some(Uuid::new_v4()),
        status: AssignmentStatus::Active,
        created_at: Some(Utc::now()),
        updated_at: None,
    };
    directory.register_device(device.clone());
    directory.register_assignment(assignment.clone());

    let registry = ChannelRegistry::new(
        ChannelCollaborators {
            directory: directory.clone(),
            events: store.clone(),
            device_state: device_state.clone(),
            publisher: publisher.clone(),
            bootstrap: Arc::new(ReadyBootstrap),
        },
        ChannelConfig {
            page_size: 2,
            ..ChannelConfig::default()
        },
    );

    Harness {
        store,
        directory,
        device_state,
        publisher,
        registry,
        device,
        assignment,
    }
}

fn location(latitude: f64, longitude: f64) -> LocationCreateRequest {
    LocationCreateRequest {
        alternate_id: None,
        event_date: Utc::now(),
        latitude,
        longitude,
        elevation: None,
    }
}

fn wide_range() -> DateRangeCriteria {
    DateRangeCriteria::new(
        Utc::now() - TimeDelta::days(1),
        Utc::now() + TimeDelta::days(1),
    )
}

#[tokio::test]
async fn test_location_flows_to_storage_index_snapshot_and_fanout() {
    let h = harness();
    let channel = h.registry.get_channel("acme").await.unwrap();

    let persisted = channel
        .add_location(h.assignment.id, location(45.0, -122.0))
        .await
        .unwrap();

    assert_eq!(persisted.device_id, h.device.id);
    assert!(persisted.received_date >= persisted.event_date);

    // Retrievable by id and along every hierarchy axis, including area and
    // customer inherited from the assignment.
    let fetched = channel
        .get_event_by_id(h.device.id, persisted.id)
        .await
        .unwrap();
    assert_eq!(fetched.id, persisted.id);

    for (index, entity_id) in [
        (DeviceEventIndex::Device, h.device.id),
        (DeviceEventIndex::Assignment, h.assignment.id),
        (DeviceEventIndex::Area, h.assignment.area_id.unwrap()),
        (DeviceEventIndex::Customer, h.assignment.customer_id.unwrap()),
    ] {
        let events = channel
            .list_locations_for_index(index, vec![entity_id], wide_range())
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(events.len(), 1, "no event under {index:?}");
        assert_eq!(events[0].id, persisted.id);
    }

    // The state snapshot recorded this event as the latest location.
    let snapshot = h
        .device_state
        .get(h.assignment.id)
        .await
        .unwrap()
        .expect("snapshot created");
    assert_eq!(snapshot.last_location_event_id, Some(persisted.id));
    assert_eq!(snapshot.last_interaction_date, persisted.received_date);

    // A wire copy went out on the tenant-scoped location topic.
    let published = h.publisher.wait_for(1).await;
    assert_eq!(published[0].0, "acme.location-added");
    let wire: WireEvent = serde_json::from_slice(&published[0].1).unwrap();
    assert_eq!(wire.id, persisted.id);
    assert_eq!(wire.tenant_id, "acme");
}

#[tokio::test]
async fn test_alert_listing_respects_date_range_and_order() {
    let h = harness();
    let channel = h.registry.get_channel("acme").await.unwrap();
    let base = Utc::now();

    let mut ids = Vec::new();
    for offset in [-10i64, 0, 10] {
        let persisted = channel
            .add_alert(
                h.assignment.id,
                AlertCreateRequest {
                    alternate_id: None,
                    event_date: base + TimeDelta::seconds(offset),
                    alert_type: "overheat".to_string(),
                    level: AlertLevel::Warning,
                    message: format!("reading at {offset}"),
                },
            )
            .await
            .unwrap();
        ids.push(persisted.id);
    }

    let narrow = DateRangeCriteria::new(
        base - TimeDelta::seconds(5),
        base + TimeDelta::seconds(5),
    );
    let events = channel
        .list_alerts_for_index(DeviceEventIndex::Assignment, vec![h.assignment.id], narrow)
        .unwrap()
        .collect()
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].id, ids[1]);

    // The wide range pages through all three (page size is 2) in date order.
    let events = channel
        .list_alerts_for_index(
            DeviceEventIndex::Assignment,
            vec![h.assignment.id],
            wide_range(),
        )
        .unwrap()
        .collect()
        .await
        .unwrap();
    let listed: Vec<Uuid> = events.iter().map(|e| e.id).collect();
    assert_eq!(listed, ids);
}

#[tokio::test]
async fn test_retried_ingest_converges_on_one_event() {
    let h = harness();
    let channel = h.registry.get_channel("acme").await.unwrap();

    let mut request = location(45.0, -122.0);
    request.alternate_id = Some("msg-42".to_string());

    let first = channel
        .add_location(h.assignment.id, request.clone())
        .await
        .unwrap();
    let second = channel
        .add_location(h.assignment.id, request)
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(h.store.len(), 1);

    let fetched = channel
        .get_event_by_alternate_id(h.device.id, "msg-42")
        .await
        .unwrap();
    assert_eq!(fetched.id, first.id);
}

#[tokio::test]
async fn test_batch_persists_valid_items_despite_failures() {
    let h = harness();
    let channel = h.registry.get_channel("acme").await.unwrap();

    let batch = DeviceEventBatch {
        requests: vec![
            location(45.0, -122.0).into(),
            location(95.0, 0.0).into(), // latitude out of range
            location(-33.9, 18.4).into(),
        ],
    };

    let results = channel
        .add_event_batch(h.assignment.id, batch)
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok());
    assert!(matches!(results[1], Err(DomainError::InvalidRequest(_))));
    assert!(results[2].is_ok());
    assert_eq!(h.store.len(), 2);
}

#[tokio::test]
async fn test_command_responses_listed_for_their_invocation() {
    let h = harness();
    let channel = h.registry.get_channel("acme").await.unwrap();

    let invocation = channel
        .add_command_invocation(
            h.assignment.id,
            CommandInvocationCreateRequest {
                alternate_id: None,
                event_date: Utc::now(),
                command: "reboot".to_string(),
                parameters: BTreeMap::new(),
            },
        )
        .await
        .unwrap();

    let response = channel
        .add_command_response(
            h.assignment.id,
            CommandResponseCreateRequest {
                alternate_id: None,
                event_date: Utc::now(),
                originating_event_id: invocation.id,
                response: Some("rebooting".to_string()),
            },
        )
        .await
        .unwrap();

    // An unrelated response must not show up.
    channel
        .add_command_response(
            h.assignment.id,
            CommandResponseCreateRequest {
                alternate_id: None,
                event_date: Utc::now(),
                originating_event_id: Uuid::new_v4(),
                response: None,
            },
        )
        .await
        .unwrap();

    let responses = channel
        .list_command_responses_for_invocation(h.device.id, invocation.id)
        .unwrap()
        .collect()
        .await
        .unwrap();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].id, response.id);
}

#[tokio::test]
async fn test_stream_chunks_support_exact_and_ranged_reads() {
    let h = harness();
    let channel = h.registry.get_channel("acme").await.unwrap();
    let base = Utc::now();

    for sequence in 0..3u64 {
        channel
            .add_stream_data(
                h.assignment.id,
                StreamDataCreateRequest {
                    alternate_id: None,
                    event_date: base + TimeDelta::seconds(sequence as i64),
                    stream_id: "video".to_string(),
                    sequence_number: sequence,
                    data: vec![sequence as u8; 4],
                },
            )
            .await
            .unwrap();
    }

    let chunk = channel
        .get_stream_data(h.assignment.id, "video", 1)
        .await
        .unwrap();
    assert!(matches!(
        chunk.payload,
        EventPayload::StreamData { sequence_number: 1, .. }
    ));

    let missing = channel.get_stream_data(h.assignment.id, "video", 99).await;
    assert!(matches!(missing, Err(DomainError::NotFound(_))));

    let chunks = channel
        .list_stream_data_for_assignment(h.assignment.id, "video", wide_range())
        .unwrap()
        .collect()
        .await
        .unwrap();
    let sequences: Vec<u64> = chunks
        .iter()
        .map(|event| match &event.payload {
            EventPayload::StreamData {
                sequence_number, ..
            } => *sequence_number,
            other => panic!("unexpected payload {other:?}"),
        })
        .collect();
    assert_eq!(sequences, vec![0, 1, 2]);
}

#[tokio::test]
async fn test_inactive_assignment_never_reaches_storage_or_fanout() {
    let h = harness();

    let mut released = h.assignment.clone();
    released.status = AssignmentStatus::Released;
    h.directory.register_assignment(released);

    // The registry builds a fresh channel, so the stale Active entry is not
    // cached yet.
    let channel = h.registry.get_channel("acme").await.unwrap();
    let result = channel
        .add_location(h.assignment.id, location(45.0, -122.0))
        .await;

    assert!(matches!(result, Err(DomainError::AssignmentNotFound(_))));
    assert!(h.store.is_empty());
    assert!(h.publisher.subjects().is_empty());
}

#[tokio::test]
async fn test_closed_channel_reopens_with_history_intact() {
    let h = harness();

    let channel = h.registry.get_channel("acme").await.unwrap();
    let persisted = channel
        .add_location(h.assignment.id, location(45.0, -122.0))
        .await
        .unwrap();

    h.registry.close_channel("acme").await;
    assert_eq!(channel.state(), ChannelState::Disconnected);
    assert!(matches!(
        channel
            .add_location(h.assignment.id, location(45.0, -122.0))
            .await,
        Err(DomainError::ChannelUnavailable(_))
    ));

    // A new channel serves the tenant and the stored history is unaffected.
    let reopened = h.registry.get_channel("acme").await.unwrap();
    let fetched = reopened
        .get_event_by_id(h.device.id, persisted.id)
        .await
        .unwrap();
    assert_eq!(fetched.id, persisted.id);
}

#[tokio::test]
async fn test_cache_invalidation_picks_up_directory_mutation() {
    let h = harness();
    let channel = h.registry.get_channel("acme").await.unwrap();

    // Populates the channel's assignment cache.
    channel
        .add_location(h.assignment.id, location(45.0, -122.0))
        .await
        .unwrap();

    let mut released = h.assignment.clone();
    released.status = AssignmentStatus::Released;
    h.directory.register_assignment(released);

    // Stale cached entry still admits events until invalidated.
    channel
        .add_location(h.assignment.id, location(45.0, -122.0))
        .await
        .unwrap();

    channel.cache().assignments().invalidate(&h.assignment.id);

    let result = channel
        .add_location(h.assignment.id, location(45.0, -122.0))
        .await;
    assert!(matches!(result, Err(DomainError::AssignmentNotFound(_))));
}

#[tokio::test]
async fn test_tenants_do_not_share_fanout_subjects() {
    let h = harness();

    let acme = h.registry.get_channel("acme").await.unwrap();
    let globex = h.registry.get_channel("globex").await.unwrap();

    acme.add_location(h.assignment.id, location(45.0, -122.0))
        .await
        .unwrap();
    globex
        .add_location(h.assignment.id, location(45.0, -122.0))
        .await
        .unwrap();

    let published = h.publisher.wait_for(2).await;
    let mut subjects: Vec<String> = published.iter().map(|(s, _)| s.clone()).collect();
    subjects.sort();
    assert_eq!(subjects, vec!["acme.location-added", "globex.location-added"]);
}
