use tokio::sync::mpsc;

use crate::error::DomainResult;
use crate::event::DeviceEvent;

/// A finite-but-unbounded sequence of query results delivered page-by-page
/// from a background pager task, without materializing the full result set.
///
/// Dropping the stream cancels the producer: its next send fails and the
/// pager stops fetching.
pub struct EventStream {
    receiver: mpsc::Receiver<DomainResult<DeviceEvent>>,
}

impl EventStream {
    pub(crate) fn new(receiver: mpsc::Receiver<DomainResult<DeviceEvent>>) -> Self {
        Self { receiver }
    }

    /// Next event in `event_date` order, or `None` when the sequence is
    /// exhausted.
    pub async fn next(&mut self) -> Option<DomainResult<DeviceEvent>> {
        self.receiver.recv().await
    }

    /// Drain the remaining results into memory. Intended for tests and
    /// bounded queries; production consumers should iterate with [`next`].
    ///
    /// [`next`]: EventStream::next
    pub async fn collect(mut self) -> DomainResult<Vec<DeviceEvent>> {
        let mut events = Vec::new();
        while let Some(result) = self.next().await {
            events.push(result?);
        }
        Ok(events)
    }
}

pub(crate) fn event_stream(buffer: usize) -> (mpsc::Sender<DomainResult<DeviceEvent>>, EventStream) {
    let (sender, receiver) = mpsc::channel(buffer);
    (sender, EventStream::new(receiver))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DomainError;
    use crate::event::EventPayload;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn event() -> DeviceEvent {
        DeviceEvent {
            id: Uuid::new_v4(),
            alternate_id: None,
            device_id: Uuid::new_v4(),
            device_assignment_id: Uuid::new_v4(),
            event_date: Utc::now(),
            received_date: Utc::now(),
            payload: EventPayload::Measurements {
                values: BTreeMap::from([("temperature".to_string(), 21.5)]),
            },
        }
    }

    #[tokio::test]
    async fn test_collect_drains_in_order() {
        let (sender, stream) = event_stream(4);
        let first = event();
        let second = event();

        let expected = vec![first.id, second.id];
        sender.send(Ok(first)).await.unwrap();
        sender.send(Ok(second)).await.unwrap();
        drop(sender);

        let events = stream.collect().await.unwrap();
        let ids: Vec<_> = events.iter().map(|e| e.id).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_collect_surfaces_mid_stream_error() {
        let (sender, stream) = event_stream(4);
        sender.send(Ok(event())).await.unwrap();
        sender
            .send(Err(DomainError::StorageFailure("query failed".to_string())))
            .await
            .unwrap();
        drop(sender);

        assert!(matches!(
            stream.collect().await,
            Err(DomainError::StorageFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_dropping_stream_cancels_producer() {
        let (sender, stream) = event_stream(1);
        drop(stream);
        assert!(sender.send(Ok(event())).await.is_err());
    }
}
