use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use tether_domain::{DomainResult, EventPublisher};
use tracing::{debug, info};

/// Fan-out publisher backed by core NATS.
///
/// Core publish has no broker acknowledgment, which matches the fan-out
/// contract: at-most-once, no ordering guarantee, never in the ingest
/// caller's critical path. Subjects arrive already tenant-prefixed.
pub struct NatsEventPublisher {
    client: async_nats::Client,
}

impl NatsEventPublisher {
    pub fn new(client: async_nats::Client) -> Self {
        info!("Created NATS event publisher");
        Self { client }
    }
}

#[async_trait]
impl EventPublisher for NatsEventPublisher {
    async fn publish(&self, subject: String, payload: Bytes) -> DomainResult<()> {
        debug!(
            subject = %subject,
            size_bytes = payload.len(),
            "Publishing event to NATS"
        );

        self.client
            .publish(subject.clone(), payload)
            .await
            .with_context(|| format!("Failed to publish to {subject}"))?;

        Ok(())
    }
}
