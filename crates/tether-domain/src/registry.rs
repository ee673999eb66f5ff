use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::channel::{ChannelCollaborators, ChannelConfig, ChannelState, TenantEventChannel};
use crate::error::DomainResult;

/// Per-tenant construction slot. The mutex serializes open/close for one
/// tenant without blocking other tenants.
struct TenantSlot {
    channel: Mutex<Option<Arc<TenantEventChannel>>>,
}

impl TenantSlot {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            channel: Mutex::new(None),
        })
    }
}

/// Lazily constructs and hands out one [`TenantEventChannel`] per tenant.
///
/// `get_channel` is idempotent: concurrent callers for the same tenant all
/// receive the same channel, and a channel found Disconnected (health budget
/// exhausted, or closed elsewhere) is replaced on the next request.
pub struct ChannelRegistry {
    collaborators: ChannelCollaborators,
    config: ChannelConfig,
    slots: DashMap<String, Arc<TenantSlot>>,
}

impl ChannelRegistry {
    pub fn new(collaborators: ChannelCollaborators, config: ChannelConfig) -> Self {
        Self {
            collaborators,
            config,
            slots: DashMap::new(),
        }
    }

    /// Channel for a tenant, opening one if none is live. Construction for
    /// different tenants proceeds concurrently.
    pub async fn get_channel(&self, tenant_id: &str) -> DomainResult<Arc<TenantEventChannel>> {
        let slot = self
            .slots
            .entry(tenant_id.to_string())
            .or_insert_with(TenantSlot::new)
            .clone();

        let mut current = slot.channel.lock().await;

        if let Some(channel) = current.as_ref() {
            if channel.state() != ChannelState::Disconnected {
                return Ok(channel.clone());
            }
            warn!(tenant = %tenant_id, "Replacing disconnected channel");
            channel.stop().await;
        }

        let channel = Arc::new(TenantEventChannel::new(
            tenant_id.to_string(),
            self.collaborators.clone(),
            self.config.clone(),
        ));
        channel.start().await?;
        *current = Some(channel.clone());
        Ok(channel)
    }

    /// Close a tenant's channel if one is open. In-flight operations drain
    /// before this returns.
    pub async fn close_channel(&self, tenant_id: &str) {
        let slot = match self.slots.get(tenant_id) {
            Some(slot) => slot.clone(),
            None => return,
        };

        let mut current = slot.channel.lock().await;
        if let Some(channel) = current.take() {
            channel.stop().await;
        }
    }

    /// Close every open channel. Used on process shutdown.
    pub async fn shutdown(&self) {
        let tenants: Vec<String> = self.slots.iter().map(|e| e.key().clone()).collect();
        for tenant_id in tenants {
            info!(tenant = %tenant_id, "Closing channel on shutdown");
            self.close_channel(&tenant_id).await;
        }
    }

    pub fn open_channels(&self) -> usize {
        self.slots.len()
    }
}
