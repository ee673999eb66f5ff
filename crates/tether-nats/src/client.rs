use anyhow::{Context, Result};
use tracing::info;

/// Thin wrapper around the NATS connection shared by all tenants' fan-out
/// publishers.
pub struct NatsClient {
    client: async_nats::Client,
}

impl NatsClient {
    pub async fn connect(url: &str, timeout: std::time::Duration) -> Result<Self> {
        info!("Connecting to NATS at {} (timeout={:?})", url, timeout);

        let client = async_nats::ConnectOptions::new()
            .connection_timeout(timeout)
            .connect(url)
            .await
            .context("Failed to connect to NATS")?;

        info!("Successfully connected to NATS");
        Ok(Self { client })
    }

    pub fn client(&self) -> async_nats::Client {
        self.client.clone()
    }

    /// Flush pending publishes before the process exits.
    pub async fn close(self) -> Result<()> {
        info!("Closing NATS connection");
        self.client
            .flush()
            .await
            .context("Failed to flush NATS connection")?;
        Ok(())
    }
}
