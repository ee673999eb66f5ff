mod config;
mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use config::ServiceConfig;
use telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig, TelemetryProviders};
use tether_domain::{
    ChannelCollaborators, ChannelConfig, ChannelRegistry, EventPublisher,
    InMemoryDeviceDirectory, InMemoryDeviceStateRepository, InMemoryEventStore, NoopPublisher,
    ReadyBootstrap,
};
use tether_nats::{NatsClient, NatsEventPublisher};
use tracing::{debug, error, info};

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let telemetry_providers: Option<TelemetryProviders> = match init_telemetry(&TelemetryConfig {
        service_name: config.otel_service_name.clone(),
        otel_endpoint: config.otel_endpoint.clone(),
        otel_enabled: config.otel_enabled,
        log_level: config.log_level.clone(),
    }) {
        Ok(providers) => providers,
        Err(e) => {
            eprintln!("Failed to initialize telemetry: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        otel_enabled = config.otel_enabled,
        fanout_enabled = config.fanout_enabled,
        "Starting tether-server"
    );
    debug!("Configuration: {:?}", config);

    if let Err(e) = run(&config).await {
        error!("Service failed: {:#}", e);
        shutdown_telemetry(telemetry_providers);
        std::process::exit(1);
    }

    shutdown_telemetry(telemetry_providers);
}

async fn run(config: &ServiceConfig) -> Result<()> {
    let mut nats_client = None;
    let publisher: Arc<dyn EventPublisher> = if config.fanout_enabled {
        let client = NatsClient::connect(
            &config.nats_url,
            Duration::from_secs(config.nats_connect_timeout_secs),
        )
        .await?;
        let publisher = Arc::new(NatsEventPublisher::new(client.client()));
        nats_client = Some(client);
        publisher
    } else {
        info!("Fan-out disabled, persisted events will not be republished");
        Arc::new(NoopPublisher)
    };

    let registry = ChannelRegistry::new(
        ChannelCollaborators {
            directory: Arc::new(InMemoryDeviceDirectory::new()),
            events: Arc::new(InMemoryEventStore::new()),
            device_state: Arc::new(InMemoryDeviceStateRepository::new()),
            publisher,
            bootstrap: Arc::new(ReadyBootstrap),
        },
        channel_config(config),
    );

    for tenant_id in config.tenant_ids() {
        registry
            .get_channel(&tenant_id)
            .await
            .with_context(|| format!("Failed to open channel for tenant {tenant_id}"))?;
        info!(tenant = %tenant_id, "Tenant channel open");
    }

    info!(
        open_channels = registry.open_channels(),
        "tether-server ready"
    );

    wait_for_shutdown_signal().await;

    info!("Shutting down");
    registry.shutdown().await;
    if let Some(client) = nats_client {
        if let Err(e) = client.close().await {
            error!("Error closing NATS connection: {:#}", e);
        }
    }
    info!("Shutdown complete");
    Ok(())
}

fn channel_config(config: &ServiceConfig) -> ChannelConfig {
    ChannelConfig {
        operation_timeout: Duration::from_secs(config.operation_timeout_secs),
        page_size: config.page_size,
        health_check_interval: Duration::from_secs(config.health_check_interval_secs),
        max_failed_health_checks: config.max_failed_health_checks,
        cache_capacity: config.cache_capacity,
        cache_ttl: match config.cache_ttl_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        },
        ..ChannelConfig::default()
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            error!("Failed to install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
        _ = sigterm.recv() => info!("Received SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Received shutdown signal");
}
