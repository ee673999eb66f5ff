use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    // OpenTelemetry configuration
    #[serde(default = "default_otel_enabled")]
    pub otel_enabled: bool,

    #[serde(default = "default_otel_endpoint")]
    pub otel_endpoint: String,

    #[serde(default = "default_otel_service_name")]
    pub otel_service_name: String,

    // NATS configuration
    /// NATS server URL for fan-out publishing
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// Connection timeout in seconds for the initial NATS dial
    #[serde(default = "default_nats_connect_timeout_secs")]
    pub nats_connect_timeout_secs: u64,

    /// Disable fan-out entirely; persisted events are not republished
    #[serde(default = "default_fanout_enabled")]
    pub fanout_enabled: bool,

    // Channel tuning
    /// Tenants whose channels open at startup (comma-separated ids)
    #[serde(default = "default_tenants")]
    pub tenants: String,

    /// Per-operation storage deadline in seconds
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,

    /// Page size used when streaming index queries
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Seconds between Degraded channel health probes
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,

    /// Consecutive failed probes before a channel disconnects
    #[serde(default = "default_max_failed_health_checks")]
    pub max_failed_health_checks: u32,

    /// Entity cache capacity per kind, per tenant
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Entity cache TTL in seconds; 0 disables the TTL backstop
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_otel_enabled() -> bool {
    false
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_otel_service_name() -> String {
    "tether-server".to_string()
}

fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_nats_connect_timeout_secs() -> u64 {
    10
}

fn default_fanout_enabled() -> bool {
    true
}

fn default_tenants() -> String {
    "default".to_string()
}

fn default_operation_timeout_secs() -> u64 {
    30
}

fn default_page_size() -> usize {
    100
}

fn default_health_check_interval_secs() -> u64 {
    5
}

fn default_max_failed_health_checks() -> u32 {
    3
}

fn default_cache_capacity() -> usize {
    10_000
}

fn default_cache_ttl_secs() -> u64 {
    300
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("TETHER"))
            .build()?
            .try_deserialize()
    }

    /// Tenant ids whose channels are opened at startup.
    pub fn tenant_ids(&self) -> Vec<String> {
        self.tenants
            .split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect()
    }
}
