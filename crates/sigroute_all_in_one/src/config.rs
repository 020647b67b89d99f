use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    // NATS configuration
    /// NATS server URL
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// JetStream stream holding every pipeline channel
    #[serde(default = "default_nats_stream")]
    pub nats_stream: String,

    /// Root of channel names (`{prefix}.types.{stage}`)
    #[serde(default = "default_channel_prefix")]
    pub channel_prefix: String,

    /// Comma-separated stage names hosted by this process
    #[serde(default = "default_stages")]
    pub stages: String,

    /// Batch size for consumers
    #[serde(default = "default_nats_batch_size")]
    pub nats_batch_size: usize,

    /// Max wait time for batches in seconds
    #[serde(default = "default_nats_batch_wait_secs")]
    pub nats_batch_wait_secs: u64,

    /// Startup timeout for initialization operations in seconds
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,

    // Pipeline logging
    /// Running under the managed platform: JSON diagnostics, no console echo
    #[serde(default)]
    pub managed_environment: bool,

    /// Subject root for the NATS log sink; empty disables it
    #[serde(default)]
    pub log_subject: String,

    // OpenTelemetry configuration
    /// OpenTelemetry OTLP endpoint (gRPC)
    #[serde(default = "default_otel_endpoint")]
    pub otel_endpoint: String,

    /// Enable OpenTelemetry export
    #[serde(default)]
    pub otel_enabled: bool,

    /// Service name for OpenTelemetry resource
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_nats_stream() -> String {
    "sigfox".to_string()
}

fn default_channel_prefix() -> String {
    "sigfox".to_string()
}

fn default_stages() -> String {
    "forward".to_string()
}

fn default_nats_batch_size() -> usize {
    30
}

fn default_nats_batch_wait_secs() -> u64 {
    5
}

fn default_startup_timeout_secs() -> u64 {
    30
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "sigroute".to_string()
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("SIGROUTE"))
            .build()?
            .try_deserialize()
    }

    /// Stage names from `stages`, trimmed, empties dropped
    pub fn stage_names(&self) -> Vec<String> {
        self.stages
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}
