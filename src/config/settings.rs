use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub otel: OtelConfig,
}

/// Persistence backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Storage backend: "postgres" or "memory"
    #[serde(default = "default_store_backend")]
    pub backend: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u64,
}

fn default_store_backend() -> String {
    "postgres".to_string()
}

fn default_database_url() -> String {
    "postgres://localhost:5432/atelier_notifications".to_string()
}

fn default_pool_size() -> u32 {
    10
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_idle_timeout() -> u64 {
    600 // 10 minutes
}

/// Outbound messaging gateway configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    /// Delivery mode: "http" posts to the messaging gateway, "dry_run" only logs
    #[serde(default = "default_transport_mode")]
    pub mode: String,
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_send_timeout")]
    pub send_timeout_seconds: u64,
    /// Language code for WhatsApp Cloud OTP templates
    #[serde(default = "default_otp_language")]
    pub otp_language: String,
}

fn default_transport_mode() -> String {
    "dry_run".to_string()
}

fn default_gateway_url() -> String {
    "http://localhost:8090".to_string()
}

fn default_send_timeout() -> u64 {
    10
}

fn default_otp_language() -> String {
    "fr".to_string()
}

/// Store identity injected into every rendered message.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_store_name")]
    pub store_name: String,
    #[serde(default)]
    pub store_phone: String,
    #[serde(default)]
    pub store_url: String,
    #[serde(default)]
    pub store_whatsapp: String,
    #[serde(default)]
    pub store_address: String,
}

fn default_store_name() -> String {
    "Atelier".to_string()
}

/// Scheduled-notification worker configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between due-notification sweeps
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    /// Maximum scheduled rows processed per sweep
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_poll_interval() -> u64 {
    120 // 2 minutes
}

fn default_batch_size() -> usize {
    50
}

/// OpenTelemetry export configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_otel_service_name")]
    pub service_name: String,
    /// Trace sampling ratio (0.0-1.0)
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_otel_service_name() -> String {
    "atelier-notification-service".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Start with default values
            .set_default("store.backend", "postgres")?
            .set_default(
                "store.database_url",
                "postgres://localhost:5432/atelier_notifications",
            )?
            .set_default("transport.mode", "dry_run")?
            .set_default("transport.gateway_url", "http://localhost:8090")?
            .set_default("scheduler.poll_interval_seconds", 120)?
            .set_default("scheduler.batch_size", 50)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables
            // STORE_BACKEND, TRANSPORT_MODE, IDENTITY_STORE_NAME, OTEL_ENABLED, etc.
            .add_source(
                Environment::default()
                    .separator("_")
                    .try_parsing(true)
                    .list_separator(","),
            );

        builder.build()?.try_deserialize()
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            database_url: default_database_url(),
            pool_size: default_pool_size(),
            connect_timeout_seconds: default_connect_timeout(),
            idle_timeout_seconds: default_idle_timeout(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mode: default_transport_mode(),
            gateway_url: default_gateway_url(),
            api_key: String::new(),
            send_timeout_seconds: default_send_timeout(),
            otp_language: default_otp_language(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            store_name: default_store_name(),
            store_phone: String::new(),
            store_url: String::new(),
            store_whatsapp: String::new(),
            store_address: String::new(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: default_poll_interval(),
            batch_size: default_batch_size(),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_otel_service_name(),
            sampling_ratio: default_sampling_ratio(),
        }
    }
}
