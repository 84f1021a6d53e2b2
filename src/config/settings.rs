use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub tenant: TenantConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

/// Tenant identity. The organization id doubles as the OIDC realm and
/// selects the ingest topic; both ids are assigned by the platform.
#[derive(Debug, Clone, Deserialize)]
pub struct TenantConfig {
    pub organization_id: String,
    pub project_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// Broker endpoint. The scheme selects the transport:
    /// mqtt/mqtt-tcp, mqtts, ws, or wss.
    #[serde(default = "default_broker_url")]
    pub url: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// MQTT keep-alive interval in seconds
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// How long to wait for the broker's CONNACK
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// How long a publish waits for its PUBACK
    #[serde(default = "default_ack_timeout")]
    pub ack_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Credential method: "oidc", "basic", or "none"
    #[serde(default = "default_auth_method")]
    pub method: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// OIDC client id registered with the identity provider
    #[serde(default = "default_oidc_client_id")]
    pub client_id: String,
    /// Base URL of the identity provider, up to but not including /realms
    pub authority: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Delivery order: "fifo" or "lifo"
    #[serde(default = "default_queue_strategy")]
    pub strategy: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Poll interval while the sink is disconnected (ms)
    #[serde(default = "default_disconnected_poll_ms")]
    pub disconnected_poll_ms: u64,
    /// Poll interval while the queue is empty (ms)
    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,
    /// Pause after a failed publish before the next attempt (ms)
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// How long a cooperative pipeline stop may take before the
    /// draining task is cancelled (seconds)
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectConfig {
    /// First retry delay in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Ceiling for the reconnect delay in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Jitter factor (0.0 to 1.0); 0 keeps delays deterministic
    #[serde(default)]
    pub jitter_factor: f64,
}

fn default_broker_url() -> String {
    "mqtt://localhost:1883".to_string()
}

fn default_client_id() -> String {
    "relaymq-client".to_string()
}

fn default_keep_alive() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_ack_timeout() -> u64 {
    10
}

fn default_auth_method() -> String {
    "oidc".to_string()
}

fn default_oidc_client_id() -> String {
    "event-ingestor".to_string()
}

fn default_queue_strategy() -> String {
    "fifo".to_string()
}

fn default_disconnected_poll_ms() -> u64 {
    500
}

fn default_idle_poll_ms() -> u64 {
    100
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_stop_timeout() -> u64 {
    5
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    60_000 // 1 minute
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Start with default values
            .set_default("broker.url", "mqtt://localhost:1883")?
            .set_default("broker.client_id", "relaymq-client")?
            .set_default("auth.method", "oidc")?
            .set_default("auth.client_id", "event-ingestor")?
            .set_default("queue.strategy", "fifo")?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables
            // TENANT__ORGANIZATION_ID, BROKER__URL, AUTH__USERNAME, etc.
            .add_source(
                Environment::default()
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(","),
            );

        builder.build()?.try_deserialize()
    }

    /// Settings for an unauthenticated broker on localhost, the usual
    /// developer setup.
    pub fn local(organization_id: &str, project_id: &str) -> Self {
        Self {
            tenant: TenantConfig {
                organization_id: organization_id.to_string(),
                project_id: project_id.to_string(),
            },
            broker: BrokerConfig {
                url: "mqtt-tcp://localhost:1883".to_string(),
                ..Default::default()
            },
            auth: AuthConfig {
                method: "none".to_string(),
                ..Default::default()
            },
            queue: QueueConfig::default(),
            pipeline: PipelineConfig::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: default_broker_url(),
            client_id: default_client_id(),
            keep_alive_secs: default_keep_alive(),
            connect_timeout_secs: default_connect_timeout(),
            ack_timeout_secs: default_ack_timeout(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            method: default_auth_method(),
            username: None,
            password: None,
            client_id: default_oidc_client_id(),
            authority: None,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            strategy: default_queue_strategy(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            disconnected_poll_ms: default_disconnected_poll_ms(),
            idle_poll_ms: default_idle_poll_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            stop_timeout_secs: default_stop_timeout(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_factor: 0.0,
        }
    }
}
