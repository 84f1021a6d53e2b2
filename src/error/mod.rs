use thiserror::Error;

/// Unified error type for the relay client.
///
/// Connection and publish failures are consumed internally by the
/// connection monitor and the delivery pipeline; callers mostly see
/// configuration and lifecycle errors.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Identity provider request failed: {0}")]
    IdentityProvider(#[from] reqwest::Error),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Not connected to broker")]
    NotConnected,

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Sink has been shut down")]
    SinkClosed,
}

pub type Result<T> = std::result::Result<T, RelayError>;
