//! Transport sinks.
//!
//! A sink owns the link to the ingestion endpoint and delivers one event
//! at a time. The MQTT implementation keeps itself connected from a
//! background monitor; callers only ever observe `is_connected` flipping
//! and `send` succeeding or failing.

use async_trait::async_trait;

use crate::error::Result;
use crate::event::Event;

mod backoff;
mod broker_url;
mod mqtt;

pub use backoff::{BackoffConfig, ReconnectBackoff};
pub use broker_url::{BrokerTransport, BrokerUrl};
pub use mqtt::{LinkState, MqttSink, MqttSinkConfig};

/// Destination for events leaving the delivery queue.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Begin connection maintenance. Returns once the sink is usable;
    /// reaching the broker may still be in progress in the background.
    async fn connect(&self) -> Result<()>;

    /// Tear the link down permanently. Idempotent; no reconnection
    /// happens afterwards.
    async fn disconnect(&self) -> Result<()>;

    /// Deliver one event, waiting for the broker's acknowledgment.
    async fn send(&self, event: &Event) -> Result<()>;

    /// Whether the link is currently usable for `send`.
    fn is_connected(&self) -> bool;
}
