//! Public client facade.
//!
//! Ties the queue, sink, and pipeline together behind a small API:
//! `start`, `send_message`, `wait_for_queue_to_empty`, `stop`. Sending
//! never blocks on the network; events are queued and the pipeline
//! delivers them when the broker allows.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use crate::auth::create_credential_provider;
use crate::config::Settings;
use crate::error::Result;
use crate::event::Event;
use crate::pipeline::{DeliveryPipeline, DrainConfig};
use crate::queue::{create_queue, QueueStrategy};
use crate::sink::{MqttSink, MqttSinkConfig, Sink};

/// Cadence for polling the queue depth while draining.
const DRAIN_POLL: Duration = Duration::from_millis(100);

/// Client-side event relay. Cheap to share behind an `Arc`.
pub struct RelayClient {
    queue: Arc<dyn QueueStrategy>,
    sink: Arc<dyn Sink>,
    pipeline: DeliveryPipeline,
    stop_timeout: Duration,
}

impl RelayClient {
    /// Build a client wired up from settings: credential provider, MQTT
    /// sink, and queue all come from the configuration.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        tracing::info!(
            organization_id = %settings.tenant.organization_id,
            project_id = %settings.tenant.project_id,
            broker_url = %settings.broker.url,
            "Building relay client"
        );
        let credentials = create_credential_provider(settings)?;
        let sink_config = MqttSinkConfig::from_settings(settings)?;
        let sink: Arc<dyn Sink> = Arc::new(MqttSink::new(sink_config, credentials));
        let queue = create_queue(&settings.queue)?;
        let drain = DrainConfig::from_settings(&settings.pipeline);
        let stop_timeout = Duration::from_secs(settings.pipeline.stop_timeout_secs);
        Ok(Self::assemble(queue, sink, drain, stop_timeout))
    }

    /// Assemble a client from parts, for swapping in a different sink or
    /// queue.
    pub fn with_components(
        queue: Arc<dyn QueueStrategy>,
        sink: Arc<dyn Sink>,
        drain: DrainConfig,
        stop_timeout: Duration,
    ) -> Self {
        Self::assemble(queue, sink, drain, stop_timeout)
    }

    fn assemble(
        queue: Arc<dyn QueueStrategy>,
        sink: Arc<dyn Sink>,
        drain: DrainConfig,
        stop_timeout: Duration,
    ) -> Self {
        let pipeline = DeliveryPipeline::new(Arc::clone(&queue), Arc::clone(&sink), drain);
        Self {
            queue,
            sink,
            pipeline,
            stop_timeout,
        }
    }

    /// Connect the sink and start draining the queue.
    pub async fn start(&self) -> Result<()> {
        self.sink.connect().await?;
        self.pipeline.start_processing();
        Ok(())
    }

    /// Queue a payload for delivery. Returns the assigned message id.
    pub fn send_message(&self, payload: impl Into<String>) -> Uuid {
        let event = Event::new(payload);
        let message_id = event.message_id();
        self.enqueue(event);
        message_id
    }

    /// Queue a prebuilt event.
    pub fn enqueue(&self, event: Event) {
        let message_id = event.message_id();
        self.queue.enqueue(event);
        tracing::debug!(
            message_id = %message_id,
            queue_depth = self.queue.message_count(),
            "Event queued"
        );
    }

    /// Poll until the queue drains or `wait` elapses. Returns whether the
    /// queue emptied.
    pub async fn wait_for_queue_to_empty(&self, wait: Duration) -> bool {
        let deadline = Instant::now() + wait;
        while !self.queue.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                tracing::warn!(
                    queue_depth = self.queue.message_count(),
                    "Queue did not drain in time"
                );
                return false;
            }
            tokio::time::sleep(remaining.min(DRAIN_POLL)).await;
        }
        true
    }

    /// Drain the queue (bounded by `wait`), stop the pipeline, and close
    /// the broker connection.
    pub async fn stop(&self, wait: Duration) -> Result<()> {
        tracing::info!("Stopping relay client");
        if !self.wait_for_queue_to_empty(wait).await {
            tracing::warn!(
                queue_depth = self.queue.message_count(),
                "Stopping with undelivered events still queued"
            );
        }
        self.pipeline.stop_processing(self.stop_timeout).await;
        self.sink.disconnect().await?;
        tracing::info!("Relay client stopped");
        Ok(())
    }

    pub fn queued_count(&self) -> usize {
        self.queue.message_count()
    }

    pub fn is_connected(&self) -> bool {
        self.sink.is_connected()
    }
}
