//! Queue-to-sink delivery pipeline.
//!
//! A single worker task drains the queue into the sink, one event at a
//! time. Failures never drop an event: the event goes back to the queue
//! and the worker pauses before retrying. While the sink is disconnected
//! the worker backs off entirely and lets the queue absorb the load.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::config::PipelineConfig;
use crate::queue::QueueStrategy;
use crate::sink::Sink;

/// Polling cadence for the drain loop.
#[derive(Debug, Clone)]
pub struct DrainConfig {
    /// Pause while the sink is disconnected.
    pub disconnected_poll: Duration,
    /// Pause when the queue is empty.
    pub idle_poll: Duration,
    /// Pause after a failed delivery, before the retry.
    pub retry_delay: Duration,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            disconnected_poll: Duration::from_millis(500),
            idle_poll: Duration::from_millis(100),
            retry_delay: Duration::from_millis(1000),
        }
    }
}

impl DrainConfig {
    pub fn from_settings(settings: &PipelineConfig) -> Self {
        Self {
            disconnected_poll: Duration::from_millis(settings.disconnected_poll_ms),
            idle_poll: Duration::from_millis(settings.idle_poll_ms),
            retry_delay: Duration::from_millis(settings.retry_delay_ms),
        }
    }
}

/// Owns the drain worker and its shutdown signal.
pub struct DeliveryPipeline {
    queue: Arc<dyn QueueStrategy>,
    sink: Arc<dyn Sink>,
    config: DrainConfig,
    shutdown: watch::Sender<bool>,
    worker: StdMutex<Option<JoinHandle<()>>>,
}

impl DeliveryPipeline {
    pub fn new(queue: Arc<dyn QueueStrategy>, sink: Arc<dyn Sink>, config: DrainConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            queue,
            sink,
            config,
            shutdown,
            worker: StdMutex::new(None),
        }
    }

    /// Spawn the drain worker. A second call while the worker is alive
    /// is a no-op; after a stop the pipeline can be started again.
    pub fn start_processing(&self) {
        let mut worker = self.lock_worker();
        if worker.as_ref().map(|w| !w.is_finished()).unwrap_or(false) {
            tracing::warn!("Delivery pipeline already running");
            return;
        }

        self.shutdown.send_replace(false);
        let handle = tokio::spawn(drain_loop(
            Arc::clone(&self.queue),
            Arc::clone(&self.sink),
            self.config.clone(),
            self.shutdown.subscribe(),
        ));
        *worker = Some(handle);
        tracing::info!("Delivery pipeline started");
    }

    /// Signal the worker to finish its current event and exit. If it has
    /// not exited within `wait`, cancel it outright.
    pub async fn stop_processing(&self, wait: Duration) {
        let handle = self.lock_worker().take();
        let Some(mut handle) = handle else {
            return;
        };

        self.shutdown.send_replace(true);
        match timeout(wait, &mut handle).await {
            Ok(_) => tracing::info!("Delivery pipeline stopped"),
            Err(_) => {
                tracing::warn!(
                    wait_ms = wait.as_millis() as u64,
                    "Delivery pipeline did not stop in time, cancelling"
                );
                handle.abort();
                let _ = handle.await;
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock_worker()
            .as_ref()
            .map(|w| !w.is_finished())
            .unwrap_or(false)
    }

    fn lock_worker(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn drain_loop(
    queue: Arc<dyn QueueStrategy>,
    sink: Arc<dyn Sink>,
    config: DrainConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        if !sink.is_connected() {
            if pause(&mut shutdown, config.disconnected_poll).await {
                break;
            }
            continue;
        }

        match queue.try_dequeue() {
            Some(event) => match sink.send(&event).await {
                Ok(()) => {
                    tracing::debug!(message_id = %event.message_id(), "Event delivered");
                }
                Err(e) => {
                    tracing::warn!(
                        message_id = %event.message_id(),
                        error = %e,
                        "Delivery failed, event re-queued"
                    );
                    queue.enqueue(event);
                    if pause(&mut shutdown, config.retry_delay).await {
                        break;
                    }
                }
            },
            None => {
                if pause(&mut shutdown, config.idle_poll).await {
                    break;
                }
            }
        }
    }

    tracing::debug!("Drain loop exited");
}

/// Sleep that wakes early on shutdown. Returns true when shutdown fired.
async fn pause(shutdown: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = shutdown.wait_for(|stop| *stop) => true,
    }
}
