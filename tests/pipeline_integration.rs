//! End-to-end pipeline tests against a scripted sink.
//!
//! These tests exercise the public client API (start, send, drain, stop)
//! without a broker. The sink double can be driven through connect and
//! failure scenarios to verify that no event is ever lost.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use relaymq::event::Event;
use relaymq::pipeline::DrainConfig;
use relaymq::queue::{queue_for_kind, QueueKind, QueueStrategy};
use relaymq::sink::Sink;
use relaymq::{RelayClient, RelayError};

/// Sink double with scriptable connectivity, failures, and latency.
#[derive(Default)]
struct ScriptedSink {
    connected: AtomicBool,
    fail_remaining: AtomicUsize,
    attempts: AtomicUsize,
    send_delay_ms: AtomicU64,
    fail_delay_ms: AtomicU64,
    delivered: Mutex<Vec<Event>>,
}

impl ScriptedSink {
    fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Fail the next `count` sends before succeeding again.
    fn fail_next(&self, count: usize) {
        self.fail_remaining.store(count, Ordering::SeqCst);
    }

    /// Every send blocks this long before resolving.
    fn set_send_delay(&self, delay: Duration) {
        self.send_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Failing sends stay in flight this long before reporting the error.
    fn set_fail_delay(&self, delay: Duration) {
        self.fail_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Send attempts seen, successful or not.
    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn delivered_events(&self) -> Vec<Event> {
        self.delivered.lock().unwrap().clone()
    }

    fn delivered_payloads(&self) -> Vec<String> {
        self.delivered_events()
            .iter()
            .map(|e| e.payload().to_string())
            .collect()
    }
}

#[async_trait]
impl Sink for ScriptedSink {
    async fn connect(&self) -> relaymq::Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> relaymq::Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, event: &Event) -> relaymq::Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let hold = Duration::from_millis(self.send_delay_ms.load(Ordering::SeqCst));
        if !hold.is_zero() {
            tokio::time::sleep(hold).await;
        }
        let remaining = self.fail_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_remaining.store(remaining - 1, Ordering::SeqCst);
            let linger = Duration::from_millis(self.fail_delay_ms.load(Ordering::SeqCst));
            if !linger.is_zero() {
                tokio::time::sleep(linger).await;
            }
            return Err(RelayError::Publish("scripted failure".to_string()));
        }
        self.delivered.lock().unwrap().push(event.clone());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

struct TestEnvironment {
    client: RelayClient,
    sink: Arc<ScriptedSink>,
    queue: Arc<dyn QueueStrategy>,
}

/// Create a client wired to the scripted sink with fast polling.
fn create_test_environment() -> TestEnvironment {
    init_tracing();

    let sink = Arc::new(ScriptedSink::default());
    let queue = queue_for_kind(QueueKind::Fifo);
    let drain = DrainConfig {
        disconnected_poll: Duration::from_millis(20),
        idle_poll: Duration::from_millis(10),
        retry_delay: Duration::from_millis(20),
    };
    let client = RelayClient::with_components(
        queue.clone(),
        sink.clone(),
        drain,
        Duration::from_secs(1),
    );

    TestEnvironment {
        client,
        sink,
        queue,
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

// =============================================================================
// Delivery Flow Integration Tests
// =============================================================================

mod delivery_tests {
    use super::*;

    #[tokio::test]
    async fn test_events_flow_from_send_to_sink_in_order() {
        let env = create_test_environment();

        env.client.start().await.unwrap();
        env.client.send_message(json!({"seq": 1}).to_string());
        env.client.send_message(json!({"seq": 2}).to_string());
        env.client.send_message(json!({"seq": 3}).to_string());

        assert!(
            env.client
                .wait_for_queue_to_empty(Duration::from_secs(2))
                .await
        );
        env.client.stop(Duration::from_secs(1)).await.unwrap();

        assert_eq!(
            env.sink.delivered_payloads(),
            vec![
                json!({"seq": 1}).to_string(),
                json!({"seq": 2}).to_string(),
                json!({"seq": 3}).to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_delivered_event_carries_assigned_id() {
        let env = create_test_environment();

        env.client.start().await.unwrap();
        let message_id = env.client.send_message(json!({"kind": "reading"}).to_string());

        wait_until(|| env.queue.is_empty()).await;
        env.client.stop(Duration::from_secs(1)).await.unwrap();

        let delivered = env.sink.delivered_events();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].message_id(), message_id);
    }

    #[tokio::test]
    async fn test_send_before_start_is_buffered() {
        let env = create_test_environment();

        env.client.send_message("early-one");
        env.client.send_message("early-two");
        assert_eq!(env.client.queued_count(), 2);
        assert!(env.sink.delivered_payloads().is_empty());

        env.client.start().await.unwrap();
        wait_until(|| env.queue.is_empty()).await;
        env.client.stop(Duration::from_secs(1)).await.unwrap();

        assert_eq!(env.sink.delivered_payloads(), vec!["early-one", "early-two"]);
    }
}

// =============================================================================
// Failure Handling Integration Tests
// =============================================================================

mod failure_tests {
    use super::*;

    #[tokio::test]
    async fn test_failed_event_is_retried_not_lost() {
        let env = create_test_environment();
        env.sink.fail_next(1);

        env.client.start().await.unwrap();
        env.client.send_message("survivor");

        wait_until(|| !env.sink.delivered_payloads().is_empty()).await;
        env.client.stop(Duration::from_secs(1)).await.unwrap();

        assert_eq!(env.sink.delivered_payloads(), vec!["survivor"]);
    }

    #[tokio::test]
    async fn test_repeated_failures_retry_until_success() {
        let env = create_test_environment();
        env.sink.fail_next(3);

        env.client.start().await.unwrap();
        env.client.send_message("stubborn");

        wait_until(|| !env.sink.delivered_payloads().is_empty()).await;
        env.client.stop(Duration::from_secs(1)).await.unwrap();

        // Exactly one delivery despite three failed attempts.
        assert_eq!(env.sink.delivered_payloads(), vec!["stubborn"]);
    }

    #[tokio::test]
    async fn test_events_wait_while_sink_is_disconnected() {
        let env = create_test_environment();

        env.client.start().await.unwrap();
        env.sink.set_connected(false);

        env.client.send_message("patient");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(env.client.queued_count(), 1);
        assert!(env.sink.delivered_payloads().is_empty());

        env.sink.set_connected(true);
        wait_until(|| env.queue.is_empty()).await;
        env.client.stop(Duration::from_secs(1)).await.unwrap();

        assert_eq!(env.sink.delivered_payloads(), vec!["patient"]);
    }

    #[tokio::test]
    async fn test_retried_event_lands_after_newer_arrivals() {
        let env = create_test_environment();

        env.client.start().await.unwrap();
        env.client.send_message("event-a");
        wait_until(|| env.sink.delivered_payloads() == vec!["event-a"]).await;

        // The next event fails while in flight, and a newer event arrives
        // during that attempt. The retry queues up behind the newcomer.
        env.sink.set_fail_delay(Duration::from_millis(150));
        env.sink.fail_next(1);
        env.client.send_message("event-b");
        wait_until(|| env.sink.attempts() == 2).await;
        env.client.send_message("event-c");

        wait_until(|| env.sink.delivered_payloads().len() == 3).await;
        env.client.stop(Duration::from_secs(1)).await.unwrap();

        assert_eq!(
            env.sink.delivered_payloads(),
            vec!["event-a", "event-c", "event-b"]
        );
    }
}

// =============================================================================
// Shutdown Semantics Integration Tests
// =============================================================================

mod shutdown_tests {
    use super::*;

    #[tokio::test]
    async fn test_stop_drains_pending_events_first() {
        let env = create_test_environment();

        env.client.start().await.unwrap();
        for i in 0..5 {
            env.client.send_message(json!({"index": i}).to_string());
        }

        env.client.stop(Duration::from_secs(2)).await.unwrap();

        assert_eq!(env.sink.delivered_payloads().len(), 5);
        assert_eq!(env.client.queued_count(), 0);
        assert!(!env.client.is_connected());
    }

    #[tokio::test]
    async fn test_stop_gives_up_on_a_stuck_queue() {
        let env = create_test_environment();

        env.client.start().await.unwrap();
        env.sink.set_connected(false);
        env.client.send_message("stranded");

        env.client.stop(Duration::from_millis(150)).await.unwrap();

        // The event is still queued, and the client still shut down.
        assert_eq!(env.client.queued_count(), 1);
        assert!(!env.client.is_connected());
    }

    #[tokio::test]
    async fn test_wait_for_queue_to_empty_respects_deadline() {
        let env = create_test_environment();

        // Pipeline not started, so nothing will drain.
        env.client.send_message("immovable");

        let started = std::time::Instant::now();
        let drained = env
            .client
            .wait_for_queue_to_empty(Duration::from_millis(200))
            .await;
        let elapsed = started.elapsed();

        assert!(!drained);
        assert!(elapsed >= Duration::from_millis(150));
        assert!(elapsed < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_stop_cancels_a_send_that_outlives_the_timeout() {
        init_tracing();

        let sink = Arc::new(ScriptedSink::default());
        let queue = queue_for_kind(QueueKind::Fifo);
        let drain = DrainConfig {
            disconnected_poll: Duration::from_millis(20),
            idle_poll: Duration::from_millis(10),
            retry_delay: Duration::from_millis(20),
        };
        // Short stop budget; the sink double blocks far longer than it.
        let client = RelayClient::with_components(
            queue,
            sink.clone(),
            drain,
            Duration::from_millis(200),
        );
        sink.set_send_delay(Duration::from_secs(30));

        client.start().await.unwrap();
        client.send_message("stuck");
        wait_until(|| sink.attempts() == 1).await;

        let started = std::time::Instant::now();
        client.stop(Duration::from_millis(100)).await.unwrap();
        let elapsed = started.elapsed();

        // Cancelled at the stop budget, not after the 30s send.
        assert!(elapsed >= Duration::from_millis(180));
        assert!(elapsed < Duration::from_secs(2), "stop took {elapsed:?}");
        assert!(sink.delivered_payloads().is_empty());

        // The worker really is gone: no further attempts land.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(sink.attempts(), 1);
    }

    #[tokio::test]
    async fn test_stop_is_safe_to_call_twice() {
        let env = create_test_environment();

        env.client.start().await.unwrap();
        env.client.send_message("only-once");

        env.client.stop(Duration::from_secs(1)).await.unwrap();
        env.client.stop(Duration::from_millis(100)).await.unwrap();

        assert_eq!(env.sink.delivered_payloads(), vec!["only-once"]);
    }
}
