//! MQTT transport sink.
//!
//! Connection management follows a supervisor model. A monitor task owns
//! the connect/retry cycle; a driver task pumps the client event loop and
//! reports what the broker said; publishers only ever observe the shared
//! link state. The broker being unreachable is never an error callers
//! see, it is a state the monitor works its way out of.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event as MqttEvent, EventLoop, MqttOptions, Packet, QoS,
    Transport,
};
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::auth::CredentialProvider;
use crate::config::Settings;
use crate::error::{RelayError, Result};
use crate::event::Event;

use super::backoff::{BackoffConfig, ReconnectBackoff};
use super::broker_url::{BrokerTransport, BrokerUrl};
use super::Sink;

/// Capacity of the client's request channel. Publishes are serialized,
/// so this only needs room for control traffic.
const EVENT_CHANNEL_CAPACITY: usize = 10;
/// Capacity of the ack fan-out channel.
const ACK_CHANNEL_CAPACITY: usize = 8;

/// Connection lifecycle states observable through the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No usable link; the monitor is backing off or rebuilding.
    Disconnected,
    /// A connect is in flight, waiting for the broker's CONNACK.
    Connecting,
    /// CONNACK accepted; publishes may proceed.
    Connected,
    /// Terminal state entered by `disconnect`. Never left.
    ShuttingDown,
}

/// Sink configuration derived from settings.
#[derive(Debug, Clone)]
pub struct MqttSinkConfig {
    pub url: BrokerUrl,
    pub client_id: String,
    pub topic: String,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    pub ack_timeout: Duration,
    pub backoff: BackoffConfig,
}

impl MqttSinkConfig {
    /// Derive the sink configuration from settings. The ingest topic is
    /// `in/{organization_id}`.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let url = BrokerUrl::parse(&settings.broker.url)?;
        if settings.broker.client_id.is_empty() {
            return Err(RelayError::InvalidConfig(
                "broker.client_id cannot be empty".to_string(),
            ));
        }
        // rumqttc rejects shorter keep-alive intervals.
        if settings.broker.keep_alive_secs < 5 {
            return Err(RelayError::InvalidConfig(
                "broker.keep_alive_secs must be at least 5".to_string(),
            ));
        }
        Ok(Self {
            url,
            client_id: settings.broker.client_id.clone(),
            topic: format!("in/{}", settings.tenant.organization_id),
            keep_alive: Duration::from_secs(settings.broker.keep_alive_secs),
            connect_timeout: Duration::from_secs(settings.broker.connect_timeout_secs),
            ack_timeout: Duration::from_secs(settings.broker.ack_timeout_secs),
            backoff: BackoffConfig {
                base_delay_ms: settings.reconnect.base_delay_ms,
                max_delay_ms: settings.reconnect.max_delay_ms,
                jitter_factor: settings.reconnect.jitter_factor,
            },
        })
    }
}

/// A live client and the task pumping its event loop.
struct ActiveLink {
    client: AsyncClient,
    driver: JoinHandle<()>,
    /// Acks broadcast by this link's driver. The channel dies with the
    /// link, so an ack from an older connection can never reach a
    /// publisher waiting on the current one.
    acks: broadcast::Sender<u16>,
}

/// State shared between the sink handle, the monitor, and the driver.
struct SinkShared {
    config: MqttSinkConfig,
    credentials: Arc<dyn CredentialProvider>,
    state_tx: watch::Sender<LinkState>,
    link: StdMutex<Option<ActiveLink>>,
    /// Serializes publishes. Held across the publish-to-ack window, so a
    /// teardown that takes it is guaranteed no publish is in flight.
    publish_guard: Mutex<()>,
}

/// MQTT sink with self-healing connection management.
///
/// Dropping the sink without an orderly `disconnect` still stops the
/// monitor, the driver, and credential maintenance.
pub struct MqttSink {
    shared: Arc<SinkShared>,
    reconnect_rx: StdMutex<Option<mpsc::Receiver<&'static str>>>,
    monitor: StdMutex<Option<JoinHandle<()>>>,
}

impl MqttSink {
    /// Build a sink. The renewal callback is registered here, at
    /// construction, so a token renewal forces a reconnect even if it
    /// fires before `connect`.
    pub fn new(config: MqttSinkConfig, credentials: Arc<dyn CredentialProvider>) -> Self {
        let (state_tx, _) = watch::channel(LinkState::Disconnected);
        let (reconnect_tx, reconnect_rx) = mpsc::channel(1);

        let shared = Arc::new(SinkShared {
            config,
            credentials,
            state_tx,
            link: StdMutex::new(None),
            publish_guard: Mutex::new(()),
        });

        shared
            .credentials
            .register_renewal_callback(Box::new(move |_bearer| {
                // A request already queued will rebuild with fresh
                // credentials anyway; coalesce instead of stacking.
                match reconnect_tx.try_send("credential renewal") {
                    Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => Ok(()),
                    Err(mpsc::error::TrySendError::Closed(_)) => Err(RelayError::Connection(
                        "reconnect channel closed".to_string(),
                    )),
                }
            }));

        Self {
            shared,
            reconnect_rx: StdMutex::new(Some(reconnect_rx)),
            monitor: StdMutex::new(None),
        }
    }

    fn lock_monitor(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.monitor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take_reconnect_rx(&self) -> Option<mpsc::Receiver<&'static str>> {
        self.reconnect_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

#[async_trait]
impl Sink for MqttSink {
    async fn connect(&self) -> Result<()> {
        if self.shared.state() == LinkState::ShuttingDown {
            return Err(RelayError::SinkClosed);
        }

        let reconnect_rx = match self.take_reconnect_rx() {
            Some(rx) => rx,
            // Monitor already running; nothing to start.
            None => return Ok(()),
        };

        self.shared.credentials.start();

        let monitor = tokio::spawn({
            let shared = Arc::clone(&self.shared);
            async move { shared.run_monitor(reconnect_rx).await }
        });
        *self.lock_monitor() = Some(monitor);

        // Give the first attempt a bounded window. Failure here is not an
        // error: the monitor keeps retrying and the queue absorbs events
        // until the broker is reachable.
        let mut state_rx = self.shared.state_tx.subscribe();
        let connected = timeout(
            self.shared.config.connect_timeout,
            state_rx.wait_for(|state| *state == LinkState::Connected),
        )
        .await;
        if connected.is_err() {
            tracing::warn!(
                host = %self.shared.config.url.host(),
                port = self.shared.config.url.port(),
                "Broker not reachable yet, continuing in the background"
            );
        }

        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if self.shared.state() == LinkState::ShuttingDown {
            return Ok(());
        }
        tracing::info!("Shutting down MQTT sink");
        self.shared.set_state(LinkState::ShuttingDown);

        // Let an in-flight publish resolve before the link goes away.
        let _guard = self.shared.publish_guard.lock().await;

        let monitor = self.lock_monitor().take();
        if let Some(task) = monitor {
            task.abort();
            let _ = task.await;
        }

        self.shared.teardown_connection().await;
        self.shared.credentials.shutdown();
        tracing::info!("MQTT sink shut down");
        Ok(())
    }

    async fn send(&self, event: &Event) -> Result<()> {
        let shared = &self.shared;

        // One publish in flight at a time. In-flight = 1 is also what
        // makes the next PUBACK the correlated one.
        let _guard = shared.publish_guard.lock().await;

        if !self.is_connected() {
            return Err(RelayError::NotConnected);
        }

        // Subscribe on the link carrying this publish, before publishing,
        // so the ack cannot slip past.
        let (client, mut acks) = {
            let link = shared.lock_link();
            match link.as_ref() {
                Some(active) => (active.client.clone(), active.acks.subscribe()),
                None => return Err(RelayError::NotConnected),
            }
        };

        client
            .publish(
                shared.config.topic.clone(),
                QoS::AtLeastOnce,
                false,
                event.payload().as_bytes().to_vec(),
            )
            .await
            .map_err(|e| RelayError::Publish(format!("publish request failed: {e}")))?;

        let mut state_rx = shared.state_tx.subscribe();
        tokio::select! {
            ack = timeout(shared.config.ack_timeout, acks.recv()) => match ack {
                Ok(Ok(pkid)) => {
                    tracing::debug!(
                        message_id = %event.message_id(),
                        pkid = pkid,
                        "Publish acknowledged"
                    );
                    Ok(())
                }
                Ok(Err(_)) => Err(RelayError::Publish(
                    "ack stream closed before the broker responded".to_string(),
                )),
                Err(_) => {
                    // The publish stays outstanding on this link, and its
                    // late ack must never confirm a later publish. Drop
                    // the link; the monitor rebuilds it.
                    shared.teardown_connection().await;
                    Err(RelayError::Publish(format!(
                        "no ack within {:?}",
                        shared.config.ack_timeout
                    )))
                }
            },
            // The watch guard is dropped inside the branch future so the
            // select output stays `Send`.
            _ = async {
                let _ = state_rx.wait_for(|state| *state != LinkState::Connected).await;
            } => {
                Err(RelayError::Publish("connection lost before ack".to_string()))
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.shared.state() == LinkState::Connected && self.shared.driver_alive()
    }
}

impl Drop for MqttSink {
    fn drop(&mut self) {
        // The monitor and driver hold the shared state alive on their
        // own, so a sink dropped without `disconnect` has to stop them
        // from here or they run forever.
        self.shared.set_state(LinkState::ShuttingDown);
        if let Some(task) = self.lock_monitor().take() {
            task.abort();
        }
        if let Some(active) = self.shared.lock_link().take() {
            active.driver.abort();
        }
        self.shared.credentials.shutdown();
    }
}

impl SinkShared {
    fn state(&self) -> LinkState {
        *self.state_tx.borrow()
    }

    /// Transition the link state. ShuttingDown is terminal and is never
    /// overwritten, no matter what the driver reports afterwards.
    fn set_state(&self, next: LinkState) {
        self.state_tx.send_if_modified(|state| {
            if *state == LinkState::ShuttingDown || *state == next {
                false
            } else {
                tracing::debug!(from = ?*state, to = ?next, "Link state changed");
                *state = next;
                true
            }
        });
    }

    fn lock_link(&self) -> std::sync::MutexGuard<'_, Option<ActiveLink>> {
        self.link
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn driver_alive(&self) -> bool {
        self.lock_link()
            .as_ref()
            .map(|active| !active.driver.is_finished())
            .unwrap_or(false)
    }

    /// Connect/retry cycle. Runs until shutdown.
    async fn run_monitor(self: Arc<Self>, mut reconnect_rx: mpsc::Receiver<&'static str>) {
        let mut backoff = ReconnectBackoff::new(self.config.backoff.clone());
        let mut state_rx = self.state_tx.subscribe();
        // A closed channel just means no renewal source is registered.
        let mut reconnect_closed = false;

        tracing::info!(
            host = %self.config.url.host(),
            port = self.config.url.port(),
            topic = %self.config.topic,
            "Connection monitor started"
        );

        loop {
            match self.state() {
                LinkState::ShuttingDown => break,
                LinkState::Connected => {
                    if *state_rx.borrow_and_update() != LinkState::Connected {
                        continue;
                    }
                    // Park until the link drops, a forced reconnect
                    // arrives, or shutdown begins.
                    tokio::select! {
                        _ = state_rx.changed() => {}
                        request = reconnect_rx.recv(), if !reconnect_closed => match request {
                            Some(reason) => self.recycle_connection(reason).await,
                            None => reconnect_closed = true,
                        },
                        _ = tokio::time::sleep(self.config.keep_alive) => {
                            // The watch only moves when the driver reports;
                            // verify the driver itself is still there.
                            if !self.driver_alive() {
                                tracing::warn!("Driver task gone without a state change");
                                self.set_state(LinkState::Disconnected);
                            }
                        }
                    }
                }
                _ => {
                    // Rebuilding anyway; stale reconnect requests are moot.
                    while reconnect_rx.try_recv().is_ok() {}

                    match Self::open_connection(&self).await {
                        Ok(()) => {
                            backoff.reset();
                            tracing::info!("Broker connection established");
                        }
                        Err(e) => {
                            let delay = backoff.next_delay();
                            tracing::warn!(
                                error = %e,
                                attempt = backoff.attempt(),
                                retry_in_ms = delay.as_millis() as u64,
                                "Broker connection failed, backing off"
                            );
                            self.teardown_connection().await;
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
            }
        }

        tracing::info!("Connection monitor stopped");
    }

    /// One connection attempt: fetch credentials, build a client, spawn
    /// its driver, and wait for the handshake outcome.
    async fn open_connection(this: &Arc<Self>) -> Result<()> {
        this.set_state(LinkState::Connecting);

        // Fetched fresh on every attempt; this may block on a full
        // re-authentication if the stored token already expired.
        let credentials = this.credentials.broker_credentials().await?;

        let url = &this.config.url;
        let mut options = if url.is_websocket() {
            // rumqttc expects the full URL in the host slot for websocket
            // transports; the port argument is ignored there.
            MqttOptions::new(
                this.config.client_id.clone(),
                url.websocket_url(),
                url.port(),
            )
        } else {
            MqttOptions::new(this.config.client_id.clone(), url.host(), url.port())
        };
        options.set_keep_alive(this.config.keep_alive);
        match url.transport() {
            BrokerTransport::Tcp => options.set_transport(Transport::Tcp),
            BrokerTransport::Tls => options.set_transport(Transport::tls_with_default_config()),
            BrokerTransport::Ws => options.set_transport(Transport::Ws),
            BrokerTransport::Wss => options.set_transport(Transport::wss_with_default_config()),
        };
        if let Some(creds) = credentials {
            options.set_credentials(creds.username, creds.password);
        }

        let (client, event_loop) = AsyncClient::new(options, EVENT_CHANNEL_CAPACITY);
        let (acks, _) = broadcast::channel(ACK_CHANNEL_CAPACITY);
        let driver = tokio::spawn({
            let shared = Arc::clone(this);
            let acks = acks.clone();
            async move { shared.drive_event_loop(event_loop, acks).await }
        });

        {
            let mut link = this.lock_link();
            *link = Some(ActiveLink {
                client,
                driver,
                acks,
            });
        }

        let mut state_rx = this.state_tx.subscribe();
        let outcome = timeout(
            this.config.connect_timeout,
            state_rx.wait_for(|state| *state != LinkState::Connecting),
        )
        .await;

        match outcome {
            Ok(Ok(state)) => match *state {
                LinkState::Connected => Ok(()),
                LinkState::ShuttingDown => {
                    Err(RelayError::Connection("shutdown during connect".to_string()))
                }
                _ => Err(RelayError::Connection(
                    "broker rejected or dropped the connection".to_string(),
                )),
            },
            Ok(Err(_)) => Err(RelayError::Connection(
                "link state channel closed".to_string(),
            )),
            Err(_) => Err(RelayError::Connection(format!(
                "no CONNACK within {:?}",
                this.config.connect_timeout
            ))),
        }
    }

    /// Pump the client event loop until it fails.
    ///
    /// Exits on the first poll error instead of letting the client retry
    /// internally: an internal retry would replay CONNECT with the
    /// credentials captured at build time, which may have expired. The
    /// monitor rebuilds the client around a freshly fetched credential.
    async fn drive_event_loop(&self, mut event_loop: EventLoop, acks: broadcast::Sender<u16>) {
        loop {
            if self.state() == LinkState::ShuttingDown {
                break;
            }
            match event_loop.poll().await {
                Ok(MqttEvent::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        tracing::info!(
                            session_present = ack.session_present,
                            "Broker accepted connection"
                        );
                        self.set_state(LinkState::Connected);
                    } else {
                        tracing::warn!(code = ?ack.code, "Broker rejected connection");
                        self.set_state(LinkState::Disconnected);
                        break;
                    }
                }
                Ok(MqttEvent::Incoming(Packet::PubAck(ack))) => {
                    // No receiver just means no publish is waiting.
                    let _ = acks.send(ack.pkid);
                }
                Ok(MqttEvent::Incoming(Packet::Disconnect)) => {
                    tracing::warn!("Broker requested disconnect");
                    self.set_state(LinkState::Disconnected);
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Event loop error, dropping connection");
                    self.set_state(LinkState::Disconnected);
                    break;
                }
            }
        }
    }

    /// Force a rebuild so the next CONNECT carries fresh credentials.
    /// Waits for any in-flight publish to resolve first.
    async fn recycle_connection(&self, reason: &str) {
        tracing::info!(reason = %reason, "Recycling broker connection");
        let _guard = self.publish_guard.lock().await;
        self.teardown_connection().await;
    }

    async fn teardown_connection(&self) {
        let link = self.lock_link().take();
        if let Some(active) = link {
            // Best effort; the broker may already be gone.
            let _ = active.client.disconnect().await;
            active.driver.abort();
        }
        // No-op during shutdown. Otherwise this covers a driver that was
        // aborted before it could report the link as gone.
        self.set_state(LinkState::Disconnected);
    }
}
