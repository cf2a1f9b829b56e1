//! MQTT state bridge.
//!
//! Mirrors the device state to a broker and accepts safety commands from it.
//!
//! ## Connection lifecycle
//!
//! ```text
//! Disconnected --connect()--> Connecting --ConnAck--> Connected
//!      ^                          |                      |
//!      |                          +----error/timeout-----+
//!      +--------------------------------------------------+
//!      |
//!      +--(autoConnect, after RECONNECT_DELAY)--> Connecting
//! ```
//!
//! Each connect creates a fresh rumqttc client/event loop pair. The bridge
//! never lets rumqttc reconnect on its own: when a session ends unsolicited,
//! one reconnect attempt is scheduled, and it is skipped if the bridge is
//! already connected (or was explicitly disconnected) by the time it fires.
//!
//! Every session and timer is tagged with a generation number. `connect`
//! and `disconnect` bump the generation, which turns any in-flight session
//! callback or reconnect timer from an older generation into a no-op.
//!
//! ## Topics
//!
//! - subscribe `{baseTopic}/command/safe`
//! - publish (retained) `{baseTopic}/status`, `/safe`, `/connected`,
//!   `/client`, `/uptime`

use std::sync::Arc;
use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    SubscribeReasonCode,
};
use safetymonitor_core::{DeviceSnapshot, MqttSettings};
use safetymonitor_protocol::SafeCommand;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::device::DeviceHandle;

/// Delay before the single reconnect attempt after an unsolicited disconnect.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Upper bound on establishing a broker connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(4);

/// MQTT keepalive interval.
pub const KEEP_ALIVE: Duration = Duration::from_secs(15);

/// How long an explicit disconnect waits for the DISCONNECT packet to go out.
const DISCONNECT_DRAIN: Duration = Duration::from_millis(500);

const REQUEST_CHANNEL_CAPACITY: usize = 32;
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Timing knobs, overridable for tests.
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    pub reconnect_delay: Duration,
    pub connect_timeout: Duration,
    pub keep_alive: Duration,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            reconnect_delay: RECONNECT_DELAY,
            connect_timeout: CONNECT_TIMEOUT,
            keep_alive: KEEP_ALIVE,
        }
    }
}

/// Connection state of the bridge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Notifications about the bridge itself.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    /// A new connection attempt started.
    Connecting { host: String, port: u16 },
    /// The broker accepted the connection.
    Connected,
    /// A session ended, explicitly or not.
    Disconnected { was_connected: bool },
    /// A message arrived on a subscribed topic.
    Message { topic: String, payload: String },
    /// A session failed.
    Error(String),
}

/// Bridge status for the admin API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStatus {
    pub state: BridgeState,
    pub connected: bool,
    pub message_count: u64,
    /// Last config passed to `connect`, password redacted.
    pub config: Option<MqttSettings>,
}

/// Bidirectional MQTT bridge for the device state.
#[derive(Clone)]
pub struct MqttBridge {
    shared: Arc<Shared>,
}

struct Shared {
    device: DeviceHandle,
    options: BridgeOptions,
    inner: Mutex<Inner>,
    events: broadcast::Sender<BridgeEvent>,
}

#[derive(Default)]
struct Inner {
    config: Option<MqttSettings>,
    session: Option<Session>,
    state: BridgeState,
    generation: u64,
    reconnect: Option<JoinHandle<()>>,
    message_count: u64,
}

struct Session {
    client: AsyncClient,
    config: MqttSettings,
    cancel: CancellationToken,
}

impl MqttBridge {
    pub fn new(device: DeviceHandle) -> Self {
        Self::with_options(device, BridgeOptions::default())
    }

    pub fn with_options(device: DeviceHandle, options: BridgeOptions) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                device,
                options,
                inner: Mutex::new(Inner::default()),
                events,
            }),
        }
    }

    /// Receive bridge notifications fired from now on.
    pub fn subscribe_events(&self) -> broadcast::Receiver<BridgeEvent> {
        self.shared.events.subscribe()
    }

    /// Connect using `config`, replacing any existing connection.
    ///
    /// The old connection is fully torn down first. A disabled config stops
    /// after the teardown.
    pub async fn connect(&self, config: MqttSettings) {
        let mut inner = self.shared.inner.lock().await;
        self.teardown(&mut inner);
        inner.config = Some(config.clone());

        if !config.enabled {
            info!("MQTT disabled in configuration");
            return;
        }

        self.open(&mut inner, config);
    }

    /// Close the connection if there is one and cancel any pending reconnect.
    pub async fn disconnect(&self) {
        let mut inner = self.shared.inner.lock().await;
        self.teardown(&mut inner);
    }

    pub async fn is_connected(&self) -> bool {
        self.shared.inner.lock().await.state == BridgeState::Connected
    }

    pub async fn state(&self) -> BridgeState {
        self.shared.inner.lock().await.state
    }

    pub async fn status(&self) -> BridgeStatus {
        let inner = self.shared.inner.lock().await;
        BridgeStatus {
            state: inner.state,
            connected: inner.state == BridgeState::Connected,
            message_count: inner.message_count,
            config: inner.config.as_ref().map(MqttSettings::redacted),
        }
    }

    /// Publish a status snapshot as retained topics.
    ///
    /// Does nothing unless connected. Returns whether anything was queued.
    pub async fn publish_status(&self, snapshot: &DeviceSnapshot) -> bool {
        let inner = self.shared.inner.lock().await;
        if inner.state != BridgeState::Connected {
            return false;
        }
        match inner.session.as_ref() {
            Some(session) => {
                publish_snapshot(session, snapshot);
                true
            }
            None => false,
        }
    }

    fn emit(&self, event: BridgeEvent) {
        let _ = self.shared.events.send(event);
    }

    fn teardown(&self, inner: &mut Inner) {
        inner.generation += 1;

        if let Some(timer) = inner.reconnect.take() {
            debug!("Cancelling pending MQTT reconnect");
            timer.abort();
        }

        if let Some(session) = inner.session.take() {
            let was_connected = inner.state == BridgeState::Connected;
            info!(host = %session.config.host, "Disconnecting from MQTT broker");
            if let Err(e) = session.client.try_disconnect() {
                debug!(error = %e, "MQTT disconnect request not queued");
            }
            session.cancel.cancel();
            inner.state = BridgeState::Disconnected;
            self.emit(BridgeEvent::Disconnected { was_connected });
        }
    }

    fn open(&self, inner: &mut Inner, config: MqttSettings) {
        inner.generation += 1;
        let generation = inner.generation;

        let client_id = match config.client_id.trim() {
            "" => MqttSettings::default().client_id,
            id => id.to_string(),
        };
        let mut options = MqttOptions::new(client_id.clone(), config.host.clone(), config.port);
        options
            .set_clean_session(true)
            .set_keep_alive(self.shared.options.keep_alive);
        if !config.username.is_empty() {
            options.set_credentials(config.username.clone(), config.password.clone());
        }

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        info!(
            url = %format!("mqtt://{}:{}", config.host, config.port),
            client_id = %client_id,
            "Connecting to MQTT broker"
        );
        inner.state = BridgeState::Connecting;
        self.emit(BridgeEvent::Connecting {
            host: config.host.clone(),
            port: config.port,
        });

        tokio::spawn(run_session(
            self.clone(),
            client.clone(),
            eventloop,
            config.clone(),
            cancel.clone(),
            generation,
        ));

        inner.session = Some(Session {
            client,
            config,
            cancel,
        });
    }

    async fn on_connected(&self, generation: u64) {
        let mut inner = self.shared.inner.lock().await;
        if inner.generation != generation {
            return;
        }
        inner.state = BridgeState::Connected;

        if let Some(session) = inner.session.as_ref() {
            info!(
                host = %session.config.host,
                port = session.config.port,
                "MQTT connected successfully"
            );
            let snapshot = self.shared.device.snapshot().await;
            publish_snapshot(session, &snapshot);
        }
        self.emit(BridgeEvent::Connected);
    }

    async fn on_message(&self, command_topic: &str, topic: &str, payload: &[u8]) {
        {
            let mut inner = self.shared.inner.lock().await;
            inner.message_count += 1;
        }

        let text = String::from_utf8_lossy(payload).into_owned();
        info!(topic = %topic, message = %text, "MQTT message received");
        self.emit(BridgeEvent::Message {
            topic: topic.to_string(),
            payload: text.clone(),
        });

        if topic != command_topic {
            debug!(topic = %topic, "Ignoring message outside the command topic");
            return;
        }

        let command = SafeCommand::parse(payload);
        match command.resolve() {
            Some((is_safe, reason)) => {
                let changed = self.shared.device.set_safe(is_safe, reason).await;
                info!(is_safe, reason = %reason, changed, "Safety set via MQTT");
            }
            None => {
                if let SafeCommand::Invalid(why) = &command {
                    warn!(payload = %text, error = %why, "Invalid MQTT safety command");
                }
            }
        }
    }

    async fn on_session_ended(&self, generation: u64, was_connected: bool) {
        let mut inner = self.shared.inner.lock().await;
        if inner.generation != generation {
            // Superseded by connect()/disconnect(), which already cleaned up.
            return;
        }

        inner.session = None;
        inner.state = BridgeState::Disconnected;
        warn!(was_connected, "MQTT connection closed");
        self.emit(BridgeEvent::Disconnected { was_connected });

        let auto_reconnect = inner
            .config
            .as_ref()
            .map(|c| c.enabled && c.auto_connect)
            .unwrap_or(false);
        if !auto_reconnect {
            return;
        }

        if let Some(timer) = inner.reconnect.take() {
            timer.abort();
        }
        let delay = self.shared.options.reconnect_delay;
        info!(delay_ms = delay.as_millis() as u64, "Scheduling MQTT reconnect");
        let bridge = self.clone();
        inner.reconnect = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            bridge.reconnect(generation).await;
        }));
    }

    async fn reconnect(&self, generation: u64) {
        let mut inner = self.shared.inner.lock().await;
        // This task is the timer; dropping its own handle just detaches it.
        inner.reconnect = None;

        if inner.generation != generation {
            debug!("Skipping stale MQTT reconnect");
            return;
        }
        if inner.state == BridgeState::Connected || inner.session.is_some() {
            debug!("Skipping MQTT reconnect, already connected");
            return;
        }

        match inner.config.clone() {
            Some(config) if config.enabled => {
                info!("MQTT attempting to reconnect...");
                self.open(&mut inner, config);
            }
            _ => {}
        }
    }
}

/// Drive one broker connection until it ends or is cancelled.
async fn run_session(
    bridge: MqttBridge,
    client: AsyncClient,
    mut eventloop: EventLoop,
    config: MqttSettings,
    cancel: CancellationToken,
    generation: u64,
) {
    let command_topic = config.command_topic();
    let connect_deadline = tokio::time::Instant::now() + bridge.shared.options.connect_timeout;
    let mut connected = false;

    loop {
        let polled = tokio::select! {
            _ = cancel.cancelled() => {
                if connected {
                    drain_disconnect(&mut eventloop).await;
                }
                return;
            }
            polled = poll_with_deadline(&mut eventloop, connected, connect_deadline) => polled,
        };

        match polled {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                connected = true;
                bridge.on_connected(generation).await;

                if let Err(e) = client.subscribe(command_topic.clone(), QoS::AtLeastOnce).await {
                    error!(error = %e, topic = %command_topic, "MQTT subscription failed");
                }
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                if ack
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure))
                {
                    error!(topic = %command_topic, "MQTT subscription failed: rejected by broker");
                } else {
                    info!(topic = %command_topic, "MQTT subscribed to command topic");
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                bridge
                    .on_message(&command_topic, &publish.topic, &publish.payload)
                    .await;
            }
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "MQTT error");
                bridge.emit(BridgeEvent::Error(e.to_string()));
                break;
            }
        }
    }

    bridge.on_session_ended(generation, connected).await;
}

/// Poll the event loop, bounding the time until the first ConnAck.
async fn poll_with_deadline(
    eventloop: &mut EventLoop,
    connected: bool,
    deadline: tokio::time::Instant,
) -> Result<Event, ConnectionError> {
    if connected {
        return eventloop.poll().await;
    }
    match tokio::time::timeout_at(deadline, eventloop.poll()).await {
        Ok(polled) => polled,
        Err(_) => Err(ConnectionError::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "connect timeout",
        ))),
    }
}

/// Give the queued DISCONNECT packet a chance to reach the broker.
async fn drain_disconnect(eventloop: &mut EventLoop) {
    let drained = tokio::time::timeout(DISCONNECT_DRAIN, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    })
    .await;
    if drained.is_err() {
        debug!("MQTT disconnect not confirmed before drain timeout");
    }
}

fn publish_snapshot(session: &Session, snapshot: &DeviceSnapshot) {
    let config = &session.config;

    match serde_json::to_string(snapshot) {
        Ok(json) => publish_retained(&session.client, config.topic("status"), json),
        Err(e) => error!(error = %e, "Failed to encode MQTT status"),
    }
    publish_retained(&session.client, config.topic("safe"), snapshot.is_safe.to_string());
    publish_retained(
        &session.client,
        config.topic("connected"),
        snapshot.connected.to_string(),
    );
    publish_retained(
        &session.client,
        config.topic("client"),
        snapshot.client_connected.to_string(),
    );
    publish_retained(
        &session.client,
        config.topic("uptime"),
        snapshot.uptime_sec.to_string(),
    );
}

fn publish_retained(client: &AsyncClient, topic: String, payload: String) {
    match client.try_publish(topic.clone(), QoS::AtMostOnce, true, payload.clone()) {
        Ok(()) => debug!(topic = %topic, message = %payload, "MQTT message published"),
        Err(e) => error!(topic = %topic, error = %e, "Failed to publish MQTT message"),
    }
}
