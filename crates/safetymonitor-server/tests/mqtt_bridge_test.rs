//! Integration tests for the MQTT bridge.
//!
//! A minimal MQTT 3.1.1 broker runs in-process on loopback. It accepts one
//! client at a time, acknowledges CONNECT/SUBSCRIBE/PINGREQ, records what the
//! client publishes and can push QoS 0 messages to it.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::fmt::MakeWriter;

use safetymonitor_core::{DeviceEvent, MqttSettings};
use safetymonitor_server::{
    BridgeEvent, BridgeOptions, BridgeState, DeviceHandle, EventRouter, MqttBridge,
};

const WAIT: Duration = Duration::from_secs(5);

/// Formatted log output collected by a test-local subscriber.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<StdMutex<Vec<u8>>>);

impl CapturedLogs {
    /// Install a WARN-level subscriber for the current thread.
    fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// What the fake broker saw from the client.
#[derive(Debug, Clone, PartialEq)]
enum BrokerPacket {
    Connect,
    Subscribe(String),
    Publish {
        topic: String,
        payload: String,
        retain: bool,
    },
    Disconnect,
}

struct FakeBroker {
    addr: SocketAddr,
    received: mpsc::UnboundedReceiver<BrokerPacket>,
    outgoing: mpsc::UnboundedSender<(String, Vec<u8>)>,
}

impl FakeBroker {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (received_tx, received) = mpsc::unbounded_channel();
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel::<(String, Vec<u8>)>();
        let writer: Arc<Mutex<Option<OwnedWriteHalf>>> = Arc::new(Mutex::new(None));

        // Forward test-injected publishes to whichever client is connected.
        let forward_writer = writer.clone();
        tokio::spawn(async move {
            let mut outgoing_rx = outgoing_rx;
            while let Some((topic, payload)) = outgoing_rx.recv().await {
                let packet = encode_publish(&topic, &payload);
                if let Some(w) = forward_writer.lock().await.as_mut() {
                    let _ = w.write_all(&packet).await;
                }
            }
        });

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let (mut read, write) = stream.into_split();
                *writer.lock().await = Some(write);

                loop {
                    let Some((header, body)) = read_packet(&mut read).await else {
                        break;
                    };
                    match header >> 4 {
                        1 => {
                            let _ = received_tx.send(BrokerPacket::Connect);
                            respond(&writer, &[0x20, 0x02, 0x00, 0x00]).await;
                        }
                        3 => {
                            let _ = received_tx.send(decode_publish(header, &body));
                        }
                        8 => {
                            let topic_len = u16::from_be_bytes([body[2], body[3]]) as usize;
                            let topic = String::from_utf8_lossy(&body[4..4 + topic_len]).into_owned();
                            let _ = received_tx.send(BrokerPacket::Subscribe(topic));
                            respond(&writer, &[0x90, 0x03, body[0], body[1], 0x01]).await;
                        }
                        12 => respond(&writer, &[0xD0, 0x00]).await,
                        14 => {
                            let _ = received_tx.send(BrokerPacket::Disconnect);
                            break;
                        }
                        _ => {}
                    }
                }
                *writer.lock().await = None;
            }
        });

        Self {
            addr,
            received,
            outgoing,
        }
    }

    fn settings(&self) -> MqttSettings {
        MqttSettings {
            enabled: true,
            host: self.addr.ip().to_string(),
            port: self.addr.port(),
            ..MqttSettings::default()
        }
    }

    fn send(&self, topic: &str, payload: &[u8]) {
        self.outgoing
            .send((topic.to_string(), payload.to_vec()))
            .unwrap();
    }

    /// Wait for the first recorded packet matching `pred`.
    async fn expect<F>(&mut self, mut pred: F) -> BrokerPacket
    where
        F: FnMut(&BrokerPacket) -> bool,
    {
        timeout(WAIT, async {
            loop {
                let packet = self.received.recv().await.expect("broker stopped");
                if pred(&packet) {
                    return packet;
                }
            }
        })
        .await
        .expect("Timed out waiting for broker packet")
    }

    async fn expect_publish(&mut self, topic: &str) -> (String, bool) {
        match self
            .expect(|p| matches!(p, BrokerPacket::Publish { topic: t, .. } if t == topic))
            .await
        {
            BrokerPacket::Publish {
                payload, retain, ..
            } => (payload, retain),
            _ => unreachable!(),
        }
    }
}

async fn respond(writer: &Arc<Mutex<Option<OwnedWriteHalf>>>, bytes: &[u8]) {
    if let Some(w) = writer.lock().await.as_mut() {
        let _ = w.write_all(bytes).await;
    }
}

async fn read_packet(read: &mut tokio::net::tcp::OwnedReadHalf) -> Option<(u8, Vec<u8>)> {
    let header = read.read_u8().await.ok()?;
    let mut remaining = 0usize;
    let mut shift = 0;
    loop {
        let byte = read.read_u8().await.ok()?;
        remaining |= ((byte & 0x7f) as usize) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    let mut body = vec![0u8; remaining];
    read.read_exact(&mut body).await.ok()?;
    Some((header, body))
}

fn decode_publish(header: u8, body: &[u8]) -> BrokerPacket {
    let qos = (header >> 1) & 0x03;
    let topic_len = u16::from_be_bytes([body[0], body[1]]) as usize;
    let topic = String::from_utf8_lossy(&body[2..2 + topic_len]).into_owned();
    let mut offset = 2 + topic_len;
    if qos > 0 {
        offset += 2;
    }
    BrokerPacket::Publish {
        topic,
        payload: String::from_utf8_lossy(&body[offset..]).into_owned(),
        retain: header & 0x01 == 1,
    }
}

fn encode_publish(topic: &str, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&(topic.len() as u16).to_be_bytes());
    body.extend_from_slice(topic.as_bytes());
    body.extend_from_slice(payload);

    let mut packet = vec![0x30];
    let mut len = body.len();
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        packet.push(byte);
        if len == 0 {
            break;
        }
    }
    packet.extend_from_slice(&body);
    packet
}

async fn wait_for_event<F>(events: &mut broadcast::Receiver<BridgeEvent>, mut pred: F) -> BridgeEvent
where
    F: FnMut(&BridgeEvent) -> bool,
{
    timeout(WAIT, async {
        loop {
            let event = events.recv().await.expect("bridge events closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("Timed out waiting for bridge event")
}

/// Connect a fresh bridge to the broker and wait until it subscribed.
async fn connected_bridge(broker: &mut FakeBroker) -> (DeviceHandle, MqttBridge) {
    let device = DeviceHandle::default();
    let bridge = MqttBridge::new(device.clone());
    let mut events = bridge.subscribe_events();

    bridge.connect(broker.settings()).await;
    wait_for_event(&mut events, |e| matches!(e, BridgeEvent::Connected)).await;
    broker
        .expect(|p| matches!(p, BrokerPacket::Subscribe(_)))
        .await;

    (device, bridge)
}

#[tokio::test]
async fn test_connect_subscribes_and_publishes_status() {
    let mut broker = FakeBroker::start().await;
    let device = DeviceHandle::default();
    let bridge = MqttBridge::new(device.clone());
    let mut events = bridge.subscribe_events();

    bridge.connect(broker.settings()).await;

    match wait_for_event(&mut events, |e| matches!(e, BridgeEvent::Connecting { .. })).await {
        BridgeEvent::Connecting { port, .. } => assert_eq!(port, broker.addr.port()),
        other => panic!("Expected Connecting, got {:?}", other),
    }
    wait_for_event(&mut events, |e| matches!(e, BridgeEvent::Connected)).await;
    assert!(bridge.is_connected().await);

    broker.expect(|p| *p == BrokerPacket::Connect).await;

    let (status, retain) = broker.expect_publish("alpaca/safetymonitor/status").await;
    assert!(retain);
    let status: serde_json::Value = serde_json::from_str(&status).unwrap();
    assert_eq!(status["isSafe"], true);
    assert_eq!(status["connected"], false);

    let (safe, retain) = broker.expect_publish("alpaca/safetymonitor/safe").await;
    assert_eq!(safe, "true");
    assert!(retain);

    let subscribe = broker
        .expect(|p| matches!(p, BrokerPacket::Subscribe(_)))
        .await;
    assert_eq!(
        subscribe,
        BrokerPacket::Subscribe("alpaca/safetymonitor/command/safe".to_string())
    );

    bridge.disconnect().await;
    broker.expect(|p| *p == BrokerPacket::Disconnect).await;
    assert_eq!(bridge.state().await, BridgeState::Disconnected);
}

#[tokio::test]
async fn test_literal_command_sets_safe() {
    let mut broker = FakeBroker::start().await;
    let (device, bridge) = connected_bridge(&mut broker).await;
    let mut device_events = device.subscribe();

    broker.send("alpaca/safetymonitor/command/safe", b"false");

    let event = timeout(WAIT, device_events.recv()).await.unwrap().unwrap();
    match event {
        DeviceEvent::SafeChanged {
            is_safe, reason, ..
        } => {
            assert!(!is_safe);
            assert_eq!(reason, "MQTT command");
        }
        other => panic!("Expected SafeChanged, got {:?}", other),
    }

    broker.send("alpaca/safetymonitor/command/safe", b"true");
    let event = timeout(WAIT, device_events.recv()).await.unwrap().unwrap();
    assert!(matches!(event, DeviceEvent::SafeChanged { is_safe: true, .. }));
    assert!(device.snapshot().await.is_safe);

    bridge.disconnect().await;
}

#[tokio::test]
async fn test_json_command_with_reason() {
    let mut broker = FakeBroker::start().await;
    let (device, bridge) = connected_bridge(&mut broker).await;
    let mut device_events = device.subscribe();

    broker.send(
        "alpaca/safetymonitor/command/safe",
        br#"{"safe":false,"reason":"rain"}"#,
    );

    let event = timeout(WAIT, device_events.recv()).await.unwrap().unwrap();
    assert!(matches!(event, DeviceEvent::SafeChanged { is_safe: false, .. }));

    let snapshot = device.snapshot().await;
    assert!(!snapshot.is_safe);
    assert_eq!(snapshot.last_change_reason.as_deref(), Some("rain"));

    bridge.disconnect().await;
}

#[tokio::test]
async fn test_invalid_command_leaves_state() {
    // current_thread runtime: spawned session tasks share this subscriber.
    let logs = CapturedLogs::default();
    let _guard = logs.install();

    let mut broker = FakeBroker::start().await;
    let (device, bridge) = connected_bridge(&mut broker).await;
    let mut device_events = device.subscribe();
    let mut bridge_events = bridge.subscribe_events();

    broker.send("alpaca/safetymonitor/command/safe", b"banana");
    broker.send("alpaca/safetymonitor/command/safe", br#"{"safe":"yes"}"#);
    broker.send("alpaca/safetymonitor/command/safe", br#"{"safe":false}"#);

    // Only the last command changes anything.
    let event = timeout(WAIT, device_events.recv()).await.unwrap().unwrap();
    match event {
        DeviceEvent::SafeChanged {
            is_safe, reason, ..
        } => {
            assert!(!is_safe);
            assert_eq!(reason, "MQTT command");
        }
        other => panic!("Expected SafeChanged, got {:?}", other),
    }

    match wait_for_event(&mut bridge_events, |e| matches!(e, BridgeEvent::Message { .. })).await {
        BridgeEvent::Message { payload, .. } => assert_eq!(payload, "banana"),
        other => panic!("Expected Message, got {:?}", other),
    }
    assert_eq!(bridge.status().await.message_count, 3);

    let output = logs.contents();
    let warnings: Vec<&str> = output
        .lines()
        .filter(|line| line.contains("Invalid MQTT safety command"))
        .collect();
    assert_eq!(warnings.len(), 2, "log output:\n{}", output);
    assert!(warnings[0].contains("WARN"));
    assert!(warnings[0].contains("banana"));

    bridge.disconnect().await;
}

#[tokio::test]
async fn test_router_publishes_changes() {
    let mut broker = FakeBroker::start().await;
    let (device, bridge) = connected_bridge(&mut broker).await;
    let cancel = CancellationToken::new();
    let _router = EventRouter::new(bridge.clone()).spawn(device.subscribe(), cancel.clone());

    device.set_safe(false, "clouds").await;

    loop {
        let (payload, retain) = broker.expect_publish("alpaca/safetymonitor/safe").await;
        assert!(retain);
        if payload == "false" {
            break;
        }
    }

    cancel.cancel();
    bridge.disconnect().await;
}

#[tokio::test]
async fn test_publish_status_noop_when_disconnected() {
    let device = DeviceHandle::default();
    let bridge = MqttBridge::new(device.clone());

    let snapshot = device.snapshot().await;
    assert!(!bridge.publish_status(&snapshot).await);
}

#[tokio::test]
async fn test_disabled_config_does_not_connect() {
    let bridge = MqttBridge::new(DeviceHandle::default());
    let mut events = bridge.subscribe_events();

    bridge.connect(MqttSettings::default()).await;

    assert_eq!(bridge.state().await, BridgeState::Disconnected);
    assert!(events.try_recv().is_err());

    let status = bridge.status().await;
    assert!(!status.connected);
    assert_eq!(status.config.map(|c| c.enabled), Some(false));
}

/// A port that refuses connections.
async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

fn fast_options() -> BridgeOptions {
    BridgeOptions {
        reconnect_delay: Duration::from_millis(200),
        connect_timeout: Duration::from_secs(1),
        ..BridgeOptions::default()
    }
}

#[tokio::test]
async fn test_reconnects_after_failure() {
    let bridge = MqttBridge::with_options(DeviceHandle::default(), fast_options());
    let mut events = bridge.subscribe_events();

    let settings = MqttSettings {
        enabled: true,
        host: "127.0.0.1".to_string(),
        port: closed_port().await,
        ..MqttSettings::default()
    };
    bridge.connect(settings).await;

    wait_for_event(&mut events, |e| matches!(e, BridgeEvent::Connecting { .. })).await;
    match wait_for_event(&mut events, |e| matches!(e, BridgeEvent::Disconnected { .. })).await {
        BridgeEvent::Disconnected { was_connected } => assert!(!was_connected),
        other => panic!("Expected Disconnected, got {:?}", other),
    }

    // The scheduled retry starts a new attempt.
    wait_for_event(&mut events, |e| matches!(e, BridgeEvent::Connecting { .. })).await;

    bridge.disconnect().await;
}

#[tokio::test]
async fn test_disconnect_cancels_pending_reconnect() {
    let bridge = MqttBridge::with_options(DeviceHandle::default(), fast_options());
    let mut events = bridge.subscribe_events();

    let settings = MqttSettings {
        enabled: true,
        host: "127.0.0.1".to_string(),
        port: closed_port().await,
        ..MqttSettings::default()
    };
    bridge.connect(settings).await;

    wait_for_event(&mut events, |e| matches!(e, BridgeEvent::Disconnected { .. })).await;
    bridge.disconnect().await;

    let late = timeout(Duration::from_millis(600), async {
        loop {
            match events.recv().await {
                Ok(BridgeEvent::Connecting { .. }) => return,
                Ok(_) => continue,
                Err(_) => std::future::pending::<()>().await,
            }
        }
    })
    .await;
    assert!(late.is_err(), "Reconnect fired after disconnect");
    assert_eq!(bridge.state().await, BridgeState::Disconnected);
}

#[tokio::test]
async fn test_connect_replaces_previous_session() {
    let mut first = FakeBroker::start().await;
    let mut second = FakeBroker::start().await;
    let (_device, bridge) = connected_bridge(&mut first).await;
    let mut events = bridge.subscribe_events();

    bridge.connect(second.settings()).await;

    first.expect(|p| *p == BrokerPacket::Disconnect).await;
    wait_for_event(&mut events, |e| matches!(e, BridgeEvent::Connected)).await;
    second
        .expect(|p| matches!(p, BrokerPacket::Subscribe(_)))
        .await;

    bridge.disconnect().await;
}

#[tokio::test]
async fn test_pending_reconnect_skipped_after_manual_connect() {
    let mut broker = FakeBroker::start().await;
    let options = BridgeOptions {
        reconnect_delay: Duration::from_millis(400),
        connect_timeout: Duration::from_secs(1),
        ..BridgeOptions::default()
    };
    let bridge = MqttBridge::with_options(DeviceHandle::default(), options);
    let mut events = bridge.subscribe_events();

    let unreachable = MqttSettings {
        enabled: true,
        host: "127.0.0.1".to_string(),
        port: closed_port().await,
        ..MqttSettings::default()
    };
    bridge.connect(unreachable).await;
    wait_for_event(&mut events, |e| matches!(e, BridgeEvent::Disconnected { .. })).await;

    // A retry is now pending; a manual connect lands first.
    bridge.connect(broker.settings()).await;
    wait_for_event(&mut events, |e| matches!(e, BridgeEvent::Connected)).await;
    broker.expect(|p| *p == BrokerPacket::Connect).await;

    let extra = timeout(Duration::from_millis(900), async {
        loop {
            match events.recv().await {
                Ok(BridgeEvent::Connecting { .. }) | Ok(BridgeEvent::Disconnected { .. }) => return,
                Ok(_) => continue,
                Err(_) => std::future::pending::<()>().await,
            }
        }
    })
    .await;
    assert!(extra.is_err(), "Pending reconnect replaced the live session");
    assert!(bridge.is_connected().await);

    let mut connects = 0;
    while let Ok(packet) = broker.received.try_recv() {
        if packet == BrokerPacket::Connect {
            connects += 1;
        }
    }
    assert_eq!(connects, 0, "Broker saw a second CONNECT");

    bridge.disconnect().await;
}
