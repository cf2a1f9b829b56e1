//! Fan-out of device events.
//!
//! Consumes the device event channel and forwards each transition to the
//! log and, for safety/client changes, to the MQTT bridge.

use safetymonitor_core::DeviceEvent;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::mqtt::MqttBridge;

/// Routes device events to their observers.
#[derive(Clone)]
pub struct EventRouter {
    bridge: MqttBridge,
}

impl EventRouter {
    pub fn new(bridge: MqttBridge) -> Self {
        Self { bridge }
    }

    /// Run the router on its own task until `cancel` fires or the channel closes.
    pub fn spawn(
        self,
        events: broadcast::Receiver<DeviceEvent>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(events, cancel).await })
    }

    pub async fn run(&self, mut events: broadcast::Receiver<DeviceEvent>, cancel: CancellationToken) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };

            match event {
                Ok(event) => self.route(&event).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event router lagged behind device events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        debug!("Event router stopped");
    }

    /// Handle a single event.
    pub async fn route(&self, event: &DeviceEvent) {
        match event {
            DeviceEvent::SafeChanged {
                is_safe,
                reason,
                at,
                snapshot,
            } => {
                info!(is_safe, reason = %reason, at = %at.to_rfc3339(), "Safety state changed");
                self.bridge.publish_status(snapshot).await;
            }
            DeviceEvent::ClientConnectionChanged {
                connected,
                source,
                at,
                snapshot,
            } => {
                info!(connected, source = %source, at = %at.to_rfc3339(), "Client connection changed");
                self.bridge.publish_status(snapshot).await;
            }
            DeviceEvent::HealthChanged { health } => {
                warn!(health = %health, "Health changed");
            }
        }
    }
}
