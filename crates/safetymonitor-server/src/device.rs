//! Shared handle to the device state.
//!
//! The [`DeviceState`] lives behind a single mutex. Every mutation path
//! (REST handlers, the MQTT bridge, the admin API) goes through a
//! [`DeviceHandle`], which serializes access and forwards the events the
//! state produced onto a broadcast channel for the [`crate::EventRouter`].
//!
//! Events are sent while the lock is still held so their order on the
//! channel matches the order of the transitions. Sending on a broadcast
//! channel never blocks.

use std::sync::Arc;

use safetymonitor_core::{DeviceEvent, DeviceSnapshot, DeviceState, Health};
use safetymonitor_protocol::TransactionSource;
use tokio::sync::{broadcast, Mutex};
use tracing::trace;

/// Capacity of the device event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Cloneable handle to the single device state.
#[derive(Clone)]
pub struct DeviceHandle {
    state: Arc<Mutex<DeviceState>>,
    events: broadcast::Sender<DeviceEvent>,
}

impl DeviceHandle {
    /// Take ownership of the device state.
    pub fn new(state: DeviceState) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(state)),
            events,
        }
    }

    /// Receive every event fired from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    /// Run `f` with exclusive access to the state.
    ///
    /// Events produced inside `f` are dispatched before the lock is released.
    pub async fn transact<R>(&self, f: impl FnOnce(&mut DeviceTxn<'_>) -> R) -> R {
        let mut state = self.state.lock().await;
        let mut txn = DeviceTxn {
            state: &mut *state,
            events: Vec::new(),
        };
        let result = f(&mut txn);
        let events = txn.events;
        for event in events {
            trace!(event = event.name(), "Dispatching device event");
            // No receivers is fine: nothing is listening yet.
            let _ = self.events.send(event);
        }
        result
    }

    /// Set the safety flag. Returns whether it changed.
    pub async fn set_safe(&self, is_safe: bool, reason: &str) -> bool {
        self.transact(|txn| txn.set_safe(is_safe, reason)).await
    }

    /// Record a client-seen signal.
    pub async fn set_client_connected(&self, connected: bool, source: &str) {
        self.transact(|txn| txn.set_client_connected(connected, source))
            .await
    }

    /// Set the Alpaca `Connected` property.
    pub async fn set_connected(&self, connected: bool) {
        self.transact(|txn| txn.set_connected(connected)).await
    }

    /// Set the informational health value. Returns whether it changed.
    pub async fn set_health(&self, health: Health) -> bool {
        self.transact(|txn| txn.set_health(health)).await
    }

    /// Copy of the current state.
    pub async fn snapshot(&self) -> DeviceSnapshot {
        self.state.lock().await.snapshot()
    }
}

impl Default for DeviceHandle {
    fn default() -> Self {
        Self::new(DeviceState::default())
    }
}

/// Exclusive access to the state for the duration of [`DeviceHandle::transact`].
///
/// Also a [`TransactionSource`], so envelopes can be built inside the same
/// critical section as the mutation they report on.
pub struct DeviceTxn<'a> {
    state: &'a mut DeviceState,
    events: Vec<DeviceEvent>,
}

impl DeviceTxn<'_> {
    /// Read access to the state.
    pub fn state(&self) -> &DeviceState {
        &*self.state
    }

    pub fn set_safe(&mut self, is_safe: bool, reason: &str) -> bool {
        let event = self.state.set_safe(is_safe, reason);
        let changed = event.is_some();
        self.events.extend(event);
        changed
    }

    pub fn set_client_connected(&mut self, connected: bool, source: &str) {
        let event = self.state.set_client_connected(connected, source);
        self.events.extend(event);
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.state.set_connected(connected);
    }

    pub fn set_health(&mut self, health: Health) -> bool {
        let event = self.state.set_health(health);
        let changed = event.is_some();
        self.events.extend(event);
        changed
    }
}

impl TransactionSource for DeviceTxn<'_> {
    fn next_server_transaction_id(&mut self) -> u32 {
        self.state.next_server_transaction_id()
    }
}
