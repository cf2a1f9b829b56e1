//! The authoritative SafetyMonitor device state.
//!
//! There is exactly one [`DeviceState`] per process. It holds the Alpaca
//! connection flag, the safety flag, client tracking, and the server
//! transaction counter. Mutators return the [`DeviceEvent`] they produced
//! (if any) instead of dispatching it themselves, so the caller decides how
//! events leave the lock.

use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::model::{DeviceEvent, DeviceSnapshot, Health};

/// Options applied when the device state is created.
#[derive(Debug, Clone)]
pub struct DeviceOptions {
    /// Initial safety flag.
    pub default_safe: bool,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self { default_safe: true }
    }
}

/// Single source of truth for the emulated device.
#[derive(Debug, Clone)]
pub struct DeviceState {
    connected: bool,
    is_safe: bool,
    client_connected: bool,
    last_client_seen: Option<DateTime<Utc>>,
    last_change_at: Option<DateTime<Utc>>,
    last_change_reason: Option<String>,
    server_transaction_id: u32,
    health: Health,
    started_at: Instant,
}

impl DeviceState {
    /// Create a new device state.
    pub fn new(options: DeviceOptions) -> Self {
        Self {
            connected: false,
            is_safe: options.default_safe,
            client_connected: false,
            last_client_seen: None,
            last_change_at: None,
            last_change_reason: None,
            server_transaction_id: 0,
            health: Health::Ok,
            started_at: Instant::now(),
        }
    }

    pub fn connected(&self) -> bool {
        self.connected
    }

    pub fn is_safe(&self) -> bool {
        self.is_safe
    }

    pub fn client_connected(&self) -> bool {
        self.client_connected
    }

    pub fn last_client_seen(&self) -> Option<DateTime<Utc>> {
        self.last_client_seen
    }

    pub fn last_change_at(&self) -> Option<DateTime<Utc>> {
        self.last_change_at
    }

    pub fn last_change_reason(&self) -> Option<&str> {
        self.last_change_reason.as_deref()
    }

    pub fn health(&self) -> Health {
        self.health
    }

    /// The last server transaction id handed out (0 before the first response).
    pub fn server_transaction_id(&self) -> u32 {
        self.server_transaction_id
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Hand out the next server transaction id.
    ///
    /// Called exactly once per protocol envelope. The first call returns 1.
    pub fn next_server_transaction_id(&mut self) -> u32 {
        // Alpaca transaction ids are uint32; wrapping would break monotonicity,
        // so the counter saturates instead.
        self.server_transaction_id = self.server_transaction_id.saturating_add(1);
        self.server_transaction_id
    }

    /// Set the Alpaca `Connected` property. Unconditional, never fires an event.
    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    /// Set the safety flag.
    ///
    /// Only a real transition updates the change timestamp/reason and
    /// produces [`DeviceEvent::SafeChanged`].
    pub fn set_safe(&mut self, is_safe: bool, reason: &str) -> Option<DeviceEvent> {
        if self.is_safe == is_safe {
            return None;
        }

        let at = Utc::now();
        self.is_safe = is_safe;
        self.last_change_at = Some(at);
        self.last_change_reason = Some(reason.to_string());

        Some(DeviceEvent::SafeChanged {
            is_safe,
            reason: reason.to_string(),
            at,
            snapshot: self.snapshot(),
        })
    }

    /// Record a client-seen signal.
    ///
    /// `last_client_seen` is refreshed on every call; the event only fires
    /// when the boolean flips.
    pub fn set_client_connected(&mut self, connected: bool, source: &str) -> Option<DeviceEvent> {
        let at = Utc::now();
        let previous = self.client_connected;
        self.client_connected = connected;
        self.last_client_seen = Some(at);

        if previous == connected {
            return None;
        }

        Some(DeviceEvent::ClientConnectionChanged {
            connected,
            source: source.to_string(),
            at,
            snapshot: self.snapshot(),
        })
    }

    /// Set the informational health value.
    pub fn set_health(&mut self, health: Health) -> Option<DeviceEvent> {
        if self.health == health {
            return None;
        }
        self.health = health;
        Some(DeviceEvent::HealthChanged { health })
    }

    /// Copy the current state.
    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            connected: self.connected,
            is_safe: self.is_safe,
            client_connected: self.client_connected,
            last_client_seen: self.last_client_seen,
            last_change_at: self.last_change_at,
            last_change_reason: self.last_change_reason.clone(),
            health: self.health,
            uptime_sec: self.uptime_secs(),
        }
    }
}

impl Default for DeviceState {
    fn default() -> Self {
        Self::new(DeviceOptions::default())
    }
}
