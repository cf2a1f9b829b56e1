//! SafetyMonitor data model types.
//!
//! These types describe what the device state looks like from the outside:
//! - Point-in-time snapshots handed to transports
//! - Change events fired on real transitions
//! - The informational health flag

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Informational device health.
///
/// Changes are logged but nothing else consumes the value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    #[default]
    Ok,
    Degraded,
    Error,
}

impl Health {
    pub fn as_str(&self) -> &'static str {
        match self {
            Health::Ok => "ok",
            Health::Degraded => "degraded",
            Health::Error => "error",
        }
    }
}

impl std::fmt::Display for Health {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Health {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ok" => Ok(Health::Ok),
            "degraded" => Ok(Health::Degraded),
            "error" => Ok(Health::Error),
            other => Err(format!("unknown health value: {}", other)),
        }
    }
}

/// A copy of the device state taken while the state lock was held.
///
/// Events carry one of these so that every transport mirrors the state as it
/// was at the moment of the transition, not whatever it is by the time the
/// event gets processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSnapshot {
    /// Alpaca `Connected` property.
    pub connected: bool,

    /// Safety flag.
    pub is_safe: bool,

    /// Whether a REST/poll client has recently interacted.
    pub client_connected: bool,

    /// Last time any client-seen signal arrived.
    pub last_client_seen: Option<DateTime<Utc>>,

    /// Time of the last real `isSafe` transition.
    pub last_change_at: Option<DateTime<Utc>>,

    /// Reason given for the last real `isSafe` transition.
    pub last_change_reason: Option<String>,

    pub health: Health,

    /// Seconds since the device state was created.
    pub uptime_sec: u64,
}

/// Change events fired by [`crate::DeviceState`] mutators.
///
/// Only real transitions produce an event; setting a value to what it
/// already was is silent.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// `isSafe` flipped.
    SafeChanged {
        is_safe: bool,
        reason: String,
        at: DateTime<Utc>,
        snapshot: DeviceSnapshot,
    },

    /// `clientConnected` flipped.
    ClientConnectionChanged {
        connected: bool,
        source: String,
        at: DateTime<Utc>,
        snapshot: DeviceSnapshot,
    },

    /// Health changed.
    HealthChanged { health: Health },
}

impl DeviceEvent {
    /// Short event name, used as a log field.
    pub fn name(&self) -> &'static str {
        match self {
            DeviceEvent::SafeChanged { .. } => "safeChanged",
            DeviceEvent::ClientConnectionChanged { .. } => "clientConnectionChanged",
            DeviceEvent::HealthChanged { .. } => "healthChanged",
        }
    }

    /// The snapshot to mirror to transports, if this event is one they care about.
    pub fn snapshot(&self) -> Option<&DeviceSnapshot> {
        match self {
            DeviceEvent::SafeChanged { snapshot, .. } => Some(snapshot),
            DeviceEvent::ClientConnectionChanged { snapshot, .. } => Some(snapshot),
            DeviceEvent::HealthChanged { .. } => None,
        }
    }
}
