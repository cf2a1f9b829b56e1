//! # safetymonitor-server
//!
//! Async runtime pieces of the SafetyMonitor (tokio):
//! - [`DeviceHandle`] - serialized access to the device state plus its event channel
//! - [`EventRouter`] - forwards device events to the log and the MQTT bridge
//! - [`MqttBridge`] - mirrors state to a broker and accepts safety commands
//! - [`DiscoveryResponder`] - answers Alpaca UDP discovery

pub mod device;
pub mod discovery;
pub mod mqtt;
pub mod router;

pub use device::{DeviceHandle, DeviceTxn};
pub use discovery::{DiscoveryConfig, DiscoveryError, DiscoveryResponder};
pub use mqtt::{BridgeEvent, BridgeOptions, BridgeState, BridgeStatus, MqttBridge};
pub use router::EventRouter;
pub use safetymonitor_core::{DeviceEvent, DeviceSnapshot, DeviceState};
