//! Static device and server metadata.
//!
//! Everything the read-only Alpaca endpoints return apart from the
//! transaction ids.

use crate::messages::{ConfiguredDevice, ServerDescription};

/// Driver version reported by `driverversion` and the management API.
pub const DRIVER_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DEVICE_NAME: &str = "SafetyMonitor-0";
pub const DEVICE_DESCRIPTION: &str = "Alpaca SafetyMonitor";
pub const DRIVER_INFO: &str = "Alpaca SafetyMonitor Simulator (Rust)";

/// ISafetyMonitor interface version.
pub const INTERFACE_VERSION: u32 = 1;

/// Alpaca API versions served under `/api/`.
pub const API_VERSIONS: [u32; 1] = [1];

pub const UNIQUE_ID: &str = "sim-safetymonitor-0";

/// Value of `GET /management/v1/description`.
pub fn server_description() -> ServerDescription {
    ServerDescription {
        server_name: "Alpaca SafetyMonitor".to_string(),
        manufacturer: "GalaxyScape".to_string(),
        manufacturer_version: DRIVER_VERSION.to_string(),
        location: "localhost".to_string(),
    }
}

/// Value of `GET /management/v1/configureddevices`. Always one device, number 0.
pub fn configured_devices() -> Vec<ConfiguredDevice> {
    vec![ConfiguredDevice {
        device_name: "SafetyMonitor".to_string(),
        device_type: "SafetyMonitor".to_string(),
        device_number: 0,
        unique_id: UNIQUE_ID.to_string(),
    }]
}
