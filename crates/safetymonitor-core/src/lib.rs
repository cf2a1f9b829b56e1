//! # safetymonitor-core
//!
//! Core SafetyMonitor device model.
//!
//! This crate provides:
//! - The single authoritative [`DeviceState`] (flags, change tracking,
//!   server transaction counter)
//! - Change events and snapshots fired on real transitions
//! - Configuration types and the storage abstraction
//!
//! This crate is intentionally runtime-agnostic and contains no async code.
//! Serializing access to the state is the caller's job.

pub mod config;
pub mod device;
pub mod model;

pub use config::{
    ConfigError, ConfigStorage, LoggingSettings, MqttSettings, ServerSettings, Settings,
    DEFAULT_DISCOVERY_PORT, DEFAULT_HTTP_PORT,
};
pub use device::{DeviceOptions, DeviceState};
pub use model::*;
