//! # safetymonitor-web
//!
//! HTTP surface of the SafetyMonitor.
//!
//! This crate provides:
//! - The Alpaca device API under `/api/v1/safetymonitor/{device}`
//! - The Alpaca management API under `/management`
//! - An unauthenticated admin API under `/admin` for local tooling
//! - In-memory log capture with a live SSE feed
//! - JSON file storage for the configuration
//!
//! ## Usage
//!
//! ```rust,ignore
//! use safetymonitor_web::{create_router, ServerState};
//!
//! let state = ServerState::new(device, bridge, settings, storage, logs, shutdown);
//! let app = create_router(Arc::new(state));
//!
//! let listener = TcpListener::bind("0.0.0.0:11111").await?;
//! axum::serve(listener, app).await?;
//! ```

pub mod extract;
pub mod logs;
pub mod routes;
pub mod storage;

pub use logs::{LogBuffer, LogCaptureLayer, LogEntry};
pub use routes::create_router;
pub use storage::FileConfigStorage;

use std::sync::Arc;

use safetymonitor_core::{ConfigStorage, Settings};
use safetymonitor_server::{DeviceHandle, MqttBridge};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

/// Shared state for all route handlers.
pub struct ServerState {
    pub device: DeviceHandle,
    pub bridge: MqttBridge,
    /// Current settings; edits are persisted through `storage`.
    pub settings: RwLock<Settings>,
    pub storage: Arc<dyn ConfigStorage>,
    /// Serializes config edits so saves land in request order.
    pub config_writes: Mutex<()>,
    pub logs: LogBuffer,
    /// Cancelled by `POST /admin/shutdown`.
    pub shutdown: CancellationToken,
}

impl ServerState {
    pub fn new(
        device: DeviceHandle,
        bridge: MqttBridge,
        settings: Settings,
        storage: Arc<dyn ConfigStorage>,
        logs: LogBuffer,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            device,
            bridge,
            settings: RwLock::new(settings),
            storage,
            config_writes: Mutex::new(()),
            logs,
            shutdown,
        }
    }
}

/// Type alias for shared state in Axum handlers.
pub type AppState = Arc<ServerState>;
