use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use safetymonitor_core::{ConfigStorage, DeviceState, Settings};
use safetymonitor_server::{
    DeviceHandle, DiscoveryConfig, DiscoveryResponder, EventRouter, MqttBridge,
};
use safetymonitor_web::{create_router, FileConfigStorage, LogBuffer, LogCaptureLayer, ServerState};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// How long to wait for in-flight HTTP requests on shutdown.
const HTTP_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var("SAFETYMONITOR_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(safetymonitor_web::storage::DEFAULT_CONFIG_FILE));
    let storage = Arc::new(FileConfigStorage::new(config_path));
    let mut settings = storage
        .load()
        .with_context(|| format!("loading configuration from {}", storage.path().display()))?;
    apply_env_overrides(&mut settings)?;

    // Initialize tracing
    let logs = LogBuffer::new(settings.logging.max_log_entries);
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(LogCaptureLayer::new(logs.clone()))
        .init();

    tracing::info!(
        version = safetymonitor_protocol::metadata::DRIVER_VERSION,
        config = %storage.path().display(),
        "Alpaca SafetyMonitor starting..."
    );

    let bind_ip: IpAddr = settings
        .server
        .bind_address
        .parse()
        .with_context(|| format!("invalid bind address {}", settings.server.bind_address))?;
    let http_addr = SocketAddr::new(bind_ip, settings.server.http_port);
    let discovery_addr = SocketAddr::new(bind_ip, settings.server.discovery_port);

    let shutdown = CancellationToken::new();
    let device = DeviceHandle::new(DeviceState::default());
    let bridge = MqttBridge::new(device.clone());

    let router_handle = EventRouter::new(bridge.clone()).spawn(device.subscribe(), shutdown.clone());

    let discovery = DiscoveryResponder::bind(&DiscoveryConfig {
        bind_addr: discovery_addr,
        http_port: settings.server.http_port,
    })?;
    let discovery_handle = tokio::spawn(discovery.run(shutdown.clone()));

    if settings.mqtt.enabled {
        bridge.connect(settings.mqtt.clone()).await;
    }

    let state = Arc::new(ServerState::new(
        device,
        bridge.clone(),
        settings,
        storage,
        logs,
        shutdown.clone(),
    ));
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(http_addr)
        .await
        .with_context(|| format!("binding HTTP listener on {}", http_addr))?;
    tracing::info!(addr = %http_addr, "HTTP server listening");

    let http_shutdown = shutdown.clone();
    let mut http_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(http_shutdown.cancelled_owned())
            .await
    });

    tracing::info!("SafetyMonitor ready");
    tracing::info!("   Alpaca API: http://{}/api/v1/safetymonitor/0/issafe", http_addr);
    tracing::info!("   Admin:      http://{}/admin/status", http_addr);
    tracing::info!("   Discovery:  udp://{}", discovery_addr);

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate() => {
            tracing::info!("Received SIGTERM, shutting down...");
        }
        _ = shutdown.cancelled() => {
            tracing::info!("Shutdown requested, shutting down...");
        }
        result = &mut http_handle => {
            match result {
                Ok(Ok(())) => tracing::warn!("HTTP server stopped"),
                Ok(Err(e)) => tracing::error!(error = %e, "HTTP server error"),
                Err(e) => tracing::error!(error = %e, "HTTP server task failed"),
            }
        }
    }

    shutdown.cancel();
    bridge.disconnect().await;

    if !http_handle.is_finished()
        && tokio::time::timeout(HTTP_DRAIN_TIMEOUT, &mut http_handle)
            .await
            .is_err()
    {
        tracing::warn!("HTTP server did not drain in time");
        http_handle.abort();
    }
    let _ = discovery_handle.await;
    let _ = router_handle.await;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Apply `PORT` and `DISCOVERY_PORT` from the environment.
fn apply_env_overrides(settings: &mut Settings) -> anyhow::Result<()> {
    if let Ok(port) = std::env::var("PORT") {
        settings.server.http_port = port
            .trim()
            .parse()
            .with_context(|| format!("invalid PORT value {}", port))?;
    }
    if let Ok(port) = std::env::var("DISCOVERY_PORT") {
        settings.server.discovery_port = port
            .trim()
            .parse()
            .with_context(|| format!("invalid DISCOVERY_PORT value {}", port))?;
    }
    Ok(())
}

#[cfg(unix)]
async fn terminate() {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(mut signal) => {
            signal.recv().await;
        }
        Err(e) => {
            tracing::warn!(error = %e, "Cannot listen for SIGTERM");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
