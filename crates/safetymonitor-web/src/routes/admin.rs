//! Admin API for local tooling.
//!
//! Unauthenticated; meant to be reachable from the same machine only.
//!
//! # Endpoints
//!
//! ## Status and logs
//!
//! ### `GET /admin/status`
//! Ports, device flags, change tracking, health, uptime and MQTT state.
//!
//! ### `GET /admin/logs?n=200`
//! The last `n` captured log entries (0..=1000), oldest first.
//!
//! ### `GET /admin/logs/stream`
//! Server-Sent Events: one `hello` event, then a `log` event per entry.
//!
//! ## Device control
//!
//! ### `POST /admin/safe`
//! Body `{"safe": true|false|1|0|"true"|"false"|"1"|"0", "reason"?: string}`.
//!
//! ### `POST /admin/health`
//! Body `{"health": "ok"|"degraded"|"error"}`.
//!
//! ## MQTT and configuration
//!
//! ### `GET /admin/mqtt`, `POST /admin/mqtt/connect`, `POST /admin/mqtt/disconnect`
//! Bridge status and explicit control.
//!
//! ### `GET /admin/config`, `PUT /admin/config/mqtt`
//! Current settings (password redacted); replace, persist and reconnect MQTT.
//!
//! ## Process
//!
//! ### `POST /admin/shutdown`
//! Responds, then cancels the process-wide shutdown token.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
    routing::{get, post, put},
    Router,
};
use futures::stream::{self, Stream, StreamExt};
use safetymonitor_core::{Health, MqttSettings, Settings};
use safetymonitor_server::BridgeStatus;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::logs::{clamp_log_query, LogEntry};
use crate::AppState;

/// Reason recorded for `POST /admin/safe` without one.
pub const ADMIN_REASON: &str = "admin";

/// Delay between answering `POST /admin/shutdown` and shutting down.
const SHUTDOWN_DELAY: Duration = Duration::from_millis(50);

/// Placeholder the redacted config shows instead of the password.
const REDACTED_PASSWORD: &str = "********";

/// Create admin routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/status", get(get_status))
        .route("/logs", get(get_logs))
        .route("/logs/stream", get(stream_logs))
        .route("/safe", post(post_safe))
        .route("/health", post(post_health))
        .route("/mqtt", get(get_mqtt))
        .route("/mqtt/connect", post(post_mqtt_connect))
        .route("/mqtt/disconnect", post(post_mqtt_disconnect))
        .route("/config", get(get_config))
        .route("/config/mqtt", put(put_mqtt_config))
        .route("/shutdown", post(post_shutdown))
}

fn bad_request(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "ok": false, "error": message.into() })),
    )
        .into_response()
}

/// GET /admin/status
async fn get_status(State(state): State<AppState>) -> Json<Value> {
    let snapshot = state.device.snapshot().await;
    let (http_port, discovery_port) = {
        let settings = state.settings.read().await;
        (settings.server.http_port, settings.server.discovery_port)
    };
    let mqtt = state.bridge.status().await;

    Json(json!({
        "httpPort": http_port,
        "discoveryPort": discovery_port,
        "connected": snapshot.connected,
        "isSafe": snapshot.is_safe,
        "clientConnected": snapshot.client_connected,
        "lastClientSeen": snapshot.last_client_seen,
        "lastClient": snapshot.last_client_seen,
        "lastChangeAt": snapshot.last_change_at,
        "lastChangeReason": snapshot.last_change_reason,
        "health": snapshot.health,
        "uptimeSec": snapshot.uptime_sec,
        "mqtt": mqtt,
    }))
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    n: Option<String>,
}

/// GET /admin/logs
async fn get_logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> Json<Vec<LogEntry>> {
    let n = clamp_log_query(query.n.as_deref());
    Json(state.logs.recent(n))
}

/// GET /admin/logs/stream
async fn stream_logs(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let hello = Event::default()
        .event("hello")
        .data(json!({ "ts": chrono::Utc::now().timestamp_millis() }).to_string());

    let live = stream::unfold(state.logs.subscribe(), |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(entry) => {
                    let data = serde_json::to_string(&entry).unwrap_or_default();
                    return Some((Event::default().event("log").data(data), rx));
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    let events = stream::once(async move { hello }).chain(live).map(Ok);
    Sse::new(events).keep_alive(KeepAlive::default())
}

/// Interpret the `safe` field of `POST /admin/safe`.
fn parse_admin_safe(value: Option<&Value>) -> Option<bool> {
    match value? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_f64() {
            Some(v) if v == 1.0 => Some(true),
            Some(v) if v == 0.0 => Some(false),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// POST /admin/safe
async fn post_safe(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Response {
    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) => return bad_request(rejection.body_text()),
    };

    let Some(is_safe) = parse_admin_safe(body.get("safe")) else {
        return bad_request("safe must be boolean");
    };
    let reason = body
        .get("reason")
        .and_then(Value::as_str)
        .unwrap_or(ADMIN_REASON)
        .to_string();

    let current = state
        .device
        .transact(|txn| {
            txn.set_safe(is_safe, &reason);
            txn.state().is_safe()
        })
        .await;
    info!(is_safe = current, reason = %reason, "Safety set via admin");

    Json(json!({ "ok": true, "isSafe": current })).into_response()
}

/// POST /admin/health
async fn post_health(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Response {
    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) => return bad_request(rejection.body_text()),
    };

    let health = match body.get("health").and_then(Value::as_str).map(str::parse::<Health>) {
        Some(Ok(health)) => health,
        Some(Err(e)) => return bad_request(e),
        None => return bad_request("health must be one of ok, degraded, error"),
    };

    let changed = state.device.set_health(health).await;
    Json(json!({ "ok": true, "health": health, "changed": changed })).into_response()
}

/// GET /admin/mqtt
async fn get_mqtt(State(state): State<AppState>) -> Json<BridgeStatus> {
    Json(state.bridge.status().await)
}

/// POST /admin/mqtt/connect
///
/// Connects with the stored settings even if they are disabled.
async fn post_mqtt_connect(State(state): State<AppState>) -> Json<Value> {
    let mut config = state.settings.read().await.mqtt.clone();
    config.enabled = true;

    state.bridge.connect(config).await;
    Json(json!({ "ok": true, "state": state.bridge.state().await }))
}

/// POST /admin/mqtt/disconnect
async fn post_mqtt_disconnect(State(state): State<AppState>) -> Json<Value> {
    state.bridge.disconnect().await;
    Json(json!({ "ok": true, "state": state.bridge.state().await }))
}

/// GET /admin/config
async fn get_config(State(state): State<AppState>) -> Json<Settings> {
    Json(state.settings.read().await.redacted())
}

/// PUT /admin/config/mqtt
///
/// Replaces the MQTT section, persists it and reconnects the bridge with
/// it. Sending back the redacted password keeps the stored one. The file
/// write runs on the blocking pool; readers of the settings are not held up.
async fn put_mqtt_config(
    State(state): State<AppState>,
    body: Result<Json<MqttSettings>, JsonRejection>,
) -> Response {
    let mut mqtt = match body {
        Ok(Json(mqtt)) => mqtt,
        Err(rejection) => return bad_request(rejection.body_text()),
    };

    let _writer = state.config_writes.lock().await;
    let mut updated = state.settings.read().await.clone();
    if mqtt.password == REDACTED_PASSWORD {
        mqtt.password = updated.mqtt.password.clone();
    }
    updated.mqtt = mqtt;
    let updated = updated.normalized();

    let storage = state.storage.clone();
    let to_save = updated.clone();
    let saved = match tokio::task::spawn_blocking(move || storage.save(&to_save)).await {
        Ok(result) => result.map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };
    if let Err(e) = saved {
        error!(error = %e, "Failed to save configuration");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "ok": false, "error": e })),
        )
            .into_response();
    }
    *state.settings.write().await = updated.clone();

    info!(
        enabled = updated.mqtt.enabled,
        host = %updated.mqtt.host,
        port = updated.mqtt.port,
        "MQTT configuration updated"
    );
    state.bridge.connect(updated.mqtt.clone()).await;

    Json(json!({ "ok": true, "mqtt": updated.mqtt.redacted() })).into_response()
}

/// POST /admin/shutdown
async fn post_shutdown(State(state): State<AppState>) -> Json<Value> {
    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(SHUTDOWN_DELAY).await;
        warn!("Shutdown requested via /admin/shutdown");
        shutdown.cancel();
    });
    Json(json!({ "ok": true }))
}
