//! Alpaca management API.
//!
//! - `GET /management/apiversions` - `[1]`
//! - `GET /management/v1/description` - server description
//! - `GET /management/v1/configureddevices` - the single SafetyMonitor
//!
//! These share the server transaction counter with the device API.

use axum::{extract::State, response::Json, routing::get, Router};
use safetymonitor_protocol::messages::{ConfiguredDevice, ServerDescription, SuccessResponse};
use safetymonitor_protocol::metadata::{configured_devices, server_description, API_VERSIONS};
use safetymonitor_protocol::success;
use serde::Serialize;

use crate::extract::AlpacaParams;
use crate::AppState;

/// Create the management routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/apiversions", get(get_api_versions))
        .route("/v1/description", get(get_description))
        .route("/v1/configureddevices", get(get_configured_devices))
}

async fn envelope<T: Serialize>(
    state: &AppState,
    params: &AlpacaParams,
    value: T,
) -> Json<SuccessResponse<T>> {
    let client_tx = params.0.client_transaction_raw();
    let response = state
        .device
        .transact(|txn| success(txn, value, client_tx))
        .await;
    Json(response)
}

/// GET /management/apiversions
async fn get_api_versions(
    State(state): State<AppState>,
    params: AlpacaParams,
) -> Json<SuccessResponse<Vec<u32>>> {
    envelope(&state, &params, API_VERSIONS.to_vec()).await
}

/// GET /management/v1/description
async fn get_description(
    State(state): State<AppState>,
    params: AlpacaParams,
) -> Json<SuccessResponse<ServerDescription>> {
    envelope(&state, &params, server_description()).await
}

/// GET /management/v1/configureddevices
async fn get_configured_devices(
    State(state): State<AppState>,
    params: AlpacaParams,
) -> Json<SuccessResponse<Vec<ConfiguredDevice>>> {
    envelope(&state, &params, configured_devices()).await
}
