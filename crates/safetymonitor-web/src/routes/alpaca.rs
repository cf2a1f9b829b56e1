//! Alpaca SafetyMonitor device API.
//!
//! # Endpoints
//!
//! All under `/api/v1/safetymonitor/{device}`; only device `0` exists.
//!
//! | Method | Path | Value |
//! |---|---|---|
//! | GET | `connected` | `Connected` flag |
//! | PUT | `connected` | none; sets the flag |
//! | GET | `description`, `driverinfo`, `driverversion`, `name` | static strings |
//! | GET | `interfaceversion` | `1` |
//! | GET | `supportedactions` | `[]` |
//! | GET | `issafe` | safety flag |
//!
//! Every response, success or failure, consumes one server transaction id.
//! The device number is validated before anything else, so a request for a
//! bad device never touches state.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use safetymonitor_protocol::metadata::{
    DEVICE_DESCRIPTION, DEVICE_NAME, DRIVER_INFO, DRIVER_VERSION, INTERFACE_VERSION,
};
use safetymonitor_protocol::params::CONNECTED;
use safetymonitor_protocol::{
    error_response, parse_connected_value, success, validate_device_number, AlpacaError,
    ParamSource,
};
use safetymonitor_server::DeviceTxn;
use serde::Serialize;
use tracing::debug;

use crate::extract::AlpacaParams;
use crate::AppState;

/// Client-seen source tag for `PUT connected`.
pub const SOURCE_CONNECT: &str = "alpaca";

/// Client-seen source tag for `GET issafe`.
pub const SOURCE_POLL: &str = "alpaca-poll";

/// Create the device routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/:device/connected", get(get_connected).put(put_connected))
        .route("/:device/description", get(get_description))
        .route("/:device/driverinfo", get(get_driver_info))
        .route("/:device/driverversion", get(get_driver_version))
        .route("/:device/name", get(get_name))
        .route("/:device/interfaceversion", get(get_interface_version))
        .route("/:device/supportedactions", get(get_supported_actions))
        .route("/:device/issafe", get(get_is_safe))
}

/// Validate the device, run `f` under the state lock and wrap the result.
pub(crate) async fn respond<T, F>(
    state: &AppState,
    device: &str,
    params: &ParamSource,
    f: F,
) -> Response
where
    T: Serialize,
    F: FnOnce(&mut DeviceTxn<'_>) -> Result<T, AlpacaError>,
{
    let client_tx = params.client_transaction_raw();

    state
        .device
        .transact(|txn| match validate_device_number(device).and_then(|_| f(txn)) {
            Ok(value) => (StatusCode::OK, Json(success(txn, value, client_tx))).into_response(),
            Err(error) => {
                debug!(device = %device, error = %error, "Alpaca request rejected");
                let status =
                    StatusCode::from_u16(error.http_status()).unwrap_or(StatusCode::BAD_REQUEST);
                (status, Json(error_response(txn, &error, client_tx))).into_response()
            }
        })
        .await
}

/// Respond with a value that does not depend on state.
async fn respond_static<T: Serialize>(
    state: &AppState,
    device: &str,
    params: &ParamSource,
    value: T,
) -> Response {
    respond(state, device, params, move |_| Ok(value)).await
}

/// GET /api/v1/safetymonitor/{device}/connected
async fn get_connected(
    State(state): State<AppState>,
    Path(device): Path<String>,
    AlpacaParams(params): AlpacaParams,
) -> Response {
    respond(&state, &device, &params, |txn| Ok(txn.state().connected())).await
}

/// PUT /api/v1/safetymonitor/{device}/connected
async fn put_connected(
    State(state): State<AppState>,
    Path(device): Path<String>,
    AlpacaParams(params): AlpacaParams,
) -> Response {
    respond(&state, &device, &params, |txn| {
        let connected = parse_connected_value(params.get_ci(CONNECTED))?;
        txn.set_connected(connected);
        txn.set_client_connected(connected, SOURCE_CONNECT);
        Ok(())
    })
    .await
}

async fn get_description(
    State(state): State<AppState>,
    Path(device): Path<String>,
    AlpacaParams(params): AlpacaParams,
) -> Response {
    respond_static(&state, &device, &params, DEVICE_DESCRIPTION).await
}

async fn get_driver_info(
    State(state): State<AppState>,
    Path(device): Path<String>,
    AlpacaParams(params): AlpacaParams,
) -> Response {
    respond_static(&state, &device, &params, DRIVER_INFO).await
}

async fn get_driver_version(
    State(state): State<AppState>,
    Path(device): Path<String>,
    AlpacaParams(params): AlpacaParams,
) -> Response {
    respond_static(&state, &device, &params, DRIVER_VERSION).await
}

async fn get_name(
    State(state): State<AppState>,
    Path(device): Path<String>,
    AlpacaParams(params): AlpacaParams,
) -> Response {
    respond_static(&state, &device, &params, DEVICE_NAME).await
}

async fn get_interface_version(
    State(state): State<AppState>,
    Path(device): Path<String>,
    AlpacaParams(params): AlpacaParams,
) -> Response {
    respond_static(&state, &device, &params, INTERFACE_VERSION).await
}

async fn get_supported_actions(
    State(state): State<AppState>,
    Path(device): Path<String>,
    AlpacaParams(params): AlpacaParams,
) -> Response {
    respond_static(&state, &device, &params, Vec::<String>::new()).await
}

/// GET /api/v1/safetymonitor/{device}/issafe
///
/// Polling implies a live client: marks the device connected if it was not
/// and records the client as seen.
async fn get_is_safe(
    State(state): State<AppState>,
    Path(device): Path<String>,
    AlpacaParams(params): AlpacaParams,
) -> Response {
    respond(&state, &device, &params, |txn| {
        if !txn.state().connected() {
            txn.set_connected(true);
        }
        txn.set_client_connected(true, SOURCE_POLL);
        Ok(txn.state().is_safe())
    })
    .await
}
