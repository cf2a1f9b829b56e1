//! HTTP route handlers.
//!
//! Routes are organized by API surface:
//! - `alpaca` - `/api/v1/safetymonitor/{device}/...`
//! - `management` - `/management/...`
//! - `admin` - `/admin/...`

pub mod admin;
pub mod alpaca;
pub mod management;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::AppState;

/// Create the main Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1/safetymonitor", alpaca::routes())
        .nest("/management", management::routes())
        .nest("/admin", admin::routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
