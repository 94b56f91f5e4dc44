//! HTTP surface: ingest adapter, health check, WebSocket route
//!
//! The ingest endpoint is a pure format/validation adapter in front of
//! the engine, used by the upstream backend to push courier positions
//! it received out-of-band.

use crate::domain::types::{now_rfc3339, LocationUpdate};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::services::engine::BroadcastEngine;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::debug;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<BroadcastEngine>,
    pub metrics: Arc<Metrics>,
    pub config: Arc<Config>,
}

/// Build the relay's HTTP/WebSocket router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/location/update", post(update_location))
        .route("/health", get(health))
        .route("/ws", get(crate::io::ws::websocket_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// POST /api/location/update - receives location updates from the
/// upstream backend and forwards them into the broadcast engine
async fn update_location(
    State(state): State<AppState>,
    Json(update): Json<LocationUpdate>,
) -> Response {
    match state.engine.handle_update(update).await {
        Ok(position) => (
            StatusCode::OK,
            Json(json!({
                "message": "location update received and broadcast",
                "courier_id": position.courier_id,
                "package_id": position.package_id,
            })),
        )
            .into_response(),
        Err(e) => {
            debug!(error = %e, "ingest_rejected");
            (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() }))).into_response()
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "timestamp": now_rfc3339() }))
}
