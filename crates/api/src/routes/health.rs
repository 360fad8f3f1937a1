//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub bus_connected: bool,
}

/// GET /health: reports the service as up and whether the bus is connected.
///
/// A missing bus connection does not make the service unhealthy; orders are
/// still accepted on the degraded path.
pub async fn check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "orders",
        bus_connected: state.saga.bus().is_connected(),
    })
}
