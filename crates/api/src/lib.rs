//! HTTP API for the orders service.
//!
//! Exposes the order saga over REST, with structured logging (tracing) and
//! Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, patch, post};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::OrderSaga;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub saga: OrderSaga,
}

impl AppState {
    pub fn new(saga: OrderSaga) -> Self {
        Self { saga }
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route(
            "/orders",
            post(routes::orders::create).get(routes::orders::list),
        )
        .route("/orders/seed", post(routes::orders::seed))
        .route("/orders/user/{user_id}", get(routes::orders::list_for_user))
        .route(
            "/orders/{id}",
            get(routes::orders::get).delete(routes::orders::delete),
        )
        .route("/orders/{id}/status", patch(routes::orders::update_status))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
