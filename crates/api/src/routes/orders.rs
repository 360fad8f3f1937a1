//! Order endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{OrderId, UserId};
use domain::{Order, OrderStatus};
use saga::{CreateOrder, SagaError};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

#[derive(Serialize)]
pub struct SeedResponse {
    pub message: &'static str,
    pub orders: Vec<Order>,
}

/// POST /orders: create an order and reserve its stock.
#[tracing::instrument(skip(state, payload))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateOrder>, JsonRejection>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    let Json(request) = payload?;
    let order = state.saga.create_order(request).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /orders: list all orders.
#[tracing::instrument(skip(state))]
pub async fn list(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Order>>, ApiError> {
    Ok(Json(state.saga.list_orders().await?))
}

/// GET /orders/{id}
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    let order_id = parse_order_id(&id)?;
    Ok(Json(state.saga.get_order(order_id).await?))
}

/// GET /orders/user/{user_id}
#[tracing::instrument(skip(state))]
pub async fn list_for_user(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<Order>>, ApiError> {
    let user_id: UserId = user_id
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid user ID '{user_id}': {e}")))?;
    Ok(Json(state.saga.list_user_orders(user_id).await?))
}

/// PATCH /orders/{id}/status
#[tracing::instrument(skip(state, payload))]
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Result<Json<UpdateStatusRequest>, JsonRejection>,
) -> Result<Json<Order>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let Json(request) = payload?;
    if request.status.trim().is_empty() {
        return Err(ApiError::BadRequest("Status is required".to_string()));
    }

    let target: OrderStatus = request.status.parse().map_err(SagaError::from)?;
    Ok(Json(state.saga.update_status(order_id, target).await?))
}

/// DELETE /orders/{id}
#[tracing::instrument(skip(state))]
pub async fn delete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let order_id = parse_order_id(&id)?;
    state.saga.delete_order(order_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /orders/seed: replace all orders with the demo data.
#[tracing::instrument(skip(state))]
pub async fn seed(State(state): State<Arc<AppState>>) -> Result<Json<SeedResponse>, ApiError> {
    let orders = state.saga.seed_sample_orders().await?;
    Ok(Json(SeedResponse {
        message: "Order data seeded successfully",
        orders,
    }))
}

fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    id.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid order ID '{id}': {e}")))
}
