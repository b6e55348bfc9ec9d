//! Order placement, lookup and return endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{GoodId, OrderId, UserId};
use domain::Order;
use serde::{Deserialize, Serialize};

use super::parse_id;
use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub user_id: String,
    pub good_id: String,
}

#[derive(Deserialize)]
pub struct CreateOrdersRequest {
    pub user_id: String,
    pub good_ids: Vec<String>,
}

#[derive(Deserialize)]
pub struct ReturnOrderRequest {
    pub user_id: String,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub user_id: String,
    pub good_id: String,
    pub parcel_automat_id: String,
    pub locker_cell_id: Option<String>,
    pub status: String,
    pub created_at: String,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            id: order.id.to_string(),
            user_id: order.user_id.to_string(),
            good_id: order.good_id.to_string(),
            parcel_automat_id: order.parcel_automat_id.to_string(),
            locker_cell_id: order.locker_cell_id.map(|id| id.to_string()),
            status: order.status.to_string(),
            created_at: order.created_at.to_rfc3339(),
        }
    }
}

// -- Handlers --

/// POST /orders: Place an order for one unit of a good.
#[tracing::instrument(skip(state, req))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError> {
    let user_id: UserId = parse_id("user_id", &req.user_id)?;
    let good_id: GoodId = parse_id("good_id", &req.good_id)?;

    let order = state.saga.create_order(user_id, good_id).await?;
    Ok((StatusCode::CREATED, Json(order.into())))
}

/// POST /orders/batch: Place one order per listed good.
#[tracing::instrument(skip(state, req))]
pub async fn create_batch(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateOrdersRequest>,
) -> Result<(StatusCode, Json<Vec<OrderResponse>>), ApiError> {
    let user_id: UserId = parse_id("user_id", &req.user_id)?;
    if req.good_ids.is_empty() {
        return Err(ApiError::BadRequest("good_ids must not be empty".to_string()));
    }
    let good_ids = req
        .good_ids
        .iter()
        .map(|raw| parse_id::<GoodId>("good_id", raw))
        .collect::<Result<Vec<_>, _>>()?;

    let orders = state.saga.create_multiple_orders(user_id, &good_ids).await?;
    Ok((
        StatusCode::CREATED,
        Json(orders.into_iter().map(OrderResponse::from).collect()),
    ))
}

/// GET /orders/{id}
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id: OrderId = parse_id("order id", &id)?;
    let order = state.saga.get_order(order_id).await?;
    Ok(Json(order.into()))
}

/// GET /users/{user_id}/orders: A user's orders, newest first.
#[tracing::instrument(skip(state))]
pub async fn list_for_user(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<OrderResponse>>, ApiError> {
    let user_id: UserId = parse_id("user id", &user_id)?;
    let orders = state.saga.list_user_orders(user_id).await?;
    Ok(Json(orders.into_iter().map(OrderResponse::from).collect()))
}

/// POST /orders/{id}/return: Cancel an order and recall its drone.
#[tracing::instrument(skip(state, req))]
pub async fn return_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<ReturnOrderRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id: OrderId = parse_id("order id", &id)?;
    let user_id: UserId = parse_id("user_id", &req.user_id)?;

    state.saga.return_order(order_id, user_id).await?;
    let order = state.saga.get_order(order_id).await?;
    Ok(Json(order.into()))
}
