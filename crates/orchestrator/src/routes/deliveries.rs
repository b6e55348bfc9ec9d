//! Delivery lookup and status endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use common::DeliveryId;
use domain::{Delivery, DeliveryStatus};
use serde::{Deserialize, Serialize};

use super::parse_id;
use crate::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub status: String,
}

#[derive(Serialize)]
pub struct DeliveryResponse {
    pub id: String,
    pub order_id: String,
    pub drone_id: Option<String>,
    pub parcel_automat_id: String,
    pub internal_locker_cell_id: Option<String>,
    pub status: String,
}

impl From<Delivery> for DeliveryResponse {
    fn from(delivery: Delivery) -> Self {
        Self {
            id: delivery.id.to_string(),
            order_id: delivery.order_id.to_string(),
            drone_id: delivery.drone_id.map(|id| id.to_string()),
            parcel_automat_id: delivery.parcel_automat_id.to_string(),
            internal_locker_cell_id: delivery.internal_locker_cell_id.map(|id| id.to_string()),
            status: delivery.status.to_string(),
        }
    }
}

/// GET /deliveries/{id}
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DeliveryResponse>, ApiError> {
    let delivery_id: DeliveryId = parse_id("delivery id", &id)?;
    let delivery = state.lifecycle.get(delivery_id).await?;
    Ok(Json(delivery.into()))
}

/// GET /deliveries?status=...: Deliveries in one status.
#[tracing::instrument(skip(state, query))]
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<DeliveryResponse>>, ApiError> {
    let status: DeliveryStatus = query
        .status
        .parse()
        .map_err(|e: domain::ParseStatusError| ApiError::BadRequest(e.to_string()))?;
    let deliveries = state.lifecycle.list_by_status(status).await?;
    Ok(Json(
        deliveries.into_iter().map(DeliveryResponse::from).collect(),
    ))
}

/// PUT /deliveries/{id}/status: Report a delivery status change.
#[tracing::instrument(skip(state, req))]
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<DeliveryResponse>, ApiError> {
    let delivery_id: DeliveryId = parse_id("delivery id", &id)?;
    let delivery = state
        .lifecycle
        .update_status(delivery_id, &req.status)
        .await?;
    Ok(Json(delivery.into()))
}
