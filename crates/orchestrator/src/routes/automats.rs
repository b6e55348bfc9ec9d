//! Parcel automat endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use common::CellId;
use serde::{Deserialize, Serialize};

use super::parse_id;
use crate::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct ConfirmPickupRequest {
    pub cell_ids: Vec<String>,
}

#[derive(Serialize)]
pub struct ConfirmPickupResponse {
    pub completed_orders: Vec<String>,
}

/// POST /automats/confirm-pickup: The user emptied these cells.
#[tracing::instrument(skip(state, req))]
pub async fn confirm_pickup(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ConfirmPickupRequest>,
) -> Result<Json<ConfirmPickupResponse>, ApiError> {
    if req.cell_ids.is_empty() {
        return Err(ApiError::BadRequest("cell_ids must not be empty".to_string()));
    }
    let cell_ids = req
        .cell_ids
        .iter()
        .map(|raw| parse_id::<CellId>("cell_id", raw))
        .collect::<Result<Vec<_>, _>>()?;

    let completed = state.lifecycle.confirm_pickup(&cell_ids).await?;
    Ok(Json(ConfirmPickupResponse {
        completed_orders: completed.iter().map(ToString::to_string).collect(),
    }))
}
