//! Registration of goods, automats, cells and drones.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::AutomatId;
use domain::{Dimensions, Drone, Good, LockerCell, ParcelAutomat};
use serde::Deserialize;

use super::parse_id;
use crate::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct CreateGoodRequest {
    pub name: String,
    #[serde(default)]
    pub weight: f64,
    pub height: f64,
    pub length: f64,
    pub width: f64,
    pub quantity: i64,
}

#[derive(Deserialize)]
pub struct CreateAutomatRequest {
    pub city: String,
    pub address: String,
    pub coordinates: String,
    pub aruco_id: i32,
    #[serde(default)]
    pub ip_address: String,
}

#[derive(Deserialize)]
pub struct CreateCellRequest {
    pub number: u32,
    pub height: f64,
    pub length: f64,
    pub width: f64,
    /// Registers a transfer cell instead of a customer-facing one.
    #[serde(default)]
    pub internal: bool,
}

#[derive(Deserialize)]
pub struct CreateDroneRequest {
    pub model: String,
    pub ip_address: String,
}

/// POST /goods
#[tracing::instrument(skip(state, req))]
pub async fn create_good(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateGoodRequest>,
) -> Result<(StatusCode, Json<Good>), ApiError> {
    if req.quantity < 0 {
        return Err(ApiError::BadRequest(
            "quantity must not be negative".to_string(),
        ));
    }
    let dimensions = Dimensions::new(req.weight, req.height, req.length, req.width);
    let good = state
        .repos
        .goods
        .create(Good::new(req.name, dimensions, req.quantity))
        .await?;
    tracing::info!(good_id = %good.id, quantity = good.quantity_available, "good registered");
    Ok((StatusCode::CREATED, Json(good)))
}

/// POST /automats
#[tracing::instrument(skip(state, req))]
pub async fn create_automat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateAutomatRequest>,
) -> Result<(StatusCode, Json<ParcelAutomat>), ApiError> {
    let mut automat = ParcelAutomat::new(req.city, req.address, req.coordinates, req.aruco_id);
    automat.ip_address = req.ip_address;
    let automat = state.repos.automats.create(automat).await?;
    tracing::info!(automat_id = %automat.id, "parcel automat registered");
    Ok((StatusCode::CREATED, Json(automat)))
}

/// POST /automats/{id}/cells: Add an external or internal cell.
#[tracing::instrument(skip(state, req))]
pub async fn create_cell(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<CreateCellRequest>,
) -> Result<(StatusCode, Json<LockerCell>), ApiError> {
    let automat_id: AutomatId = parse_id("automat id", &id)?;
    state.repos.automats.get(automat_id).await?;

    let pool = if req.internal {
        state
            .repos
            .internal_cells
            .as_ref()
            .ok_or_else(|| ApiError::BadRequest("internal cells are not configured".to_string()))?
    } else {
        &state.repos.cells
    };
    let dimensions = Dimensions::new(0.0, req.height, req.length, req.width);
    let cell = pool
        .create(LockerCell::new(automat_id, req.number, dimensions))
        .await?;
    tracing::info!(cell_id = %cell.id, %automat_id, internal = req.internal, "locker cell registered");
    Ok((StatusCode::CREATED, Json(cell)))
}

/// POST /drones
#[tracing::instrument(skip(state, req))]
pub async fn create_drone(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateDroneRequest>,
) -> Result<(StatusCode, Json<Drone>), ApiError> {
    let drone = state
        .repos
        .drones
        .create(Drone::new(req.model, req.ip_address))
        .await?;
    tracing::info!(drone_id = %drone.id, "drone registered");
    Ok((StatusCode::CREATED, Json(drone)))
}
