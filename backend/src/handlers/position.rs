//! HTTP handlers for the storage position catalog

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppResult;
use crate::services::position::{CreatePositionInput, UpdatePositionInput};
use crate::services::PositionService;
use crate::AppState;

use shared::models::StoragePosition;

/// Create a storage position
pub async fn create_position(
    State(state): State<AppState>,
    Json(input): Json<CreatePositionInput>,
) -> AppResult<Json<StoragePosition>> {
    let service = PositionService::new(state.db);
    let position = service.create_position(input).await?;
    Ok(Json(position))
}

/// Get a position by ID
pub async fn get_position(
    State(state): State<AppState>,
    Path(position_id): Path<Uuid>,
) -> AppResult<Json<StoragePosition>> {
    let service = PositionService::new(state.db);
    let position = service.get_position(position_id).await?;
    Ok(Json(position))
}

#[derive(Debug, Deserialize)]
pub struct ListPositionsQuery {
    pub branch_id: Uuid,
    #[serde(default)]
    pub include_inactive: bool,
}

/// List positions at a branch
pub async fn list_positions(
    State(state): State<AppState>,
    Query(query): Query<ListPositionsQuery>,
) -> AppResult<Json<Vec<StoragePosition>>> {
    let service = PositionService::new(state.db);
    let positions = service
        .list_positions(query.branch_id, query.include_inactive)
        .await?;
    Ok(Json(positions))
}

/// Update a position's capacity or active flag
pub async fn update_position(
    State(state): State<AppState>,
    Path(position_id): Path<Uuid>,
    Json(input): Json<UpdatePositionInput>,
) -> AppResult<Json<StoragePosition>> {
    let service = PositionService::new(state.db);
    let position = service.update_position(position_id, input).await?;
    Ok(Json(position))
}

/// Retire a position
pub async fn deactivate_position(
    State(state): State<AppState>,
    Path(position_id): Path<Uuid>,
) -> AppResult<Json<StoragePosition>> {
    let service = PositionService::new(state.db);
    let position = service.deactivate_position(position_id).await?;
    Ok(Json(position))
}
