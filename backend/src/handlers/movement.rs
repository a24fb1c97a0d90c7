//! HTTP handlers for movement endpoints

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppResult;
use crate::services::ledger::ApplyMovementInput;
use crate::services::LedgerService;
use crate::AppState;

use shared::models::LotStockMovement;

/// Apply a single movement (manual adjustment, waste, return, transfer)
pub async fn apply_movement(
    State(state): State<AppState>,
    Json(input): Json<ApplyMovementInput>,
) -> AppResult<Json<LotStockMovement>> {
    let service = LedgerService::new(state.db);
    let movement = service.apply_movement(input).await?;
    Ok(Json(movement))
}

#[derive(Debug, Deserialize)]
pub struct ListMovementsQuery {
    pub branch_id: Uuid,
    pub since: Option<DateTime<Utc>>,
}

/// Movements at a branch, newest first, optionally since a timestamp
pub async fn list_movements(
    State(state): State<AppState>,
    Query(query): Query<ListMovementsQuery>,
) -> AppResult<Json<Vec<LotStockMovement>>> {
    let service = LedgerService::new(state.db);
    let movements = service
        .list_movements_for_branch(query.branch_id, query.since)
        .await?;
    Ok(Json(movements))
}
