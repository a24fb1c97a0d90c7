//! HTTP handlers for FEFO allocation

use axum::{extract::State, Json};

use crate::error::AppResult;
use crate::services::allocation::AllocateInput;
use crate::services::AllocationService;
use crate::AppState;

use shared::models::LotStockMovement;

/// Allocate stock across lots in FEFO order, all-or-nothing
pub async fn allocate(
    State(state): State<AppState>,
    Json(input): Json<AllocateInput>,
) -> AppResult<Json<Vec<LotStockMovement>>> {
    let service = AllocationService::new(state.db, state.config.ledger.allocation_max_retries);
    let movements = service.allocate(input).await?;
    Ok(Json(movements))
}
