//! HTTP handlers for lot endpoints

use axum::{
    extract::{Path, Query, State},
    Json,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::services::ledger::ChainReport;
use crate::services::lot::CreateLotInput;
use crate::services::{AllocationService, LedgerService, LotService, StatusService};
use crate::AppState;

use shared::models::{LotStatus, LotStockMovement, StockLot};

/// Create a lot from a confirmed receipt
pub async fn create_lot(
    State(state): State<AppState>,
    Json(input): Json<CreateLotInput>,
) -> AppResult<Json<StockLot>> {
    let service = LotService::new(state.db);
    let lot = service.create_lot(input).await?;
    Ok(Json(lot))
}

/// Get a lot by ID
pub async fn get_lot(
    State(state): State<AppState>,
    Path(lot_id): Path<Uuid>,
) -> AppResult<Json<StockLot>> {
    let service = LotService::new(state.db);
    let lot = service.get_lot(lot_id).await?;
    Ok(Json(lot))
}

#[derive(Debug, Deserialize)]
pub struct ListLotsQuery {
    pub branch_id: Uuid,
    pub product_id: Option<Uuid>,
    pub status: Option<LotStatus>,
    #[serde(default)]
    pub include_depleted: bool,
}

/// List lots at a branch. With `product_id` the listing is FEFO-ordered for
/// that product; otherwise all lots at the branch, optionally by status.
pub async fn list_lots(
    State(state): State<AppState>,
    Query(query): Query<ListLotsQuery>,
) -> AppResult<Json<Vec<StockLot>>> {
    let service = LotService::new(state.db);
    let lots = match query.product_id {
        Some(product_id) => {
            service
                .list_lots_for_product(product_id, query.branch_id, query.include_depleted)
                .await?
        }
        None => {
            service
                .list_lots_for_branch(query.branch_id, query.status)
                .await?
        }
    };
    Ok(Json(lots))
}

#[derive(Debug, Deserialize)]
pub struct SetPositionBody {
    pub position_id: Option<Uuid>,
}

/// Assign a lot to a storage position, or clear the assignment
pub async fn set_lot_position(
    State(state): State<AppState>,
    Path(lot_id): Path<Uuid>,
    Json(body): Json<SetPositionBody>,
) -> AppResult<Json<StockLot>> {
    let service = LotService::new(state.db);
    let lot = service.set_position(lot_id, body.position_id).await?;
    Ok(Json(lot))
}

/// Movement history for a lot, oldest first
pub async fn get_lot_movements(
    State(state): State<AppState>,
    Path(lot_id): Path<Uuid>,
) -> AppResult<Json<Vec<LotStockMovement>>> {
    let service = LedgerService::new(state.db);
    let movements = service.list_movements(lot_id).await?;
    Ok(Json(movements))
}

/// Audit a lot's movement chain
pub async fn verify_lot_chain(
    State(state): State<AppState>,
    Path(lot_id): Path<Uuid>,
) -> AppResult<Json<ChainReport>> {
    let service = LedgerService::new(state.db);
    let report = service.verify_chain(lot_id).await?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
pub struct QuarantineBody {
    pub reason: String,
    pub staff_id: Uuid,
}

/// Place a lot in quarantine
pub async fn quarantine_lot(
    State(state): State<AppState>,
    Path(lot_id): Path<Uuid>,
    Json(body): Json<QuarantineBody>,
) -> AppResult<Json<StockLot>> {
    if body.reason.trim().is_empty() {
        return Err(AppError::Validation {
            field: "reason".to_string(),
            message: "Quarantine reason cannot be empty".to_string(),
        });
    }
    let service = StatusService::new(state.db);
    let lot = service
        .quarantine(lot_id, body.reason.trim(), body.staff_id)
        .await?;
    Ok(Json(lot))
}

/// Release a lot from quarantine
pub async fn release_lot(
    State(state): State<AppState>,
    Path(lot_id): Path<Uuid>,
) -> AppResult<Json<StockLot>> {
    let service = StatusService::new(state.db);
    let lot = service.release(lot_id).await?;
    Ok(Json(lot))
}

#[derive(Debug, Deserialize)]
pub struct ReservationBody {
    pub quantity: Decimal,
}

/// Earmark quantity on a lot
pub async fn reserve_lot(
    State(state): State<AppState>,
    Path(lot_id): Path<Uuid>,
    Json(body): Json<ReservationBody>,
) -> AppResult<Json<StockLot>> {
    let service = AllocationService::new(state.db, state.config.ledger.allocation_max_retries);
    let lot = service.reserve(lot_id, body.quantity).await?;
    Ok(Json(lot))
}

/// Release previously earmarked quantity
pub async fn release_lot_reservation(
    State(state): State<AppState>,
    Path(lot_id): Path<Uuid>,
    Json(body): Json<ReservationBody>,
) -> AppResult<Json<StockLot>> {
    let service = AllocationService::new(state.db, state.config.ledger.allocation_max_retries);
    let lot = service.release_reservation(lot_id, body.quantity).await?;
    Ok(Json(lot))
}
