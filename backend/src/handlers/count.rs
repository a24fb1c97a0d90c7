//! HTTP handlers for cycle counts

use axum::{
    extract::{Path, Query, State},
    Json,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppResult;
use crate::services::count::{CountDetail, StartCountInput};
use crate::services::CountService;
use crate::AppState;

use shared::models::{CycleCount, CycleCountItem};

fn count_service(state: &AppState) -> CountService {
    CountService::new(
        state.db.clone(),
        state.config.ledger.variance_approval_threshold,
        state.config.ledger.allocation_max_retries,
    )
}

/// Start a cycle count, snapshotting expected quantities
pub async fn start_count(
    State(state): State<AppState>,
    Json(input): Json<StartCountInput>,
) -> AppResult<Json<CountDetail>> {
    let detail = count_service(&state).start_count(input).await?;
    Ok(Json(detail))
}

/// Get a count with its lines
pub async fn get_count(
    State(state): State<AppState>,
    Path(count_id): Path<Uuid>,
) -> AppResult<Json<CountDetail>> {
    let detail = count_service(&state).get_count(count_id).await?;
    Ok(Json(detail))
}

#[derive(Debug, Deserialize)]
pub struct ListCountsQuery {
    pub branch_id: Uuid,
}

/// List counts at a branch, newest first
pub async fn list_counts(
    State(state): State<AppState>,
    Query(query): Query<ListCountsQuery>,
) -> AppResult<Json<Vec<CycleCount>>> {
    let counts = count_service(&state).list_counts(query.branch_id).await?;
    Ok(Json(counts))
}

#[derive(Debug, Deserialize)]
pub struct RecordCountBody {
    pub counted_quantity: Decimal,
}

/// Record a physical observation for one lot
pub async fn record_count_item(
    State(state): State<AppState>,
    Path((count_id, lot_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<RecordCountBody>,
) -> AppResult<Json<CycleCountItem>> {
    let item = count_service(&state)
        .record_count(count_id, lot_id, body.counted_quantity)
        .await?;
    Ok(Json(item))
}

#[derive(Debug, Deserialize)]
pub struct CompleteCountBody {
    #[serde(default)]
    pub approve_variance: bool,
    pub completed_by: Option<Uuid>,
}

/// Complete a count, posting adjustment movements for variances
pub async fn complete_count(
    State(state): State<AppState>,
    Path(count_id): Path<Uuid>,
    Json(body): Json<CompleteCountBody>,
) -> AppResult<Json<CountDetail>> {
    let detail = count_service(&state)
        .complete_count(count_id, body.approve_variance, body.completed_by)
        .await?;
    Ok(Json(detail))
}

/// Cancel an open count
pub async fn cancel_count(
    State(state): State<AppState>,
    Path(count_id): Path<Uuid>,
) -> AppResult<Json<CycleCount>> {
    let count = count_service(&state).cancel_count(count_id).await?;
    Ok(Json(count))
}
