//! HTTP handlers for expiry alert endpoints

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppResult;
use crate::services::status::ComputedAlert;
use crate::services::StatusService;
use crate::AppState;

use shared::models::ExpiryAlert;

#[derive(Debug, Deserialize)]
pub struct ListAlertsQuery {
    pub branch_id: Option<Uuid>,
    #[serde(default)]
    pub include_acknowledged: bool,
}

/// List stored alerts
pub async fn list_alerts(
    State(state): State<AppState>,
    Query(query): Query<ListAlertsQuery>,
) -> AppResult<Json<Vec<ExpiryAlert>>> {
    let service = StatusService::new(state.db);
    let alerts = service
        .list_alerts(query.branch_id, query.include_acknowledged)
        .await?;
    Ok(Json(alerts))
}

#[derive(Debug, Deserialize)]
pub struct ScanQuery {
    pub branch_id: Option<Uuid>,
}

/// Refresh the stored alert set from current lot state
pub async fn scan_alerts(
    State(state): State<AppState>,
    Query(query): Query<ScanQuery>,
) -> AppResult<Json<Vec<ExpiryAlert>>> {
    let service = StatusService::new(state.db);
    let alerts = service.scan_and_upsert_alerts(query.branch_id).await?;
    Ok(Json(alerts))
}

#[derive(Debug, Deserialize)]
pub struct ComputeQuery {
    pub branch_id: Option<Uuid>,
    /// Defaults to today
    pub as_of: Option<NaiveDate>,
}

/// Compute the alert set on demand without writing anything
pub async fn compute_alerts(
    State(state): State<AppState>,
    Query(query): Query<ComputeQuery>,
) -> AppResult<Json<Vec<ComputedAlert>>> {
    let as_of = query.as_of.unwrap_or_else(|| Utc::now().date_naive());
    let service = StatusService::new(state.db);
    let alerts = service.compute_alerts(query.branch_id, as_of).await?;
    Ok(Json(alerts))
}

#[derive(Debug, Deserialize)]
pub struct AcknowledgeBody {
    pub staff_id: Uuid,
    pub action_taken: Option<String>,
}

/// Acknowledge an alert
pub async fn acknowledge_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<Uuid>,
    Json(body): Json<AcknowledgeBody>,
) -> AppResult<Json<ExpiryAlert>> {
    let service = StatusService::new(state.db);
    let alert = service
        .acknowledge(alert_id, body.staff_id, body.action_taken)
        .await?;
    Ok(Json(alert))
}
