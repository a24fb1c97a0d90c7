//! HTTP handlers for the sync surface

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppResult;
use crate::services::sync::{SyncBatch, SyncEntityType};
use crate::services::SyncService;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ChangesQuery {
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

/// Records changed since the caller's watermark
pub async fn get_changes(
    State(state): State<AppState>,
    Query(query): Query<ChangesQuery>,
) -> AppResult<Json<SyncBatch>> {
    let service = SyncService::new(state.db);
    let batch = service.changes_since(query.since, query.limit).await?;
    Ok(Json(batch))
}

#[derive(Debug, Deserialize)]
pub struct AckBody {
    pub entity_type: SyncEntityType,
    pub entity_id: Uuid,
    pub remote_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AckResponse {
    pub acknowledged: bool,
}

/// Record that the remote system accepted an entity
pub async fn acknowledge_sync(
    State(state): State<AppState>,
    Json(body): Json<AckBody>,
) -> AppResult<Json<AckResponse>> {
    let service = SyncService::new(state.db);
    service
        .mark_synced(body.entity_type, body.entity_id, body.remote_id)
        .await?;
    Ok(Json(AckResponse { acknowledged: true }))
}
