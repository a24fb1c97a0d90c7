//! Dirty tracking for external synchronization
//!
//! Change detection rides on row timestamps: a record is dirty when its
//! `updated_at` (or `created_at` for the append-only ledger) is newer than
//! the caller's watermark. Acknowledgments land in a separate registry table,
//! so sync bookkeeping never touches ledger transactions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use shared::models::{ExpiryAlert, LotStockMovement, StockLot};

use crate::error::{AppError, AppResult};
use crate::services::ledger::{MovementRow, MOVEMENT_COLUMNS};
use crate::services::lot::{LotRow, LOT_COLUMNS};
use crate::services::status::{AlertRow, ALERT_COLUMNS};

const DEFAULT_BATCH_LIMIT: i64 = 500;

/// Entities the registry tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncEntityType {
    Lot,
    Movement,
    Alert,
}

impl SyncEntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncEntityType::Lot => "lot",
            SyncEntityType::Movement => "movement",
            SyncEntityType::Alert => "alert",
        }
    }
}

/// Everything changed since a watermark, plus the server time to use as the
/// next watermark
#[derive(Debug, Serialize)]
pub struct SyncBatch {
    pub lots: Vec<StockLot>,
    pub movements: Vec<LotStockMovement>,
    pub alerts: Vec<ExpiryAlert>,
    pub server_time: DateTime<Utc>,
}

/// Sync service: change batches out, acknowledgments in
#[derive(Clone)]
pub struct SyncService {
    db: PgPool,
}

impl SyncService {
    /// Create a new SyncService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Collect records changed since the watermark. `server_time` is captured
    /// before the reads, so a record updated mid-collection reappears in the
    /// next batch rather than being skipped.
    pub async fn changes_since(
        &self,
        since: Option<DateTime<Utc>>,
        limit: Option<i64>,
    ) -> AppResult<SyncBatch> {
        let limit = limit.unwrap_or(DEFAULT_BATCH_LIMIT);
        if limit <= 0 {
            return Err(AppError::Validation {
                field: "limit".to_string(),
                message: "Batch limit must be positive".to_string(),
            });
        }
        let server_time = Utc::now();

        let lots = sqlx::query_as::<_, LotRow>(&format!(
            r#"
            SELECT {LOT_COLUMNS}
            FROM stock_lots
            WHERE $1::timestamptz IS NULL OR updated_at > $1
            ORDER BY updated_at ASC
            LIMIT $2
            "#,
        ))
        .bind(since)
        .bind(limit)
        .fetch_all(&self.db)
        .await?
        .into_iter()
        .map(LotRow::into_lot)
        .collect::<AppResult<Vec<_>>>()?;

        let movements = sqlx::query_as::<_, MovementRow>(&format!(
            r#"
            SELECT {MOVEMENT_COLUMNS}
            FROM lot_stock_movements
            WHERE $1::timestamptz IS NULL OR created_at > $1
            ORDER BY created_at ASC, seq ASC
            LIMIT $2
            "#,
        ))
        .bind(since)
        .bind(limit)
        .fetch_all(&self.db)
        .await?
        .into_iter()
        .map(MovementRow::into_movement)
        .collect::<AppResult<Vec<_>>>()?;

        let alerts = sqlx::query_as::<_, AlertRow>(&format!(
            r#"
            SELECT {ALERT_COLUMNS}
            FROM expiry_alerts
            WHERE $1::timestamptz IS NULL OR updated_at > $1
            ORDER BY updated_at ASC
            LIMIT $2
            "#,
        ))
        .bind(since)
        .bind(limit)
        .fetch_all(&self.db)
        .await?
        .into_iter()
        .map(AlertRow::into_alert)
        .collect::<AppResult<Vec<_>>>()?;

        tracing::debug!(
            "Sync batch since {:?}: {} lots, {} movements, {} alerts",
            since,
            lots.len(),
            movements.len(),
            alerts.len()
        );

        Ok(SyncBatch {
            lots,
            movements,
            alerts,
            server_time,
        })
    }

    /// Record that the remote system accepted an entity, keeping its remote
    /// identifier for reconciliation
    pub async fn mark_synced(
        &self,
        entity_type: SyncEntityType,
        entity_id: Uuid,
        remote_id: Option<String>,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_registry (entity_type, entity_id, remote_id, synced_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (entity_type, entity_id) DO UPDATE SET
                remote_id = EXCLUDED.remote_id,
                synced_at = EXCLUDED.synced_at
            "#,
        )
        .bind(entity_type.as_str())
        .bind(entity_id)
        .bind(&remote_id)
        .execute(&self.db)
        .await?;

        Ok(())
    }
}
