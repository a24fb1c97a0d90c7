//! Cycle counts: snapshot, record, reconcile
//!
//! A count snapshots lot quantities when it starts, collects physical
//! observations, and on completion posts one `adjustment` movement per lot
//! whose observation differs from the snapshot. Completion is a single
//! transaction; an aggregate variance above the configured value threshold
//! parks the count for review instead of posting.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use shared::models::{
    CycleCount, CycleCountItem, CycleCountStatus, MovementDirection, MovementReference,
    MovementType, ReferenceType,
};
use shared::validation::validate_non_negative_quantity;

use crate::error::{AppError, AppResult};
use crate::services::ledger::{apply_movement_in_tx, is_serialization_failure, MovementDraft};
use crate::services::status::refresh_alert_for_lot;

const COUNT_COLUMNS: &str = "id, branch_id, scheduled_date, status, variance_count, \
     variance_value, started_at, completed_at, created_by, created_at, updated_at";

const ITEM_COLUMNS: &str =
    "count_id, lot_id, product_id, lot_number, expected_quantity, counted_quantity, counted_at";

/// Database row for a cycle count
#[derive(Debug, FromRow)]
struct CountRow {
    id: Uuid,
    branch_id: Uuid,
    scheduled_date: NaiveDate,
    status: String,
    variance_count: i32,
    variance_value: Decimal,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    created_by: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl CountRow {
    fn into_count(self) -> AppResult<CycleCount> {
        let status = CycleCountStatus::parse(&self.status).ok_or_else(|| {
            AppError::Internal(format!("unknown count status in database: {}", self.status))
        })?;
        Ok(CycleCount {
            id: self.id,
            branch_id: self.branch_id,
            scheduled_date: self.scheduled_date,
            status,
            variance_count: self.variance_count,
            variance_value: self.variance_value,
            started_at: self.started_at,
            completed_at: self.completed_at,
            created_by: self.created_by,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ItemRow {
    count_id: Uuid,
    lot_id: Uuid,
    product_id: Uuid,
    lot_number: String,
    expected_quantity: Decimal,
    counted_quantity: Option<Decimal>,
    counted_at: Option<DateTime<Utc>>,
}

impl ItemRow {
    fn into_item(self) -> CycleCountItem {
        CycleCountItem {
            count_id: self.count_id,
            lot_id: self.lot_id,
            product_id: self.product_id,
            lot_number: self.lot_number,
            expected_quantity: self.expected_quantity,
            counted_quantity: self.counted_quantity,
            counted_at: self.counted_at,
        }
    }
}

/// Input for starting a count
#[derive(Debug, Deserialize)]
pub struct StartCountInput {
    pub branch_id: Uuid,
    /// Defaults to today
    pub scheduled_date: Option<NaiveDate>,
    /// Narrow the count to one product; otherwise every stocked lot at the
    /// branch is included
    pub product_id: Option<Uuid>,
    pub created_by: Option<Uuid>,
}

/// A count together with its per-lot lines
#[derive(Debug, serde::Serialize)]
pub struct CountDetail {
    #[serde(flatten)]
    pub count: CycleCount,
    pub items: Vec<CycleCountItem>,
}

/// Cycle count service
#[derive(Clone)]
pub struct CountService {
    db: PgPool,
    variance_threshold: Decimal,
    max_retries: u32,
}

impl CountService {
    /// Create a new CountService instance
    pub fn new(db: PgPool, variance_threshold: Decimal, max_retries: u32) -> Self {
        Self {
            db,
            variance_threshold,
            max_retries,
        }
    }

    /// Start a count: create it and snapshot expected quantities for every
    /// in-scope lot in the same transaction, so the baseline is taken at one
    /// instant.
    pub async fn start_count(&self, input: StartCountInput) -> AppResult<CountDetail> {
        let scheduled_date = input
            .scheduled_date
            .unwrap_or_else(|| Utc::now().date_naive());

        let mut tx = self.db.begin().await?;

        let count = sqlx::query_as::<_, CountRow>(&format!(
            r#"
            INSERT INTO cycle_counts (branch_id, scheduled_date, status, started_at, created_by)
            VALUES ($1, $2, 'in_progress', NOW(), $3)
            RETURNING {COUNT_COLUMNS}
            "#,
        ))
        .bind(input.branch_id)
        .bind(scheduled_date)
        .bind(input.created_by)
        .fetch_one(&mut *tx)
        .await?
        .into_count()?;

        let items = sqlx::query_as::<_, ItemRow>(&format!(
            r#"
            INSERT INTO cycle_count_items (count_id, lot_id, product_id, lot_number, expected_quantity)
            SELECT $1, id, product_id, lot_number, current_quantity
            FROM stock_lots
            WHERE branch_id = $2
              AND current_quantity > 0
              AND ($3::uuid IS NULL OR product_id = $3)
            RETURNING {ITEM_COLUMNS}
            "#,
        ))
        .bind(count.id)
        .bind(input.branch_id)
        .bind(input.product_id)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            "Cycle count {} started at branch {} covering {} lots",
            count.id,
            count.branch_id,
            items.len()
        );

        Ok(CountDetail {
            count,
            items: items.into_iter().map(ItemRow::into_item).collect(),
        })
    }

    /// Record a physical observation for one lot on an open count
    pub async fn record_count(
        &self,
        count_id: Uuid,
        lot_id: Uuid,
        counted_quantity: Decimal,
    ) -> AppResult<CycleCountItem> {
        validate_non_negative_quantity(counted_quantity)
            .map_err(|msg| AppError::InvalidQuantity(msg.to_string()))?;

        let count = self.load_count(count_id).await?;
        if !count.status.is_open() {
            return Err(AppError::InvalidStateTransition(format!(
                "count {} is {}, observations are closed",
                count_id, count.status
            )));
        }

        let row = sqlx::query_as::<_, ItemRow>(&format!(
            r#"
            UPDATE cycle_count_items
            SET counted_quantity = $1, counted_at = NOW()
            WHERE count_id = $2 AND lot_id = $3
            RETURNING {ITEM_COLUMNS}
            "#,
        ))
        .bind(counted_quantity)
        .bind(count_id)
        .bind(lot_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Count item".to_string()))?;

        Ok(row.into_item())
    }

    /// Complete a count: post an `adjustment` movement for every counted lot
    /// whose observation differs from the snapshot, all in one transaction.
    ///
    /// If the aggregate variance value exceeds the configured threshold and
    /// `approve_variance` is false, the count moves to `pending_review`
    /// without posting anything; re-submitting with approval posts.
    pub async fn complete_count(
        &self,
        count_id: Uuid,
        approve_variance: bool,
        completed_by: Option<Uuid>,
    ) -> AppResult<CountDetail> {
        let mut attempt = 0;
        loop {
            match self.try_complete(count_id, approve_variance, completed_by).await {
                Ok((detail, adjusted)) => {
                    for lot_id in adjusted {
                        if let Err(e) = refresh_alert_for_lot(&self.db, lot_id).await {
                            tracing::warn!(
                                "Alert refresh for lot {} failed after count adjustment: {}",
                                lot_id,
                                e
                            );
                        }
                    }
                    return Ok(detail);
                }
                Err(e) if is_serialization_failure(&e) && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        "Count completion conflict for {} (attempt {}), retrying",
                        count_id,
                        attempt
                    );
                }
                Err(e) if is_serialization_failure(&e) => {
                    return Err(AppError::Conflict(format!(
                        "count {} completion kept conflicting after {} retries",
                        count_id, self.max_retries
                    )));
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_complete(
        &self,
        count_id: Uuid,
        approve_variance: bool,
        completed_by: Option<Uuid>,
    ) -> AppResult<(CountDetail, Vec<Uuid>)> {
        let mut tx = self.db.begin().await?;

        let count = sqlx::query_as::<_, CountRow>(&format!(
            "SELECT {COUNT_COLUMNS} FROM cycle_counts WHERE id = $1 FOR UPDATE"
        ))
        .bind(count_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Count".to_string()))?
        .into_count()?;

        if !count.status.is_open() {
            return Err(AppError::InvalidStateTransition(format!(
                "count {} is already {}",
                count_id, count.status
            )));
        }

        // Variance value priced at each lot's cost. Lock order matches every
        // other multi-lot path: ascending lot id.
        let lines = sqlx::query_as::<_, VarianceLine>(
            r#"
            SELECT i.lot_id, i.expected_quantity, i.counted_quantity, l.cost_price
            FROM cycle_count_items i
            JOIN stock_lots l ON l.id = i.lot_id
            WHERE i.count_id = $1
            ORDER BY i.lot_id
            "#,
        )
        .bind(count_id)
        .fetch_all(&mut *tx)
        .await?;

        let mut variance_count = 0i32;
        let mut variance_value = Decimal::ZERO;
        for line in &lines {
            if let Some(variance) = line.variance() {
                if variance != Decimal::ZERO {
                    variance_count += 1;
                    variance_value += variance * line.cost_price;
                }
            }
        }

        if !approve_variance && variance_value.abs() > self.variance_threshold {
            sqlx::query(
                r#"
                UPDATE cycle_counts
                SET status = 'pending_review', variance_count = $1, variance_value = $2
                WHERE id = $3
                "#,
            )
            .bind(variance_count)
            .bind(variance_value)
            .bind(count_id)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;

            return Err(AppError::VarianceApprovalRequired {
                variance_value,
                threshold: self.variance_threshold,
            });
        }

        let mut adjusted = Vec::new();
        for line in &lines {
            let Some(variance) = line.variance() else {
                continue;
            };
            if variance == Decimal::ZERO {
                continue;
            }
            let direction = if variance > Decimal::ZERO {
                MovementDirection::In
            } else {
                MovementDirection::Out
            };
            apply_movement_in_tx(
                &mut tx,
                MovementDraft {
                    lot_id: line.lot_id,
                    movement_type: MovementType::Adjustment,
                    direction,
                    quantity: variance.abs(),
                    reason: Some(format!("cycle_count:{}", count_id)),
                    reference: Some(MovementReference {
                        reference_type: ReferenceType::CycleCount,
                        reference_id: count_id,
                    }),
                    created_by: completed_by,
                    low_stock_threshold: None,
                },
            )
            .await?;
            adjusted.push(line.lot_id);
        }

        let count = sqlx::query_as::<_, CountRow>(&format!(
            r#"
            UPDATE cycle_counts
            SET status = 'completed', completed_at = NOW(),
                variance_count = $1, variance_value = $2
            WHERE id = $3
            RETURNING {COUNT_COLUMNS}
            "#,
        ))
        .bind(variance_count)
        .bind(variance_value)
        .bind(count_id)
        .fetch_one(&mut *tx)
        .await?
        .into_count()?;

        let items = self.load_items_in_tx(&mut tx, count_id).await?;
        tx.commit().await?;

        tracing::info!(
            "Cycle count {} completed: {} variances totaling {}",
            count_id,
            variance_count,
            variance_value
        );

        Ok((CountDetail { count, items }, adjusted))
    }

    /// Cancel an open count. No adjustments are posted.
    pub async fn cancel_count(&self, count_id: Uuid) -> AppResult<CycleCount> {
        let count = self.load_count(count_id).await?;
        if !count.status.is_open() {
            return Err(AppError::InvalidStateTransition(format!(
                "count {} is already {}",
                count_id, count.status
            )));
        }

        let row = sqlx::query_as::<_, CountRow>(&format!(
            "UPDATE cycle_counts SET status = 'cancelled' WHERE id = $1 RETURNING {COUNT_COLUMNS}"
        ))
        .bind(count_id)
        .fetch_one(&self.db)
        .await?;

        row.into_count()
    }

    /// Get a count with its lines
    pub async fn get_count(&self, count_id: Uuid) -> AppResult<CountDetail> {
        let count = self.load_count(count_id).await?;
        let items = sqlx::query_as::<_, ItemRow>(&format!(
            "SELECT {ITEM_COLUMNS} FROM cycle_count_items WHERE count_id = $1 ORDER BY lot_number"
        ))
        .bind(count_id)
        .fetch_all(&self.db)
        .await?;

        Ok(CountDetail {
            count,
            items: items.into_iter().map(ItemRow::into_item).collect(),
        })
    }

    /// List counts at a branch, newest first
    pub async fn list_counts(&self, branch_id: Uuid) -> AppResult<Vec<CycleCount>> {
        let rows = sqlx::query_as::<_, CountRow>(&format!(
            r#"
            SELECT {COUNT_COLUMNS}
            FROM cycle_counts
            WHERE branch_id = $1
            ORDER BY scheduled_date DESC, created_at DESC
            "#,
        ))
        .bind(branch_id)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(CountRow::into_count).collect()
    }

    async fn load_count(&self, count_id: Uuid) -> AppResult<CycleCount> {
        sqlx::query_as::<_, CountRow>(&format!(
            "SELECT {COUNT_COLUMNS} FROM cycle_counts WHERE id = $1"
        ))
        .bind(count_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Count".to_string()))?
        .into_count()
    }

    async fn load_items_in_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        count_id: Uuid,
    ) -> AppResult<Vec<CycleCountItem>> {
        let items = sqlx::query_as::<_, ItemRow>(&format!(
            "SELECT {ITEM_COLUMNS} FROM cycle_count_items WHERE count_id = $1 ORDER BY lot_number"
        ))
        .bind(count_id)
        .fetch_all(&mut **tx)
        .await?;

        Ok(items.into_iter().map(ItemRow::into_item).collect())
    }
}

#[derive(Debug, FromRow)]
struct VarianceLine {
    lot_id: Uuid,
    expected_quantity: Decimal,
    counted_quantity: Option<Decimal>,
    cost_price: Decimal,
}

impl VarianceLine {
    fn variance(&self) -> Option<Decimal> {
        self.counted_quantity
            .map(|counted| counted - self.expected_quantity)
    }
}
