//! Status and alert engine
//!
//! Derives lot lifecycle status, manages the quarantine hold, and maintains
//! expiry alerts. Alerts are upserted keyed by lot, so re-running a scan with
//! no intervening movements leaves the alert set unchanged. The engine never
//! mutates quantities.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use shared::models::{
    derive_status, AlertLevel, ExpiryAlert, LotStatus, StockLot, EXPIRING_WINDOW_DAYS,
};

use crate::error::{AppError, AppResult};
use crate::services::lot::{LotRow, LOT_COLUMNS};

pub(crate) const ALERT_COLUMNS: &str = "id, lot_id, product_id, branch_id, lot_number, product_name, \
     current_quantity, expiry_date, days_until_expiry, alert_level, acknowledged, \
     acknowledged_at, acknowledged_by, action_taken, created_at, updated_at";

/// Horizon beyond which no alert is raised, in days
const ALERT_HORIZON_DAYS: i64 = 30;

/// Database row for an expiry alert
#[derive(Debug, FromRow)]
pub(crate) struct AlertRow {
    id: Uuid,
    lot_id: Uuid,
    product_id: Uuid,
    branch_id: Uuid,
    lot_number: String,
    product_name: Option<String>,
    current_quantity: Decimal,
    expiry_date: NaiveDate,
    days_until_expiry: i64,
    alert_level: String,
    acknowledged: bool,
    acknowledged_at: Option<DateTime<Utc>>,
    acknowledged_by: Option<Uuid>,
    action_taken: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl AlertRow {
    pub(crate) fn into_alert(self) -> AppResult<ExpiryAlert> {
        let alert_level = AlertLevel::parse(&self.alert_level).ok_or_else(|| {
            AppError::Internal(format!(
                "unknown alert level in database: {}",
                self.alert_level
            ))
        })?;
        Ok(ExpiryAlert {
            id: self.id,
            lot_id: self.lot_id,
            product_id: self.product_id,
            branch_id: self.branch_id,
            lot_number: self.lot_number,
            product_name: self.product_name,
            current_quantity: self.current_quantity,
            expiry_date: self.expiry_date,
            days_until_expiry: self.days_until_expiry,
            alert_level,
            acknowledged: self.acknowledged,
            acknowledged_at: self.acknowledged_at,
            acknowledged_by: self.acknowledged_by,
            action_taken: self.action_taken,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// A would-be alert computed on demand without touching storage
#[derive(Debug, Clone, Serialize)]
pub struct ComputedAlert {
    pub lot_id: Uuid,
    pub product_id: Uuid,
    pub branch_id: Uuid,
    pub lot_number: String,
    pub product_name: Option<String>,
    pub current_quantity: Decimal,
    pub expiry_date: NaiveDate,
    pub days_until_expiry: i64,
    pub alert_level: AlertLevel,
}

/// Status and alert service
#[derive(Clone)]
pub struct StatusService {
    db: PgPool,
}

impl StatusService {
    /// Create a new StatusService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Place a lot in quarantine. Sticky until released; overrides every
    /// derived status except depleted. No quantity effect.
    pub async fn quarantine(
        &self,
        lot_id: Uuid,
        reason: &str,
        staff_id: Uuid,
    ) -> AppResult<StockLot> {
        let mut tx = self.db.begin().await?;
        let lot = sqlx::query_as::<_, LotRow>(&format!(
            "SELECT {LOT_COLUMNS} FROM stock_lots WHERE id = $1 FOR UPDATE"
        ))
        .bind(lot_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Lot".to_string()))?
        .into_lot()?;

        if lot.status == LotStatus::Depleted {
            return Err(AppError::InvalidStateTransition(
                "cannot quarantine a depleted lot".to_string(),
            ));
        }

        let row = sqlx::query_as::<_, LotRow>(&format!(
            r#"
            UPDATE stock_lots
            SET status = 'quarantine', quarantine_reason = $1,
                quarantined_by = $2, quarantined_at = NOW()
            WHERE id = $3
            RETURNING {LOT_COLUMNS}
            "#,
        ))
        .bind(reason)
        .bind(staff_id)
        .bind(lot_id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        row.into_lot()
    }

    /// Release a lot from quarantine back to its derived status
    pub async fn release(&self, lot_id: Uuid) -> AppResult<StockLot> {
        let mut tx = self.db.begin().await?;
        let lot = sqlx::query_as::<_, LotRow>(&format!(
            "SELECT {LOT_COLUMNS} FROM stock_lots WHERE id = $1 FOR UPDATE"
        ))
        .bind(lot_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Lot".to_string()))?
        .into_lot()?;

        if lot.status != LotStatus::Quarantine {
            return Err(AppError::InvalidStateTransition(format!(
                "lot is {}, not in quarantine",
                lot.status
            )));
        }

        let today = Utc::now().date_naive();
        let status = derive_status(lot.current_quantity, false, lot.expiry_date, today, None);

        let row = sqlx::query_as::<_, LotRow>(&format!(
            r#"
            UPDATE stock_lots
            SET status = $1, quarantine_reason = NULL,
                quarantined_by = NULL, quarantined_at = NULL
            WHERE id = $2
            RETURNING {LOT_COLUMNS}
            "#,
        ))
        .bind(status.as_str())
        .bind(lot_id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        row.into_lot()
    }

    /// Acknowledge an alert. Bookkeeping only: the lot's quantity and status
    /// are untouched.
    pub async fn acknowledge(
        &self,
        alert_id: Uuid,
        staff_id: Uuid,
        action_taken: Option<String>,
    ) -> AppResult<ExpiryAlert> {
        let row = sqlx::query_as::<_, AlertRow>(&format!(
            r#"
            UPDATE expiry_alerts
            SET acknowledged = TRUE, acknowledged_at = NOW(),
                acknowledged_by = $1, action_taken = $2
            WHERE id = $3
            RETURNING {ALERT_COLUMNS}
            "#,
        ))
        .bind(staff_id)
        .bind(&action_taken)
        .bind(alert_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Alert".to_string()))?;

        row.into_alert()
    }

    /// List alerts, optionally for one branch, optionally hiding acknowledged
    /// ones
    pub async fn list_alerts(
        &self,
        branch_id: Option<Uuid>,
        include_acknowledged: bool,
    ) -> AppResult<Vec<ExpiryAlert>> {
        let rows = sqlx::query_as::<_, AlertRow>(&format!(
            r#"
            SELECT {ALERT_COLUMNS}
            FROM expiry_alerts
            WHERE ($1::uuid IS NULL OR branch_id = $1)
              AND ($2 OR NOT acknowledged)
            ORDER BY days_until_expiry ASC, lot_number ASC
            "#,
        ))
        .bind(branch_id)
        .bind(include_acknowledged)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(AlertRow::into_alert).collect()
    }

    /// Re-derive stored statuses from today's date. Lots with no movements
    /// since their expiry crossed a boundary would otherwise keep the status
    /// they were last written with. Quarantine is sticky and `low` depends on
    /// a caller-supplied threshold, so both are preserved as-is.
    pub async fn refresh_statuses(&self, branch_id: Option<Uuid>) -> AppResult<u64> {
        let today = Utc::now().date_naive();
        let result = sqlx::query(
            r#"
            UPDATE stock_lots
            SET status = CASE
                WHEN current_quantity <= 0 THEN 'depleted'
                WHEN expiry_date IS NOT NULL AND expiry_date < $2 THEN 'expired'
                WHEN expiry_date IS NOT NULL AND expiry_date <= $2 + $3 THEN 'expiring'
                WHEN status = 'low' THEN 'low'
                ELSE 'available'
            END
            WHERE status <> 'quarantine'
              AND ($1::uuid IS NULL OR branch_id = $1)
              AND status <> CASE
                WHEN current_quantity <= 0 THEN 'depleted'
                WHEN expiry_date IS NOT NULL AND expiry_date < $2 THEN 'expired'
                WHEN expiry_date IS NOT NULL AND expiry_date <= $2 + $3 THEN 'expiring'
                WHEN status = 'low' THEN 'low'
                ELSE 'available'
            END
            "#,
        )
        .bind(branch_id)
        .bind(today)
        .bind(EXPIRING_WINDOW_DAYS as i32)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected())
    }

    /// Refresh the whole alert set: upsert an alert for every lot inside the
    /// alert horizon, drop alerts for lots that left it. Idempotent; running
    /// it twice with no intervening movements produces the same set.
    /// Stored statuses are re-derived first so the scan and the lot listings
    /// agree about which lots are expired.
    pub async fn scan_and_upsert_alerts(
        &self,
        branch_id: Option<Uuid>,
    ) -> AppResult<Vec<ExpiryAlert>> {
        let refreshed = self.refresh_statuses(branch_id).await?;
        if refreshed > 0 {
            tracing::info!("Status scan re-derived {} lot statuses", refreshed);
        }

        let today = Utc::now().date_naive();
        let horizon = today + Duration::days(ALERT_HORIZON_DAYS);

        // Drop alerts for lots that no longer warrant one
        sqlx::query(
            r#"
            DELETE FROM expiry_alerts a
            USING stock_lots l
            WHERE a.lot_id = l.id
              AND ($1::uuid IS NULL OR a.branch_id = $1)
              AND (l.current_quantity <= 0 OR l.expiry_date IS NULL OR l.expiry_date > $2)
            "#,
        )
        .bind(branch_id)
        .bind(horizon)
        .execute(&self.db)
        .await?;

        let candidates = sqlx::query_as::<_, LotRow>(&format!(
            r#"
            SELECT {LOT_COLUMNS}
            FROM stock_lots
            WHERE ($1::uuid IS NULL OR branch_id = $1)
              AND current_quantity > 0
              AND expiry_date IS NOT NULL
              AND expiry_date <= $2
            ORDER BY expiry_date ASC, lot_number ASC
            "#,
        ))
        .bind(branch_id)
        .bind(horizon)
        .fetch_all(&self.db)
        .await?;

        let mut alerts = Vec::with_capacity(candidates.len());
        for row in candidates {
            let lot = row.into_lot()?;
            if let Some(alert) = upsert_alert(&self.db, &lot, today).await? {
                alerts.push(alert);
            }
        }

        Ok(alerts)
    }

    /// Compute the alert set as of a date without writing anything.
    /// Pull-based counterpart to the scan, for dashboards and what-if checks.
    pub async fn compute_alerts(
        &self,
        branch_id: Option<Uuid>,
        as_of: NaiveDate,
    ) -> AppResult<Vec<ComputedAlert>> {
        let horizon = as_of + Duration::days(ALERT_HORIZON_DAYS);
        let rows = sqlx::query_as::<_, LotRow>(&format!(
            r#"
            SELECT {LOT_COLUMNS}
            FROM stock_lots
            WHERE ($1::uuid IS NULL OR branch_id = $1)
              AND current_quantity > 0
              AND expiry_date IS NOT NULL
              AND expiry_date <= $2
            ORDER BY expiry_date ASC, lot_number ASC
            "#,
        ))
        .bind(branch_id)
        .bind(horizon)
        .fetch_all(&self.db)
        .await?;

        let mut computed = Vec::with_capacity(rows.len());
        for row in rows {
            let lot = row.into_lot()?;
            let Some(days) = lot.days_until_expiry(as_of) else {
                continue;
            };
            let Some(level) = AlertLevel::for_days_until_expiry(days) else {
                continue;
            };
            computed.push(ComputedAlert {
                lot_id: lot.id,
                product_id: lot.product_id,
                branch_id: lot.branch_id,
                lot_number: lot.lot_number,
                product_name: lot.product_name,
                current_quantity: lot.current_quantity,
                expiry_date: lot.expiry_date.unwrap_or(as_of),
                days_until_expiry: days,
                alert_level: level,
            });
        }

        Ok(computed)
    }
}

/// Refresh the alert for one lot after a movement. Removes the alert when the
/// lot is depleted or outside the alert horizon, upserts it otherwise.
pub(crate) async fn refresh_alert_for_lot(
    db: &PgPool,
    lot_id: Uuid,
) -> AppResult<Option<ExpiryAlert>> {
    let lot = sqlx::query_as::<_, LotRow>(&format!(
        "SELECT {LOT_COLUMNS} FROM stock_lots WHERE id = $1"
    ))
    .bind(lot_id)
    .fetch_optional(db)
    .await?
    .ok_or_else(|| AppError::NotFound("Lot".to_string()))?
    .into_lot()?;

    let today = Utc::now().date_naive();
    upsert_alert(db, &lot, today).await
}

/// Upsert or clear the alert for one lot, keyed by lot id
async fn upsert_alert(
    db: &PgPool,
    lot: &StockLot,
    today: NaiveDate,
) -> AppResult<Option<ExpiryAlert>> {
    let level = lot
        .days_until_expiry(today)
        .filter(|_| lot.current_quantity > Decimal::ZERO)
        .and_then(AlertLevel::for_days_until_expiry);

    let (Some(days), Some(level), Some(expiry)) = (
        lot.days_until_expiry(today),
        level,
        lot.expiry_date,
    ) else {
        sqlx::query("DELETE FROM expiry_alerts WHERE lot_id = $1")
            .bind(lot.id)
            .execute(db)
            .await?;
        return Ok(None);
    };

    let row = sqlx::query_as::<_, AlertRow>(&format!(
        r#"
        INSERT INTO expiry_alerts (
            lot_id, product_id, branch_id, lot_number, product_name,
            current_quantity, expiry_date, days_until_expiry, alert_level
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (lot_id) DO UPDATE SET
            current_quantity = EXCLUDED.current_quantity,
            expiry_date = EXCLUDED.expiry_date,
            days_until_expiry = EXCLUDED.days_until_expiry,
            alert_level = EXCLUDED.alert_level,
            product_name = EXCLUDED.product_name
        RETURNING {ALERT_COLUMNS}
        "#,
    ))
    .bind(lot.id)
    .bind(lot.product_id)
    .bind(lot.branch_id)
    .bind(&lot.lot_number)
    .bind(&lot.product_name)
    .bind(lot.current_quantity)
    .bind(expiry)
    .bind(days)
    .bind(level.as_str())
    .fetch_one(db)
    .await?;

    row.into_alert().map(Some)
}
