//! Movement ledger: the single place lot quantities are mutated
//!
//! Every quantity change is a lot-update + movement-append pair committed in
//! one transaction, with the lot row locked for the duration so concurrent
//! read-modify-write cycles cannot interleave. Movements chain per lot:
//! `previous_qty` of each record equals `new_qty` of the one before it.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use shared::models::{
    derive_status, LotStatus, LotStockMovement, MovementDirection, MovementReference, MovementType,
    ReferenceType,
};
use shared::validation::validate_positive_quantity;

use crate::error::{AppError, AppResult};
use crate::services::lot::{LotRow, LOT_COLUMNS};
use crate::services::status::refresh_alert_for_lot;

pub(crate) const MOVEMENT_COLUMNS: &str = "id, lot_id, product_id, branch_id, movement_type, direction, \
     quantity, previous_qty, new_qty, reason, reference_type, reference_id, \
     created_by, created_at";

/// Database row for a movement
#[derive(Debug, FromRow)]
pub(crate) struct MovementRow {
    id: Uuid,
    lot_id: Uuid,
    product_id: Uuid,
    branch_id: Uuid,
    movement_type: String,
    direction: String,
    quantity: Decimal,
    previous_qty: Decimal,
    new_qty: Decimal,
    reason: Option<String>,
    reference_type: Option<String>,
    reference_id: Option<Uuid>,
    created_by: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl MovementRow {
    pub(crate) fn into_movement(self) -> AppResult<LotStockMovement> {
        let movement_type = MovementType::parse(&self.movement_type).ok_or_else(|| {
            AppError::Internal(format!(
                "unknown movement type in database: {}",
                self.movement_type
            ))
        })?;
        let direction = MovementDirection::parse(&self.direction).ok_or_else(|| {
            AppError::Internal(format!(
                "unknown movement direction in database: {}",
                self.direction
            ))
        })?;
        let reference = match (self.reference_type.as_deref(), self.reference_id) {
            (Some(rt), Some(id)) => Some(MovementReference {
                reference_type: ReferenceType::parse(rt).ok_or_else(|| {
                    AppError::Internal(format!("unknown reference type in database: {}", rt))
                })?,
                reference_id: id,
            }),
            _ => None,
        };
        Ok(LotStockMovement {
            id: self.id,
            lot_id: self.lot_id,
            product_id: self.product_id,
            branch_id: self.branch_id,
            movement_type,
            direction,
            quantity: self.quantity,
            previous_qty: self.previous_qty,
            new_qty: self.new_qty,
            reason: self.reason,
            reference,
            created_by: self.created_by,
            created_at: self.created_at,
        })
    }
}

/// Input for applying a movement
#[derive(Debug, Clone, Deserialize)]
pub struct ApplyMovementInput {
    pub lot_id: Uuid,
    pub movement_type: MovementType,
    /// Required for `adjustment` and `production`; otherwise implied by type
    pub direction: Option<MovementDirection>,
    pub quantity: Decimal,
    pub reason: Option<String>,
    pub reference: Option<MovementReference>,
    pub created_by: Option<Uuid>,
    /// External low-stock threshold used when re-deriving the lot's status
    pub low_stock_threshold: Option<Decimal>,
}

/// Internal draft passed to the in-transaction apply path
pub(crate) struct MovementDraft {
    pub lot_id: Uuid,
    pub movement_type: MovementType,
    pub direction: MovementDirection,
    pub quantity: Decimal,
    pub reason: Option<String>,
    pub reference: Option<MovementReference>,
    pub created_by: Option<Uuid>,
    pub low_stock_threshold: Option<Decimal>,
}

/// Result of auditing one lot's movement chain
#[derive(Debug, Serialize)]
pub struct ChainReport {
    pub lot_id: Uuid,
    pub movement_count: usize,
    pub current_quantity: Decimal,
    pub consistent: bool,
    pub issues: Vec<String>,
}

/// Ledger service for stock movements
#[derive(Clone)]
pub struct LedgerService {
    db: PgPool,
}

impl LedgerService {
    /// Create a new LedgerService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Apply a single movement to a lot.
    ///
    /// Rejects non-positive quantities, movements that would drive the lot
    /// negative, and inbound movements that would exceed the quantity
    /// originally received. On success the lot's status is re-derived and the
    /// lot's expiry alert refreshed (alert failures are logged, not surfaced).
    pub async fn apply_movement(&self, input: ApplyMovementInput) -> AppResult<LotStockMovement> {
        let direction = resolve_direction(input.movement_type, input.direction)?;

        let mut tx = self.db.begin().await?;
        let movement = apply_movement_in_tx(
            &mut tx,
            MovementDraft {
                lot_id: input.lot_id,
                movement_type: input.movement_type,
                direction,
                quantity: input.quantity,
                reason: input.reason,
                reference: input.reference,
                created_by: input.created_by,
                low_stock_threshold: input.low_stock_threshold,
            },
        )
        .await?;
        tx.commit().await?;

        if let Err(e) = refresh_alert_for_lot(&self.db, movement.lot_id).await {
            tracing::warn!(
                "Alert refresh for lot {} failed after movement, next scan will correct: {}",
                movement.lot_id,
                e
            );
        }

        Ok(movement)
    }

    /// Movement history for a lot in chain order. Ordered by insert sequence
    /// rather than timestamp: `created_at` is the transaction start time and
    /// can invert under concurrent commits.
    pub async fn list_movements(&self, lot_id: Uuid) -> AppResult<Vec<LotStockMovement>> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM stock_lots WHERE id = $1)",
        )
        .bind(lot_id)
        .fetch_one(&self.db)
        .await?;
        if !exists {
            return Err(AppError::NotFound("Lot".to_string()));
        }

        let rows = sqlx::query_as::<_, MovementRow>(&format!(
            r#"
            SELECT {MOVEMENT_COLUMNS}
            FROM lot_stock_movements
            WHERE lot_id = $1
            ORDER BY seq ASC
            "#,
        ))
        .bind(lot_id)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(MovementRow::into_movement).collect()
    }

    /// Movements at a branch, newest first, optionally since a timestamp
    pub async fn list_movements_for_branch(
        &self,
        branch_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> AppResult<Vec<LotStockMovement>> {
        let rows = sqlx::query_as::<_, MovementRow>(&format!(
            r#"
            SELECT {MOVEMENT_COLUMNS}
            FROM lot_stock_movements
            WHERE branch_id = $1 AND ($2::timestamptz IS NULL OR created_at > $2)
            ORDER BY seq DESC
            "#,
        ))
        .bind(branch_id)
        .bind(since)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(MovementRow::into_movement).collect()
    }

    /// Audit a lot's movement chain: linkage, arithmetic, and conservation
    /// against the lot's current quantity
    pub async fn verify_chain(&self, lot_id: Uuid) -> AppResult<ChainReport> {
        let lot = sqlx::query_as::<_, LotRow>(&format!(
            "SELECT {LOT_COLUMNS} FROM stock_lots WHERE id = $1"
        ))
        .bind(lot_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Lot".to_string()))?
        .into_lot()?;

        let movements = self.list_movements(lot_id).await?;
        let issues = audit_chain(&movements, lot.current_quantity);

        Ok(ChainReport {
            lot_id,
            movement_count: movements.len(),
            current_quantity: lot.current_quantity,
            consistent: issues.is_empty(),
            issues,
        })
    }
}

/// Walk a chain-ordered movement list and report every linkage, arithmetic,
/// and conservation violation. Order is the caller's responsibility; the
/// walk itself never consults `created_at`.
pub(crate) fn audit_chain(
    movements: &[LotStockMovement],
    current_quantity: Decimal,
) -> Vec<String> {
    let mut issues = Vec::new();

    let mut expected_previous = Decimal::ZERO;
    let mut balance = Decimal::ZERO;
    for movement in movements {
        if movement.previous_qty != expected_previous {
            issues.push(format!(
                "movement {} breaks the chain: previous_qty {} != expected {}",
                movement.id, movement.previous_qty, expected_previous
            ));
        }
        let computed = movement
            .direction
            .apply(movement.previous_qty, movement.quantity);
        if computed != movement.new_qty {
            issues.push(format!(
                "movement {} arithmetic mismatch: {} {} {} != {}",
                movement.id,
                movement.previous_qty,
                movement.direction.as_str(),
                movement.quantity,
                movement.new_qty
            ));
        }
        balance = movement.direction.apply(balance, movement.quantity);
        expected_previous = movement.new_qty;
    }

    if balance != current_quantity {
        issues.push(format!(
            "conservation mismatch: movements sum to {} but lot holds {}",
            balance, current_quantity
        ));
    }

    issues
}

/// Resolve the effective direction for a movement type, validating any
/// caller-supplied direction against the implied one
pub(crate) fn resolve_direction(
    movement_type: MovementType,
    supplied: Option<MovementDirection>,
) -> AppResult<MovementDirection> {
    match (movement_type.implied_direction(), supplied) {
        (Some(implied), None) => Ok(implied),
        (Some(implied), Some(given)) if implied == given => Ok(implied),
        (Some(implied), Some(_)) => Err(AppError::Validation {
            field: "direction".to_string(),
            message: format!(
                "{} movements are always {}",
                movement_type,
                implied.as_str()
            ),
        }),
        (None, Some(given)) => Ok(given),
        (None, None) => Err(AppError::Validation {
            field: "direction".to_string(),
            message: format!("{} movements require an explicit direction", movement_type),
        }),
    }
}

/// Apply a movement inside an existing transaction.
///
/// Locks the lot row, validates the resulting quantity, updates the lot with
/// its re-derived status, and appends the movement record. Used directly by
/// `apply_movement` and by the multi-lot allocation and count-completion
/// paths, which batch several of these into one transaction.
pub(crate) async fn apply_movement_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    draft: MovementDraft,
) -> AppResult<LotStockMovement> {
    validate_positive_quantity(draft.quantity)
        .map_err(|msg| AppError::InvalidQuantity(msg.to_string()))?;

    let lot = sqlx::query_as::<_, LotRow>(&format!(
        "SELECT {LOT_COLUMNS} FROM stock_lots WHERE id = $1 FOR UPDATE"
    ))
    .bind(draft.lot_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| AppError::NotFound("Lot".to_string()))?
    .into_lot()?;

    let new_qty = draft.direction.apply(lot.current_quantity, draft.quantity);
    if new_qty < Decimal::ZERO {
        return Err(AppError::InsufficientStock {
            requested: draft.quantity,
            available: lot.current_quantity,
        });
    }
    if new_qty > lot.initial_quantity {
        return Err(AppError::InvalidQuantity(format!(
            "movement would raise quantity to {} above the {} originally received",
            new_qty, lot.initial_quantity
        )));
    }

    // A consumption that digs into earmarked stock releases the reservation
    let new_reserved = lot.reserved_quantity.min(new_qty);

    let quarantined = lot.status == LotStatus::Quarantine;
    let today = Utc::now().date_naive();
    let status = derive_status(
        new_qty,
        quarantined,
        lot.expiry_date,
        today,
        draft.low_stock_threshold,
    );

    sqlx::query(
        r#"
        UPDATE stock_lots
        SET current_quantity = $1, reserved_quantity = $2, status = $3
        WHERE id = $4
        "#,
    )
    .bind(new_qty)
    .bind(new_reserved)
    .bind(status.as_str())
    .bind(lot.id)
    .execute(&mut **tx)
    .await?;

    let row = sqlx::query_as::<_, MovementRow>(&format!(
        r#"
        INSERT INTO lot_stock_movements (
            lot_id, product_id, branch_id, movement_type, direction,
            quantity, previous_qty, new_qty, reason, reference_type,
            reference_id, created_by
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        RETURNING {MOVEMENT_COLUMNS}
        "#,
    ))
    .bind(lot.id)
    .bind(lot.product_id)
    .bind(lot.branch_id)
    .bind(draft.movement_type.as_str())
    .bind(draft.direction.as_str())
    .bind(draft.quantity)
    .bind(lot.current_quantity)
    .bind(new_qty)
    .bind(&draft.reason)
    .bind(draft.reference.as_ref().map(|r| r.reference_type.as_str()))
    .bind(draft.reference.as_ref().map(|r| r.reference_id))
    .bind(draft.created_by)
    .fetch_one(&mut **tx)
    .await?;

    row.into_movement()
}

/// Postgres serialization failure or deadlock, safe to retry
pub(crate) fn is_serialization_failure(e: &AppError) -> bool {
    if let AppError::DatabaseError(sqlx::Error::Database(db_err)) = e {
        matches!(db_err.code().as_deref(), Some("40001") | Some("40P01"))
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn movement(
        previous: i64,
        quantity: i64,
        direction: MovementDirection,
        minute: u32,
    ) -> LotStockMovement {
        let previous = Decimal::from(previous);
        let quantity = Decimal::from(quantity);
        LotStockMovement {
            id: Uuid::new_v4(),
            lot_id: Uuid::nil(),
            product_id: Uuid::nil(),
            branch_id: Uuid::nil(),
            movement_type: MovementType::Adjustment,
            direction,
            quantity,
            previous_qty: previous,
            new_qty: direction.apply(previous, quantity),
            reason: None,
            reference: None,
            created_by: None,
            created_at: Utc.with_ymd_and_hms(2025, 6, 1, 9, minute, 0).unwrap(),
        }
    }

    #[test]
    fn audit_accepts_chain_regardless_of_timestamps() {
        // Two concurrent writers can commit in the opposite order to their
        // transaction start times, so a correctly linked chain may carry
        // non-monotonic created_at values. The audit must not care.
        let chain = vec![
            movement(0, 10, MovementDirection::In, 30),
            movement(10, 4, MovementDirection::Out, 20),
            movement(6, 2, MovementDirection::Out, 25),
        ];
        assert!(audit_chain(&chain, Decimal::from(4)).is_empty());
    }

    #[test]
    fn audit_flags_broken_linkage_and_conservation() {
        let chain = vec![
            movement(0, 10, MovementDirection::In, 0),
            // previous_qty skips the 10 the first movement landed on
            movement(7, 2, MovementDirection::Out, 1),
        ];
        let issues = audit_chain(&chain, Decimal::from(9));
        assert_eq!(issues.len(), 2);
        assert!(issues[0].contains("breaks the chain"));
        assert!(issues[1].contains("conservation mismatch"));
    }

    #[test]
    fn audit_flags_arithmetic_mismatch() {
        let mut bad = movement(0, 10, MovementDirection::In, 0);
        bad.new_qty = Decimal::from(11);
        let issues = audit_chain(&[bad], Decimal::from(10));
        assert!(issues.iter().any(|i| i.contains("arithmetic mismatch")));
    }

    #[test]
    fn direction_resolution() {
        assert_eq!(
            resolve_direction(MovementType::Sale, None).unwrap(),
            MovementDirection::Out
        );
        assert_eq!(
            resolve_direction(MovementType::Receipt, Some(MovementDirection::In)).unwrap(),
            MovementDirection::In
        );
        assert!(resolve_direction(MovementType::Receipt, Some(MovementDirection::Out)).is_err());
        assert_eq!(
            resolve_direction(MovementType::Adjustment, Some(MovementDirection::Out)).unwrap(),
            MovementDirection::Out
        );
        assert!(resolve_direction(MovementType::Adjustment, None).is_err());
        assert_eq!(
            resolve_direction(MovementType::Production, Some(MovementDirection::In)).unwrap(),
            MovementDirection::In
        );
    }
}
