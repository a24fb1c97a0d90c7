//! FEFO allocation engine
//!
//! Selects lots for a requested quantity in first-expired-first-out order and
//! commits one movement per selected lot, all-or-nothing. Candidate rows are
//! locked in `id` order to keep concurrent allocations deadlock-free;
//! serialization conflicts are retried a bounded number of times before being
//! surfaced to the caller as retryable.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use shared::allocation::{plan_allocation, PlanError};
use shared::models::{
    LotStockMovement, MovementDirection, MovementReference, MovementType, StockLot,
};
use shared::validation::validate_positive_quantity;

use crate::error::{AppError, AppResult};
use crate::services::ledger::{
    apply_movement_in_tx, is_serialization_failure, MovementDraft,
};
use crate::services::lot::{LotRow, LOT_COLUMNS};
use crate::services::status::refresh_alert_for_lot;

/// Allocation service for multi-lot stock consumption
#[derive(Clone)]
pub struct AllocationService {
    db: PgPool,
    max_retries: u32,
}

/// Input for a FEFO allocation
#[derive(Debug, Clone, Deserialize)]
pub struct AllocateInput {
    pub product_id: Uuid,
    pub branch_id: Uuid,
    pub quantity: Decimal,
    /// Consumption type; defaults to `sale`
    pub movement_type: Option<MovementType>,
    /// Permit drawing from expired lots
    #[serde(default)]
    pub allow_expired: bool,
    pub reason: Option<String>,
    pub reference: Option<MovementReference>,
    pub created_by: Option<Uuid>,
}

impl AllocationService {
    /// Create a new AllocationService instance
    pub fn new(db: PgPool, max_retries: u32) -> Self {
        Self { db, max_retries }
    }

    /// Allocate `quantity` of a product at a branch across lots in FEFO
    /// order. Either every constituent movement commits or none does.
    pub async fn allocate(&self, input: AllocateInput) -> AppResult<Vec<LotStockMovement>> {
        validate_positive_quantity(input.quantity)
            .map_err(|msg| AppError::InvalidQuantity(msg.to_string()))?;

        let movement_type = input.movement_type.unwrap_or(MovementType::Sale);
        if movement_type.implied_direction() == Some(MovementDirection::In) {
            return Err(AppError::Validation {
                field: "movement_type".to_string(),
                message: format!("{} is not a consumption movement type", movement_type),
            });
        }

        let mut attempt = 0;
        loop {
            match self.try_allocate(&input, movement_type).await {
                Ok(movements) => {
                    for lot_id in movements.iter().map(|m| m.lot_id) {
                        if let Err(e) = refresh_alert_for_lot(&self.db, lot_id).await {
                            tracing::warn!(
                                "Alert refresh for lot {} failed after allocation: {}",
                                lot_id,
                                e
                            );
                        }
                    }
                    return Ok(movements);
                }
                Err(e) if is_serialization_failure(&e) && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        "Allocation conflict for product {} (attempt {}), retrying",
                        input.product_id,
                        attempt
                    );
                }
                Err(e) if is_serialization_failure(&e) => {
                    return Err(AppError::Conflict(format!(
                        "allocation for product {} kept conflicting after {} retries",
                        input.product_id, self.max_retries
                    )));
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_allocate(
        &self,
        input: &AllocateInput,
        movement_type: MovementType,
    ) -> AppResult<Vec<LotStockMovement>> {
        let today = Utc::now().date_naive();
        let mut tx = self.db.begin().await?;

        // Lock candidates in id order; FEFO ordering happens in memory over
        // the locked snapshot, so the quantities the plan sees cannot change
        // before commit. Expiry is filtered on the date column rather than
        // the stored status, which lags behind on lots idle past expiry.
        let cutoff = (!input.allow_expired).then_some(today);
        let rows = sqlx::query_as::<_, LotRow>(&format!(
            r#"
            SELECT {LOT_COLUMNS}
            FROM stock_lots
            WHERE product_id = $1 AND branch_id = $2
              AND current_quantity - reserved_quantity > 0
              AND status <> 'quarantine'
              AND ($3::date IS NULL OR expiry_date IS NULL OR expiry_date >= $3)
            ORDER BY id
            FOR UPDATE
            "#,
        ))
        .bind(input.product_id)
        .bind(input.branch_id)
        .bind(cutoff)
        .fetch_all(&mut *tx)
        .await?;

        let lots: Vec<StockLot> = rows
            .into_iter()
            .map(LotRow::into_lot)
            .collect::<AppResult<_>>()?;

        let plan = plan_allocation(&lots, input.quantity, today, input.allow_expired).map_err(|e| {
            match e {
                PlanError::NonPositiveQuantity(q) => {
                    AppError::InvalidQuantity(format!("requested quantity {} is not positive", q))
                }
                PlanError::InsufficientStock {
                    requested,
                    available,
                } => AppError::InsufficientStock {
                    requested,
                    available,
                },
            }
        })?;

        let mut movements = Vec::with_capacity(plan.len());
        for line in plan {
            let movement = apply_movement_in_tx(
                &mut tx,
                MovementDraft {
                    lot_id: line.lot_id,
                    movement_type,
                    direction: MovementDirection::Out,
                    quantity: line.quantity,
                    reason: input.reason.clone(),
                    reference: input.reference.clone(),
                    created_by: input.created_by,
                    low_stock_threshold: None,
                },
            )
            .await?;
            movements.push(movement);
        }

        tx.commit().await?;
        Ok(movements)
    }

    /// Earmark quantity on a lot without consuming it
    pub async fn reserve(&self, lot_id: Uuid, quantity: Decimal) -> AppResult<StockLot> {
        validate_positive_quantity(quantity)
            .map_err(|msg| AppError::InvalidQuantity(msg.to_string()))?;

        let mut tx = self.db.begin().await?;
        let lot = sqlx::query_as::<_, LotRow>(&format!(
            "SELECT {LOT_COLUMNS} FROM stock_lots WHERE id = $1 FOR UPDATE"
        ))
        .bind(lot_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Lot".to_string()))?
        .into_lot()?;

        let new_reserved = lot.reserved_quantity + quantity;
        if new_reserved > lot.current_quantity {
            return Err(AppError::InsufficientStock {
                requested: quantity,
                available: lot.available_quantity(),
            });
        }

        let row = sqlx::query_as::<_, LotRow>(&format!(
            "UPDATE stock_lots SET reserved_quantity = $1 WHERE id = $2 RETURNING {LOT_COLUMNS}"
        ))
        .bind(new_reserved)
        .bind(lot_id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        row.into_lot()
    }

    /// Release previously earmarked quantity
    pub async fn release_reservation(&self, lot_id: Uuid, quantity: Decimal) -> AppResult<StockLot> {
        validate_positive_quantity(quantity)
            .map_err(|msg| AppError::InvalidQuantity(msg.to_string()))?;

        let mut tx = self.db.begin().await?;
        let lot = sqlx::query_as::<_, LotRow>(&format!(
            "SELECT {LOT_COLUMNS} FROM stock_lots WHERE id = $1 FOR UPDATE"
        ))
        .bind(lot_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Lot".to_string()))?
        .into_lot()?;

        if quantity > lot.reserved_quantity {
            return Err(AppError::InvalidQuantity(format!(
                "cannot release {} with only {} reserved",
                quantity, lot.reserved_quantity
            )));
        }

        let row = sqlx::query_as::<_, LotRow>(&format!(
            "UPDATE stock_lots SET reserved_quantity = $1 WHERE id = $2 RETURNING {LOT_COLUMNS}"
        ))
        .bind(lot.reserved_quantity - quantity)
        .bind(lot_id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        row.into_lot()
    }
}
