//! Lot store: creation, lookup, FEFO-ordered listing, and position metadata

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use shared::models::{
    derive_status, LotStatus, MovementDirection, MovementType, StockLot,
};
use shared::validation::{validate_lot_number, validate_non_negative_quantity};

use crate::error::{AppError, AppResult};

/// Columns selected whenever a full lot row is needed
pub(crate) const LOT_COLUMNS: &str = "id, product_id, branch_id, lot_number, batch_code, \
     product_name, initial_quantity, current_quantity, reserved_quantity, \
     manufacturing_date, expiry_date, best_before_date, received_date, status, \
     supplier_id, purchase_order_id, cost_price, total_cost, position_id, \
     quarantine_reason, quarantined_by, quarantined_at, created_at, updated_at";

/// Database row for a stock lot; converted into the shared domain model
#[derive(Debug, FromRow)]
pub(crate) struct LotRow {
    id: Uuid,
    product_id: Uuid,
    branch_id: Uuid,
    lot_number: String,
    batch_code: Option<String>,
    product_name: Option<String>,
    initial_quantity: Decimal,
    current_quantity: Decimal,
    reserved_quantity: Decimal,
    manufacturing_date: Option<NaiveDate>,
    expiry_date: Option<NaiveDate>,
    best_before_date: Option<NaiveDate>,
    received_date: DateTime<Utc>,
    status: String,
    supplier_id: Option<Uuid>,
    purchase_order_id: Option<Uuid>,
    cost_price: Decimal,
    total_cost: Decimal,
    position_id: Option<Uuid>,
    quarantine_reason: Option<String>,
    quarantined_by: Option<Uuid>,
    quarantined_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl LotRow {
    pub(crate) fn into_lot(self) -> AppResult<StockLot> {
        let status = LotStatus::parse(&self.status).ok_or_else(|| {
            AppError::Internal(format!("unknown lot status in database: {}", self.status))
        })?;
        Ok(StockLot {
            id: self.id,
            product_id: self.product_id,
            branch_id: self.branch_id,
            lot_number: self.lot_number,
            batch_code: self.batch_code,
            product_name: self.product_name,
            initial_quantity: self.initial_quantity,
            current_quantity: self.current_quantity,
            reserved_quantity: self.reserved_quantity,
            manufacturing_date: self.manufacturing_date,
            expiry_date: self.expiry_date,
            best_before_date: self.best_before_date,
            received_date: self.received_date,
            status,
            supplier_id: self.supplier_id,
            purchase_order_id: self.purchase_order_id,
            cost_price: self.cost_price,
            total_cost: self.total_cost,
            position_id: self.position_id,
            quarantine_reason: self.quarantine_reason,
            quarantined_by: self.quarantined_by,
            quarantined_at: self.quarantined_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Lot service for the lot store
#[derive(Clone)]
pub struct LotService {
    db: PgPool,
}

/// Input for creating a lot on receipt
#[derive(Debug, Deserialize)]
pub struct CreateLotInput {
    pub product_id: Uuid,
    pub branch_id: Uuid,
    pub lot_number: String,
    pub batch_code: Option<String>,
    pub product_name: Option<String>,
    pub initial_quantity: Decimal,
    pub manufacturing_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub best_before_date: Option<NaiveDate>,
    pub supplier_id: Option<Uuid>,
    pub purchase_order_id: Option<Uuid>,
    pub cost_price: Option<Decimal>,
    pub position_id: Option<Uuid>,
    pub created_by: Option<Uuid>,
}

impl LotService {
    /// Create a new LotService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Create a lot from a confirmed receipt.
    ///
    /// Writes the lot and its opening `receipt` movement in one transaction,
    /// so the per-lot movement chain is complete from the first record.
    pub async fn create_lot(&self, input: CreateLotInput) -> AppResult<StockLot> {
        validate_lot_number(&input.lot_number).map_err(|msg| AppError::Validation {
            field: "lot_number".to_string(),
            message: msg.to_string(),
        })?;
        validate_non_negative_quantity(input.initial_quantity)
            .map_err(|msg| AppError::InvalidQuantity(msg.to_string()))?;

        let cost_price = input.cost_price.unwrap_or(Decimal::ZERO);
        if cost_price < Decimal::ZERO {
            return Err(AppError::Validation {
                field: "cost_price".to_string(),
                message: "Cost price cannot be negative".to_string(),
            });
        }
        let total_cost = cost_price * input.initial_quantity;

        let today = Utc::now().date_naive();
        let status = derive_status(input.initial_quantity, false, input.expiry_date, today, None);

        let mut tx = self.db.begin().await?;

        let row = sqlx::query_as::<_, LotRow>(&format!(
            r#"
            INSERT INTO stock_lots (
                product_id, branch_id, lot_number, batch_code, product_name,
                initial_quantity, current_quantity, expiry_date, manufacturing_date,
                best_before_date, status, supplier_id, purchase_order_id,
                cost_price, total_cost, position_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING {LOT_COLUMNS}
            "#,
        ))
        .bind(input.product_id)
        .bind(input.branch_id)
        .bind(&input.lot_number)
        .bind(&input.batch_code)
        .bind(&input.product_name)
        .bind(input.initial_quantity)
        .bind(input.expiry_date)
        .bind(input.manufacturing_date)
        .bind(input.best_before_date)
        .bind(status.as_str())
        .bind(input.supplier_id)
        .bind(input.purchase_order_id)
        .bind(cost_price)
        .bind(total_cost)
        .bind(input.position_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_duplicate_lot(e, &input.lot_number))?;

        let lot = row.into_lot()?;

        // Opening movement: chain starts at zero. A zero-quantity receipt has
        // no quantity change and therefore no movement.
        if input.initial_quantity > Decimal::ZERO {
            sqlx::query(
                r#"
                INSERT INTO lot_stock_movements (
                    lot_id, product_id, branch_id, movement_type, direction,
                    quantity, previous_qty, new_qty, reason, reference_type,
                    reference_id, created_by
                )
                VALUES ($1, $2, $3, $4, $5, $6, 0, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(lot.id)
            .bind(lot.product_id)
            .bind(lot.branch_id)
            .bind(MovementType::Receipt.as_str())
            .bind(MovementDirection::In.as_str())
            .bind(input.initial_quantity)
            .bind("lot_received")
            .bind(input.purchase_order_id.map(|_| "purchase_order"))
            .bind(input.purchase_order_id)
            .bind(input.created_by)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(lot)
    }

    /// Get a lot by ID
    pub async fn get_lot(&self, lot_id: Uuid) -> AppResult<StockLot> {
        let row = sqlx::query_as::<_, LotRow>(&format!(
            "SELECT {LOT_COLUMNS} FROM stock_lots WHERE id = $1"
        ))
        .bind(lot_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Lot".to_string()))?;

        row.into_lot()
    }

    /// List lots for a product at a branch in FEFO order
    pub async fn list_lots_for_product(
        &self,
        product_id: Uuid,
        branch_id: Uuid,
        include_depleted: bool,
    ) -> AppResult<Vec<StockLot>> {
        let depleted_filter = if include_depleted {
            ""
        } else {
            "AND status <> 'depleted'"
        };
        let rows = sqlx::query_as::<_, LotRow>(&format!(
            r#"
            SELECT {LOT_COLUMNS}
            FROM stock_lots
            WHERE product_id = $1 AND branch_id = $2 {depleted_filter}
            ORDER BY expiry_date ASC NULLS LAST, received_date ASC, lot_number ASC
            "#,
        ))
        .bind(product_id)
        .bind(branch_id)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(LotRow::into_lot).collect()
    }

    /// List lots at a branch, optionally filtered by status
    pub async fn list_lots_for_branch(
        &self,
        branch_id: Uuid,
        status: Option<LotStatus>,
    ) -> AppResult<Vec<StockLot>> {
        let rows = match status {
            Some(status) => {
                sqlx::query_as::<_, LotRow>(&format!(
                    r#"
                    SELECT {LOT_COLUMNS}
                    FROM stock_lots
                    WHERE branch_id = $1 AND status = $2
                    ORDER BY expiry_date ASC NULLS LAST, received_date ASC, lot_number ASC
                    "#,
                ))
                .bind(branch_id)
                .bind(status.as_str())
                .fetch_all(&self.db)
                .await?
            }
            None => {
                sqlx::query_as::<_, LotRow>(&format!(
                    r#"
                    SELECT {LOT_COLUMNS}
                    FROM stock_lots
                    WHERE branch_id = $1
                    ORDER BY expiry_date ASC NULLS LAST, received_date ASC, lot_number ASC
                    "#,
                ))
                .bind(branch_id)
                .fetch_all(&self.db)
                .await?
            }
        };

        rows.into_iter().map(LotRow::into_lot).collect()
    }

    /// Move a lot to a storage position (or clear it). Pure metadata update,
    /// no quantity effect.
    pub async fn set_position(
        &self,
        lot_id: Uuid,
        position_id: Option<Uuid>,
    ) -> AppResult<StockLot> {
        if let Some(position_id) = position_id {
            let valid = sqlx::query_scalar::<_, bool>(
                r#"
                SELECT EXISTS(
                    SELECT 1 FROM storage_positions p
                    JOIN stock_lots l ON l.branch_id = p.branch_id
                    WHERE p.id = $1 AND l.id = $2 AND p.is_active
                )
                "#,
            )
            .bind(position_id)
            .bind(lot_id)
            .fetch_one(&self.db)
            .await?;

            if !valid {
                return Err(AppError::Validation {
                    field: "position_id".to_string(),
                    message: "Position does not exist, is inactive, or belongs to another branch"
                        .to_string(),
                });
            }
        }

        let row = sqlx::query_as::<_, LotRow>(&format!(
            "UPDATE stock_lots SET position_id = $1 WHERE id = $2 RETURNING {LOT_COLUMNS}"
        ))
        .bind(position_id)
        .bind(lot_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Lot".to_string()))?;

        row.into_lot()
    }
}

/// Map the unique-constraint violation on (product, branch, lot_number) to
/// the domain error
fn map_duplicate_lot(e: sqlx::Error, lot_number: &str) -> AppError {
    if let sqlx::Error::Database(ref db_err) = e {
        if db_err.constraint() == Some("uq_stock_lots_lot_number") {
            return AppError::DuplicateLotNumber(lot_number.to_string());
        }
    }
    AppError::DatabaseError(e)
}
