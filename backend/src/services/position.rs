//! Storage position catalog

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use shared::models::StoragePosition;
use shared::validation::validate_positive_quantity;

use crate::error::{AppError, AppResult};

const POSITION_COLUMNS: &str =
    "id, branch_id, zone, rack, shelf, bin, capacity, is_active, created_at, updated_at";

#[derive(Debug, FromRow)]
struct PositionRow {
    id: Uuid,
    branch_id: Uuid,
    zone: String,
    rack: Option<String>,
    shelf: Option<String>,
    bin: Option<String>,
    capacity: Option<Decimal>,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl PositionRow {
    fn into_position(self) -> StoragePosition {
        StoragePosition {
            id: self.id,
            branch_id: self.branch_id,
            zone: self.zone,
            rack: self.rack,
            shelf: self.shelf,
            bin: self.bin,
            capacity: self.capacity,
            is_active: self.is_active,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Input for creating a position
#[derive(Debug, Deserialize)]
pub struct CreatePositionInput {
    pub branch_id: Uuid,
    pub zone: String,
    pub rack: Option<String>,
    pub shelf: Option<String>,
    pub bin: Option<String>,
    pub capacity: Option<Decimal>,
}

/// Mutable position fields
#[derive(Debug, Deserialize)]
pub struct UpdatePositionInput {
    pub capacity: Option<Decimal>,
    pub is_active: Option<bool>,
}

/// Position catalog service
#[derive(Clone)]
pub struct PositionService {
    db: PgPool,
}

impl PositionService {
    /// Create a new PositionService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Create a position
    pub async fn create_position(&self, input: CreatePositionInput) -> AppResult<StoragePosition> {
        if input.zone.trim().is_empty() {
            return Err(AppError::Validation {
                field: "zone".to_string(),
                message: "Zone cannot be empty".to_string(),
            });
        }
        if let Some(capacity) = input.capacity {
            validate_positive_quantity(capacity).map_err(|msg| AppError::Validation {
                field: "capacity".to_string(),
                message: msg.to_string(),
            })?;
        }

        let row = sqlx::query_as::<_, PositionRow>(&format!(
            r#"
            INSERT INTO storage_positions (branch_id, zone, rack, shelf, bin, capacity)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {POSITION_COLUMNS}
            "#,
        ))
        .bind(input.branch_id)
        .bind(input.zone.trim())
        .bind(&input.rack)
        .bind(&input.shelf)
        .bind(&input.bin)
        .bind(input.capacity)
        .fetch_one(&self.db)
        .await?;

        Ok(row.into_position())
    }

    /// Get a position by ID
    pub async fn get_position(&self, position_id: Uuid) -> AppResult<StoragePosition> {
        let row = sqlx::query_as::<_, PositionRow>(&format!(
            "SELECT {POSITION_COLUMNS} FROM storage_positions WHERE id = $1"
        ))
        .bind(position_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Position".to_string()))?;

        Ok(row.into_position())
    }

    /// List positions at a branch, ordered by label parts
    pub async fn list_positions(
        &self,
        branch_id: Uuid,
        include_inactive: bool,
    ) -> AppResult<Vec<StoragePosition>> {
        let rows = sqlx::query_as::<_, PositionRow>(&format!(
            r#"
            SELECT {POSITION_COLUMNS}
            FROM storage_positions
            WHERE branch_id = $1 AND ($2 OR is_active)
            ORDER BY zone, rack NULLS FIRST, shelf NULLS FIRST, bin NULLS FIRST
            "#,
        ))
        .bind(branch_id)
        .bind(include_inactive)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(PositionRow::into_position).collect())
    }

    /// Update a position's capacity or active flag. Identity fields are
    /// immutable; create a new position instead.
    pub async fn update_position(
        &self,
        position_id: Uuid,
        input: UpdatePositionInput,
    ) -> AppResult<StoragePosition> {
        if let Some(capacity) = input.capacity {
            validate_positive_quantity(capacity).map_err(|msg| AppError::Validation {
                field: "capacity".to_string(),
                message: msg.to_string(),
            })?;
        }

        let row = sqlx::query_as::<_, PositionRow>(&format!(
            r#"
            UPDATE storage_positions
            SET capacity = COALESCE($1, capacity),
                is_active = COALESCE($2, is_active)
            WHERE id = $3
            RETURNING {POSITION_COLUMNS}
            "#,
        ))
        .bind(input.capacity)
        .bind(input.is_active)
        .bind(position_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Position".to_string()))?;

        Ok(row.into_position())
    }

    /// Retire a position. Lots already assigned keep their assignment; new
    /// assignments are rejected.
    pub async fn deactivate_position(&self, position_id: Uuid) -> AppResult<StoragePosition> {
        let row = sqlx::query_as::<_, PositionRow>(&format!(
            r#"
            UPDATE storage_positions
            SET is_active = FALSE
            WHERE id = $1
            RETURNING {POSITION_COLUMNS}
            "#,
        ))
        .bind(position_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Position".to_string()))?;

        Ok(row.into_position())
    }
}
