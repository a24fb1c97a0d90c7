//! Movement ledger records and signed-quantity arithmetic

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One atomic quantity change against exactly one lot.
///
/// Append-only: once written a movement is never updated or deleted, and for
/// any lot the records chain: each movement's `previous_qty` equals the
/// prior committed movement's `new_qty`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LotStockMovement {
    pub id: Uuid,
    pub lot_id: Uuid,
    pub product_id: Uuid,
    pub branch_id: Uuid,
    pub movement_type: MovementType,
    pub direction: MovementDirection,
    /// Magnitude of the change, always positive
    pub quantity: Decimal,
    pub previous_qty: Decimal,
    pub new_qty: Decimal,
    pub reason: Option<String>,
    pub reference: Option<MovementReference>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Kinds of stock movements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    Receipt,
    Sale,
    TransferIn,
    TransferOut,
    Adjustment,
    Waste,
    Return,
    Production,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Receipt => "receipt",
            MovementType::Sale => "sale",
            MovementType::TransferIn => "transfer_in",
            MovementType::TransferOut => "transfer_out",
            MovementType::Adjustment => "adjustment",
            MovementType::Waste => "waste",
            MovementType::Return => "return",
            MovementType::Production => "production",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "receipt" => Some(MovementType::Receipt),
            "sale" => Some(MovementType::Sale),
            "transfer_in" => Some(MovementType::TransferIn),
            "transfer_out" => Some(MovementType::TransferOut),
            "adjustment" => Some(MovementType::Adjustment),
            "waste" => Some(MovementType::Waste),
            "return" => Some(MovementType::Return),
            "production" => Some(MovementType::Production),
            _ => None,
        }
    }

    /// Direction implied by the type. `Adjustment` and `Production` go either
    /// way, so the caller has to say which.
    pub fn implied_direction(&self) -> Option<MovementDirection> {
        match self {
            MovementType::Receipt | MovementType::TransferIn | MovementType::Return => {
                Some(MovementDirection::In)
            }
            MovementType::Sale | MovementType::TransferOut | MovementType::Waste => {
                Some(MovementDirection::Out)
            }
            MovementType::Adjustment | MovementType::Production => None,
        }
    }
}

impl std::fmt::Display for MovementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementDirection {
    In,
    Out,
}

impl MovementDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementDirection::In => "in",
            MovementDirection::Out => "out",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in" => Some(MovementDirection::In),
            "out" => Some(MovementDirection::Out),
            _ => None,
        }
    }

    /// Apply a movement of this direction to a quantity
    pub fn apply(&self, previous: Decimal, quantity: Decimal) -> Decimal {
        match self {
            MovementDirection::In => previous + quantity,
            MovementDirection::Out => previous - quantity,
        }
    }
}

/// Typed reference linking a movement to the record that caused it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementReference {
    pub reference_type: ReferenceType,
    pub reference_id: Uuid,
}

/// What a movement reference points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceType {
    Order,
    PurchaseOrder,
    Transfer,
    CycleCount,
}

impl ReferenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceType::Order => "order",
            ReferenceType::PurchaseOrder => "purchase_order",
            ReferenceType::Transfer => "transfer",
            ReferenceType::CycleCount => "cycle_count",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "order" => Some(ReferenceType::Order),
            "purchase_order" => Some(ReferenceType::PurchaseOrder),
            "transfer" => Some(ReferenceType::Transfer),
            "cycle_count" => Some(ReferenceType::CycleCount),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn implied_directions() {
        assert_eq!(
            MovementType::Receipt.implied_direction(),
            Some(MovementDirection::In)
        );
        assert_eq!(
            MovementType::Return.implied_direction(),
            Some(MovementDirection::In)
        );
        assert_eq!(
            MovementType::Sale.implied_direction(),
            Some(MovementDirection::Out)
        );
        assert_eq!(
            MovementType::Waste.implied_direction(),
            Some(MovementDirection::Out)
        );
        assert_eq!(MovementType::Adjustment.implied_direction(), None);
        assert_eq!(MovementType::Production.implied_direction(), None);
    }

    #[test]
    fn apply_moves_in_the_right_direction() {
        let prev = Decimal::from(10);
        assert_eq!(
            MovementDirection::In.apply(prev, Decimal::from(3)),
            Decimal::from(13)
        );
        assert_eq!(
            MovementDirection::Out.apply(prev, Decimal::from(3)),
            Decimal::from(7)
        );
    }

    #[test]
    fn movement_type_round_trips_through_strings() {
        for mt in [
            MovementType::Receipt,
            MovementType::Sale,
            MovementType::TransferIn,
            MovementType::TransferOut,
            MovementType::Adjustment,
            MovementType::Waste,
            MovementType::Return,
            MovementType::Production,
        ] {
            assert_eq!(MovementType::parse(mt.as_str()), Some(mt));
        }
    }
}
