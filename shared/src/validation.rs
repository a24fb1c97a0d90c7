//! Validation helpers for ledger inputs

use rust_decimal::Decimal;

/// Validate that a movement or request quantity is strictly positive
pub fn validate_positive_quantity(quantity: Decimal) -> Result<(), &'static str> {
    if quantity <= Decimal::ZERO {
        return Err("Quantity must be positive");
    }
    Ok(())
}

/// Validate that a quantity is not negative (counted quantities may be zero)
pub fn validate_non_negative_quantity(quantity: Decimal) -> Result<(), &'static str> {
    if quantity < Decimal::ZERO {
        return Err("Quantity cannot be negative");
    }
    Ok(())
}

/// Validate a lot number: 1-64 visible characters, no surrounding whitespace
pub fn validate_lot_number(lot_number: &str) -> Result<(), &'static str> {
    if lot_number.is_empty() {
        return Err("Lot number cannot be empty");
    }
    if lot_number.len() > 64 {
        return Err("Lot number must be at most 64 characters");
    }
    if lot_number.trim() != lot_number {
        return Err("Lot number cannot have leading or trailing whitespace");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantities() {
        assert!(validate_positive_quantity(Decimal::ONE).is_ok());
        assert!(validate_positive_quantity(Decimal::ZERO).is_err());
        assert!(validate_positive_quantity(Decimal::from(-1)).is_err());
        assert!(validate_non_negative_quantity(Decimal::ZERO).is_ok());
        assert!(validate_non_negative_quantity(Decimal::from(-1)).is_err());
    }

    #[test]
    fn lot_numbers() {
        assert!(validate_lot_number("LOT-2025-0001").is_ok());
        assert!(validate_lot_number("").is_err());
        assert!(validate_lot_number(" LOT").is_err());
        assert!(validate_lot_number(&"X".repeat(65)).is_err());
    }
}
