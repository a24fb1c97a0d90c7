//! Shared domain types and logic for the Stock Ledger
//!
//! This crate contains the lot, movement, alert, and count models together
//! with the pure pieces of the ledger: status derivation, expiry alert
//! levels, FEFO ordering, and allocation planning. Nothing in here touches
//! the database, which keeps all of the invariant-bearing logic unit- and
//! property-testable.

pub mod allocation;
pub mod models;
pub mod validation;

pub use allocation::*;
pub use models::*;
pub use validation::*;
