//! Pure FEFO allocation planning
//!
//! The allocation engine picks which lots a requested quantity is consumed
//! from. Planning is separated from persistence so the selection rules can be
//! tested exhaustively; the backend wraps the plan in a transaction that
//! locks the candidate rows and applies one movement per planned line.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{fefo_cmp, LotStatus, StockLot};

/// One line of an allocation plan: take `quantity` from `lot_id`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedAllocation {
    pub lot_id: Uuid,
    pub quantity: Decimal,
}

/// Why a plan could not be produced
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("requested quantity must be positive, got {0}")]
    NonPositiveQuantity(Decimal),

    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock {
        requested: Decimal,
        available: Decimal,
    },
}

/// Whether a lot may be drawn from at all.
///
/// Quarantined lots are always skipped; expired lots only when the caller
/// explicitly allows consuming them. Expiry is judged against `expiry_date`
/// and `today`, never against the stored status, which goes stale on lots
/// that sit idle past their expiry between scans. Depleted lots fall out via
/// the available-quantity check.
pub fn eligible_for_allocation(lot: &StockLot, today: NaiveDate, allow_expired: bool) -> bool {
    if lot.available_quantity() <= Decimal::ZERO {
        return false;
    }
    if lot.status == LotStatus::Quarantine {
        return false;
    }
    let expired = lot.days_until_expiry(today).is_some_and(|days| days < 0);
    if expired {
        return allow_expired;
    }
    true
}

/// Plan a FEFO allocation of `requested` across `lots`.
///
/// Eligible lots are walked in FEFO order (soonest expiry first, no-expiry
/// lots last, ties broken by received date then lot number), consuming
/// `min(available, remaining)` from each. All-or-nothing: when the total
/// available falls short the plan fails and nothing is returned, so a caller
/// can never partially fulfill by accident. The same inputs always produce
/// the same plan.
pub fn plan_allocation(
    lots: &[StockLot],
    requested: Decimal,
    today: NaiveDate,
    allow_expired: bool,
) -> Result<Vec<PlannedAllocation>, PlanError> {
    if requested <= Decimal::ZERO {
        return Err(PlanError::NonPositiveQuantity(requested));
    }

    let mut eligible: Vec<&StockLot> = lots
        .iter()
        .filter(|lot| eligible_for_allocation(lot, today, allow_expired))
        .collect();
    eligible.sort_by(|a, b| fefo_cmp(a, b));

    let total_available: Decimal = eligible.iter().map(|lot| lot.available_quantity()).sum();
    if total_available < requested {
        return Err(PlanError::InsufficientStock {
            requested,
            available: total_available,
        });
    }

    let mut remaining = requested;
    let mut plan = Vec::new();
    for lot in eligible {
        if remaining <= Decimal::ZERO {
            break;
        }
        let take = lot.available_quantity().min(remaining);
        plan.push(PlannedAllocation {
            lot_id: lot.id,
            quantity: take,
        });
        remaining -= take;
    }

    debug_assert_eq!(remaining, Decimal::ZERO);
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LotStatus;
    use chrono::{NaiveDate, TimeZone, Utc};
    use proptest::prelude::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn lot(
        lot_number: &str,
        qty: i64,
        expiry: Option<NaiveDate>,
        status: LotStatus,
    ) -> StockLot {
        let received = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        StockLot {
            id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            branch_id: Uuid::new_v4(),
            lot_number: lot_number.to_string(),
            batch_code: None,
            product_name: None,
            initial_quantity: Decimal::from(qty.max(1)),
            current_quantity: Decimal::from(qty),
            reserved_quantity: Decimal::ZERO,
            manufacturing_date: None,
            expiry_date: expiry,
            best_before_date: None,
            received_date: received,
            status,
            supplier_id: None,
            purchase_order_id: None,
            cost_price: Decimal::ONE,
            total_cost: Decimal::from(qty),
            position_id: None,
            quarantine_reason: None,
            quarantined_by: None,
            quarantined_at: None,
            created_at: received,
            updated_at: received,
        }
    }

    #[test]
    fn consumes_soonest_expiry_first_and_spills_over() {
        // Lot A expires in 2 days with 10 on hand, lot B in 20 days with 10.
        let a = lot("A", 10, Some(date(2025, 6, 3)), LotStatus::Expiring);
        let b = lot("B", 10, Some(date(2025, 6, 21)), LotStatus::Available);
        let lots = vec![b.clone(), a.clone()];

        let plan = plan_allocation(&lots, Decimal::from(15), date(2025, 6, 1), false).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].lot_id, a.id);
        assert_eq!(plan[0].quantity, Decimal::from(10));
        assert_eq!(plan[1].lot_id, b.id);
        assert_eq!(plan[1].quantity, Decimal::from(5));
    }

    #[test]
    fn fails_whole_when_short() {
        let a = lot("A", 10, Some(date(2025, 6, 3)), LotStatus::Available);
        let b = lot("B", 10, Some(date(2025, 6, 21)), LotStatus::Available);
        let err = plan_allocation(&[a, b], Decimal::from(25), date(2025, 6, 1), false).unwrap_err();
        assert_eq!(
            err,
            PlanError::InsufficientStock {
                requested: Decimal::from(25),
                available: Decimal::from(20),
            }
        );
    }

    #[test]
    fn quarantined_lots_are_skipped_even_with_stock() {
        let q = lot("Q", 5, None, LotStatus::Quarantine);
        let a = lot("A", 5, None, LotStatus::Available);
        let plan =
            plan_allocation(&[q.clone(), a.clone()], Decimal::from(5), date(2025, 6, 1), false)
                .unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].lot_id, a.id);
    }

    #[test]
    fn expired_lots_need_explicit_opt_in() {
        let today = date(2025, 6, 1);
        let e = lot("E", 5, Some(date(2020, 1, 1)), LotStatus::Expired);
        assert!(matches!(
            plan_allocation(std::slice::from_ref(&e), Decimal::from(3), today, false),
            Err(PlanError::InsufficientStock { .. })
        ));
        let plan =
            plan_allocation(std::slice::from_ref(&e), Decimal::from(3), today, true).unwrap();
        assert_eq!(plan[0].lot_id, e.id);
    }

    #[test]
    fn stale_status_cannot_expose_expired_stock() {
        // A lot that sat idle past its expiry still carries the status it was
        // last derived with. Eligibility must judge the date, not the label,
        // or FEFO would sell this lot first.
        let today = date(2025, 6, 1);
        let stale = lot("S", 10, Some(date(2025, 5, 20)), LotStatus::Available);
        assert!(!eligible_for_allocation(&stale, today, false));
        assert!(eligible_for_allocation(&stale, today, true));
        assert!(matches!(
            plan_allocation(std::slice::from_ref(&stale), Decimal::from(5), today, false),
            Err(PlanError::InsufficientStock { .. })
        ));
    }

    #[test]
    fn reserved_quantity_is_not_allocatable() {
        let mut a = lot("A", 10, None, LotStatus::Available);
        a.reserved_quantity = Decimal::from(7);
        assert!(matches!(
            plan_allocation(std::slice::from_ref(&a), Decimal::from(4), date(2025, 6, 1), false),
            Err(PlanError::InsufficientStock { .. })
        ));
    }

    #[test]
    fn rejects_non_positive_requests() {
        let a = lot("A", 10, None, LotStatus::Available);
        assert!(matches!(
            plan_allocation(std::slice::from_ref(&a), Decimal::ZERO, date(2025, 6, 1), false),
            Err(PlanError::NonPositiveQuantity(_))
        ));
    }

    prop_compose! {
        fn arb_lot()(
            qty in 0i64..500,
            expiry_offset in proptest::option::of(-30i64..365),
            number in "[A-Z]{1}-[0-9]{4}",
            received_day in 1u32..28,
        ) -> StockLot {
            let expiry = expiry_offset
                .map(|off| date(2025, 6, 15) + chrono::Duration::days(off));
            let mut l = lot(&number, qty, expiry, LotStatus::Available);
            l.received_date = Utc.with_ymd_and_hms(2025, 1, received_day, 0, 0, 0).unwrap();
            l
        }
    }

    proptest! {
        /// A successful plan delivers exactly the requested quantity
        #[test]
        fn plan_sums_to_request(
            lots in proptest::collection::vec(arb_lot(), 0..8),
            requested in 1i64..600,
        ) {
            let requested = Decimal::from(requested);
            if let Ok(plan) = plan_allocation(&lots, requested, date(2025, 6, 15), true) {
                let total: Decimal = plan.iter().map(|p| p.quantity).sum();
                prop_assert_eq!(total, requested);
                for line in &plan {
                    prop_assert!(line.quantity > Decimal::ZERO);
                }
            }
        }

        /// No planned line exceeds what its lot has available
        #[test]
        fn plan_never_overdraws_a_lot(
            lots in proptest::collection::vec(arb_lot(), 0..8),
            requested in 1i64..600,
        ) {
            let requested = Decimal::from(requested);
            if let Ok(plan) = plan_allocation(&lots, requested, date(2025, 6, 15), true) {
                for line in &plan {
                    let lot = lots.iter().find(|l| l.id == line.lot_id).unwrap();
                    prop_assert!(line.quantity <= lot.available_quantity());
                }
            }
        }

        /// Planning is deterministic: same inputs, same plan
        #[test]
        fn plan_is_deterministic(
            lots in proptest::collection::vec(arb_lot(), 0..8),
            requested in 1i64..600,
        ) {
            let requested = Decimal::from(requested);
            let first = plan_allocation(&lots, requested, date(2025, 6, 15), false);
            let second = plan_allocation(&lots, requested, date(2025, 6, 15), false);
            prop_assert_eq!(first, second);
        }

        /// A failed plan names the true available total
        #[test]
        fn insufficient_reports_available(
            lots in proptest::collection::vec(arb_lot(), 0..8),
            requested in 1i64..600,
        ) {
            let requested = Decimal::from(requested);
            let total: Decimal = lots
                .iter()
                .filter(|l| eligible_for_allocation(l, date(2025, 6, 15), true))
                .map(|l| l.available_quantity())
                .sum();
            match plan_allocation(&lots, requested, date(2025, 6, 15), true) {
                Ok(_) => prop_assert!(total >= requested),
                Err(PlanError::InsufficientStock { available, .. }) => {
                    prop_assert_eq!(available, total);
                    prop_assert!(total < requested);
                }
                Err(PlanError::NonPositiveQuantity(_)) => unreachable!(),
            }
        }
    }
}
