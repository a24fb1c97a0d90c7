//! Ledger invariant tests
//!
//! Property-based and scenario tests for:
//! - Conservation: current quantity always equals the movement chain sum
//! - Non-negativity: no plan or movement sequence drives a lot negative
//! - FEFO determinism: identical lot sets always allocate identically
//! - All-or-nothing allocation
//! - Alert level boundary exactness
//! - Idempotent alert computation and acknowledgment purity

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use proptest::prelude::*;
use rust_decimal::Decimal;
use uuid::Uuid;

use shared::allocation::{eligible_for_allocation, plan_allocation, PlanError};
use shared::models::{
    derive_status, AlertLevel, CycleCountItem, LotStatus, MovementDirection, StockLot,
};

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
}

/// Build a lot fixture with the given stock level and expiry offset from the
/// fixed test date
fn lot(lot_number: &str, quantity: i64, expiry_in_days: Option<i64>) -> StockLot {
    let now = Utc.with_ymd_and_hms(2025, 5, 1, 8, 0, 0).unwrap();
    let quantity = Decimal::from(quantity);
    let expiry_date = expiry_in_days.map(|d| today() + Duration::days(d));
    let status = derive_status(quantity, false, expiry_date, today(), None);
    StockLot {
        id: Uuid::new_v4(),
        product_id: Uuid::nil(),
        branch_id: Uuid::nil(),
        lot_number: lot_number.to_string(),
        batch_code: None,
        product_name: None,
        initial_quantity: quantity,
        current_quantity: quantity,
        reserved_quantity: Decimal::ZERO,
        manufacturing_date: None,
        expiry_date,
        best_before_date: None,
        received_date: now,
        status,
        supplier_id: None,
        purchase_order_id: None,
        cost_price: Decimal::ZERO,
        total_cost: Decimal::ZERO,
        position_id: None,
        quarantine_reason: None,
        quarantined_by: None,
        quarantined_at: None,
        created_at: now,
        updated_at: now,
    }
}

// ============================================================================
// Property Test Strategies
// ============================================================================

/// Positive lot quantities
fn quantity_strategy() -> impl Strategy<Value = i64> {
    1i64..=500
}

/// Expiry offsets spanning expired through long-dated, plus no expiry
fn expiry_strategy() -> impl Strategy<Value = Option<i64>> {
    prop_oneof![
        3 => (-10i64..=60).prop_map(Some),
        1 => Just(None),
    ]
}

/// A small shelf of lots for one product
fn shelf_strategy() -> impl Strategy<Value = Vec<StockLot>> {
    prop::collection::vec((quantity_strategy(), expiry_strategy()), 1..8).prop_map(|specs| {
        specs
            .into_iter()
            .enumerate()
            .map(|(i, (qty, expiry))| lot(&format!("L-{:03}", i), qty, expiry))
            .collect()
    })
}

/// Signed movement quantities for a random walk over one lot
fn walk_strategy() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(-50i64..=50, 0..20)
}

// ============================================================================
// Property-Based Tests
// ============================================================================

proptest! {
    /// Conservation: replaying a movement chain built with
    /// `MovementDirection::apply` always lands on initial + Σin − Σout.
    #[test]
    fn movement_chain_conserves_quantity(
        initial in quantity_strategy(),
        deltas in walk_strategy(),
    ) {
        let initial = Decimal::from(initial);
        let mut current = initial;
        let mut inbound = Decimal::ZERO;
        let mut outbound = Decimal::ZERO;

        for delta in deltas {
            if delta == 0 {
                continue;
            }
            let quantity = Decimal::from(delta.abs());
            let direction = if delta > 0 {
                MovementDirection::In
            } else {
                MovementDirection::Out
            };
            let next = direction.apply(current, quantity);
            // Mirror the ledger's gates: reject negative and over-initial
            if next < Decimal::ZERO || next > initial {
                continue;
            }
            match direction {
                MovementDirection::In => inbound += quantity,
                MovementDirection::Out => outbound += quantity,
            }
            current = next;
        }

        prop_assert_eq!(current, initial + inbound - outbound);
        prop_assert!(current >= Decimal::ZERO);
    }

    /// Non-negativity: an allocation plan never draws more from a lot than
    /// its available quantity.
    #[test]
    fn plan_never_overdraws(shelf in shelf_strategy(), requested in 1i64..=2000) {
        let requested = Decimal::from(requested);
        if let Ok(plan) = plan_allocation(&shelf, requested, today(), false) {
            for line in &plan {
                let source = shelf.iter().find(|l| l.id == line.lot_id).unwrap();
                prop_assert!(line.quantity > Decimal::ZERO);
                prop_assert!(line.quantity <= source.available_quantity());
            }
            let total: Decimal = plan.iter().map(|l| l.quantity).sum();
            prop_assert_eq!(total, requested);
        }
    }

    /// FEFO determinism: the same shelf always yields the same plan.
    #[test]
    fn allocation_is_deterministic(shelf in shelf_strategy(), requested in 1i64..=2000) {
        let requested = Decimal::from(requested);
        let first = plan_allocation(&shelf, requested, today(), false);
        let second = plan_allocation(&shelf, requested, today(), false);
        prop_assert_eq!(first, second);
    }

    /// All-or-nothing: insufficient stock produces no plan lines at all, and
    /// reports the true available total.
    #[test]
    fn insufficient_stock_plans_nothing(shelf in shelf_strategy()) {
        let available: Decimal = shelf
            .iter()
            .filter(|l| eligible_for_allocation(l, today(), false))
            .map(|l| l.available_quantity())
            .sum();
        let requested = available + Decimal::ONE;
        match plan_allocation(&shelf, requested, today(), false) {
            Err(PlanError::InsufficientStock { requested: r, available: a }) => {
                prop_assert_eq!(r, requested);
                prop_assert_eq!(a, available);
            }
            other => prop_assert!(false, "expected InsufficientStock, got {:?}", other),
        }
    }

    /// Alert computation is a pure function of expiry distance: recomputing
    /// never drifts, so repeated scans produce identical alert sets.
    #[test]
    fn alert_level_is_stable(days in -30i64..=60) {
        let first = AlertLevel::for_days_until_expiry(days);
        let second = AlertLevel::for_days_until_expiry(days);
        prop_assert_eq!(first, second);
        if days > 30 {
            prop_assert_eq!(first, None);
        } else {
            prop_assert!(first.is_some());
        }
    }

    /// Status derivation ignores acknowledgment-style bookkeeping fields
    /// entirely; only quantity, quarantine, and expiry matter.
    #[test]
    fn status_depends_only_on_stock_and_expiry(
        quantity in 0i64..=100,
        expiry in expiry_strategy(),
        quarantined in any::<bool>(),
    ) {
        let quantity = Decimal::from(quantity);
        let base = derive_status(quantity, quarantined, expiry.map(|d| today() + Duration::days(d)), today(), None);
        // Re-deriving with identical inputs is stable
        let again = derive_status(quantity, quarantined, expiry.map(|d| today() + Duration::days(d)), today(), None);
        prop_assert_eq!(base, again);
        if quantity == Decimal::ZERO {
            prop_assert_eq!(base, LotStatus::Depleted);
        } else if quarantined {
            prop_assert_eq!(base, LotStatus::Quarantine);
        }
    }
}

// ============================================================================
// Unit Tests: Alert Boundaries
// ============================================================================

mod alert_boundary_tests {
    use super::*;

    #[test]
    fn exactly_seven_days_is_critical() {
        assert_eq!(
            AlertLevel::for_days_until_expiry(7),
            Some(AlertLevel::Critical)
        );
    }

    #[test]
    fn exactly_eight_days_is_warning() {
        assert_eq!(
            AlertLevel::for_days_until_expiry(8),
            Some(AlertLevel::Warning)
        );
    }

    #[test]
    fn zero_or_negative_is_expired() {
        assert_eq!(
            AlertLevel::for_days_until_expiry(0),
            Some(AlertLevel::Expired)
        );
        assert_eq!(
            AlertLevel::for_days_until_expiry(-5),
            Some(AlertLevel::Expired)
        );
    }

    #[test]
    fn urgent_band_is_one_through_three() {
        for days in 1..=3 {
            assert_eq!(
                AlertLevel::for_days_until_expiry(days),
                Some(AlertLevel::Urgent),
                "day {}",
                days
            );
        }
        assert_eq!(
            AlertLevel::for_days_until_expiry(4),
            Some(AlertLevel::Critical)
        );
    }

    #[test]
    fn beyond_thirty_days_no_alert() {
        assert_eq!(AlertLevel::for_days_until_expiry(30), Some(AlertLevel::Warning));
        assert_eq!(AlertLevel::for_days_until_expiry(31), None);
    }
}

// ============================================================================
// Unit Tests: Allocation and Count Scenarios
// ============================================================================

mod scenario_tests {
    use super::*;

    /// Lot A (10, expires in 2 days) + Lot B (10, expires in 20 days),
    /// allocate 15: 10 from A then 5 from B.
    #[test]
    fn allocation_spills_to_later_expiry() {
        let a = lot("A", 10, Some(2));
        let b = lot("B", 10, Some(20));
        let shelf = vec![b.clone(), a.clone()];

        let plan = plan_allocation(&shelf, Decimal::from(15), today(), false).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].lot_id, a.id);
        assert_eq!(plan[0].quantity, Decimal::from(10));
        assert_eq!(plan[1].lot_id, b.id);
        assert_eq!(plan[1].quantity, Decimal::from(5));

        // A is fully drawn down, so its post-movement status is depleted
        assert_eq!(
            derive_status(Decimal::ZERO, false, a.expiry_date, today(), None),
            LotStatus::Depleted
        );
    }

    /// Same shelf, allocate 25: fails with the true total, nothing planned.
    #[test]
    fn overallocation_fails_whole() {
        let shelf = vec![lot("A", 10, Some(2)), lot("B", 10, Some(20))];
        let err = plan_allocation(&shelf, Decimal::from(25), today(), false).unwrap_err();
        assert_eq!(
            err,
            PlanError::InsufficientStock {
                requested: Decimal::from(25),
                available: Decimal::from(20),
            }
        );
    }

    /// A lot expiring today alerts at level expired with non-positive days.
    #[test]
    fn expiring_today_alerts_expired() {
        let l = lot("A", 5, Some(0));
        let days = l.days_until_expiry(today()).unwrap();
        assert!(days <= 0);
        assert_eq!(
            AlertLevel::for_days_until_expiry(days),
            Some(AlertLevel::Expired)
        );
    }

    /// A quarantined lot is skipped by allocation even with stock on hand.
    #[test]
    fn quarantined_lot_is_never_allocated() {
        let mut held = lot("A", 5, Some(20));
        held.status = LotStatus::Quarantine;
        held.quarantine_reason = Some("damaged".to_string());
        let open = lot("B", 5, Some(25));
        let shelf = vec![held.clone(), open.clone()];

        assert!(!eligible_for_allocation(&held, today(), false));
        assert!(!eligible_for_allocation(&held, today(), true));

        let plan = plan_allocation(&shelf, Decimal::from(5), today(), false).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].lot_id, open.id);
    }

    /// Expected 8, counted 5: one outbound adjustment of 3, variance value
    /// priced at cost.
    #[test]
    fn count_variance_posts_outbound_adjustment() {
        let item = CycleCountItem {
            count_id: Uuid::new_v4(),
            lot_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            lot_number: "A".to_string(),
            expected_quantity: Decimal::from(8),
            counted_quantity: Some(Decimal::from(5)),
            counted_at: None,
        };
        let variance = item.variance().unwrap();
        assert_eq!(variance, Decimal::from(-3));

        let direction = if variance > Decimal::ZERO {
            MovementDirection::In
        } else {
            MovementDirection::Out
        };
        assert_eq!(direction, MovementDirection::Out);
        assert_eq!(variance.abs(), Decimal::from(3));
        assert_eq!(
            direction.apply(item.expected_quantity, variance.abs()),
            Decimal::from(5)
        );

        let cost_price = Decimal::new(125, 1);
        assert_eq!(variance * cost_price, Decimal::new(-375, 1));
    }
}
