//! Stock lot model and lifecycle status derivation

use std::cmp::Ordering;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Number of days before expiry at which a lot is considered `expiring`
pub const EXPIRING_WINDOW_DAYS: i64 = 7;

/// One receipt batch of one product at one branch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockLot {
    pub id: Uuid,
    pub product_id: Uuid,
    pub branch_id: Uuid,
    /// Human-readable lot number, unique per product + branch
    pub lot_number: String,
    pub batch_code: Option<String>,
    /// Denormalized product name for display (the product catalog is external)
    pub product_name: Option<String>,
    /// Quantity received, immutable once set
    pub initial_quantity: Decimal,
    /// Mutated only through the movement ledger
    pub current_quantity: Decimal,
    /// Earmarked but not yet consumed
    pub reserved_quantity: Decimal,
    pub manufacturing_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub best_before_date: Option<NaiveDate>,
    pub received_date: DateTime<Utc>,
    pub status: LotStatus,
    pub supplier_id: Option<Uuid>,
    pub purchase_order_id: Option<Uuid>,
    pub cost_price: Decimal,
    pub total_cost: Decimal,
    pub position_id: Option<Uuid>,
    /// Why the lot is held in quarantine; set while status is `quarantine`
    pub quarantine_reason: Option<String>,
    pub quarantined_by: Option<Uuid>,
    pub quarantined_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StockLot {
    /// Quantity that can still be allocated (current minus reserved)
    pub fn available_quantity(&self) -> Decimal {
        self.current_quantity - self.reserved_quantity
    }

    /// Days until expiry relative to `today`; negative once past
    pub fn days_until_expiry(&self, today: NaiveDate) -> Option<i64> {
        self.expiry_date
            .map(|expiry| expiry.signed_duration_since(today).num_days())
    }
}

/// Derived lifecycle status of a lot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LotStatus {
    Available,
    Low,
    Expiring,
    Expired,
    Quarantine,
    Depleted,
}

impl LotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LotStatus::Available => "available",
            LotStatus::Low => "low",
            LotStatus::Expiring => "expiring",
            LotStatus::Expired => "expired",
            LotStatus::Quarantine => "quarantine",
            LotStatus::Depleted => "depleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "available" => Some(LotStatus::Available),
            "low" => Some(LotStatus::Low),
            "expiring" => Some(LotStatus::Expiring),
            "expired" => Some(LotStatus::Expired),
            "quarantine" => Some(LotStatus::Quarantine),
            "depleted" => Some(LotStatus::Depleted),
            _ => None,
        }
    }
}

impl std::fmt::Display for LotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derive a lot's status from its quantities and dates.
///
/// Precedence: depleted > quarantine > expired > expiring > low > available.
/// Quarantine is sticky: the caller passes whether the lot is currently held
/// in quarantine, and only an explicit release clears it. The low-stock
/// threshold is external input; with no threshold the `low` status is never
/// derived.
pub fn derive_status(
    current_quantity: Decimal,
    quarantined: bool,
    expiry_date: Option<NaiveDate>,
    today: NaiveDate,
    low_stock_threshold: Option<Decimal>,
) -> LotStatus {
    if current_quantity <= Decimal::ZERO {
        return LotStatus::Depleted;
    }
    if quarantined {
        return LotStatus::Quarantine;
    }
    if let Some(expiry) = expiry_date {
        let days = expiry.signed_duration_since(today).num_days();
        if days < 0 {
            return LotStatus::Expired;
        }
        if days <= EXPIRING_WINDOW_DAYS {
            return LotStatus::Expiring;
        }
    }
    if let Some(threshold) = low_stock_threshold {
        if current_quantity < threshold {
            return LotStatus::Low;
        }
    }
    LotStatus::Available
}

/// FEFO ordering: soonest expiry first, lots without an expiry date last,
/// ties broken by received date then lot number so the order is fully
/// deterministic.
pub fn fefo_cmp(a: &StockLot, b: &StockLot) -> Ordering {
    match (a.expiry_date, b.expiry_date) {
        (Some(ea), Some(eb)) => ea.cmp(&eb),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| a.received_date.cmp(&b.received_date))
    .then_with(|| a.lot_number.cmp(&b.lot_number))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn lot(lot_number: &str, expiry: Option<NaiveDate>, received_day: u32) -> StockLot {
        let received = Utc
            .with_ymd_and_hms(2025, 1, received_day, 12, 0, 0)
            .unwrap();
        StockLot {
            id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            branch_id: Uuid::new_v4(),
            lot_number: lot_number.to_string(),
            batch_code: None,
            product_name: None,
            initial_quantity: Decimal::from(10),
            current_quantity: Decimal::from(10),
            reserved_quantity: Decimal::ZERO,
            manufacturing_date: None,
            expiry_date: expiry,
            best_before_date: None,
            received_date: received,
            status: LotStatus::Available,
            supplier_id: None,
            purchase_order_id: None,
            cost_price: Decimal::ONE,
            total_cost: Decimal::from(10),
            position_id: None,
            quarantine_reason: None,
            quarantined_by: None,
            quarantined_at: None,
            created_at: received,
            updated_at: received,
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn depleted_dominates_everything() {
        let today = date(2025, 6, 1);
        let status = derive_status(
            Decimal::ZERO,
            true,
            Some(date(2025, 1, 1)),
            today,
            Some(Decimal::from(100)),
        );
        assert_eq!(status, LotStatus::Depleted);
    }

    #[test]
    fn quarantine_dominates_expired() {
        let today = date(2025, 6, 1);
        let status = derive_status(Decimal::from(5), true, Some(date(2025, 1, 1)), today, None);
        assert_eq!(status, LotStatus::Quarantine);
    }

    #[test]
    fn expired_when_past_expiry() {
        let today = date(2025, 6, 1);
        let status = derive_status(Decimal::from(5), false, Some(date(2025, 5, 31)), today, None);
        assert_eq!(status, LotStatus::Expired);
    }

    #[test]
    fn expiring_within_seven_days_inclusive() {
        let today = date(2025, 6, 1);
        assert_eq!(
            derive_status(Decimal::from(5), false, Some(date(2025, 6, 8)), today, None),
            LotStatus::Expiring
        );
        assert_eq!(
            derive_status(Decimal::from(5), false, Some(date(2025, 6, 9)), today, None),
            LotStatus::Available
        );
        // expiring today is still expiring, not expired
        assert_eq!(
            derive_status(Decimal::from(5), false, Some(today), today, None),
            LotStatus::Expiring
        );
    }

    #[test]
    fn low_only_with_threshold() {
        let today = date(2025, 6, 1);
        assert_eq!(
            derive_status(Decimal::from(3), false, None, today, Some(Decimal::from(5))),
            LotStatus::Low
        );
        assert_eq!(
            derive_status(Decimal::from(3), false, None, today, None),
            LotStatus::Available
        );
        // at the threshold is not below it
        assert_eq!(
            derive_status(Decimal::from(5), false, None, today, Some(Decimal::from(5))),
            LotStatus::Available
        );
    }

    #[test]
    fn fefo_orders_by_expiry_then_received_then_lot_number() {
        let a = lot("L-003", Some(date(2025, 3, 1)), 5);
        let b = lot("L-001", Some(date(2025, 2, 1)), 9);
        let c = lot("L-002", None, 1);
        let d = lot("L-000", Some(date(2025, 3, 1)), 5);

        let mut lots = vec![a.clone(), b.clone(), c.clone(), d.clone()];
        lots.sort_by(fefo_cmp);

        let order: Vec<&str> = lots.iter().map(|l| l.lot_number.as_str()).collect();
        // b expires first; d beats a on lot number at equal expiry/received;
        // c has no expiry and sorts last
        assert_eq!(order, vec!["L-001", "L-000", "L-003", "L-002"]);
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            LotStatus::Available,
            LotStatus::Low,
            LotStatus::Expiring,
            LotStatus::Expired,
            LotStatus::Quarantine,
            LotStatus::Depleted,
        ] {
            assert_eq!(LotStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(LotStatus::parse("unknown"), None);
    }
}
