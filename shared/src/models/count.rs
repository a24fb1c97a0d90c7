//! Cycle count models and variance arithmetic

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A scheduled reconciliation of physical stock against the ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleCount {
    pub id: Uuid,
    pub branch_id: Uuid,
    pub scheduled_date: NaiveDate,
    pub status: CycleCountStatus,
    /// Number of lots whose counted quantity differed from expected
    pub variance_count: i32,
    /// Σ variance × lot cost price across all counted lots
    pub variance_value: Decimal,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One lot within a cycle count: the ledger snapshot taken at start plus the
/// physical observation recorded later
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleCountItem {
    pub count_id: Uuid,
    pub lot_id: Uuid,
    pub product_id: Uuid,
    pub lot_number: String,
    /// Ledger quantity snapshotted when the count started
    pub expected_quantity: Decimal,
    pub counted_quantity: Option<Decimal>,
    pub counted_at: Option<DateTime<Utc>>,
}

impl CycleCountItem {
    /// `counted - expected`; `None` until a count has been recorded
    pub fn variance(&self) -> Option<Decimal> {
        self.counted_quantity
            .map(|counted| counted - self.expected_quantity)
    }
}

/// Lifecycle of a cycle count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleCountStatus {
    Draft,
    InProgress,
    PendingReview,
    Completed,
    Cancelled,
}

impl CycleCountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleCountStatus::Draft => "draft",
            CycleCountStatus::InProgress => "in_progress",
            CycleCountStatus::PendingReview => "pending_review",
            CycleCountStatus::Completed => "completed",
            CycleCountStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(CycleCountStatus::Draft),
            "in_progress" => Some(CycleCountStatus::InProgress),
            "pending_review" => Some(CycleCountStatus::PendingReview),
            "completed" => Some(CycleCountStatus::Completed),
            "cancelled" => Some(CycleCountStatus::Cancelled),
            _ => None,
        }
    }

    /// Counts can only be completed or cancelled from these states
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            CycleCountStatus::Draft | CycleCountStatus::InProgress | CycleCountStatus::PendingReview
        )
    }
}

impl std::fmt::Display for CycleCountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variance_is_counted_minus_expected() {
        let item = CycleCountItem {
            count_id: Uuid::new_v4(),
            lot_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            lot_number: "L-001".to_string(),
            expected_quantity: Decimal::from(8),
            counted_quantity: Some(Decimal::from(5)),
            counted_at: None,
        };
        assert_eq!(item.variance(), Some(Decimal::from(-3)));

        let uncounted = CycleCountItem {
            counted_quantity: None,
            ..item
        };
        assert_eq!(uncounted.variance(), None);
    }

    #[test]
    fn open_states() {
        assert!(CycleCountStatus::Draft.is_open());
        assert!(CycleCountStatus::InProgress.is_open());
        assert!(CycleCountStatus::PendingReview.is_open());
        assert!(!CycleCountStatus::Completed.is_open());
        assert!(!CycleCountStatus::Cancelled.is_open());
    }
}
