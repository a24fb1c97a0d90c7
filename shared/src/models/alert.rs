//! Expiry alerts and level thresholds

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A derived, idempotently-upserted alert for one lot approaching or past
/// expiry. At most one active alert exists per lot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpiryAlert {
    pub id: Uuid,
    pub lot_id: Uuid,
    pub product_id: Uuid,
    pub branch_id: Uuid,
    pub lot_number: String,
    pub product_name: Option<String>,
    pub current_quantity: Decimal,
    pub expiry_date: NaiveDate,
    pub days_until_expiry: i64,
    pub alert_level: AlertLevel,
    pub acknowledged: bool,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<Uuid>,
    pub action_taken: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Severity of an expiry alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Warning,
    Critical,
    Urgent,
    Expired,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Warning => "warning",
            AlertLevel::Critical => "critical",
            AlertLevel::Urgent => "urgent",
            AlertLevel::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "warning" => Some(AlertLevel::Warning),
            "critical" => Some(AlertLevel::Critical),
            "urgent" => Some(AlertLevel::Urgent),
            "expired" => Some(AlertLevel::Expired),
            _ => None,
        }
    }

    /// Level for a lot that expires in `days` days. Beyond 30 days no alert
    /// is raised.
    pub fn for_days_until_expiry(days: i64) -> Option<Self> {
        match days {
            d if d <= 0 => Some(AlertLevel::Expired),
            1..=3 => Some(AlertLevel::Urgent),
            4..=7 => Some(AlertLevel::Critical),
            8..=30 => Some(AlertLevel::Warning),
            _ => None,
        }
    }
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_boundaries_are_exact() {
        assert_eq!(
            AlertLevel::for_days_until_expiry(-5),
            Some(AlertLevel::Expired)
        );
        assert_eq!(
            AlertLevel::for_days_until_expiry(0),
            Some(AlertLevel::Expired)
        );
        assert_eq!(
            AlertLevel::for_days_until_expiry(1),
            Some(AlertLevel::Urgent)
        );
        assert_eq!(
            AlertLevel::for_days_until_expiry(3),
            Some(AlertLevel::Urgent)
        );
        assert_eq!(
            AlertLevel::for_days_until_expiry(4),
            Some(AlertLevel::Critical)
        );
        assert_eq!(
            AlertLevel::for_days_until_expiry(7),
            Some(AlertLevel::Critical)
        );
        assert_eq!(
            AlertLevel::for_days_until_expiry(8),
            Some(AlertLevel::Warning)
        );
        assert_eq!(
            AlertLevel::for_days_until_expiry(30),
            Some(AlertLevel::Warning)
        );
        assert_eq!(AlertLevel::for_days_until_expiry(31), None);
    }
}
