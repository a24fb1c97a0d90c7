//! Storage position catalog models

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A named storage location at a branch (zone/rack/shelf/bin).
///
/// Used for display and filtering only; positions carry no quantity
/// invariants. Identity is immutable, `is_active` and capacity are not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoragePosition {
    pub id: Uuid,
    pub branch_id: Uuid,
    pub zone: String,
    pub rack: Option<String>,
    pub shelf: Option<String>,
    pub bin: Option<String>,
    pub capacity: Option<Decimal>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoragePosition {
    /// Human-readable label, e.g. "A/R2/S1/B4"
    pub fn label(&self) -> String {
        let mut parts = vec![self.zone.clone()];
        for part in [&self.rack, &self.shelf, &self.bin].into_iter().flatten() {
            parts.push(part.clone());
        }
        parts.join("/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn label_skips_missing_levels() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let position = StoragePosition {
            id: Uuid::new_v4(),
            branch_id: Uuid::new_v4(),
            zone: "A".to_string(),
            rack: Some("R2".to_string()),
            shelf: None,
            bin: Some("B4".to_string()),
            capacity: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(position.label(), "A/R2/B4");
    }
}
