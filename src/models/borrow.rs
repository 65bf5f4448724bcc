//! Borrow record (custody event) model and related types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use super::enums::{BorrowStatus, EquipmentCondition};

/// Borrow record row from `borrow_history`
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct BorrowRecord {
    pub id: i32,
    /// Request this record fulfilled; `None` for walk-up borrows
    pub request_id: Option<i32>,
    pub name: String,
    pub phone: String,
    pub equipment_id: i32,
    pub city_id: i32,
    pub quantity: i32,
    pub status: BorrowStatus,
    pub borrow_date: DateTime<Utc>,
    pub return_date: Option<DateTime<Utc>>,
    pub equipment_status: Option<EquipmentCondition>,
    pub faulty_notes: Option<String>,
    pub confirmed_by: Option<String>,
    /// The record and the inventory line disagree and need manual reconciliation
    pub reconcile_required: bool,
}

/// Borrower identity as captured at the cabinet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Borrower {
    pub name: String,
    pub phone: String,
}

/// Record to insert together with its stock reservation
#[derive(Debug, Clone)]
pub struct NewBorrowRecord {
    pub request_id: Option<i32>,
    pub borrower: Borrower,
    pub equipment_id: i32,
    pub city_id: i32,
    pub quantity: i32,
    pub borrow_date: DateTime<Utc>,
}

/// Walk-up borrow payload
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct DirectBorrowRequest {
    #[validate(length(min = 1, max = 200, message = "Name is required"))]
    pub name: String,
    #[validate(length(min = 6, max = 32, message = "Phone number must be 6 to 32 characters"))]
    pub phone: String,
    pub city_id: i32,
    pub equipment_id: i32,
    /// Defaults to 1; only consumables accept more than one unit per record
    #[validate(range(min = 1, max = 100))]
    pub quantity: Option<i32>,
}

/// Borrower-reported return payload
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct MarkReturnedRequest {
    /// Must match the phone on the record
    pub phone: String,
    pub condition: EquipmentCondition,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

/// Manager override payload
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct OverrideReturnRequest {
    pub condition: EquipmentCondition,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

/// Mutation applied to a borrow record under a status precondition
#[derive(Debug, Clone)]
pub enum BorrowChange {
    /// borrowed -> pending_approval
    ReportReturn {
        condition: EquipmentCondition,
        notes: Option<String>,
        at: DateTime<Utc>,
    },
    /// {borrowed, pending_approval} -> returned, releasing stock for non-consumables
    Return {
        confirmed_by: String,
        /// Overrides the borrower's report when set
        condition: Option<EquipmentCondition>,
        notes: Option<String>,
        at: DateTime<Utc>,
    },
}

impl BorrowChange {
    /// Whether the change may apply to a record currently in `current`
    pub fn permits(&self, current: BorrowStatus) -> bool {
        let source = match self {
            BorrowChange::ReportReturn { .. } => current == BorrowStatus::Borrowed,
            BorrowChange::Return { .. } => current.is_out(),
        };
        source && current.can_transition_to(self.target())
    }

    /// Every status the change may apply to, for set-based store filters
    pub fn allowed_from(&self) -> Vec<BorrowStatus> {
        BorrowStatus::ALL
            .into_iter()
            .filter(|status| self.permits(*status))
            .collect()
    }

    pub fn target(&self) -> BorrowStatus {
        match self {
            BorrowChange::ReportReturn { .. } => BorrowStatus::PendingApproval,
            BorrowChange::Return { .. } => BorrowStatus::Returned,
        }
    }
}

/// Result of returning a record to the cabinet
#[derive(Debug, Clone)]
pub struct ReturnOutcome {
    pub record: BorrowRecord,
    /// Units put back in the pool (0 for consumables)
    pub released: i32,
    /// The inventory line was missing, so nothing could be released
    pub line_missing: bool,
}

/// Borrow record list filters
#[derive(Debug, Default, Clone)]
pub struct BorrowFilter {
    pub phone: Option<String>,
    pub city_id: Option<i32>,
    pub status: Option<BorrowStatus>,
    pub reconcile_required: Option<bool>,
    pub borrowed_before: Option<DateTime<Utc>>,
}

/// Overdue query parameters
#[derive(Debug, Default, Clone, Deserialize, IntoParams, ToSchema)]
pub struct OverdueQuery {
    pub phone: Option<String>,
    pub city_id: Option<i32>,
    /// Defaults to the configured threshold
    pub threshold_hours: Option<i64>,
}

/// Borrowed unit past the overdue threshold
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OverdueItem {
    pub record_id: i32,
    pub name: String,
    pub phone: String,
    pub equipment_id: i32,
    pub city_id: i32,
    pub quantity: i32,
    pub borrow_date: DateTime<Utc>,
    pub hours_overdue: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_return_sources_come_from_transition_table() {
        let report = BorrowChange::ReportReturn {
            condition: EquipmentCondition::Working,
            notes: None,
            at: Utc::now(),
        };
        assert_eq!(report.allowed_from(), vec![BorrowStatus::Borrowed]);

        let close = BorrowChange::Return {
            confirmed_by: "manager".to_string(),
            condition: None,
            notes: None,
            at: Utc::now(),
        };
        assert_eq!(
            close.allowed_from(),
            vec![BorrowStatus::Borrowed, BorrowStatus::PendingApproval]
        );
        assert!(!close.permits(BorrowStatus::Returned));
    }
}
