//! Overdue detection over borrow records

use chrono::{DateTime, Duration, Utc};

use super::LendingContext;
use crate::{
    error::{AppError, AppResult},
    models::{
        borrow::{BorrowFilter, OverdueQuery},
        request::normalize_phone,
        BorrowRecord, BorrowStatus, OverdueItem,
    },
};

#[derive(Clone)]
pub struct OverdueDetector {
    ctx: LendingContext,
}

impl OverdueDetector {
    pub fn new(ctx: LendingContext) -> Self {
        Self { ctx }
    }

    /// Borrowed records older than the threshold, oldest first
    pub async fn list_overdue(&self, query: &OverdueQuery) -> AppResult<Vec<OverdueItem>> {
        let threshold_hours = query
            .threshold_hours
            .unwrap_or(self.ctx.config.overdue_threshold_hours);
        let now = self.ctx.clock.now();
        let cutoff = overdue_cutoff(now, threshold_hours)?;

        let filter = BorrowFilter {
            phone: query.phone.as_deref().map(normalize_phone),
            city_id: query.city_id,
            status: Some(BorrowStatus::Borrowed),
            reconcile_required: None,
            borrowed_before: Some(cutoff),
        };

        let records = self
            .ctx
            .call("list_borrow_records", self.ctx.store.list_borrow_records(&filter))
            .await?;
        Ok(overdue_items(&records, now, cutoff))
    }

    /// Whether a borrower still holds overdue equipment
    pub async fn has_overdue(&self, phone: &str) -> AppResult<bool> {
        let items = self
            .list_overdue(&OverdueQuery {
                phone: Some(phone.to_string()),
                ..OverdueQuery::default()
            })
            .await?;
        Ok(!items.is_empty())
    }
}

/// `now - threshold_hours`, refusing thresholds that are negative or fall
/// outside the representable time range
pub fn overdue_cutoff(now: DateTime<Utc>, threshold_hours: i64) -> AppResult<DateTime<Utc>> {
    if threshold_hours < 0 {
        return Err(AppError::Validation(
            "threshold_hours must not be negative".to_string(),
        ));
    }
    Duration::try_hours(threshold_hours)
        .and_then(|threshold| now.checked_sub_signed(threshold))
        .ok_or_else(|| {
            AppError::Validation(format!("threshold_hours {} is out of range", threshold_hours))
        })
}

/// Pure selection: `borrowed` and `borrow_date < cutoff`
pub fn overdue_items(
    records: &[BorrowRecord],
    now: DateTime<Utc>,
    cutoff: DateTime<Utc>,
) -> Vec<OverdueItem> {
    records
        .iter()
        .filter(|r| r.status == BorrowStatus::Borrowed && r.borrow_date < cutoff)
        .map(|r| OverdueItem {
            record_id: r.id,
            name: r.name.clone(),
            phone: r.phone.clone(),
            equipment_id: r.equipment_id,
            city_id: r.city_id,
            quantity: r.quantity,
            borrow_date: r.borrow_date,
            // Elapsed time is positive here, so truncation is floor
            hours_overdue: (now - r.borrow_date).num_hours(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::LendingConfig,
        repository::MemoryStore,
        services::{clock::SystemClock, notifications::LogDispatcher},
    };
    use std::sync::Arc;

    fn record(id: i32, borrowed_ago: Duration, status: BorrowStatus) -> (BorrowRecord, DateTime<Utc>) {
        let now = Utc::now();
        (
            BorrowRecord {
                id,
                request_id: None,
                name: "Yael".to_string(),
                phone: "0509998888".to_string(),
                equipment_id: 1,
                city_id: 1,
                quantity: 1,
                status,
                borrow_date: now - borrowed_ago,
                return_date: None,
                equipment_status: None,
                faulty_notes: None,
                confirmed_by: None,
                reconcile_required: false,
            },
            now,
        )
    }

    #[test]
    fn test_threshold_boundary() {
        let (late, now) = record(1, Duration::hours(25), BorrowStatus::Borrowed);
        let (recent, _) = record(2, Duration::hours(23), BorrowStatus::Borrowed);

        let items = overdue_items(&[late, recent], now, overdue_cutoff(now, 24).unwrap());
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].record_id, 1);
        assert_eq!(items[0].hours_overdue, 25);
    }

    #[test]
    fn test_hours_are_floored() {
        let (r, now) = record(1, Duration::minutes(25 * 60 + 59), BorrowStatus::Borrowed);
        let cutoff = overdue_cutoff(now, 24).unwrap();
        assert_eq!(overdue_items(&[r], now, cutoff)[0].hours_overdue, 25);
    }

    #[test]
    fn test_reported_returns_are_not_overdue() {
        let (r, now) = record(1, Duration::hours(48), BorrowStatus::PendingApproval);
        let cutoff = overdue_cutoff(now, 24).unwrap();
        assert!(overdue_items(&[r], now, cutoff).is_empty());
    }

    #[test]
    fn test_cutoff_rejects_unrepresentable_thresholds() {
        let now = Utc::now();
        for hours in [-1, 10_000_000_000, i64::MAX] {
            assert!(
                matches!(overdue_cutoff(now, hours), Err(AppError::Validation(_))),
                "{} hours",
                hours
            );
        }
        assert_eq!(overdue_cutoff(now, 0).unwrap(), now);
    }

    #[tokio::test]
    async fn test_huge_threshold_is_a_validation_error() {
        let ctx = LendingContext {
            store: Arc::new(MemoryStore::new()),
            clock: Arc::new(SystemClock),
            notifier: Arc::new(LogDispatcher),
            config: LendingConfig::default(),
        };
        let detector = OverdueDetector::new(ctx);

        let err = detector
            .list_overdue(&OverdueQuery {
                threshold_hours: Some(10_000_000_000),
                ..OverdueQuery::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
