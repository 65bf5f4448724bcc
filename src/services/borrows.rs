//! Borrow record lifecycle: walk-up borrows and the return flow

use validator::Validate;

use super::{
    inventory::InventoryLedger, notifications::NotificationIntent, overdue::OverdueDetector,
    LendingContext,
};
use crate::{
    error::{AppError, AppResult},
    models::{
        borrow::{BorrowChange, BorrowFilter, DirectBorrowRequest, NewBorrowRecord, ReturnOutcome},
        request::normalize_phone,
        BorrowRecord, Borrower, EquipmentCondition,
    },
};

#[derive(Clone)]
pub struct BorrowsService {
    ctx: LendingContext,
    inventory: InventoryLedger,
    overdue: OverdueDetector,
}

impl BorrowsService {
    pub fn new(ctx: LendingContext, inventory: InventoryLedger, overdue: OverdueDetector) -> Self {
        Self {
            ctx,
            inventory,
            overdue,
        }
    }

    /// Walk-up borrow: reserve and record in one step
    pub async fn direct_borrow(&self, input: DirectBorrowRequest) -> AppResult<BorrowRecord> {
        input.validate()?;
        let name = input.name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::Validation("Name is required".to_string()));
        }
        let phone = normalize_phone(&input.phone);

        if self.ctx.config.block_on_overdue && self.overdue.has_overdue(&phone).await? {
            return Err(AppError::Validation(
                "Borrower must return overdue items first".to_string(),
            ));
        }

        let record = NewBorrowRecord {
            request_id: None,
            borrower: Borrower { name, phone },
            equipment_id: input.equipment_id,
            city_id: input.city_id,
            quantity: input.quantity.unwrap_or(1),
            borrow_date: self.ctx.clock.now(),
        };
        let reservation = self.inventory.check_and_reserve(&record).await?;

        tracing::info!(
            record_id = reservation.record.id,
            city_id = record.city_id,
            equipment_id = record.equipment_id,
            status = %reservation.record.status,
            "Direct borrow recorded"
        );
        Ok(reservation.record)
    }

    /// borrowed -> pending_approval, as reported by the borrower
    pub async fn mark_returned_by_borrower(
        &self,
        id: i32,
        condition: EquipmentCondition,
        notes: Option<String>,
    ) -> AppResult<BorrowRecord> {
        let notes = condition_notes(condition, notes)?;
        let change = BorrowChange::ReportReturn {
            condition,
            notes: notes.clone(),
            at: self.ctx.clock.now(),
        };

        let updated = self
            .ctx
            .call("update_borrow_record", self.ctx.store.update_borrow_record(id, &change))
            .await?;
        let Some(record) = updated else {
            return self.refused(id, "report the return of").await;
        };

        tracing::info!(
            record_id = record.id,
            city_id = record.city_id,
            condition = %condition,
            "Return reported by borrower"
        );
        self.report_condition(&record, condition, notes).await;
        Ok(record)
    }

    /// {borrowed, pending_approval} -> returned, keeping the borrower's report
    pub async fn confirm_return(&self, id: i32, manager: &str) -> AppResult<BorrowRecord> {
        let change = BorrowChange::Return {
            confirmed_by: manager.to_string(),
            condition: None,
            notes: None,
            at: self.ctx.clock.now(),
        };
        self.close(id, &change, "confirm the return of").await
    }

    /// {borrowed, pending_approval} -> returned with the manager's own condition report
    pub async fn manager_override_return(
        &self,
        id: i32,
        manager: &str,
        condition: EquipmentCondition,
        notes: Option<String>,
    ) -> AppResult<BorrowRecord> {
        let notes = condition_notes(condition, notes)?;
        let change = BorrowChange::Return {
            confirmed_by: manager.to_string(),
            condition: Some(condition),
            notes: notes.clone(),
            at: self.ctx.clock.now(),
        };
        let record = self.close(id, &change, "override the return of").await?;
        if condition == EquipmentCondition::Faulty {
            self.report_condition(&record, condition, notes).await;
        }
        Ok(record)
    }

    pub async fn get(&self, id: i32) -> AppResult<BorrowRecord> {
        self.ctx
            .call("borrow_record", self.ctx.store.borrow_record(id))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Borrow record {} not found", id)))
    }

    /// Get a record only if it belongs to the given phone
    pub async fn get_for_borrower(&self, id: i32, phone: &str) -> AppResult<BorrowRecord> {
        let record = self.get(id).await?;
        if record.phone != normalize_phone(phone) {
            return Err(AppError::NotFound(format!("Borrow record {} not found", id)));
        }
        Ok(record)
    }

    /// Borrower's history, oldest first
    pub async fn list_by_phone(&self, phone: &str) -> AppResult<Vec<BorrowRecord>> {
        let filter = BorrowFilter {
            phone: Some(normalize_phone(phone)),
            ..BorrowFilter::default()
        };
        self.ctx
            .call("list_borrow_records", self.ctx.store.list_borrow_records(&filter))
            .await
    }

    /// Records flagged for manual reconciliation
    pub async fn list_reconcile_required(&self, city_id: Option<i32>) -> AppResult<Vec<BorrowRecord>> {
        let filter = BorrowFilter {
            city_id,
            reconcile_required: Some(true),
            ..BorrowFilter::default()
        };
        self.ctx
            .call("list_borrow_records", self.ctx.store.list_borrow_records(&filter))
            .await
    }

    async fn close(&self, id: i32, change: &BorrowChange, action: &str) -> AppResult<BorrowRecord> {
        let outcome = self
            .ctx
            .call("return_and_release", self.ctx.store.return_and_release(id, change))
            .await?;
        let Some(ReturnOutcome {
            record,
            released,
            line_missing,
        }) = outcome
        else {
            return self.refused(id, action).await;
        };

        if line_missing {
            tracing::error!(
                target: "audit",
                record_id = record.id,
                city_id = record.city_id,
                equipment_id = record.equipment_id,
                quantity = record.quantity,
                "Inventory line missing on return; record flagged for reconciliation"
            );
            return Err(AppError::InconsistentWrite {
                record_id: record.id,
                message: format!(
                    "inventory line for equipment {} in city {} no longer exists",
                    record.equipment_id, record.city_id
                ),
            });
        }

        tracing::info!(
            record_id = record.id,
            city_id = record.city_id,
            equipment_id = record.equipment_id,
            released,
            confirmed_by = ?record.confirmed_by,
            "Return confirmed"
        );
        Ok(record)
    }

    async fn report_condition(
        &self,
        record: &BorrowRecord,
        condition: EquipmentCondition,
        notes: Option<String>,
    ) {
        self.ctx
            .notify(NotificationIntent::ReturnReported {
                record_id: record.id,
                city_id: record.city_id,
                equipment_id: record.equipment_id,
                condition,
            })
            .await;

        if let (EquipmentCondition::Faulty, Some(notes)) = (condition, notes) {
            self.ctx
                .notify(NotificationIntent::FaultyEquipment {
                    record_id: record.id,
                    city_id: record.city_id,
                    equipment_id: record.equipment_id,
                    notes,
                })
                .await;
        }
    }

    async fn refused<T>(&self, id: i32, action: &str) -> AppResult<T> {
        let current = self.get(id).await?;
        Err(AppError::InvalidStateTransition(format!(
            "Cannot {} record {} while it is {}",
            action, id, current.status
        )))
    }
}

/// Trimmed notes; a faulty report must say what is wrong
fn condition_notes(condition: EquipmentCondition, notes: Option<String>) -> AppResult<Option<String>> {
    let notes = notes
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());
    if condition == EquipmentCondition::Faulty && notes.is_none() {
        return Err(AppError::Validation(
            "Notes are required when reporting faulty equipment".to_string(),
        ));
    }
    Ok(notes)
}
