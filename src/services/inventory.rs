//! Inventory ledger service

use std::collections::BTreeMap;

use super::{notifications::NotificationIntent, LendingContext};
use crate::{
    error::{AppError, AppResult},
    models::{borrow::NewBorrowRecord, InventoryLine, Reservation},
};

#[derive(Clone)]
pub struct InventoryLedger {
    ctx: LendingContext,
}

impl InventoryLedger {
    pub fn new(ctx: LendingContext) -> Self {
        Self { ctx }
    }

    /// Current line of one equipment type in a city
    pub async fn availability(&self, city_id: i32, equipment_id: i32) -> AppResult<InventoryLine> {
        self.ctx
            .call("inventory_line", self.ctx.store.inventory_line(city_id, equipment_id))
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "Equipment {} is not stocked in city {}",
                    equipment_id, city_id
                ))
            })
    }

    pub async fn city_inventory(&self, city_id: i32) -> AppResult<Vec<InventoryLine>> {
        self.ctx
            .call("city_inventory", self.ctx.store.city_inventory(city_id))
            .await
    }

    /// Non-reserving check that `quantity` units are on the shelf right now
    pub async fn soft_check(
        &self,
        city_id: i32,
        equipment_id: i32,
        quantity: i32,
    ) -> AppResult<InventoryLine> {
        let line = self.availability(city_id, equipment_id).await?;
        if line.quantity < quantity {
            return Err(AppError::InsufficientStock(format!(
                "Equipment {} in city {}: {} requested, {} available",
                equipment_id, city_id, quantity, line.quantity
            )));
        }
        Ok(line)
    }

    /// Reserve stock together with the record that owns it
    pub async fn check_and_reserve(&self, record: &NewBorrowRecord) -> AppResult<Reservation> {
        let reservation = self
            .ctx
            .call(
                "reserve_and_record",
                self.ctx
                    .store
                    .reserve_and_record(record, self.ctx.config.reservation_retries),
            )
            .await?;

        tracing::info!(
            record_id = reservation.record.id,
            city_id = record.city_id,
            equipment_id = record.equipment_id,
            quantity = record.quantity,
            remaining = reservation.remaining,
            "Stock reserved"
        );

        self.report_low_stock(std::slice::from_ref(&reservation)).await;
        Ok(reservation)
    }

    /// Emit one stock-low intent per line left at or below the threshold
    pub async fn report_low_stock(&self, reservations: &[Reservation]) {
        let threshold = self.ctx.config.low_stock_threshold;
        let mut lowest: BTreeMap<(i32, i32), i32> = BTreeMap::new();
        for r in reservations {
            let key = (r.record.city_id, r.record.equipment_id);
            let entry = lowest.entry(key).or_insert(r.remaining);
            *entry = (*entry).min(r.remaining);
        }

        for ((city_id, equipment_id), remaining) in lowest {
            if remaining <= threshold {
                self.ctx
                    .notify(NotificationIntent::StockLow {
                        city_id,
                        equipment_id,
                        remaining,
                    })
                    .await;
            }
        }
    }
}
