//! Inventory line model

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use super::borrow::BorrowRecord;
use crate::error::{AppError, AppResult};

/// Per-city stock of one equipment type (`city_equipment`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct InventoryLine {
    pub id: i32,
    pub city_id: i32,
    pub equipment_id: i32,
    /// Units currently in the cabinet; never negative
    pub quantity: i32,
    /// Consumables are deducted for good and never come back
    pub is_consumable: bool,
    /// Bumped on every quantity change, used as the compare-and-swap guard
    #[serde(skip)]
    pub version: i64,
}

impl InventoryLine {
    /// Check that `amount` units can be reserved from this line.
    ///
    /// Non-consumables go out one unit per record; consumables in any positive amount.
    pub fn check_reserve(&self, amount: i32) -> AppResult<()> {
        if amount < 1 || (!self.is_consumable && amount != 1) {
            return Err(AppError::Validation(
                "Non-consumable equipment is borrowed one unit per record".to_string(),
            ));
        }
        if self.quantity < amount {
            return Err(AppError::InsufficientStock(format!(
                "Equipment {} in city {}: {} requested, {} available",
                self.equipment_id, self.city_id, amount, self.quantity
            )));
        }
        Ok(())
    }
}

/// A committed reservation and the record that owns it
#[derive(Debug, Clone)]
pub struct Reservation {
    pub record: BorrowRecord,
    /// Quantity left on the line after the decrement
    pub remaining: i32,
}
