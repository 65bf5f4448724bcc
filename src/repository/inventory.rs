//! Inventory ledger queries on `city_equipment`

use sqlx::{PgConnection, Pool, Postgres};

use crate::{
    error::{AppError, AppResult},
    models::InventoryLine,
};

#[derive(Clone)]
pub struct InventoryRepository {
    pool: Pool<Postgres>,
}

impl InventoryRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Get the line of one equipment type in a city
    pub async fn get(&self, city_id: i32, equipment_id: i32) -> AppResult<Option<InventoryLine>> {
        let line = sqlx::query_as::<_, InventoryLine>(
            "SELECT * FROM city_equipment WHERE city_id = $1 AND equipment_id = $2",
        )
        .bind(city_id)
        .bind(equipment_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(line)
    }

    /// List all lines of a city
    pub async fn list_for_city(&self, city_id: i32) -> AppResult<Vec<InventoryLine>> {
        let lines = sqlx::query_as::<_, InventoryLine>(
            "SELECT * FROM city_equipment WHERE city_id = $1 ORDER BY equipment_id",
        )
        .bind(city_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(lines)
    }
}

/// Decrement a line by `amount` inside the caller's transaction.
///
/// The decrement is a compare-and-swap on the version read just before it. A
/// concurrent writer makes the swap miss; the line is then re-read, up to
/// `retries` extra times, before giving up with `InsufficientStock`.
pub(crate) async fn reserve(
    conn: &mut PgConnection,
    city_id: i32,
    equipment_id: i32,
    amount: i32,
    retries: u32,
) -> AppResult<InventoryLine> {
    for attempt in 0..=retries {
        let line = sqlx::query_as::<_, InventoryLine>(
            "SELECT * FROM city_equipment WHERE city_id = $1 AND equipment_id = $2",
        )
        .bind(city_id)
        .bind(equipment_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!(
                "Equipment {} is not stocked in city {}",
                equipment_id, city_id
            ))
        })?;

        line.check_reserve(amount)?;

        let updated = sqlx::query_as::<_, InventoryLine>(
            r#"
            UPDATE city_equipment
            SET quantity = quantity - $1, version = version + 1
            WHERE id = $2 AND version = $3 AND quantity >= $1
            RETURNING *
            "#,
        )
        .bind(amount)
        .bind(line.id)
        .bind(line.version)
        .fetch_optional(&mut *conn)
        .await?;

        if let Some(updated) = updated {
            return Ok(updated);
        }

        tracing::debug!(
            city_id,
            equipment_id,
            attempt,
            "Inventory line changed under reservation, re-reading"
        );
    }

    Err(AppError::InsufficientStock(format!(
        "Equipment {} in city {} is under heavy contention, retry",
        equipment_id, city_id
    )))
}

/// Put `amount` units back on a line. `None` when the line no longer exists.
pub(crate) async fn release(
    conn: &mut PgConnection,
    city_id: i32,
    equipment_id: i32,
    amount: i32,
) -> AppResult<Option<InventoryLine>> {
    let line = sqlx::query_as::<_, InventoryLine>(
        r#"
        UPDATE city_equipment
        SET quantity = quantity + $1, version = version + 1
        WHERE city_id = $2 AND equipment_id = $3 AND NOT is_consumable
        RETURNING *
        "#,
    )
    .bind(amount)
    .bind(city_id)
    .bind(equipment_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(line)
}

/// Whether a line is for consumable equipment. `None` when the line is gone.
pub(crate) async fn is_consumable(
    conn: &mut PgConnection,
    city_id: i32,
    equipment_id: i32,
) -> AppResult<Option<bool>> {
    let consumable = sqlx::query_scalar::<_, bool>(
        "SELECT is_consumable FROM city_equipment WHERE city_id = $1 AND equipment_id = $2",
    )
    .bind(city_id)
    .bind(equipment_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(consumable)
}
