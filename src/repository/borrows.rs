//! Borrow history repository for database operations

use sqlx::{PgConnection, Pool, Postgres, QueryBuilder};

use super::inventory;
use crate::{
    error::{AppError, AppResult},
    models::{
        borrow::{BorrowChange, BorrowFilter, NewBorrowRecord, ReturnOutcome},
        inventory::Reservation,
        BorrowRecord, BorrowStatus, InventoryLine,
    },
};

#[derive(Clone)]
pub struct BorrowsRepository {
    pool: Pool<Postgres>,
}

impl BorrowsRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Get borrow record by ID
    pub async fn get_by_id(&self, id: i32) -> AppResult<Option<BorrowRecord>> {
        let record = sqlx::query_as::<_, BorrowRecord>("SELECT * FROM borrow_history WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    /// List records matching every set filter, oldest first
    pub async fn list(&self, filter: &BorrowFilter) -> AppResult<Vec<BorrowRecord>> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT * FROM borrow_history WHERE TRUE");

        if let Some(ref phone) = filter.phone {
            builder.push(" AND phone = ").push_bind(phone);
        }
        if let Some(city_id) = filter.city_id {
            builder.push(" AND city_id = ").push_bind(city_id);
        }
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(flag) = filter.reconcile_required {
            builder.push(" AND reconcile_required = ").push_bind(flag);
        }
        if let Some(before) = filter.borrowed_before {
            builder.push(" AND borrow_date < ").push_bind(before);
        }
        builder.push(" ORDER BY borrow_date, id");

        let records = builder
            .build_query_as::<BorrowRecord>()
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }

    /// Reserve stock and insert the record in one transaction
    pub async fn reserve_and_record(
        &self,
        record: &NewBorrowRecord,
        retries: u32,
    ) -> AppResult<Reservation> {
        let mut tx = self.pool.begin().await?;

        let line = inventory::reserve(
            &mut tx,
            record.city_id,
            record.equipment_id,
            record.quantity,
            retries,
        )
        .await?;
        let inserted = insert_record(&mut tx, record, &line).await?;

        tx.commit().await?;

        Ok(Reservation {
            record: inserted,
            remaining: line.quantity,
        })
    }

    /// Apply a borrower return report
    pub async fn apply(&self, id: i32, change: &BorrowChange) -> AppResult<Option<BorrowRecord>> {
        let BorrowChange::ReportReturn { condition, notes, at } = change else {
            return Err(AppError::Internal(
                "Returns that release stock go through return_and_release".to_string(),
            ));
        };

        let record = sqlx::query_as::<_, BorrowRecord>(
            r#"
            UPDATE borrow_history
            SET status = $1, return_date = $2, equipment_status = $3, faulty_notes = $4
            WHERE id = $5 AND status = ANY($6::text[])
            RETURNING *
            "#,
        )
        .bind(change.target())
        .bind(at)
        .bind(condition)
        .bind(notes)
        .bind(id)
        .bind(status_slugs(&change.allowed_from()))
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    /// Close a record and release its units in one transaction.
    ///
    /// A vanished inventory line does not block the return: the record is
    /// closed, flagged `reconcile_required` and reported as `line_missing`.
    pub async fn return_and_release(
        &self,
        id: i32,
        change: &BorrowChange,
    ) -> AppResult<Option<ReturnOutcome>> {
        let BorrowChange::Return { confirmed_by, condition, notes, at } = change else {
            return Err(AppError::Internal(
                "Return reports go through apply".to_string(),
            ));
        };

        let mut tx = self.pool.begin().await?;

        let record = sqlx::query_as::<_, BorrowRecord>(
            r#"
            UPDATE borrow_history
            SET status = $1,
                return_date = COALESCE(return_date, $2),
                equipment_status = COALESCE($3, equipment_status),
                faulty_notes = COALESCE($4, faulty_notes),
                confirmed_by = $5
            WHERE id = $6 AND status = ANY($7::text[])
            RETURNING *
            "#,
        )
        .bind(change.target())
        .bind(at)
        .bind(condition)
        .bind(notes)
        .bind(confirmed_by)
        .bind(id)
        .bind(status_slugs(&change.allowed_from()))
        .fetch_optional(&mut *tx)
        .await?;

        let Some(mut record) = record else {
            return Ok(None);
        };

        let (released, line_missing) =
            match inventory::is_consumable(&mut tx, record.city_id, record.equipment_id).await? {
                Some(true) => (0, false),
                Some(false) => {
                    match inventory::release(&mut tx, record.city_id, record.equipment_id, record.quantity)
                        .await?
                    {
                        Some(_) => (record.quantity, false),
                        None => (0, true),
                    }
                }
                None => (0, true),
            };

        if line_missing {
            record = sqlx::query_as::<_, BorrowRecord>(
                "UPDATE borrow_history SET reconcile_required = TRUE WHERE id = $1 RETURNING *",
            )
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(Some(ReturnOutcome {
            record,
            released,
            line_missing,
        }))
    }
}

/// Insert a record for a reservation just taken from `line`.
///
/// Consumables are never handed back, so their records start out returned.
pub(crate) async fn insert_record(
    conn: &mut PgConnection,
    record: &NewBorrowRecord,
    line: &InventoryLine,
) -> AppResult<BorrowRecord> {
    let (status, return_date) = if line.is_consumable {
        (BorrowStatus::Returned, Some(record.borrow_date))
    } else {
        (BorrowStatus::Borrowed, None)
    };

    let inserted = sqlx::query_as::<_, BorrowRecord>(
        r#"
        INSERT INTO borrow_history (
            request_id, name, phone, equipment_id, city_id, quantity,
            status, borrow_date, return_date
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING *
        "#,
    )
    .bind(record.request_id)
    .bind(&record.borrower.name)
    .bind(&record.borrower.phone)
    .bind(record.equipment_id)
    .bind(record.city_id)
    .bind(record.quantity)
    .bind(status)
    .bind(record.borrow_date)
    .bind(return_date)
    .fetch_one(&mut *conn)
    .await?;
    Ok(inserted)
}

fn status_slugs(statuses: &[BorrowStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}
