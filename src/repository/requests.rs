//! Requests repository for database operations

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, Pool, Postgres, QueryBuilder};

use super::{borrows, inventory};
use crate::{
    error::{AppError, AppResult},
    models::{
        borrow::NewBorrowRecord,
        inventory::Reservation,
        request::{NewRequest, RequestChange, RequestQuery},
        Borrower, Request, RequestItem, RequestStatus, RequestWithItems,
    },
};

#[derive(Clone)]
pub struct RequestsRepository {
    pool: Pool<Postgres>,
}

impl RequestsRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Insert a pending request and its items
    pub async fn create(&self, new: &NewRequest, now: DateTime<Utc>) -> AppResult<RequestWithItems> {
        let mut tx = self.pool.begin().await?;

        let request = sqlx::query_as::<_, Request>(
            r#"
            INSERT INTO requests (city_id, borrower_name, borrower_phone, status, notes, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            RETURNING *
            "#,
        )
        .bind(new.city_id)
        .bind(&new.borrower_name)
        .bind(&new.borrower_phone)
        .bind(RequestStatus::Pending)
        .bind(&new.notes)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        let mut items = Vec::with_capacity(new.items.len());
        for (equipment_id, quantity) in &new.items {
            let item = sqlx::query_as::<_, RequestItem>(
                r#"
                INSERT INTO request_items (request_id, equipment_id, quantity)
                VALUES ($1, $2, $3)
                RETURNING *
                "#,
            )
            .bind(request.id)
            .bind(equipment_id)
            .bind(quantity)
            .fetch_one(&mut *tx)
            .await?;
            items.push(item);
        }

        tx.commit().await?;

        Ok(RequestWithItems { request, items })
    }

    /// Get request by ID, with items
    pub async fn get_by_id(&self, id: i32) -> AppResult<Option<RequestWithItems>> {
        let request = sqlx::query_as::<_, Request>("SELECT * FROM requests WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        self.with_items(request).await
    }

    /// Get request by the hash of its pickup token
    pub async fn get_by_token_hash(&self, token_hash: &str) -> AppResult<Option<RequestWithItems>> {
        let request = sqlx::query_as::<_, Request>("SELECT * FROM requests WHERE token_hash = $1")
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await?;
        self.with_items(request).await
    }

    /// List requests, newest first
    pub async fn list(&self, query: &RequestQuery) -> AppResult<Vec<Request>> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT * FROM requests WHERE TRUE");
        if let Some(city_id) = query.city_id {
            builder.push(" AND city_id = ").push_bind(city_id);
        }
        if let Some(status) = query.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        builder.push(" ORDER BY created_at DESC, id DESC");

        let requests = builder
            .build_query_as::<Request>()
            .fetch_all(&self.pool)
            .await?;
        Ok(requests)
    }

    /// Apply a status change guarded by the expected current status
    pub async fn apply(
        &self,
        id: i32,
        change: &RequestChange,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Request>> {
        let expected = change.expected();
        let target = change.target();
        if !change.permits(expected) {
            return Ok(None);
        }

        let query = match change {
            RequestChange::Approve { token_hash, expires_at, approved_by } => sqlx::query_as::<_, Request>(
                r#"
                UPDATE requests
                SET status = $1, token_hash = $2, expires_at = $3, approved_by = $4,
                    approved_at = $5, extended_minutes = 0, updated_at = $5
                WHERE id = $6 AND status = $7
                RETURNING *
                "#,
            )
            .bind(target)
            .bind(token_hash)
            .bind(expires_at)
            .bind(approved_by)
            .bind(now)
            .bind(id)
            .bind(expected),
            RequestChange::Reject { reason } => sqlx::query_as::<_, Request>(
                r#"
                UPDATE requests
                SET status = $1, rejected_reason = $2, updated_at = $3
                WHERE id = $4 AND status = $5
                RETURNING *
                "#,
            )
            .bind(target)
            .bind(reason)
            .bind(now)
            .bind(id)
            .bind(expected),
            RequestChange::Cancel { reason } => sqlx::query_as::<_, Request>(
                r#"
                UPDATE requests
                SET status = $1, cancelled_reason = $2, token_hash = NULL, updated_at = $3
                WHERE id = $4 AND status = $5
                RETURNING *
                "#,
            )
            .bind(target)
            .bind(reason)
            .bind(now)
            .bind(id)
            .bind(expected),
            RequestChange::Withdraw => sqlx::query_as::<_, Request>(
                r#"
                UPDATE requests
                SET status = $1, token_hash = NULL, updated_at = $2
                WHERE id = $3 AND status = $4
                RETURNING *
                "#,
            )
            .bind(target)
            .bind(now)
            .bind(id)
            .bind(expected),
            RequestChange::Extend { minutes, max_total, now: at } => sqlx::query_as::<_, Request>(
                r#"
                UPDATE requests
                SET expires_at = expires_at + make_interval(mins => $1),
                    extended_minutes = extended_minutes + $1,
                    updated_at = $2
                WHERE id = $3 AND status = $4 AND expires_at >= $2
                  AND extended_minutes::bigint + $1 <= $5
                RETURNING *
                "#,
            )
            .bind(minutes)
            .bind(at)
            .bind(id)
            .bind(expected)
            .bind(max_total),
            RequestChange::Expire { .. } => sqlx::query_as::<_, Request>(
                r#"
                UPDATE requests
                SET status = $1, updated_at = $2
                WHERE id = $3 AND status = $4
                RETURNING *
                "#,
            )
            .bind(target)
            .bind(now)
            .bind(id)
            .bind(expected),
        };

        let request = query.fetch_optional(&self.pool).await?;
        Ok(request)
    }

    /// Fulfill an approved request in one transaction.
    ///
    /// The conditional status update locks the row first, so a concurrent
    /// fulfill waits and then finds the request no longer approved. Any
    /// reservation failure drops the transaction and nothing is kept.
    pub async fn fulfill(
        &self,
        id: i32,
        now: DateTime<Utc>,
        retries: u32,
    ) -> AppResult<Option<Vec<Reservation>>> {
        let mut tx = self.pool.begin().await?;

        let request = sqlx::query_as::<_, Request>(
            r#"
            UPDATE requests
            SET status = $1, fulfilled_at = $2, token_hash = NULL, updated_at = $2
            WHERE id = $3 AND status = $4 AND expires_at >= $2
            RETURNING *
            "#,
        )
        .bind(RequestStatus::Fulfilled)
        .bind(now)
        .bind(id)
        .bind(RequestStatus::Approved)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(request) = request else {
            return Ok(None);
        };

        let items = items_of(&mut tx, request.id).await?;
        let borrower = Borrower {
            name: request.borrower_name.clone(),
            phone: request.borrower_phone.clone(),
        };

        let mut reservations = Vec::new();
        for item in &items {
            let consumable = inventory::is_consumable(&mut tx, request.city_id, item.equipment_id)
                .await?
                .ok_or_else(|| {
                    AppError::NotFound(format!(
                        "Equipment {} is not stocked in city {}",
                        item.equipment_id, request.city_id
                    ))
                })?;

            // One record per physical unit; a consumable line is one deduction
            let (records, per_record) = if consumable {
                (1, item.quantity)
            } else {
                (item.quantity, 1)
            };

            for _ in 0..records {
                let new = NewBorrowRecord {
                    request_id: Some(request.id),
                    borrower: borrower.clone(),
                    equipment_id: item.equipment_id,
                    city_id: request.city_id,
                    quantity: per_record,
                    borrow_date: now,
                };
                let line =
                    inventory::reserve(&mut tx, request.city_id, item.equipment_id, per_record, retries)
                        .await?;
                let record = borrows::insert_record(&mut tx, &new, &line).await?;
                reservations.push(Reservation {
                    record,
                    remaining: line.quantity,
                });
            }
        }

        tx.commit().await?;

        Ok(Some(reservations))
    }

    async fn with_items(&self, request: Option<Request>) -> AppResult<Option<RequestWithItems>> {
        let Some(request) = request else {
            return Ok(None);
        };
        let mut conn = self.pool.acquire().await?;
        let items = items_of(&mut conn, request.id).await?;
        Ok(Some(RequestWithItems { request, items }))
    }
}

async fn items_of(conn: &mut PgConnection, request_id: i32) -> AppResult<Vec<RequestItem>> {
    let items = sqlx::query_as::<_, RequestItem>(
        "SELECT * FROM request_items WHERE request_id = $1 ORDER BY equipment_id",
    )
    .bind(request_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(items)
}
