//! Repository layer: the lending store contract and its backends
//!
//! Every method is one authoritative unit of work. Conditional writes take the
//! status the row must still hold and return `None` when that precondition no
//! longer holds, so the caller can tell a lost race from a missing row.

pub mod borrows;
pub mod inventory;
pub mod memory;
pub mod requests;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};

use crate::{
    error::AppResult,
    models::{
        borrow::{BorrowChange, BorrowFilter, NewBorrowRecord, ReturnOutcome},
        inventory::Reservation,
        request::{NewRequest, RequestChange, RequestQuery},
        BorrowRecord, InventoryLine, Request, RequestWithItems,
    },
};

pub use memory::MemoryStore;

/// Persistence contract of the lending engine
#[async_trait]
pub trait LendingStore: Send + Sync {
    async fn inventory_line(&self, city_id: i32, equipment_id: i32)
        -> AppResult<Option<InventoryLine>>;
    async fn city_inventory(&self, city_id: i32) -> AppResult<Vec<InventoryLine>>;

    async fn insert_request(&self, request: &NewRequest, now: DateTime<Utc>)
        -> AppResult<RequestWithItems>;
    async fn request_by_id(&self, id: i32) -> AppResult<Option<RequestWithItems>>;
    async fn request_by_token_hash(&self, token_hash: &str) -> AppResult<Option<RequestWithItems>>;
    async fn list_requests(&self, query: &RequestQuery) -> AppResult<Vec<Request>>;
    /// Apply `change` only if the request still holds `change.expected()`
    async fn update_request(
        &self,
        id: i32,
        change: &RequestChange,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Request>>;
    /// approved -> fulfilled plus one reservation and record per unit, all or nothing.
    ///
    /// Returns `None` when the request is no longer approved or has expired at `now`.
    async fn fulfill_request(
        &self,
        id: i32,
        now: DateTime<Utc>,
        retries: u32,
    ) -> AppResult<Option<Vec<Reservation>>>;

    /// Reserve stock and insert the owning record in one unit of work
    async fn reserve_and_record(
        &self,
        record: &NewBorrowRecord,
        retries: u32,
    ) -> AppResult<Reservation>;
    async fn borrow_record(&self, id: i32) -> AppResult<Option<BorrowRecord>>;
    async fn list_borrow_records(&self, filter: &BorrowFilter) -> AppResult<Vec<BorrowRecord>>;
    /// Apply a report-return change if the record is still in an allowed state
    async fn update_borrow_record(
        &self,
        id: i32,
        change: &BorrowChange,
    ) -> AppResult<Option<BorrowRecord>>;
    /// Mark returned and release the units in one unit of work
    async fn return_and_release(
        &self,
        id: i32,
        change: &BorrowChange,
    ) -> AppResult<Option<ReturnOutcome>>;

    async fn health_check(&self) -> AppResult<()>;
    fn backend_name(&self) -> &'static str;
}

/// Postgres-backed store holding the connection pool
#[derive(Clone)]
pub struct Repository {
    pub pool: Pool<Postgres>,
    pub requests: requests::RequestsRepository,
    pub borrows: borrows::BorrowsRepository,
    pub inventory: inventory::InventoryRepository,
}

impl Repository {
    /// Create a new repository with the given database pool
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            requests: requests::RequestsRepository::new(pool.clone()),
            borrows: borrows::BorrowsRepository::new(pool.clone()),
            inventory: inventory::InventoryRepository::new(pool.clone()),
            pool,
        }
    }
}

#[async_trait]
impl LendingStore for Repository {
    async fn inventory_line(
        &self,
        city_id: i32,
        equipment_id: i32,
    ) -> AppResult<Option<InventoryLine>> {
        self.inventory.get(city_id, equipment_id).await
    }

    async fn city_inventory(&self, city_id: i32) -> AppResult<Vec<InventoryLine>> {
        self.inventory.list_for_city(city_id).await
    }

    async fn insert_request(
        &self,
        request: &NewRequest,
        now: DateTime<Utc>,
    ) -> AppResult<RequestWithItems> {
        self.requests.create(request, now).await
    }

    async fn request_by_id(&self, id: i32) -> AppResult<Option<RequestWithItems>> {
        self.requests.get_by_id(id).await
    }

    async fn request_by_token_hash(&self, token_hash: &str) -> AppResult<Option<RequestWithItems>> {
        self.requests.get_by_token_hash(token_hash).await
    }

    async fn list_requests(&self, query: &RequestQuery) -> AppResult<Vec<Request>> {
        self.requests.list(query).await
    }

    async fn update_request(
        &self,
        id: i32,
        change: &RequestChange,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Request>> {
        self.requests.apply(id, change, now).await
    }

    async fn fulfill_request(
        &self,
        id: i32,
        now: DateTime<Utc>,
        retries: u32,
    ) -> AppResult<Option<Vec<Reservation>>> {
        self.requests.fulfill(id, now, retries).await
    }

    async fn reserve_and_record(
        &self,
        record: &NewBorrowRecord,
        retries: u32,
    ) -> AppResult<Reservation> {
        self.borrows.reserve_and_record(record, retries).await
    }

    async fn borrow_record(&self, id: i32) -> AppResult<Option<BorrowRecord>> {
        self.borrows.get_by_id(id).await
    }

    async fn list_borrow_records(&self, filter: &BorrowFilter) -> AppResult<Vec<BorrowRecord>> {
        self.borrows.list(filter).await
    }

    async fn update_borrow_record(
        &self,
        id: i32,
        change: &BorrowChange,
    ) -> AppResult<Option<BorrowRecord>> {
        self.borrows.apply(id, change).await
    }

    async fn return_and_release(
        &self,
        id: i32,
        change: &BorrowChange,
    ) -> AppResult<Option<ReturnOutcome>> {
        self.borrows.return_and_release(id, change).await
    }

    async fn health_check(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
