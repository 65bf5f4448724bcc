//! In-memory implementation of the lending store.
//!
//! All state lives behind one `tokio::sync::Mutex`, so every trait method is a
//! single critical section: reservations serialize and a multi-step write is
//! staged on a copy of the state that replaces the original only on success.
//! Nothing is durable; this backend is for local development and tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use tokio::sync::Mutex;

use super::LendingStore;
use crate::{
    error::{AppError, AppResult},
    models::{
        borrow::{BorrowChange, BorrowFilter, NewBorrowRecord, ReturnOutcome},
        inventory::Reservation,
        request::{NewRequest, RequestChange, RequestQuery},
        BorrowRecord, BorrowStatus, Borrower, InventoryLine, Request, RequestItem, RequestStatus,
        RequestWithItems,
    },
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    lines: BTreeMap<i32, InventoryLine>,
    requests: BTreeMap<i32, Request>,
    items: BTreeMap<i32, Vec<RequestItem>>,
    records: BTreeMap<i32, BorrowRecord>,
    next_line_id: i32,
    next_request_id: i32,
    next_record_id: i32,
}

impl MemoryState {
    fn line(&self, city_id: i32, equipment_id: i32) -> Option<&InventoryLine> {
        self.lines
            .values()
            .find(|l| l.city_id == city_id && l.equipment_id == equipment_id)
    }

    fn line_mut(&mut self, city_id: i32, equipment_id: i32) -> Option<&mut InventoryLine> {
        self.lines
            .values_mut()
            .find(|l| l.city_id == city_id && l.equipment_id == equipment_id)
    }

    fn with_items(&self, request: &Request) -> RequestWithItems {
        RequestWithItems {
            request: request.clone(),
            items: self.items.get(&request.id).cloned().unwrap_or_default(),
        }
    }

    fn reserve(&mut self, city_id: i32, equipment_id: i32, amount: i32) -> AppResult<InventoryLine> {
        let line = self.line_mut(city_id, equipment_id).ok_or_else(|| {
            AppError::NotFound(format!(
                "Equipment {} is not stocked in city {}",
                equipment_id, city_id
            ))
        })?;

        line.check_reserve(amount)?;

        line.quantity -= amount;
        line.version += 1;
        Ok(line.clone())
    }

    fn insert_record(&mut self, new: &NewBorrowRecord, line: &InventoryLine) -> BorrowRecord {
        self.next_record_id += 1;
        let (status, return_date) = if line.is_consumable {
            (BorrowStatus::Returned, Some(new.borrow_date))
        } else {
            (BorrowStatus::Borrowed, None)
        };
        let record = BorrowRecord {
            id: self.next_record_id,
            request_id: new.request_id,
            name: new.borrower.name.clone(),
            phone: new.borrower.phone.clone(),
            equipment_id: new.equipment_id,
            city_id: new.city_id,
            quantity: new.quantity,
            status,
            borrow_date: new.borrow_date,
            return_date,
            equipment_status: None,
            faulty_notes: None,
            confirmed_by: None,
            reconcile_required: false,
        };
        self.records.insert(record.id, record.clone());
        record
    }
}

/// Process-local lending store
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or overwrite the stock line of one equipment type in a city
    pub async fn put_line(
        &self,
        city_id: i32,
        equipment_id: i32,
        quantity: i32,
        is_consumable: bool,
    ) -> InventoryLine {
        let mut state = self.state.lock().await;
        if let Some(line) = state.line_mut(city_id, equipment_id) {
            line.quantity = quantity;
            line.is_consumable = is_consumable;
            line.version += 1;
            return line.clone();
        }
        state.next_line_id += 1;
        let line = InventoryLine {
            id: state.next_line_id,
            city_id,
            equipment_id,
            quantity,
            is_consumable,
            version: 0,
        };
        state.lines.insert(line.id, line.clone());
        line
    }

    /// Drop a stock line, as the city administration does when it retires equipment
    pub async fn remove_line(&self, city_id: i32, equipment_id: i32) -> bool {
        let mut state = self.state.lock().await;
        let id = state.line(city_id, equipment_id).map(|l| l.id);
        match id {
            Some(id) => state.lines.remove(&id).is_some(),
            None => false,
        }
    }
}

#[async_trait]
impl LendingStore for MemoryStore {
    async fn inventory_line(
        &self,
        city_id: i32,
        equipment_id: i32,
    ) -> AppResult<Option<InventoryLine>> {
        Ok(self.state.lock().await.line(city_id, equipment_id).cloned())
    }

    async fn city_inventory(&self, city_id: i32) -> AppResult<Vec<InventoryLine>> {
        let state = self.state.lock().await;
        let mut lines: Vec<_> = state
            .lines
            .values()
            .filter(|l| l.city_id == city_id)
            .cloned()
            .collect();
        lines.sort_by_key(|l| l.equipment_id);
        Ok(lines)
    }

    async fn insert_request(
        &self,
        new: &NewRequest,
        now: DateTime<Utc>,
    ) -> AppResult<RequestWithItems> {
        let mut state = self.state.lock().await;
        state.next_request_id += 1;
        let request = Request {
            id: state.next_request_id,
            city_id: new.city_id,
            borrower_name: new.borrower_name.clone(),
            borrower_phone: new.borrower_phone.clone(),
            status: RequestStatus::Pending,
            token_hash: None,
            expires_at: None,
            extended_minutes: 0,
            notes: new.notes.clone(),
            approved_by: None,
            approved_at: None,
            rejected_reason: None,
            cancelled_reason: None,
            fulfilled_at: None,
            created_at: now,
            updated_at: now,
        };
        let items: Vec<RequestItem> = new
            .items
            .iter()
            .map(|(equipment_id, quantity)| RequestItem {
                request_id: request.id,
                equipment_id: *equipment_id,
                quantity: *quantity,
            })
            .collect();

        state.items.insert(request.id, items.clone());
        state.requests.insert(request.id, request.clone());
        Ok(RequestWithItems { request, items })
    }

    async fn request_by_id(&self, id: i32) -> AppResult<Option<RequestWithItems>> {
        let state = self.state.lock().await;
        Ok(state.requests.get(&id).map(|r| state.with_items(r)))
    }

    async fn request_by_token_hash(&self, token_hash: &str) -> AppResult<Option<RequestWithItems>> {
        let state = self.state.lock().await;
        Ok(state
            .requests
            .values()
            .find(|r| r.token_hash.as_deref() == Some(token_hash))
            .map(|r| state.with_items(r)))
    }

    async fn list_requests(&self, query: &RequestQuery) -> AppResult<Vec<Request>> {
        let state = self.state.lock().await;
        Ok(state
            .requests
            .values()
            .rev()
            .filter(|r| query.city_id.map_or(true, |c| r.city_id == c))
            .filter(|r| query.status.map_or(true, |s| r.status == s))
            .cloned()
            .collect())
    }

    async fn update_request(
        &self,
        id: i32,
        change: &RequestChange,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Request>> {
        let mut state = self.state.lock().await;
        let Some(request) = state.requests.get_mut(&id) else {
            return Ok(None);
        };
        if !change.permits(request.status) {
            return Ok(None);
        }

        match change {
            RequestChange::Approve { token_hash, expires_at, approved_by } => {
                request.token_hash = Some(token_hash.clone());
                request.expires_at = Some(*expires_at);
                request.approved_by = Some(approved_by.clone());
                request.approved_at = Some(now);
                request.extended_minutes = 0;
            }
            RequestChange::Reject { reason } => {
                request.rejected_reason = Some(reason.clone());
            }
            RequestChange::Cancel { reason } => {
                request.cancelled_reason = Some(reason.clone());
                request.token_hash = None;
            }
            RequestChange::Withdraw => {
                request.token_hash = None;
            }
            RequestChange::Extend { minutes, max_total, now: at } => {
                let Some(expires_at) = request.expires_at.filter(|exp| *exp >= *at) else {
                    return Ok(None);
                };
                let Some(total) = request
                    .extended_minutes
                    .checked_add(*minutes)
                    .filter(|total| total <= max_total)
                else {
                    return Ok(None);
                };
                let Some(extended) =
                    expires_at.checked_add_signed(Duration::minutes(i64::from(*minutes)))
                else {
                    return Ok(None);
                };
                request.expires_at = Some(extended);
                request.extended_minutes = total;
            }
            RequestChange::Expire { .. } => {}
        }
        request.status = change.target();
        request.updated_at = now;
        Ok(Some(request.clone()))
    }

    async fn fulfill_request(
        &self,
        id: i32,
        now: DateTime<Utc>,
        _retries: u32,
    ) -> AppResult<Option<Vec<Reservation>>> {
        let mut state = self.state.lock().await;
        let Some(request) = state.requests.get(&id).cloned() else {
            return Ok(None);
        };
        if request.status != RequestStatus::Approved || request.is_expired_at(now) {
            return Ok(None);
        }

        // Stage on a copy; the live state is replaced only when every unit is reserved
        let mut draft = state.clone();
        let items = draft.items.get(&id).cloned().unwrap_or_default();
        let borrower = Borrower {
            name: request.borrower_name.clone(),
            phone: request.borrower_phone.clone(),
        };

        let mut reservations = Vec::new();
        for item in &items {
            let consumable = draft
                .line(request.city_id, item.equipment_id)
                .map(|l| l.is_consumable)
                .ok_or_else(|| {
                    AppError::NotFound(format!(
                        "Equipment {} is not stocked in city {}",
                        item.equipment_id, request.city_id
                    ))
                })?;
            let (records, per_record) = if consumable {
                (1, item.quantity)
            } else {
                (item.quantity, 1)
            };

            for _ in 0..records {
                let new = NewBorrowRecord {
                    request_id: Some(id),
                    borrower: borrower.clone(),
                    equipment_id: item.equipment_id,
                    city_id: request.city_id,
                    quantity: per_record,
                    borrow_date: now,
                };
                let line = draft.reserve(request.city_id, item.equipment_id, per_record)?;
                let record = draft.insert_record(&new, &line);
                reservations.push(Reservation {
                    record,
                    remaining: line.quantity,
                });
            }
        }

        if let Some(stored) = draft.requests.get_mut(&id) {
            stored.status = RequestStatus::Fulfilled;
            stored.fulfilled_at = Some(now);
            stored.token_hash = None;
            stored.updated_at = now;
        }
        *state = draft;

        Ok(Some(reservations))
    }

    async fn reserve_and_record(
        &self,
        record: &NewBorrowRecord,
        _retries: u32,
    ) -> AppResult<Reservation> {
        let mut state = self.state.lock().await;
        let line = state.reserve(record.city_id, record.equipment_id, record.quantity)?;
        let inserted = state.insert_record(record, &line);
        Ok(Reservation {
            record: inserted,
            remaining: line.quantity,
        })
    }

    async fn borrow_record(&self, id: i32) -> AppResult<Option<BorrowRecord>> {
        Ok(self.state.lock().await.records.get(&id).cloned())
    }

    async fn list_borrow_records(&self, filter: &BorrowFilter) -> AppResult<Vec<BorrowRecord>> {
        let state = self.state.lock().await;
        let mut records: Vec<_> = state
            .records
            .values()
            .filter(|r| filter.phone.as_ref().map_or(true, |p| &r.phone == p))
            .filter(|r| filter.city_id.map_or(true, |c| r.city_id == c))
            .filter(|r| filter.status.map_or(true, |s| r.status == s))
            .filter(|r| filter.reconcile_required.map_or(true, |f| r.reconcile_required == f))
            .filter(|r| filter.borrowed_before.map_or(true, |b| r.borrow_date < b))
            .cloned()
            .collect();
        records.sort_by_key(|r| (r.borrow_date, r.id));
        Ok(records)
    }

    async fn update_borrow_record(
        &self,
        id: i32,
        change: &BorrowChange,
    ) -> AppResult<Option<BorrowRecord>> {
        let BorrowChange::ReportReturn { condition, notes, at } = change else {
            return Err(AppError::Internal(
                "Returns that release stock go through return_and_release".to_string(),
            ));
        };

        let mut state = self.state.lock().await;
        let Some(record) = state.records.get_mut(&id) else {
            return Ok(None);
        };
        if !change.permits(record.status) {
            return Ok(None);
        }
        record.status = change.target();
        record.return_date = Some(*at);
        record.equipment_status = Some(*condition);
        record.faulty_notes = notes.clone();
        Ok(Some(record.clone()))
    }

    async fn return_and_release(
        &self,
        id: i32,
        change: &BorrowChange,
    ) -> AppResult<Option<ReturnOutcome>> {
        let BorrowChange::Return { confirmed_by, condition, notes, at } = change else {
            return Err(AppError::Internal("Return reports go through apply".to_string()));
        };

        let mut state = self.state.lock().await;
        let Some(current) = state.records.get(&id).cloned() else {
            return Ok(None);
        };
        if !change.permits(current.status) {
            return Ok(None);
        }

        let (released, line_missing) = match state.line_mut(current.city_id, current.equipment_id) {
            Some(line) if line.is_consumable => (0, false),
            Some(line) => {
                line.quantity += current.quantity;
                line.version += 1;
                (current.quantity, false)
            }
            None => (0, true),
        };

        let Some(record) = state.records.get_mut(&id) else {
            return Ok(None);
        };
        record.status = change.target();
        record.return_date = record.return_date.or(Some(*at));
        if condition.is_some() {
            record.equipment_status = *condition;
        }
        if notes.is_some() {
            record.faulty_notes = notes.clone();
        }
        record.confirmed_by = Some(confirmed_by.clone());
        if line_missing {
            record.reconcile_required = true;
        }

        Ok(Some(ReturnOutcome {
            record: record.clone(),
            released,
            line_missing,
        }))
    }

    async fn health_check(&self) -> AppResult<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
