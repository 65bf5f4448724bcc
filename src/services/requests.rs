//! Request lifecycle: submission, review, pickup tokens and fulfillment

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use validator::Validate;

use super::{
    inventory::InventoryLedger,
    notifications::{pickup_url, NotificationIntent},
    tokens::{PlainToken, Sensitive, TokenAuthority},
    LendingContext,
};
use crate::{
    error::{AppError, AppResult},
    models::{
        request::{normalize_phone, CreateRequest, NewRequest, RequestChange, RequestQuery},
        BorrowRecord, Request, RequestStatus, RequestWithItems,
    },
};

/// Approved request with the pickup token handed to the manager
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Approval {
    pub request: Request,
    #[schema(value_type = String)]
    pub token: PlainToken,
    #[schema(value_type = String)]
    pub pickup_url: Sensitive<String>,
}

/// Fulfilled request and the records it created
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Fulfillment {
    pub request: RequestWithItems,
    pub records: Vec<BorrowRecord>,
}

#[derive(Clone)]
pub struct RequestsService {
    ctx: LendingContext,
    inventory: InventoryLedger,
    tokens: TokenAuthority,
    pickup_base_url: String,
}

impl RequestsService {
    pub fn new(ctx: LendingContext, inventory: InventoryLedger, pickup_base_url: String) -> Self {
        let tokens = TokenAuthority::new(ctx.config.token_ttl_minutes);
        Self {
            ctx,
            inventory,
            tokens,
            pickup_base_url,
        }
    }

    /// Submit a new request after a non-reserving availability check
    pub async fn create(&self, input: CreateRequest) -> AppResult<RequestWithItems> {
        input.validate()?;
        let new = NewRequest::from_input(input);
        if new.borrower_name.is_empty() {
            return Err(AppError::Validation("Name is required".to_string()));
        }

        for (equipment_id, quantity) in &new.items {
            self.inventory
                .soft_check(new.city_id, *equipment_id, *quantity)
                .await?;
        }

        let now = self.ctx.clock.now();
        let created = self
            .ctx
            .call("insert_request", self.ctx.store.insert_request(&new, now))
            .await?;

        tracing::info!(
            request_id = created.request.id,
            city_id = created.request.city_id,
            items = created.items.len(),
            "Request submitted"
        );
        self.ctx
            .notify(NotificationIntent::RequestSubmitted {
                request_id: created.request.id,
                city_id: created.request.city_id,
                borrower_name: created.request.borrower_name.clone(),
                item_count: created.items.len(),
            })
            .await;

        Ok(created)
    }

    /// Get a request by ID, expiring it first if its token has lapsed
    pub async fn get(&self, id: i32) -> AppResult<RequestWithItems> {
        let found = self.load(id).await?;
        let now = self.ctx.clock.now();
        self.expire_if_due(found, now).await
    }

    pub async fn list(&self, query: &RequestQuery) -> AppResult<Vec<Request>> {
        self.ctx
            .call("list_requests", self.ctx.store.list_requests(query))
            .await
    }

    /// pending -> approved, minting the pickup token
    pub async fn approve(&self, id: i32, manager: &str) -> AppResult<Approval> {
        let now = self.ctx.clock.now();
        let token = self.tokens.generate();
        let change = RequestChange::Approve {
            token_hash: TokenAuthority::hash(token.expose()),
            expires_at: self.tokens.expiry_from(now),
            approved_by: manager.to_string(),
        };

        let Some(request) = self.apply(id, &change, now).await? else {
            return self.refused(id, "approve", change.expected(), now).await;
        };

        let link = Sensitive(pickup_url(&self.pickup_base_url, &token));
        tracing::info!(
            request_id = request.id,
            city_id = request.city_id,
            approved_by = manager,
            "Request approved"
        );
        if let Some(expires_at) = request.expires_at {
            self.ctx
                .notify(NotificationIntent::RequestApproved {
                    request_id: request.id,
                    city_id: request.city_id,
                    borrower_phone: request.borrower_phone.clone(),
                    token: token.clone(),
                    pickup_url: link.clone(),
                    expires_at,
                })
                .await;
        }

        Ok(Approval {
            request,
            token,
            pickup_url: link,
        })
    }

    /// pending -> rejected
    pub async fn reject(&self, id: i32, manager: &str, reason: &str) -> AppResult<Request> {
        let reason = required_reason(reason)?;
        let now = self.ctx.clock.now();
        let change = RequestChange::Reject {
            reason: reason.clone(),
        };

        let Some(request) = self.apply(id, &change, now).await? else {
            return self.refused(id, "reject", change.expected(), now).await;
        };

        tracing::info!(request_id = request.id, rejected_by = manager, "Request rejected");
        self.ctx
            .notify(NotificationIntent::RequestRejected {
                request_id: request.id,
                borrower_phone: request.borrower_phone.clone(),
                reason,
            })
            .await;
        Ok(request)
    }

    /// approved -> cancelled; the token stops verifying immediately
    pub async fn cancel(&self, id: i32, manager: &str, reason: &str) -> AppResult<Request> {
        let reason = required_reason(reason)?;
        let now = self.ctx.clock.now();
        let change = RequestChange::Cancel {
            reason: reason.clone(),
        };

        let Some(request) = self.apply(id, &change, now).await? else {
            return self.refused(id, "cancel", change.expected(), now).await;
        };

        tracing::info!(request_id = request.id, cancelled_by = manager, "Request cancelled");
        self.ctx
            .notify(NotificationIntent::RequestCancelled {
                request_id: request.id,
                borrower_phone: request.borrower_phone.clone(),
                reason,
            })
            .await;
        Ok(request)
    }

    /// Borrower takes back a request that has not been reviewed yet
    pub async fn withdraw(&self, id: i32, phone: &str) -> AppResult<Request> {
        let current = self.load(id).await?;
        if current.request.borrower_phone != normalize_phone(phone) {
            return Err(AppError::NotFound(format!("Request {} not found", id)));
        }

        let now = self.ctx.clock.now();
        let change = RequestChange::Withdraw;
        let Some(request) = self.apply(id, &change, now).await? else {
            return self.refused(id, "withdraw", change.expected(), now).await;
        };

        tracing::info!(request_id = request.id, "Request withdrawn by borrower");
        Ok(request)
    }

    /// Push the expiry of an approved token further out
    pub async fn extend(&self, id: i32, minutes: i32, manager: &str) -> AppResult<Request> {
        if minutes < 1 {
            return Err(AppError::Validation(
                "Extension must be at least one minute".to_string(),
            ));
        }

        let now = self.ctx.clock.now();
        let max_total = self.max_extension_total();
        let change = RequestChange::Extend { minutes, max_total, now };
        let Some(request) = self.apply(id, &change, now).await? else {
            let current = self.expire_if_due(self.load(id).await?, now).await?;
            let granted = current.request.extended_minutes;
            if current.request.status == RequestStatus::Approved
                && i64::from(granted) + i64::from(minutes) > i64::from(max_total)
            {
                return Err(AppError::Validation(format!(
                    "Extensions are capped at {} minutes per token ({} already granted)",
                    max_total, granted
                )));
            }
            return self.refused(id, "extend", change.expected(), now).await;
        };

        tracing::info!(
            request_id = request.id,
            minutes,
            extended_by = manager,
            expires_at = ?request.expires_at,
            "Token extended"
        );
        Ok(request)
    }

    /// Resolve a presented token to its live request
    pub async fn verify(&self, token: &PlainToken) -> AppResult<RequestWithItems> {
        let hash = TokenAuthority::hash(token.expose());
        let found = self
            .ctx
            .call("request_by_token_hash", self.ctx.store.request_by_token_hash(&hash))
            .await?
            .filter(|r| {
                r.request
                    .token_hash
                    .as_deref()
                    .map_or(false, |stored| TokenAuthority::verify(token.expose(), stored))
            })
            .ok_or_else(unknown_token)?;

        match found.request.status {
            RequestStatus::Cancelled | RequestStatus::Rejected | RequestStatus::Fulfilled => {
                return Err(unknown_token());
            }
            RequestStatus::Expired => return Err(expired(found.request.id)),
            RequestStatus::Pending | RequestStatus::Approved => {}
        }

        let now = self.ctx.clock.now();
        let checked = self.expire_if_due(found, now).await?;
        if checked.request.status == RequestStatus::Expired {
            return Err(expired(checked.request.id));
        }
        Ok(checked)
    }

    /// approved -> fulfilled, reserving every unit in one unit of work
    pub async fn fulfill(&self, id: i32) -> AppResult<Fulfillment> {
        let now = self.ctx.clock.now();
        let outcome = self
            .ctx
            .call(
                "fulfill_request",
                self.ctx
                    .store
                    .fulfill_request(id, now, self.ctx.config.reservation_retries),
            )
            .await?;

        let Some(reservations) = outcome else {
            return self.refused(id, "fulfill", RequestStatus::Approved, now).await;
        };

        let request = self.load(id).await?;
        tracing::info!(
            request_id = id,
            city_id = request.request.city_id,
            records = reservations.len(),
            "Request fulfilled"
        );
        self.inventory.report_low_stock(&reservations).await;

        Ok(Fulfillment {
            request,
            records: reservations.into_iter().map(|r| r.record).collect(),
        })
    }

    async fn load(&self, id: i32) -> AppResult<RequestWithItems> {
        self.ctx
            .call("request_by_id", self.ctx.store.request_by_id(id))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Request {} not found", id)))
    }

    async fn apply(
        &self,
        id: i32,
        change: &RequestChange,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Request>> {
        self.ctx
            .call("update_request", self.ctx.store.update_request(id, change, now))
            .await
    }

    /// Flip an open request whose token has lapsed to `expired`
    async fn expire_if_due(
        &self,
        mut found: RequestWithItems,
        now: DateTime<Utc>,
    ) -> AppResult<RequestWithItems> {
        let status = found.request.status;
        if status.is_terminal() || !found.request.is_expired_at(now) {
            return Ok(found);
        }

        let change = RequestChange::Expire { from: status };
        match self.apply(found.request.id, &change, now).await? {
            Some(expired) => {
                tracing::info!(request_id = expired.id, from = %status, "Request expired");
                found.request = expired;
                Ok(found)
            }
            // Someone else moved it first; report what is stored now
            None => self.load(found.request.id).await,
        }
    }

    /// Cumulative extension allowed per token, bounded by the column type
    fn max_extension_total(&self) -> i32 {
        self.ctx
            .config
            .max_extension_minutes
            .map_or(i32::MAX, |cap| i32::try_from(cap.max(0)).unwrap_or(i32::MAX))
    }

    /// Explain why a conditional write from `from` did not apply.
    ///
    /// Only a change out of `approved` can have been stopped by a lapsed token;
    /// any other refusal is a plain state conflict.
    async fn refused<T>(
        &self,
        id: i32,
        action: &str,
        from: RequestStatus,
        now: DateTime<Utc>,
    ) -> AppResult<T> {
        let mut current = self.load(id).await?;
        if from == RequestStatus::Approved {
            current = self.expire_if_due(current, now).await?;
            if current.request.status == RequestStatus::Expired {
                return Err(expired(id));
            }
        }
        let status = current.request.status;
        tracing::debug!(request_id = id, action, %status, "Request transition refused");
        Err(AppError::InvalidStateTransition(format!(
            "Cannot {} request {} while it is {}",
            action, id, status
        )))
    }
}

fn required_reason(reason: &str) -> AppResult<String> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(AppError::Validation("A reason is required".to_string()));
    }
    Ok(reason.to_string())
}

fn unknown_token() -> AppError {
    AppError::NotFound("Unknown or revoked token".to_string())
}

fn expired(id: i32) -> AppError {
    AppError::Expired(format!("The pickup token for request {} has expired", id))
}
