//! Borrow record endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::{
    error::AppResult,
    models::{
        borrow::{DirectBorrowRequest, MarkReturnedRequest, OverdueQuery, OverrideReturnRequest},
        BorrowRecord, OverdueItem,
    },
    AppState,
};

use super::AuthenticatedStaff;

/// Reconciliation list filter
#[derive(Deserialize, IntoParams, ToSchema)]
pub struct ReconcileQuery {
    pub city_id: Option<i32>,
}

/// Borrower history lookup
#[derive(Deserialize, IntoParams, ToSchema)]
pub struct HistoryQuery {
    pub phone: String,
}

/// Walk-up borrow at the cabinet
#[utoipa::path(
    post,
    path = "/borrows",
    tag = "borrows",
    security(("bearer_auth" = [])),
    request_body = DirectBorrowRequest,
    responses(
        (status = 201, description = "Borrow recorded", body = BorrowRecord),
        (status = 400, description = "Invalid request or borrower has overdue items"),
        (status = 404, description = "Equipment not stocked in this city"),
        (status = 409, description = "Not enough stock")
    )
)]
pub async fn direct_borrow(
    State(state): State<AppState>,
    AuthenticatedStaff(claims): AuthenticatedStaff,
    Json(request): Json<DirectBorrowRequest>,
) -> AppResult<(StatusCode, Json<BorrowRecord>)> {
    claims.require_volunteer()?;
    claims.require_city(request.city_id)?;

    let record = state.services.borrows.direct_borrow(request).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// Get borrow record details
#[utoipa::path(
    get,
    path = "/borrows/{id}",
    tag = "borrows",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Borrow record ID")),
    responses(
        (status = 200, description = "Borrow record", body = BorrowRecord),
        (status = 404, description = "Record not found")
    )
)]
pub async fn get_borrow(
    State(state): State<AppState>,
    AuthenticatedStaff(claims): AuthenticatedStaff,
    Path(id): Path<i32>,
) -> AppResult<Json<BorrowRecord>> {
    claims.require_volunteer()?;
    let record = state.services.borrows.get(id).await?;
    claims.require_city(record.city_id)?;
    Ok(Json(record))
}

/// Borrower reports the equipment back in the cabinet
#[utoipa::path(
    post,
    path = "/borrows/{id}/return",
    tag = "borrows",
    params(("id" = i32, Path, description = "Borrow record ID")),
    request_body = MarkReturnedRequest,
    responses(
        (status = 200, description = "Return reported, awaiting confirmation", body = BorrowRecord),
        (status = 400, description = "Faulty report without notes"),
        (status = 404, description = "Record not found"),
        (status = 409, description = "Record is not borrowed")
    )
)]
pub async fn mark_returned(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(request): Json<MarkReturnedRequest>,
) -> AppResult<Json<BorrowRecord>> {
    request.validate()?;
    let borrows = &state.services.borrows;
    borrows.get_for_borrower(id, &request.phone).await?;

    let record = borrows
        .mark_returned_by_borrower(id, request.condition, request.notes)
        .await?;
    Ok(Json(record))
}

/// Confirm a return and put the equipment back in stock
#[utoipa::path(
    post,
    path = "/borrows/{id}/confirm",
    tag = "borrows",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Borrow record ID")),
    responses(
        (status = 200, description = "Return confirmed", body = BorrowRecord),
        (status = 409, description = "Record already returned"),
        (status = 500, description = "Returned but inventory needs reconciliation", body = crate::error::ErrorResponse)
    )
)]
pub async fn confirm_return(
    State(state): State<AppState>,
    AuthenticatedStaff(claims): AuthenticatedStaff,
    Path(id): Path<i32>,
) -> AppResult<Json<BorrowRecord>> {
    claims.require_manager()?;
    let record = state.services.borrows.get(id).await?;
    claims.require_city(record.city_id)?;

    let returned = state.services.borrows.confirm_return(id, &claims.sub).await?;
    Ok(Json(returned))
}

/// Close a record with the manager's own condition report
#[utoipa::path(
    post,
    path = "/borrows/{id}/override-return",
    tag = "borrows",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Borrow record ID")),
    request_body = OverrideReturnRequest,
    responses(
        (status = 200, description = "Return recorded", body = BorrowRecord),
        (status = 400, description = "Faulty report without notes"),
        (status = 409, description = "Record already returned")
    )
)]
pub async fn override_return(
    State(state): State<AppState>,
    AuthenticatedStaff(claims): AuthenticatedStaff,
    Path(id): Path<i32>,
    Json(request): Json<OverrideReturnRequest>,
) -> AppResult<Json<BorrowRecord>> {
    claims.require_manager()?;
    request.validate()?;
    let record = state.services.borrows.get(id).await?;
    claims.require_city(record.city_id)?;

    let returned = state
        .services
        .borrows
        .manager_override_return(id, &claims.sub, request.condition, request.notes)
        .await?;
    Ok(Json(returned))
}

/// Borrowed equipment past the overdue threshold
#[utoipa::path(
    get,
    path = "/borrows/overdue",
    tag = "borrows",
    security(("bearer_auth" = [])),
    params(OverdueQuery),
    responses(
        (status = 200, description = "Overdue items, oldest first", body = Vec<OverdueItem>),
        (status = 400, description = "Negative threshold")
    )
)]
pub async fn list_overdue(
    State(state): State<AppState>,
    AuthenticatedStaff(claims): AuthenticatedStaff,
    Query(mut query): Query<OverdueQuery>,
) -> AppResult<Json<Vec<OverdueItem>>> {
    claims.require_volunteer()?;
    query.city_id = claims.scope_city(query.city_id)?;

    let items = state.services.overdue.list_overdue(&query).await?;
    Ok(Json(items))
}

/// Records whose inventory could not be updated
#[utoipa::path(
    get,
    path = "/borrows/reconcile",
    tag = "borrows",
    security(("bearer_auth" = [])),
    params(ReconcileQuery),
    responses(
        (status = 200, description = "Records flagged for reconciliation", body = Vec<BorrowRecord>)
    )
)]
pub async fn list_reconcile_required(
    State(state): State<AppState>,
    AuthenticatedStaff(claims): AuthenticatedStaff,
    Query(query): Query<ReconcileQuery>,
) -> AppResult<Json<Vec<BorrowRecord>>> {
    claims.require_super_admin()?;
    let records = state
        .services
        .borrows
        .list_reconcile_required(query.city_id)
        .await?;
    Ok(Json(records))
}

/// Full borrow history of one phone number
#[utoipa::path(
    get,
    path = "/borrows/history",
    tag = "borrows",
    security(("bearer_auth" = [])),
    params(HistoryQuery),
    responses(
        (status = 200, description = "Borrow records, oldest first", body = Vec<BorrowRecord>)
    )
)]
pub async fn borrower_history(
    State(state): State<AppState>,
    AuthenticatedStaff(claims): AuthenticatedStaff,
    Query(query): Query<HistoryQuery>,
) -> AppResult<Json<Vec<BorrowRecord>>> {
    claims.require_volunteer()?;
    let mut records = state.services.borrows.list_by_phone(&query.phone).await?;
    if let Some(city_id) = claims.scope_city(None)? {
        records.retain(|r| r.city_id == city_id);
    }
    Ok(Json(records))
}
