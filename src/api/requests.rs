//! Borrow request endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::{
    error::AppResult,
    models::{
        request::{CreateRequest, RequestQuery},
        Request, RequestWithItems,
    },
    services::requests::Approval,
    AppState,
};

use super::AuthenticatedStaff;

/// Reason given for a rejection or cancellation
#[derive(Deserialize, ToSchema)]
pub struct ReasonRequest {
    pub reason: String,
}

/// Token extension
#[derive(Deserialize, ToSchema)]
pub struct ExtendRequest {
    /// Minutes added to the current expiry
    pub minutes: i32,
}

/// Borrower proof for self-service actions
#[derive(Deserialize, ToSchema)]
pub struct WithdrawRequest {
    pub phone: String,
}

/// Submit a new borrow request
#[utoipa::path(
    post,
    path = "/requests",
    tag = "requests",
    request_body = CreateRequest,
    responses(
        (status = 201, description = "Request submitted", body = RequestWithItems),
        (status = 400, description = "Invalid request"),
        (status = 404, description = "Equipment not stocked in this city"),
        (status = 409, description = "Not enough stock")
    )
)]
pub async fn create_request(
    State(state): State<AppState>,
    Json(request): Json<CreateRequest>,
) -> AppResult<(StatusCode, Json<RequestWithItems>)> {
    let created = state.services.requests.create(request).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// List requests, scoped to the caller's city
#[utoipa::path(
    get,
    path = "/requests",
    tag = "requests",
    security(("bearer_auth" = [])),
    params(RequestQuery),
    responses(
        (status = 200, description = "Requests, newest first", body = Vec<Request>)
    )
)]
pub async fn list_requests(
    State(state): State<AppState>,
    AuthenticatedStaff(claims): AuthenticatedStaff,
    Query(mut query): Query<RequestQuery>,
) -> AppResult<Json<Vec<Request>>> {
    claims.require_manager()?;
    query.city_id = claims.scope_city(query.city_id)?;

    let requests = state.services.requests.list(&query).await?;
    Ok(Json(requests))
}

/// Get request details
#[utoipa::path(
    get,
    path = "/requests/{id}",
    tag = "requests",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Request ID")),
    responses(
        (status = 200, description = "Request details", body = RequestWithItems),
        (status = 404, description = "Request not found")
    )
)]
pub async fn get_request(
    State(state): State<AppState>,
    AuthenticatedStaff(claims): AuthenticatedStaff,
    Path(id): Path<i32>,
) -> AppResult<Json<RequestWithItems>> {
    claims.require_manager()?;
    let request = state.services.requests.get(id).await?;
    claims.require_city(request.request.city_id)?;
    Ok(Json(request))
}

/// Approve a pending request and mint its pickup token
#[utoipa::path(
    post,
    path = "/requests/{id}/approve",
    tag = "requests",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Request ID")),
    responses(
        (status = 200, description = "Request approved", body = Approval),
        (status = 404, description = "Request not found"),
        (status = 409, description = "Request is not pending")
    )
)]
pub async fn approve_request(
    State(state): State<AppState>,
    AuthenticatedStaff(claims): AuthenticatedStaff,
    Path(id): Path<i32>,
) -> AppResult<Json<Approval>> {
    claims.require_manager()?;
    let request = state.services.requests.get(id).await?;
    claims.require_city(request.request.city_id)?;

    let approval = state.services.requests.approve(id, &claims.sub).await?;
    Ok(Json(approval))
}

/// Reject a pending request
#[utoipa::path(
    post,
    path = "/requests/{id}/reject",
    tag = "requests",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Request ID")),
    request_body = ReasonRequest,
    responses(
        (status = 200, description = "Request rejected", body = Request),
        (status = 400, description = "Reason missing"),
        (status = 409, description = "Request is not pending")
    )
)]
pub async fn reject_request(
    State(state): State<AppState>,
    AuthenticatedStaff(claims): AuthenticatedStaff,
    Path(id): Path<i32>,
    Json(body): Json<ReasonRequest>,
) -> AppResult<Json<Request>> {
    claims.require_manager()?;
    let request = state.services.requests.get(id).await?;
    claims.require_city(request.request.city_id)?;

    let rejected = state
        .services
        .requests
        .reject(id, &claims.sub, &body.reason)
        .await?;
    Ok(Json(rejected))
}

/// Cancel an approved request, revoking its token
#[utoipa::path(
    post,
    path = "/requests/{id}/cancel",
    tag = "requests",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Request ID")),
    request_body = ReasonRequest,
    responses(
        (status = 200, description = "Request cancelled", body = Request),
        (status = 409, description = "Request is not approved")
    )
)]
pub async fn cancel_request(
    State(state): State<AppState>,
    AuthenticatedStaff(claims): AuthenticatedStaff,
    Path(id): Path<i32>,
    Json(body): Json<ReasonRequest>,
) -> AppResult<Json<Request>> {
    claims.require_manager()?;
    let request = state.services.requests.get(id).await?;
    claims.require_city(request.request.city_id)?;

    let cancelled = state
        .services
        .requests
        .cancel(id, &claims.sub, &body.reason)
        .await?;
    Ok(Json(cancelled))
}

/// Extend the pickup window of an approved request
#[utoipa::path(
    post,
    path = "/requests/{id}/extend",
    tag = "requests",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Request ID")),
    request_body = ExtendRequest,
    responses(
        (status = 200, description = "Expiry extended", body = Request),
        (status = 400, description = "Invalid or capped extension"),
        (status = 410, description = "Token already expired")
    )
)]
pub async fn extend_request(
    State(state): State<AppState>,
    AuthenticatedStaff(claims): AuthenticatedStaff,
    Path(id): Path<i32>,
    Json(body): Json<ExtendRequest>,
) -> AppResult<Json<Request>> {
    claims.require_manager()?;
    let request = state.services.requests.get(id).await?;
    claims.require_city(request.request.city_id)?;

    let extended = state
        .services
        .requests
        .extend(id, body.minutes, &claims.sub)
        .await?;
    Ok(Json(extended))
}

/// Withdraw a request that is still waiting for review
#[utoipa::path(
    post,
    path = "/requests/{id}/withdraw",
    tag = "requests",
    params(("id" = i32, Path, description = "Request ID")),
    request_body = WithdrawRequest,
    responses(
        (status = 200, description = "Request withdrawn", body = Request),
        (status = 404, description = "Request not found"),
        (status = 409, description = "Request already reviewed")
    )
)]
pub async fn withdraw_request(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(body): Json<WithdrawRequest>,
) -> AppResult<Json<Request>> {
    let withdrawn = state.services.requests.withdraw(id, &body.phone).await?;
    Ok(Json(withdrawn))
}
