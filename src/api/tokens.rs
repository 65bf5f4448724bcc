//! Pickup token endpoints
//!
//! The token travels in the request body so it never shows up in paths or
//! access logs.

use axum::{extract::State, Json};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::{
    error::AppResult,
    models::RequestWithItems,
    services::{requests::Fulfillment, tokens::PlainToken},
    AppState,
};

use super::AuthenticatedStaff;

/// Token presented by the borrower
#[derive(Debug, Deserialize, ToSchema)]
pub struct TokenRequest {
    #[schema(value_type = String)]
    pub token: PlainToken,
}

/// Resolve a pickup token to its request
#[utoipa::path(
    post,
    path = "/tokens/verify",
    tag = "tokens",
    request_body = TokenRequest,
    responses(
        (status = 200, description = "Token is valid", body = RequestWithItems),
        (status = 404, description = "Unknown or revoked token"),
        (status = 410, description = "Token expired"),
        (status = 429, description = "Too many attempts")
    )
)]
pub async fn verify_token(
    State(state): State<AppState>,
    Json(body): Json<TokenRequest>,
) -> AppResult<Json<RequestWithItems>> {
    let request = state.services.requests.verify(&body.token).await?;
    Ok(Json(request))
}

/// Hand out the equipment of a request at the cabinet
#[utoipa::path(
    post,
    path = "/tokens/fulfill",
    tag = "tokens",
    security(("bearer_auth" = [])),
    request_body = TokenRequest,
    responses(
        (status = 200, description = "Request fulfilled", body = Fulfillment),
        (status = 404, description = "Unknown or revoked token"),
        (status = 409, description = "Not enough stock or request no longer approved"),
        (status = 410, description = "Token expired"),
        (status = 429, description = "Too many attempts")
    )
)]
pub async fn fulfill_token(
    State(state): State<AppState>,
    AuthenticatedStaff(claims): AuthenticatedStaff,
    Json(body): Json<TokenRequest>,
) -> AppResult<Json<Fulfillment>> {
    claims.require_volunteer()?;
    let request = state.services.requests.verify(&body.token).await?;
    claims.require_city(request.request.city_id)?;

    let fulfillment = state.services.requests.fulfill(request.request.id).await?;
    Ok(Json(fulfillment))
}
