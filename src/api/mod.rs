//! API handlers for Cabinet REST endpoints

pub mod borrows;
pub mod health;
pub mod inventory;
pub mod openapi;
pub mod requests;
pub mod tokens;

use std::sync::Arc;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
    routing::{get, post},
    Router,
};
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

use crate::{
    error::{AppError, AppResult},
    models::StaffClaims,
    AppState,
};

/// Extractor for authenticated staff from JWT token
pub struct AuthenticatedStaff(pub StaffClaims);

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedStaff {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::Authentication("Missing authorization header".to_string()))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::Authentication("Invalid authorization header format".to_string()))?;

        let claims = StaffClaims::from_token(token, &state.config.auth.jwt_secret)
            .map_err(|e| AppError::Authentication(e.to_string()))?;
        claims.check_scope()?;

        Ok(AuthenticatedStaff(claims))
    }
}

/// Build the `/api/v1` router. Token routes sit behind a per-IP rate limit,
/// which needs the server to provide `ConnectInfo<SocketAddr>`.
pub fn router(state: AppState) -> AppResult<Router> {
    let limits = &state.config.rate_limit;
    let governor = GovernorConfigBuilder::default()
        .per_second(limits.per_second)
        .burst_size(limits.burst_size)
        .finish()
        .ok_or_else(|| {
            AppError::Internal("rate_limit.per_second and burst_size must be positive".to_string())
        })?;
    let token_routes = Router::new()
        .route("/tokens/verify", post(tokens::verify_token))
        .route("/tokens/fulfill", post(tokens::fulfill_token))
        .layer(GovernorLayer {
            config: Arc::new(governor),
        });

    let routes = Router::new()
        // Health check
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        // Requests
        .route("/requests", post(requests::create_request))
        .route("/requests", get(requests::list_requests))
        .route("/requests/:id", get(requests::get_request))
        .route("/requests/:id/approve", post(requests::approve_request))
        .route("/requests/:id/reject", post(requests::reject_request))
        .route("/requests/:id/cancel", post(requests::cancel_request))
        .route("/requests/:id/extend", post(requests::extend_request))
        .route("/requests/:id/withdraw", post(requests::withdraw_request))
        // Borrow records
        .route("/borrows", post(borrows::direct_borrow))
        .route("/borrows/overdue", get(borrows::list_overdue))
        .route("/borrows/reconcile", get(borrows::list_reconcile_required))
        .route("/borrows/history", get(borrows::borrower_history))
        .route("/borrows/:id", get(borrows::get_borrow))
        .route("/borrows/:id/return", post(borrows::mark_returned))
        .route("/borrows/:id/confirm", post(borrows::confirm_return))
        .route("/borrows/:id/override-return", post(borrows::override_return))
        // Inventory
        .route("/cities/:id/inventory", get(inventory::city_inventory))
        .merge(token_routes)
        .with_state(state);

    Ok(routes)
}
