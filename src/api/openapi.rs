//! OpenAPI documentation

use axum::Router;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::api::{borrows, health, inventory, requests, tokens};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Cabinet API",
        version = "1.0.0",
        description = "Equipment lending for community cabinets"
    ),
    servers(
        (url = "/api/v1", description = "API v1")
    ),
    paths(
        // Health
        health::health_check,
        health::readiness_check,
        // Requests
        requests::create_request,
        requests::list_requests,
        requests::get_request,
        requests::approve_request,
        requests::reject_request,
        requests::cancel_request,
        requests::extend_request,
        requests::withdraw_request,
        // Tokens
        tokens::verify_token,
        tokens::fulfill_token,
        // Borrows
        borrows::direct_borrow,
        borrows::get_borrow,
        borrows::mark_returned,
        borrows::confirm_return,
        borrows::override_return,
        borrows::list_overdue,
        borrows::list_reconcile_required,
        borrows::borrower_history,
        // Inventory
        inventory::city_inventory,
    ),
    components(
        schemas(
            // Requests
            crate::models::Request,
            crate::models::RequestItem,
            crate::models::RequestWithItems,
            crate::models::RequestStatus,
            crate::models::request::CreateRequest,
            crate::models::request::RequestItemInput,
            requests::ReasonRequest,
            requests::ExtendRequest,
            requests::WithdrawRequest,
            crate::services::requests::Approval,
            crate::services::requests::Fulfillment,
            // Tokens
            tokens::TokenRequest,
            // Borrows
            crate::models::BorrowRecord,
            crate::models::BorrowStatus,
            crate::models::EquipmentCondition,
            crate::models::OverdueItem,
            crate::models::borrow::DirectBorrowRequest,
            crate::models::borrow::MarkReturnedRequest,
            crate::models::borrow::OverrideReturnRequest,
            // Inventory
            crate::models::InventoryLine,
            // Health
            health::HealthResponse,
            // Errors
            crate::error::ErrorResponse,
        )
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "requests", description = "Borrow requests and their review"),
        (name = "tokens", description = "Pickup token verification and fulfillment"),
        (name = "borrows", description = "Borrow records and returns"),
        (name = "inventory", description = "Cabinet stock")
    )
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Create the OpenAPI documentation router
pub fn create_openapi_router() -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_lists_token_routes_without_path_tokens() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/tokens/verify"));
        assert!(doc.paths.paths.contains_key("/tokens/fulfill"));
        assert!(doc.paths.paths.keys().all(|p| !p.contains("{token}")));
    }
}
