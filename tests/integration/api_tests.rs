//! API integration tests
//!
//! Run against a live server started with `RUN_MODE=memory`, which seeds
//! city 1 with equipment 1:
//! `cargo test --test api_tests -- --ignored`

use reqwest::Client;
use serde_json::{json, Value};

use cabinet_server::models::{StaffClaims, StaffRole};

const BASE_URL: &str = "http://localhost:8080/api/v1";

/// Helper to mint a staff token with the server's shared secret
fn staff_token(role: StaffRole, city_id: Option<i32>) -> String {
    let secret = std::env::var("JWT_SECRET")
        .unwrap_or_else(|_| "change-this-secret-in-production".to_string());
    let now = chrono::Utc::now().timestamp();
    StaffClaims {
        sub: "integration".to_string(),
        role,
        city_id,
        exp: now + 600,
        iat: now,
    }
    .create_token(&secret)
    .expect("Failed to sign staff token")
}

#[tokio::test]
#[ignore] // Run with: cargo test -- --ignored
async fn test_health_check() {
    let client = Client::new();

    let response = client
        .get(format!("{}/health", BASE_URL))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
#[ignore]
async fn test_readiness_check() {
    let client = Client::new();

    let response = client
        .get(format!("{}/ready", BASE_URL))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["status"], "ready");
    assert!(body["storage"].is_string());
}

#[tokio::test]
#[ignore]
async fn test_list_requests_requires_auth() {
    let client = Client::new();

    let response = client
        .get(format!("{}/requests", BASE_URL))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 401);
}

#[tokio::test]
#[ignore]
async fn test_create_request_validation() {
    let client = Client::new();

    let response = client
        .post(format!("{}/requests", BASE_URL))
        .json(&json!({
            "borrower_name": "Jack",
            "borrower_phone": "0501234567",
            "city_id": 1,
            "items": []
        }))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 400);

    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["error"], "BadValue");
}

#[tokio::test]
#[ignore]
async fn test_unknown_token() {
    let client = Client::new();

    let response = client
        .post(format!("{}/tokens/verify", BASE_URL))
        .json(&json!({ "token": "not-a-real-token" }))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 404);
}

#[tokio::test]
#[ignore]
async fn test_approve_and_cancel() {
    let client = Client::new();
    let manager = staff_token(StaffRole::CityManager, Some(1));

    let response = client
        .post(format!("{}/requests", BASE_URL))
        .json(&json!({
            "borrower_name": "Jack",
            "borrower_phone": "0501234567",
            "city_id": 1,
            "items": [{ "equipment_id": 1, "quantity": 1 }]
        }))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), 201);
    let created: Value = response.json().await.expect("Failed to parse response");
    let id = created["id"].as_i64().expect("No id in response");

    let response = client
        .post(format!("{}/requests/{}/approve", BASE_URL, id))
        .bearer_auth(&manager)
        .send()
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());
    let approval: Value = response.json().await.expect("Failed to parse response");
    let token = approval["token"].as_str().expect("No token in response").to_string();

    let response = client
        .post(format!("{}/requests/{}/cancel", BASE_URL, id))
        .bearer_auth(&manager)
        .json(&json!({ "reason": "Borrower no longer needs it" }))
        .send()
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());

    let response = client
        .post(format!("{}/tokens/verify", BASE_URL))
        .json(&json!({ "token": token }))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), 404);
}

#[tokio::test]
#[ignore]
async fn test_list_overdue() {
    let client = Client::new();
    let volunteer = staff_token(StaffRole::Volunteer, Some(1));

    let response = client
        .get(format!("{}/borrows/overdue?threshold_hours=24", BASE_URL))
        .bearer_auth(&volunteer)
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());
    let body: Value = response.json().await.expect("Failed to parse response");
    assert!(body.is_array());
}
