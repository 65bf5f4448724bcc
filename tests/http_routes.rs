//! In-process HTTP tests of the API router over the in-memory store

use std::{net::SocketAddr, sync::Arc};

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use cabinet_server::{
    api,
    config::AppConfig,
    models::{StaffClaims, StaffRole},
    repository::MemoryStore,
    services::{clock::SystemClock, notifications::LogDispatcher, Services},
    AppState,
};

const CITY: i32 = 1;
const WHEELCHAIR: i32 = 10;

async fn app() -> (Router, String) {
    let config = AppConfig::default();
    let store = Arc::new(MemoryStore::new());
    store.put_line(CITY, WHEELCHAIR, 2, false).await;

    let services = Services::new(
        store,
        Arc::new(SystemClock),
        Arc::new(LogDispatcher),
        config.lending.clone(),
        config.notifications.pickup_base_url.clone(),
    );
    let secret = config.auth.jwt_secret.clone();
    let state = AppState {
        config: Arc::new(config),
        services: Arc::new(services),
    };
    (api::router(state).unwrap(), secret)
}

fn staff_token(secret: &str, role: StaffRole, city_id: Option<i32>) -> String {
    let now = chrono::Utc::now().timestamp();
    StaffClaims {
        sub: format!("{:?}", role).to_lowercase(),
        role,
        city_id,
        exp: now + 3600,
        iat: now,
    }
    .create_token(secret)
    .unwrap()
}

async fn send(app: &Router, method: &str, uri: &str, bearer: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .extension(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))));
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn test_ready_reports_backend() {
    let (app, _) = app().await;
    let (status, body) = send(&app, "GET", "/ready", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["storage"], "memory");
}

#[tokio::test]
async fn test_request_to_pickup_over_http() {
    let (app, secret) = app().await;
    let manager = staff_token(&secret, StaffRole::CityManager, Some(CITY));
    let other_city = staff_token(&secret, StaffRole::CityManager, Some(99));
    let volunteer = staff_token(&secret, StaffRole::Volunteer, Some(CITY));

    let (status, created) = send(
        &app,
        "POST",
        "/requests",
        None,
        Some(json!({
            "borrower_name": "Jack",
            "borrower_phone": "050-123-4567",
            "city_id": CITY,
            "items": [{ "equipment_id": WHEELCHAIR, "quantity": 1 }]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "pending");
    assert!(created.get("token_hash").is_none());
    let id = created["id"].as_i64().unwrap();
    let approve = format!("/requests/{}/approve", id);

    let (status, _) = send(&app, "POST", &approve, None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = send(&app, "POST", &approve, Some(&volunteer), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = send(&app, "POST", &approve, Some(&other_city), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, approval) = send(&app, "POST", &approve, Some(&manager), None).await;
    assert_eq!(status, StatusCode::OK);
    let token = approval["token"].as_str().unwrap().to_string();
    assert!(approval["pickup_url"].as_str().unwrap().ends_with(&token));

    let (status, verified) = send(&app, "POST", "/tokens/verify", None, Some(json!({ "token": token }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(verified["id"].as_i64(), Some(id));

    let (status, fulfilled) = send(
        &app,
        "POST",
        "/tokens/fulfill",
        Some(&volunteer),
        Some(json!({ "token": token })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fulfilled["records"].as_array().unwrap().len(), 1);

    let (status, error) = send(&app, "POST", "/tokens/verify", None, Some(json!({ "token": token }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error["code"], 4);

    let (status, inventory) = send(&app, "GET", "/cities/1/inventory", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(inventory[0]["quantity"], 1);
}

#[tokio::test]
async fn test_borrower_return_needs_matching_phone() {
    let (app, secret) = app().await;
    let volunteer = staff_token(&secret, StaffRole::Volunteer, Some(CITY));

    let (status, record) = send(
        &app,
        "POST",
        "/borrows",
        Some(&volunteer),
        Some(json!({
            "name": "Noa",
            "phone": "0527771234",
            "city_id": CITY,
            "equipment_id": WHEELCHAIR
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let uri = format!("/borrows/{}/return", record["id"]);

    let (status, _) = send(
        &app,
        "POST",
        &uri,
        None,
        Some(json!({ "phone": "0500000000", "condition": "working" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        "POST",
        &uri,
        None,
        Some(json!({ "phone": "0527771234", "condition": "faulty" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, reported) = send(
        &app,
        "POST",
        &uri,
        None,
        Some(json!({ "phone": "0527771234", "condition": "faulty", "notes": "Brake is loose" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reported["status"], "pending_approval");
}

#[tokio::test]
async fn test_reconcile_view_is_super_admin_only() {
    let (app, secret) = app().await;
    let manager = staff_token(&secret, StaffRole::CityManager, Some(CITY));
    let admin = staff_token(&secret, StaffRole::SuperAdmin, None);

    let (status, _) = send(&app, "GET", "/borrows/reconcile", Some(&manager), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, body) = send(&app, "GET", "/borrows/reconcile", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_token_guessing_is_rate_limited() {
    let (app, _) = app().await;
    let mut statuses = Vec::new();
    for attempt in 0..15 {
        let (status, _) = send(
            &app,
            "POST",
            "/tokens/verify",
            None,
            Some(json!({ "token": format!("guess-{}", attempt) })),
        )
        .await;
        statuses.push(status);
    }

    assert_eq!(statuses[0], StatusCode::NOT_FOUND);
    assert_eq!(statuses.last(), Some(&StatusCode::TOO_MANY_REQUESTS));
}

#[tokio::test]
async fn test_cityless_staff_token_cannot_read_across_cities() {
    let (app, secret) = app().await;
    let cityless = staff_token(&secret, StaffRole::Volunteer, None);

    let (status, _) = send(&app, "GET", "/borrows/overdue", Some(&cityless), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = send(&app, "GET", "/borrows/history?phone=0527771234", Some(&cityless), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let admin = staff_token(&secret, StaffRole::SuperAdmin, None);
    let (status, _) = send(&app, "GET", "/borrows/overdue", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_out_of_range_overdue_threshold_is_rejected() {
    let (app, secret) = app().await;
    let volunteer = staff_token(&secret, StaffRole::Volunteer, Some(CITY));

    let (status, body) = send(
        &app,
        "GET",
        "/borrows/overdue?threshold_hours=10000000000",
        Some(&volunteer),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "BadValue");
}
