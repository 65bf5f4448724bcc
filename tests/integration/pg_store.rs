//! Postgres store integration tests
//!
//! Need a disposable database:
//! `DATABASE_URL=postgres://... cargo test --test pg_store -- --ignored`

use std::sync::Arc;

use chrono::{Duration, Utc};
use sqlx::postgres::PgPoolOptions;
use tokio::task::JoinSet;

use cabinet_server::{
    error::AppError,
    models::{
        borrow::{BorrowFilter, NewBorrowRecord},
        request::{NewRequest, RequestChange},
        Borrower, RequestStatus,
    },
    repository::{LendingStore, Repository},
};

const RETRIES: u32 = 3;

/// Connect, migrate and pick a city id no earlier run has used
async fn setup() -> (Arc<Repository>, i32) {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must point at a test database");
    let pool = PgPoolOptions::new()
        .max_connections(12)
        .connect(&url)
        .await
        .expect("Failed to connect to database");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    let city_id = (Utc::now().timestamp_micros() % 1_000_000_000) as i32;
    (Arc::new(Repository::new(pool)), city_id)
}

async fn stock(repo: &Repository, city_id: i32, equipment_id: i32, quantity: i32) {
    sqlx::query(
        "INSERT INTO city_equipment (city_id, equipment_id, quantity, is_consumable) VALUES ($1, $2, $3, FALSE)",
    )
    .bind(city_id)
    .bind(equipment_id)
    .bind(quantity)
    .execute(&repo.pool)
    .await
    .expect("Failed to insert inventory line");
}

fn walk_up(city_id: i32, equipment_id: i32, n: usize) -> NewBorrowRecord {
    NewBorrowRecord {
        request_id: None,
        borrower: Borrower {
            name: format!("Borrower {}", n),
            phone: format!("05000000{:02}", n),
        },
        equipment_id,
        city_id,
        quantity: 1,
        borrow_date: Utc::now(),
    }
}

async fn approved_request(repo: &Repository, city_id: i32, items: Vec<(i32, i32)>) -> i32 {
    let now = Utc::now();
    let new = NewRequest {
        city_id,
        borrower_name: "Jack".to_string(),
        borrower_phone: "0501234567".to_string(),
        items,
        notes: None,
    };
    let created = repo.insert_request(&new, now).await.expect("Failed to insert request");
    let approve = RequestChange::Approve {
        token_hash: format!("hash-{}-{}", city_id, created.request.id),
        expires_at: now + Duration::minutes(30),
        approved_by: "integration".to_string(),
    };
    repo.update_request(created.request.id, &approve, now)
        .await
        .expect("Failed to approve")
        .expect("Request was not pending");
    created.request.id
}

#[tokio::test]
#[ignore]
async fn test_last_unit_has_one_winner() {
    let (repo, city_id) = setup().await;
    stock(&repo, city_id, 1, 1).await;

    let mut tasks = JoinSet::new();
    for n in 0..8 {
        let repo = repo.clone();
        tasks.spawn(async move { repo.reserve_and_record(&walk_up(city_id, 1, n), RETRIES).await });
    }

    let mut winners = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined.expect("Task panicked") {
            Ok(reservation) => {
                winners += 1;
                assert_eq!(reservation.remaining, 0);
            }
            Err(AppError::InsufficientStock(_)) => {}
            Err(other) => panic!("Unexpected error: {}", other),
        }
    }
    assert_eq!(winners, 1);

    let line = repo.inventory_line(city_id, 1).await.unwrap().unwrap();
    assert_eq!(line.quantity, 0);
    let records = repo
        .list_borrow_records(&BorrowFilter {
            city_id: Some(city_id),
            ..BorrowFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
}

#[tokio::test]
#[ignore]
async fn test_concurrent_fulfill_applies_once() {
    let (repo, city_id) = setup().await;
    stock(&repo, city_id, 1, 3).await;
    let id = approved_request(&repo, city_id, vec![(1, 2)]).await;

    let now = Utc::now();
    let (first, second) = tokio::join!(
        repo.fulfill_request(id, now, RETRIES),
        repo.fulfill_request(id, now, RETRIES)
    );
    let outcomes = [first.unwrap(), second.unwrap()];
    let applied: Vec<_> = outcomes.iter().flatten().collect();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].len(), 2);

    let line = repo.inventory_line(city_id, 1).await.unwrap().unwrap();
    assert_eq!(line.quantity, 1);
    let stored = repo.request_by_id(id).await.unwrap().unwrap();
    assert_eq!(stored.request.status, RequestStatus::Fulfilled);
    assert!(stored.request.token_hash.is_none());
}

#[tokio::test]
#[ignore]
async fn test_fulfill_short_on_one_item_keeps_nothing() {
    let (repo, city_id) = setup().await;
    stock(&repo, city_id, 1, 3).await;
    stock(&repo, city_id, 2, 0).await;
    let id = approved_request(&repo, city_id, vec![(1, 2), (2, 1)]).await;

    let err = repo.fulfill_request(id, Utc::now(), RETRIES).await.unwrap_err();
    assert!(matches!(err, AppError::InsufficientStock(_)));

    let line = repo.inventory_line(city_id, 1).await.unwrap().unwrap();
    assert_eq!(line.quantity, 3);
    let stored = repo.request_by_id(id).await.unwrap().unwrap();
    assert_eq!(stored.request.status, RequestStatus::Approved);
    let records = repo
        .list_borrow_records(&BorrowFilter {
            city_id: Some(city_id),
            ..BorrowFilter::default()
        })
        .await
        .unwrap();
    assert!(records.is_empty());
}

#[tokio::test]
#[ignore]
async fn test_extension_cap_is_part_of_the_write() {
    let (repo, city_id) = setup().await;
    stock(&repo, city_id, 1, 1).await;
    let id = approved_request(&repo, city_id, vec![(1, 1)]).await;

    let now = Utc::now();
    let change = RequestChange::Extend { minutes: 40, max_total: 60, now };
    let (first, second) = tokio::join!(
        repo.update_request(id, &change, now),
        repo.update_request(id, &change, now)
    );
    let applied = [first.unwrap(), second.unwrap()]
        .into_iter()
        .filter(Option::is_some)
        .count();
    assert_eq!(applied, 1);

    let stored = repo.request_by_id(id).await.unwrap().unwrap();
    assert_eq!(stored.request.extended_minutes, 40);
}
