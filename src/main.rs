//! Cabinet Server - equipment lending for community cabinets

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cabinet_server::{
    api,
    config::{AppConfig, StorageBackend},
    repository::{LendingStore, MemoryStore, Repository},
    services::{clock::SystemClock, notifications::build_dispatcher, Services},
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("Failed to load configuration")?;

    init_tracing(&config);
    tracing::info!("Starting Cabinet Server v{}", env!("CARGO_PKG_VERSION"));

    let store: Arc<dyn LendingStore> = match config.storage.backend {
        StorageBackend::Postgres => {
            let pool = PgPoolOptions::new()
                .max_connections(config.database.max_connections)
                .min_connections(config.database.min_connections)
                .connect(&config.database.url)
                .await
                .context("Failed to connect to database")?;
            tracing::info!("Connected to database");

            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .context("Failed to run database migrations")?;
            tracing::info!("Database migrations completed");

            Arc::new(Repository::new(pool))
        }
        StorageBackend::Memory => {
            tracing::warn!("Using the in-memory store; nothing will survive a restart");
            let store = MemoryStore::new();
            for line in &config.storage.seed {
                store
                    .put_line(line.city_id, line.equipment_id, line.quantity, line.is_consumable)
                    .await;
            }
            tracing::info!(lines = config.storage.seed.len(), "Seeded in-memory inventory");
            Arc::new(store)
        }
    };

    let notifier = build_dispatcher(&config.notifications)
        .context("Failed to build notification dispatcher")?;
    tracing::info!(backend = notifier.backend_name(), "Notification dispatcher ready");
    let services = Services::new(
        store,
        Arc::new(SystemClock),
        notifier,
        config.lending.clone(),
        config.notifications.pickup_base_url.clone(),
    );

    let addr = SocketAddr::new(
        config.server.host.parse().context("Invalid host address")?,
        config.server.port,
    );

    let state = AppState {
        config: Arc::new(config),
        services: Arc::new(services),
    };
    let app = create_router(state)?;

    tracing::info!("Server listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    // Peer addresses feed the per-IP limit on token routes
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("cabinet_server={},audit=info,tower_http=debug", config.logging.level).into()
    });
    let registry = tracing_subscriber::registry().with(filter);

    if config.logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Create the application router with all routes
fn create_router(state: AppState) -> anyhow::Result<Router> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_v1 = api::router(state).context("Failed to build API routes")?;
    let openapi = api::openapi::create_openapi_router();

    Ok(Router::new()
        .nest("/api/v1", api_v1)
        .merge(openapi)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        ))
}
