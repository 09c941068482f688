//! Ride-Hailing Core - Main Application Entry Point
//!
//! This is the trip lifecycle and payment settlement service of a
//! ride-hailing platform: trip state machine, wallet ledger, settlement
//! orchestrator, and geospatial driver matching behind authenticated JSON
//! endpoints.
//!
//! # Architecture
//!
//! - **Web Framework**: Axum (async HTTP server)
//! - **Database**: PostgreSQL with sqlx (async queries, the sole arbiter
//!   of trip and wallet state)
//! - **Geo Index**: in-process TTL cache with a durable-store fallback
//! - **Authentication**: bearer tokens with SHA-256 hashing
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment variables
//! 2. Create database connection pool and run migrations
//! 3. Wire the shared state (pool, config, geo cache, gateway client)
//! 4. Spawn the background loops (outbox dispatcher, settlement sweep,
//!    request timeout sweep)
//! 5. Build the router and serve

use tracing_subscriber::EnvFilter;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use ride_hailing_server::state::AppState;
use ride_hailing_server::{config, db, handlers, middleware, services};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging with tracing subscriber. Reads RUST_LOG
    // environment variable (defaults to "info" level)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // Load configuration
    let config = config::Config::from_env()?;
    tracing::info!("Configuration loaded");

    // Create database pool and migrate
    let pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Database pool created");

    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations complete");

    let server_port = config.server_port;
    let state = AppState::new(pool, config);

    // Background loops: notification outbox delivery, settlement
    // reconciliation/retries, stale request cancellation.
    tokio::spawn(services::outbox_service::run_dispatcher(state.clone()));
    tokio::spawn(services::outbox_service::run_settlement_sweep(state.clone()));
    tokio::spawn(services::outbox_service::run_request_timeout_sweep(
        state.clone(),
    ));

    // Authenticated API routes
    let authenticated_routes = Router::new()
        // Trip lifecycle
        .route("/api/v1/trips", post(handlers::trips::request_trip))
        .route(
            "/api/v1/trips/{id}/accept",
            post(handlers::trips::accept_trip),
        )
        .route(
            "/api/v1/trips/{id}/status",
            post(handlers::trips::update_trip_status),
        )
        .route("/api/v1/trips/{id}", get(handlers::trips::get_trip))
        .route(
            "/api/v1/trips/{id}/payment",
            get(handlers::trips::get_trip_payment),
        )
        // Payments
        .route(
            "/api/v1/payments/{id}/refund",
            post(handlers::payments::refund_payment),
        )
        // Wallet
        .route("/api/v1/wallet", get(handlers::wallets::get_wallet))
        .route(
            "/api/v1/wallet/transactions",
            get(handlers::wallets::list_transactions),
        )
        .route("/api/v1/wallet/topup", post(handlers::wallets::top_up))
        // Location and matching
        .route(
            "/api/v1/location",
            post(handlers::locations::update_location),
        )
        .route(
            "/api/v1/drivers/nearby",
            get(handlers::locations::nearby_drivers),
        )
        .route(
            "/api/v1/drivers/availability",
            post(handlers::locations::set_availability),
        )
        // Apply authentication middleware to all routes in this group
        .route_layer(axum_middleware::from_fn_with_state(
            state.pool.clone(),
            middleware::auth::auth_middleware,
        ));

    let app = Router::new()
        // Public routes (no authentication required)
        .route("/health", get(handlers::health::health_check))
        .merge(authenticated_routes)
        // Request tracing for observability
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Bind to network address and start server
    let addr = format!("0.0.0.0:{server_port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
