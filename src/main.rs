mod config;
mod crypto;
mod db;
mod error;
mod handlers;
mod middleware;
mod models;
mod services;
mod storage;
mod store;

use axum::{
    extract::{DefaultBodyLimit, State},
    routing::{get, post, put},
    Json, Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::db::Database;
use crate::error::{ApiResponse, Result};
use crate::services::VaultService;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Arc<Config>,
    pub vault: Arc<VaultService>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vaultkeeper=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting vaultkeeper...");

    // Load configuration
    let config = Config::load()?;
    let config = Arc::new(config);
    tracing::info!("Configuration loaded");

    // Initialize database
    let db = Database::new(&config.database).await?;
    db.run_migrations().await?;
    tracing::info!("Database initialized");

    // Initialize vault
    let vault = Arc::new(VaultService::open(
        db.clone(),
        &config.vault,
        tracing::info_span!("vault"),
    ));

    // Create app state
    let state = AppState {
        db,
        config: config.clone(),
        vault,
    };

    // Build router
    let app = create_router(state);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Liveness plus a metadata store round trip
/// GET /api/v1/health
async fn health(State(state): State<AppState>) -> Result<Json<ApiResponse<&'static str>>> {
    sqlx::query("SELECT 1").execute(state.db.pool()).await?;
    Ok(Json(ApiResponse::success("ok")))
}

fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Public routes (no identity required)
    let public_routes = Router::new().route("/health", get(health));

    // Gateway-asserted identity required
    let protected_routes = Router::new()
        // Vault
        .route("/files", post(handlers::file::deposit_files))
        .route("/files/claim", post(handlers::file::claim_file))
        // Admin routes
        .route("/admin/files", get(handlers::admin::list_files))
        .route("/admin/file-types", get(handlers::admin::list_file_types))
        .route("/admin/file-types/:id", put(handlers::admin::update_file_type))
        .route("/admin/usage", get(handlers::admin::usage))
        .layer(DefaultBodyLimit::max(state.config.server.max_upload_bytes))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::identity::identity_middleware,
        ));

    // Combine all routes under /api/v1
    Router::new()
        .nest("/api/v1", public_routes.merge(protected_routes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
