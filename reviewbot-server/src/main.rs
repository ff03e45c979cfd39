use anyhow::Result;
use axum::{http::StatusCode, response::Json, routing::get, Router};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, Level};

use reviewbot_core::{PrEngine, TeamEngine, UserEngine};
use reviewbot_server::config::Config;
use reviewbot_server::sqlite::SqliteStore;
use reviewbot_server::web::api_router;
use reviewbot_server::AppState;

async fn health_check() -> Result<Json<serde_json::Value>, StatusCode> {
    Ok(Json(json!({
        "status": "healthy",
        "service": "reviewbot"
    })))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    info!("Starting reviewer assignment service");

    let config = Config::from_env()?;

    let db_path = config.state_dir.join("reviewbot-state.db");
    info!("Using state database: {}", db_path.display());
    let store = Arc::new(SqliteStore::new(&db_path)?);

    let app_state = Arc::new(AppState {
        pr_engine: PrEngine::new(store.clone(), store.clone()),
        team_engine: TeamEngine::new(store.clone(), store.clone()),
        user_engine: UserEngine::new(store.clone()),
    });

    let app = Router::new()
        .route("/health", get(health_check))
        .merge(api_router())
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(app_state);

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!("Server listening on port {}", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
