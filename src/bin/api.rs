/// API process: a minimal external-facing stub. Exposes a health check and
/// a read-only passthrough to the store's head block. Pagination and
/// response-shaping for full query handlers are out of scope.
use axum::{extract::State, routing::get, Json, Router};
use eth_indexer::config::Settings;
use eth_indexer::store::{BlockStore, PgStore};
use eth_indexer::telemetry::{init_tracing, TelemetryConfig};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Clone)]
struct ApiState {
    store: Arc<PgStore>,
}

#[derive(Serialize)]
struct HeadResponse {
    height: u64,
    hash: String,
}

#[tokio::main]
async fn main() {
    if let Err(e) = init_tracing(TelemetryConfig::default()) {
        eprintln!("failed to initialize logging: {e}");
        std::process::exit(1);
    }

    let settings = match Settings::from_env() {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let store = match PgStore::connect(&settings.database_url, settings.db_max_conns).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(error = %e, "failed to connect to store");
            std::process::exit(1);
        }
    };

    let state = ApiState { store };
    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/blocks/head", get(head_handler))
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.api_port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, "failed to bind api listener");
            std::process::exit(1);
        }
    };

    info!(%addr, "serving api");
    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "api server failed");
    }
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn head_handler(State(state): State<ApiState>) -> Result<Json<HeadResponse>, axum::http::StatusCode> {
    let head = state
        .store
        .head_height()
        .await
        .map_err(|_| axum::http::StatusCode::INTERNAL_SERVER_ERROR)?;

    let height = head.ok_or(axum::http::StatusCode::NOT_FOUND)?;
    let block = state
        .store
        .get_block(height)
        .await
        .map_err(|_| axum::http::StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(axum::http::StatusCode::NOT_FOUND)?;

    Ok(Json(HeadResponse {
        height: block.height,
        hash: format!("{:#x}", block.hash),
    }))
}
