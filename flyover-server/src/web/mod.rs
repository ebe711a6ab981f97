//! Web server: OwnTracks location ingest plus a health check.

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use flyover_core::types::{FlyoverError, Result};

use crate::db::SqliteStore;

pub mod ingest;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub struct AppState {
    pub store: Arc<SqliteStore>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/pub", axum::routing::post(ingest::api_publish_location))
        .route("/api/health", axum::routing::get(ingest::api_health))
        .with_state(state)
        .layer(cors)
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    store: Arc<SqliteStore>,
    host: &str,
    port: u16,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = build_router(Arc::new(AppState { store }));
    let addr = format!("{host}:{port}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("location ingest listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(FlyoverError::Io)
}
