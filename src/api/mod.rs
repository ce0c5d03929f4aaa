//! REST API server module
//!
//! HTTP surface of the work queue: enqueue, list, inspect and remove items.

use crate::error::Error;
use crate::queue::WorkQueue;
use crate::{Config, Result};
use axum::{
    Router,
    http::HeaderValue,
    routing::{get, put},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod error_response;
pub mod routes;
pub mod state;

pub use state::AppState;

/// Create the API router with all route definitions
///
/// # Routes
///
/// - `GET /` - Service status, version and server time
/// - `PUT /archive/:id` - Queue an item
/// - `POST /archive/:id` - Queue an item
/// - `GET /archive` - List every queued, running and recent item
/// - `GET /archive/:id` - Status and queue index of one item
/// - `DELETE /archive/:id` - Remove a still-pending item
pub fn create_router(queue: Arc<WorkQueue>, config: Arc<Config>) -> Result<Router> {
    let state = AppState::new(queue, config.clone())?;

    let router = Router::new()
        .route("/", get(routes::root))
        .route("/archive", get(routes::list_items))
        .route(
            "/archive/:id",
            put(routes::add_item)
                .post(routes::add_item)
                .get(routes::get_item)
                .delete(routes::remove_item),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if config.api.cors_enabled {
        Ok(router.layer(build_cors_layer(&config.api.cors_origins)))
    } else {
        Ok(router)
    }
}

/// Build a CORS layer based on configured origins
///
/// `"*"` or an empty list allows any origin.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_any = origins.iter().any(|o| o == "*");

    if allow_any || origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Serve the API on the configured bind address until `shutdown` is cancelled
pub async fn start_api_server(
    queue: Arc<WorkQueue>,
    config: Arc<Config>,
    shutdown: CancellationToken,
) -> Result<()> {
    let bind_address = config.api.bind_address;
    let app = create_router(queue, config)?;

    let listener = TcpListener::bind(bind_address).await.map_err(Error::Io)?;

    tracing::info!(address = %bind_address, "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| Error::ApiServerError(e.to_string()))?;

    tracing::info!("API server stopped");
    Ok(())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
