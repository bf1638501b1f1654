//! Route configuration for the REST API.
//!
//! Axum routes only the probes. Resource routes are regular expressions
//! generated from the schema and matched by [`Api::resolve`](crate::Api::resolve),
//! so every other path falls through to [`dispatch_handler`](crate::handlers::dispatch_handler).

use axum::{Router, routing::get};

use crate::handlers;
use crate::state::AppState;

/// Creates the application routes.
///
/// # Routes
///
/// - `GET /health` - Health check
/// - `GET /_liveness` - Liveness probe
/// - `GET /_readiness` - Readiness probe
/// - anything else - the resource pipeline
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/_liveness", get(handlers::health::liveness_handler))
        .route("/_readiness", get(handlers::health::readiness_handler))
        .fallback(handlers::dispatch_handler)
        .with_state(state)
}
