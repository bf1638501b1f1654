//! Health check endpoint handlers.
//!
//! Provides probes for monitoring systems and load balancers. They bypass the
//! resource pipeline entirely.

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::debug;

use crate::error::RestResult;
use crate::state::AppState;

/// Handler for the health check endpoint.
///
/// # HTTP Request
///
/// `GET /health`
///
/// # Response
///
/// - `200 OK` - Server is healthy
pub async fn health_handler(State(state): State<AppState>) -> RestResult<Response> {
    debug!("Processing health check request");

    let api = state.api();
    let health_response = serde_json::json!({
        "status": "healthy",
        "resources": api.registry().resources().count(),
        "routes": api.routes().len(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    });

    Ok((StatusCode::OK, Json(health_response)).into_response())
}

/// Handler for the liveness probe.
///
/// # HTTP Request
///
/// `GET /_liveness`
pub async fn liveness_handler() -> impl IntoResponse {
    StatusCode::OK
}

/// Handler for the readiness probe.
///
/// Ready once at least one resource is routed.
///
/// # HTTP Request
///
/// `GET /_readiness`
pub async fn readiness_handler(State(state): State<AppState>) -> RestResult<Response> {
    debug!("Processing readiness check request");

    let routed = !state.api().routes().is_empty();
    let (status, label) = if routed {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
    };
    let response = serde_json::json!({
        "status": label,
        "checks": {
            "routes": if routed { "ok" } else { "none" }
        }
    });

    Ok((status, Json(response)).into_response())
}
