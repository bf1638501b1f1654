//! Failure-to-wire-body conversion.

use apisvc_persistence::StorageError;
use async_trait::async_trait;
use http::StatusCode;
use tracing::warn;

use super::Middleware;
use crate::api::Api;
use crate::context::RequestContext;
use crate::error::ErrorBody;
use crate::response::{ApiResponse, Payload};

/// Outermost stage: every failure leaves the pipeline as an error body.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorMiddleware;

#[async_trait]
impl Middleware for ErrorMiddleware {
    fn name(&self) -> &'static str {
        "error"
    }

    async fn process_response(
        &self,
        _api: &Api,
        _ctx: &mut RequestContext,
        mut response: ApiResponse,
    ) -> Result<ApiResponse, StorageError> {
        if !response.is_successful() && !matches!(response.payload, Payload::Error(_)) {
            let reason = StatusCode::from_u16(response.code)
                .ok()
                .and_then(|s| s.canonical_reason())
                .unwrap_or_default();
            response.payload = Payload::Error(ErrorBody::new(response.code, reason));
        }
        Ok(response)
    }

    async fn process_exception(
        &self,
        _api: &Api,
        ctx: &mut RequestContext,
        error: StorageError,
    ) -> Result<ApiResponse, StorageError> {
        if error.is_client_error() {
            warn!(path = %ctx.request.path, code = error.code(), error = %error, "Request failed");
        }
        Ok(ApiResponse::error(&error))
    }
}
