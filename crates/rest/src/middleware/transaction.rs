//! One transaction scope per request.

use apisvc_persistence::StorageError;
use async_trait::async_trait;
use tracing::{debug, warn};

use super::Middleware;
use crate::api::Api;
use crate::context::RequestContext;
use crate::response::ApiResponse;

/// Opens the request's outermost scope; commits it on success and rolls it
/// back on a failed response or an exception.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionMiddleware;

#[async_trait]
impl Middleware for TransactionMiddleware {
    fn name(&self) -> &'static str {
        "transaction"
    }

    async fn process_request(&self, _api: &Api, ctx: &mut RequestContext) -> Option<ApiResponse> {
        ctx.transactions.clear().await;
        ctx.transactions.begin();
        None
    }

    async fn process_response(
        &self,
        _api: &Api,
        ctx: &mut RequestContext,
        response: ApiResponse,
    ) -> Result<ApiResponse, StorageError> {
        if response.is_successful() {
            ctx.transactions.end().await?;
            debug!(path = %ctx.request.path, "Request committed");
        } else if let Err(err) = ctx.transactions.rollback().await {
            warn!(error = %err, "Rollback after failed response");
        }
        Ok(response)
    }

    async fn process_exception(
        &self,
        _api: &Api,
        ctx: &mut RequestContext,
        error: StorageError,
    ) -> Result<ApiResponse, StorageError> {
        if let Err(err) = ctx.transactions.rollback().await {
            warn!(error = %err, "Rollback after exception");
        }
        Err(error)
    }
}
