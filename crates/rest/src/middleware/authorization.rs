//! Allowed-method checks.

use apisvc_persistence::{Method, StorageError, StorageResult};
use async_trait::async_trait;
use tracing::warn;

use super::Middleware;
use crate::api::Api;
use crate::context::{RequestContext, RouteKind};
use crate::response::ApiResponse;

/// Runs the route's authorizers' request checks. Schema routes are
/// read-only and skip them.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthorizationMiddleware;

impl AuthorizationMiddleware {
    fn authorize(api: &Api, ctx: &RequestContext) -> StorageResult<()> {
        if ctx.kind == RouteKind::Schema {
            if ctx.method == Method::Get {
                return Ok(());
            }
            return Err(StorageError::unauthorized(format!(
                "'{}' not allowed on {} schema",
                ctx.method,
                ctx.resource.name()
            )));
        }
        if ctx.is_related_resource() {
            api.endpoint(ctx.base.name())?
                .authorizer
                .authorize_request(&ctx.base, ctx)?;
        }
        api.endpoint(ctx.resource.name())?
            .authorizer
            .authorize_request(&ctx.resource, ctx)
    }
}

#[async_trait]
impl Middleware for AuthorizationMiddleware {
    fn name(&self) -> &'static str {
        "authorization"
    }

    async fn process_request(&self, api: &Api, ctx: &mut RequestContext) -> Option<ApiResponse> {
        match Self::authorize(api, ctx) {
            Ok(()) => None,
            Err(err) => {
                warn!(
                    method = %ctx.method,
                    path = %ctx.request.path,
                    error = %err,
                    "Request not authorized"
                );
                Some(ApiResponse::error(&err))
            }
        }
    }
}
