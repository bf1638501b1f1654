//! Session resolution and per-resource authentication.

use std::sync::Arc;

use apisvc_persistence::StorageResult;
use async_trait::async_trait;
use tracing::{error, warn};

use super::Middleware;
use crate::api::Api;
use crate::authentication::SessionStore;
use crate::context::RequestContext;
use crate::response::ApiResponse;

/// Resolves the session from the session cookie (or a bearer token) and runs
/// the authenticators of the route's resources.
#[derive(Debug, Clone)]
pub struct AuthenticationMiddleware {
    store: Arc<dyn SessionStore>,
    cookie: String,
}

impl AuthenticationMiddleware {
    /// Looks sessions up in `store` by the value of `cookie`.
    pub fn new(store: Arc<dyn SessionStore>, cookie: impl Into<String>) -> Self {
        Self {
            store,
            cookie: cookie.into(),
        }
    }

    fn authenticate(api: &Api, ctx: &RequestContext) -> StorageResult<()> {
        if ctx.is_related_resource() {
            api.endpoint(ctx.base.name())?
                .authenticator
                .authenticate_request(ctx)?;
        }
        api.endpoint(ctx.resource.name())?
            .authenticator
            .authenticate_request(ctx)
    }
}

#[async_trait]
impl Middleware for AuthenticationMiddleware {
    fn name(&self) -> &'static str {
        "authentication"
    }

    async fn process_request(&self, api: &Api, ctx: &mut RequestContext) -> Option<ApiResponse> {
        let token = ctx
            .request
            .cookie(&self.cookie)
            .or_else(|| ctx.request.bearer_token())
            .map(str::to_string);

        ctx.session = match token {
            Some(token) => match self.store.get_session(&token).await {
                Ok(session) => session,
                Err(err) => {
                    error!(error = %err, "Session lookup failed");
                    return Some(ApiResponse::error(&err));
                }
            },
            None => None,
        };

        match Self::authenticate(api, ctx) {
            Ok(()) => None,
            Err(err) => {
                warn!(path = %ctx.request.path, error = %err, "Authentication failed");
                Some(ApiResponse::error(&err))
            }
        }
    }
}
