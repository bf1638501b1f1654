//! Query construction and query-level authorization.

use apisvc_persistence::{Query, StorageError, StorageResult};
use async_trait::async_trait;
use tracing::{error, warn};

use super::Middleware;
use crate::api::Api;
use crate::authorization::check_resource_types;
use crate::context::{RequestContext, RouteKind};
use crate::response::ApiResponse;

/// Builds the request's query from its parameters and route.
///
/// Failures outside the request taxonomy surface as a generic invalid query.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryBuilderMiddleware;

impl QueryBuilderMiddleware {
    async fn build(api: &Api, ctx: &mut RequestContext) -> StorageResult<Query> {
        let base = api.endpoint(ctx.base.name())?.manager.clone();
        base.prepare_related(api, ctx).await?;
        let manager = api.endpoint(ctx.resource.name())?.manager.clone();
        manager.build_query(api, ctx)
    }
}

#[async_trait]
impl Middleware for QueryBuilderMiddleware {
    fn name(&self) -> &'static str {
        "query_builder"
    }

    async fn process_request(&self, api: &Api, ctx: &mut RequestContext) -> Option<ApiResponse> {
        if ctx.kind == RouteKind::Schema {
            return None;
        }
        match Self::build(api, ctx).await {
            Ok(query) => {
                ctx.query = Some(query);
                None
            }
            Err(err) if err.is_client_error() => {
                warn!(path = %ctx.request.path, error = %err, "Invalid query");
                Some(ApiResponse::error(&err))
            }
            Err(err) => {
                error!(path = %ctx.request.path, error = %err, "Query construction failed");
                Some(ApiResponse::error(&StorageError::invalid_query("invalid query")))
            }
        }
    }
}

/// Runs the authorizers' query hooks on the built query, their resource
/// hooks on the request data, and their response hooks on the result.
///
/// On related routes the base resource's authorizer runs before the
/// target's.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryAuthorizationMiddleware;

impl QueryAuthorizationMiddleware {
    async fn authorize(api: &Api, ctx: &RequestContext, mut query: Query) -> StorageResult<Query> {
        if ctx.is_related_resource() {
            query = api
                .endpoint(ctx.base.name())?
                .authorizer
                .authorize_query(api, &ctx.base, ctx, query)
                .await?;
        }
        query = api
            .endpoint(ctx.resource.name())?
            .authorizer
            .authorize_query(api, &ctx.resource, ctx, query)
            .await?;

        if let Some(data) = &ctx.data {
            check_resource_types(&ctx.resource, &data.resources())?;
            for (name, resources) in data.loaded_resources() {
                let endpoint = api.endpoint(&name)?;
                endpoint
                    .authorizer
                    .authorize_query_resources(
                        api,
                        endpoint.manager.description(),
                        ctx,
                        &resources,
                        &query,
                    )
                    .await?;
            }
        }
        Ok(query)
    }

    async fn authorize_response(
        api: &Api,
        ctx: &RequestContext,
        response: &ApiResponse,
    ) -> StorageResult<()> {
        if ctx.is_related_resource() {
            api.endpoint(ctx.base.name())?
                .authorizer
                .authorize_query_response(api, &ctx.base, ctx, response)
                .await?;
        }
        api.endpoint(ctx.resource.name())?
            .authorizer
            .authorize_query_response(api, &ctx.resource, ctx, response)
            .await?;

        for (name, resources) in response.payload.loaded_resources() {
            let endpoint = api.endpoint(&name)?;
            endpoint
                .authorizer
                .authorize_query_response_resources(
                    api,
                    endpoint.manager.description(),
                    ctx,
                    &resources,
                    ctx.query.as_ref(),
                )
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Middleware for QueryAuthorizationMiddleware {
    fn name(&self) -> &'static str {
        "query_authorization"
    }

    async fn process_request(&self, api: &Api, ctx: &mut RequestContext) -> Option<ApiResponse> {
        let query = ctx.query.take()?;
        match Self::authorize(api, ctx, query).await {
            Ok(query) => {
                ctx.query = Some(query);
                None
            }
            Err(err) => {
                warn!(path = %ctx.request.path, error = %err, "Query not authorized");
                Some(ApiResponse::error(&err))
            }
        }
    }

    async fn process_response(
        &self,
        api: &Api,
        ctx: &mut RequestContext,
        response: ApiResponse,
    ) -> Result<ApiResponse, StorageError> {
        if !response.is_successful() || ctx.query.is_none() {
            return Ok(response);
        }
        match Self::authorize_response(api, ctx, &response).await {
            Ok(()) => Ok(response),
            Err(err) => {
                warn!(path = %ctx.request.path, error = %err, "Response not authorized");
                Ok(ApiResponse::error(&err))
            }
        }
    }
}
