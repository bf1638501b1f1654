//! Per-resource sanitizers on request data and response payloads.

use apisvc_persistence::{Resource, StorageError};
use async_trait::async_trait;

use super::Middleware;
use crate::api::Api;
use crate::context::RequestContext;
use crate::response::ApiResponse;

/// Desanitizes incoming data and sanitizes outgoing payloads, each resource
/// with the sanitizer of its own type.
#[derive(Debug, Clone, Copy, Default)]
pub struct SanitizationMiddleware;

fn visit_with<F>(api: &Api, roots: Vec<&mut Resource>, mut apply: F)
where
    F: FnMut(&dyn crate::sanitization::Sanitizer, &mut Resource),
{
    for root in roots {
        root.visit_mut(&mut |resource| {
            if let Ok(endpoint) = api.endpoint(resource.resource_name()) {
                apply(endpoint.sanitizer.as_ref(), resource);
            }
        });
    }
}

#[async_trait]
impl Middleware for SanitizationMiddleware {
    fn name(&self) -> &'static str {
        "sanitization"
    }

    async fn process_request(&self, api: &Api, ctx: &mut RequestContext) -> Option<ApiResponse> {
        if let Some(mut data) = ctx.data.take() {
            let context: &RequestContext = ctx;
            visit_with(api, data.resources_mut(), |sanitizer, resource| {
                sanitizer.desanitize_resource(context, resource)
            });
            ctx.data = Some(data);
        }
        None
    }

    async fn process_response(
        &self,
        api: &Api,
        ctx: &mut RequestContext,
        mut response: ApiResponse,
    ) -> Result<ApiResponse, StorageError> {
        if response.is_successful() {
            let context: &RequestContext = ctx;
            visit_with(api, response.payload.resources_mut(), |sanitizer, resource| {
                sanitizer.sanitize_resource(context, resource)
            });
        }
        Ok(response)
    }
}
