//! JSON request bodies in, JSON documents out.

use apisvc_persistence::format::{JsonFormatter, ResourceReader};
use apisvc_persistence::{StorageError, StorageResult};
use async_trait::async_trait;
use axum::body::Bytes;
use http::header::{CACHE_CONTROL, CONTENT_TYPE};
use tracing::debug;

use super::Middleware;
use crate::api::Api;
use crate::context::{RequestContext, RequestData};
use crate::response::{ApiResponse, JSON_CONTENT_TYPE, Payload};

/// Reads request bodies into resources and writes resource payloads with
/// link stubs for unloaded relations.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerializationMiddleware;

impl SerializationMiddleware {
    /// Collection routes try a list first and fall back to a single
    /// resource, which also clears the bulk flag.
    fn read(api: &Api, ctx: &mut RequestContext) -> StorageResult<Option<RequestData>> {
        if ctx.request.body.is_empty() {
            return Ok(None);
        }
        let reader = ResourceReader::new(api.registry(), ctx.resource.clone());
        if ctx.bulk {
            let mut formatter = JsonFormatter::from_slice(&ctx.request.body)?;
            match reader.read_resources(&mut formatter) {
                Ok(resources) => return Ok(Some(RequestData::Many(resources))),
                Err(err) => {
                    debug!(error = %err, "Body is not a list, reading a single resource");
                    ctx.bulk = false;
                }
            }
        }
        let mut formatter = JsonFormatter::from_slice(&ctx.request.body)?;
        Ok(Some(RequestData::One(reader.read_resource(&mut formatter)?)))
    }

    fn write(api: &Api, ctx: &RequestContext, payload: &Payload) -> StorageResult<Option<Bytes>> {
        let writer = api.writer();
        let mut formatter = JsonFormatter::new();
        match payload {
            Payload::Resource(resource) => writer.write_resource(&mut formatter, resource)?,
            Payload::Resources(resources) => writer.write_resources(&mut formatter, resources)?,
            Payload::Collection(collection) => {
                let uri = ctx
                    .is_related_resource()
                    .then(|| ctx.request.path.clone());
                writer.write_collection(&mut formatter, &ctx.resource, collection, uri)?
            }
            _ => return Ok(None),
        }
        Ok(Some(Bytes::from(formatter.into_bytes()?)))
    }
}

#[async_trait]
impl Middleware for SerializationMiddleware {
    fn name(&self) -> &'static str {
        "serialization"
    }

    async fn process_request(&self, api: &Api, ctx: &mut RequestContext) -> Option<ApiResponse> {
        match Self::read(api, ctx) {
            Ok(data) => {
                ctx.data = data;
                None
            }
            Err(err) => Some(ApiResponse::error(&err)),
        }
    }

    async fn process_response(
        &self,
        api: &Api,
        ctx: &mut RequestContext,
        mut response: ApiResponse,
    ) -> Result<ApiResponse, StorageError> {
        if !response.is_successful() {
            return Ok(response);
        }
        if let Some(body) = Self::write(api, ctx, &response.payload)? {
            response.payload = Payload::Body(body);
        }
        Ok(response
            .with_header(CACHE_CONTROL, "no-cache")
            .with_header(CONTENT_TYPE, JSON_CONTENT_TYPE))
    }
}
