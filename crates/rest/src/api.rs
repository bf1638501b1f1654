//! The application object: schema, backends, per-resource endpoints, routes
//! and the middleware pipeline.
//!
//! An [`Api`] is built once at startup and shared by every request. It holds
//! no per-request state; each request gets its own
//! [`RequestContext`] and transaction scopes.

use std::collections::HashMap;
use std::sync::Arc;

use apisvc_persistence::error::SchemaError;
use apisvc_persistence::format::ResourceWriter;
use apisvc_persistence::{
    BackendMap, ExecutionContext, ResourceDescription, SchemaRegistry, StorageError, StorageResult,
    TransactionManager, Value,
};
use tracing::{debug, info};

use crate::authentication::{Authenticator, ResourceAuthenticator};
use crate::authorization::{Authorizer, ResourceAuthorizer};
use crate::context::{ApiRequest, RequestContext};
use crate::error::{RestError, RestResult};
use crate::manager::{Manager, QueryHooks, Route, RouteMatch};
use crate::middleware::Middleware;
use crate::response::ApiResponse;
use crate::sanitization::{ResourceSanitizer, Sanitizer};

/// Everything bound to one resource type.
#[derive(Debug, Clone)]
pub struct Endpoint {
    /// Routes, query building and dispatch.
    pub manager: Manager,
    /// Request authentication.
    pub authenticator: Arc<dyn Authenticator>,
    /// Request, query and response authorization.
    pub authorizer: Arc<dyn Authorizer>,
    /// Data sanitization.
    pub sanitizer: Arc<dyn Sanitizer>,
}

impl Endpoint {
    /// An endpoint with the permissive defaults.
    pub fn new(description: Arc<ResourceDescription>) -> Self {
        Self {
            manager: Manager::new(description),
            authenticator: Arc::new(ResourceAuthenticator),
            authorizer: Arc::new(ResourceAuthorizer),
            sanitizer: Arc::new(ResourceSanitizer),
        }
    }

    /// Replaces the authenticator.
    pub fn authenticator(mut self, authenticator: impl Authenticator + 'static) -> Self {
        self.authenticator = Arc::new(authenticator);
        self
    }

    /// Replaces the authorizer.
    pub fn authorizer(mut self, authorizer: impl Authorizer + 'static) -> Self {
        self.authorizer = Arc::new(authorizer);
        self
    }

    /// Replaces the sanitizer.
    pub fn sanitizer(mut self, sanitizer: impl Sanitizer + 'static) -> Self {
        self.sanitizer = Arc::new(sanitizer);
        self
    }

    /// Replaces the manager's query hooks.
    pub fn hooks(mut self, hooks: impl QueryHooks + 'static) -> Self {
        self.manager = self.manager.with_hooks(hooks);
        self
    }
}

/// Builds an [`Api`].
#[derive(Debug)]
pub struct ApiBuilder {
    base_uri: String,
    registry: Arc<SchemaRegistry>,
    backends: BackendMap,
    endpoints: HashMap<String, Endpoint>,
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl ApiBuilder {
    /// Configures the endpoint of resource `name`.
    pub fn resource(
        mut self,
        name: &str,
        configure: impl FnOnce(Endpoint) -> Endpoint,
    ) -> StorageResult<Self> {
        let description = self.registry.resource(name)?.clone();
        let endpoint = self
            .endpoints
            .remove(name)
            .unwrap_or_else(|| Endpoint::new(description));
        self.endpoints.insert(name.to_string(), configure(endpoint));
        Ok(self)
    }

    /// Appends a middleware to the pipeline.
    pub fn middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Appends several middlewares.
    pub fn middlewares(
        mut self,
        middlewares: impl IntoIterator<Item = Arc<dyn Middleware>>,
    ) -> Self {
        self.middlewares.extend(middlewares);
        self
    }

    /// Finishes the API. Resources left unconfigured get default endpoints;
    /// only resources with a bound backend are routed.
    pub fn build(mut self) -> StorageResult<Api> {
        for description in self.registry.resources() {
            self.endpoints
                .entry(description.name().to_string())
                .or_insert_with(|| Endpoint::new(description.clone()));
        }

        let mut routes = Vec::new();
        for description in self.registry.resources() {
            if self.backends.get(description.name()).is_none() {
                debug!(resource = description.name(), "No backend bound, not routed");
                continue;
            }
            let endpoint = self.endpoints.get(description.name()).ok_or_else(|| {
                SchemaError::UnknownResource {
                    name: description.name().to_string(),
                }
            })?;
            routes.extend(endpoint.manager.uris(&self.registry, &self.base_uri)?);
        }
        info!(
            routes = routes.len(),
            middlewares = self.middlewares.len(),
            "API built"
        );

        Ok(Api {
            writer: ResourceWriter::new(self.base_uri.clone()),
            base_uri: self.base_uri,
            registry: self.registry,
            backends: self.backends,
            endpoints: self.endpoints,
            routes,
            middlewares: self.middlewares,
        })
    }
}

/// Routes requests to resource managers through the middleware pipeline.
#[derive(Debug)]
pub struct Api {
    base_uri: String,
    registry: Arc<SchemaRegistry>,
    backends: BackendMap,
    endpoints: HashMap<String, Endpoint>,
    routes: Vec<Route>,
    middlewares: Vec<Arc<dyn Middleware>>,
    writer: ResourceWriter,
}

impl Api {
    /// Starts building an API serving `registry` under `base_uri`.
    pub fn builder(
        base_uri: impl Into<String>,
        registry: Arc<SchemaRegistry>,
        backends: BackendMap,
    ) -> ApiBuilder {
        ApiBuilder {
            base_uri: base_uri.into().trim_end_matches('/').to_string(),
            registry,
            backends,
            endpoints: HashMap::new(),
            middlewares: Vec::new(),
        }
    }

    /// URI prefix of every route.
    pub fn base_uri(&self) -> &str {
        &self.base_uri
    }

    /// The schema registry.
    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// Backends by resource.
    pub fn backends(&self) -> &BackendMap {
        &self.backends
    }

    /// Routes, in match order.
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// The response writer.
    pub fn writer(&self) -> &ResourceWriter {
        &self.writer
    }

    /// The endpoint of resource `name`.
    pub fn endpoint(&self, name: &str) -> StorageResult<&Endpoint> {
        self.endpoints.get(name).ok_or_else(|| {
            StorageError::from(SchemaError::UnknownResource {
                name: name.to_string(),
            })
        })
    }

    /// Execution context for backend calls within `transactions`.
    pub fn execution<'a>(&'a self, transactions: &'a TransactionManager) -> ExecutionContext<'a> {
        ExecutionContext::new(&self.registry, transactions, &self.backends)
    }

    /// The first route matching `path`.
    pub fn resolve(&self, path: &str) -> Option<RouteMatch<'_>> {
        let path = if path.len() > 1 {
            path.trim_end_matches('/')
        } else {
            path
        };
        self.routes.iter().find_map(|route| route.matches(path))
    }

    /// Runs `request` through the pipeline.
    ///
    /// Unmatched paths fail with [`RestError::RouteNotFound`]. Everything
    /// else produces a response unless a failure escapes every exception
    /// hook.
    pub async fn process(&self, request: ApiRequest) -> RestResult<ApiResponse> {
        let Some(matched) = self.resolve(&request.path) else {
            return Err(RestError::RouteNotFound { path: request.path });
        };
        let mut ctx = RequestContext::new(matched.template, request);
        if let Some(key) = matched.key {
            let name = ctx.resource.primary_key().name().to_string();
            ctx.add_route_param(name, key);
        }
        ctx.base_key = matched.base_key.map(Value::String);
        debug!(
            method = %ctx.method,
            path = %ctx.request.path,
            resource = ctx.resource.name(),
            bulk = ctx.bulk,
            "Processing request"
        );

        let mut ran = 0;
        let mut short_circuit = None;
        for middleware in &self.middlewares {
            ran += 1;
            if let Some(response) = middleware.process_request(self, &mut ctx).await {
                debug!(
                    middleware = middleware.name(),
                    code = response.code,
                    "Request stage answered"
                );
                short_circuit = Some(response);
                break;
            }
        }

        let mut outcome = match short_circuit {
            Some(response) => Ok(response),
            None => self.dispatch(&mut ctx).await,
        };

        for middleware in self.middlewares[..ran].iter().rev() {
            outcome = match outcome {
                Ok(response) => middleware.process_response(self, &mut ctx, response).await,
                Err(err) => middleware.process_exception(self, &mut ctx, err).await,
            };
        }

        outcome.map_err(RestError::from)
    }

    async fn dispatch(&self, ctx: &mut RequestContext) -> StorageResult<ApiResponse> {
        let manager = self.endpoint(ctx.base.name())?.manager.clone();
        manager.dispatch(self, ctx).await
    }
}
