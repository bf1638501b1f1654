//! # apisvc-rest - declarative resource APIs over HTTP
//!
//! This crate turns a [`SchemaRegistry`](apisvc_persistence::SchemaRegistry)
//! and a set of query backends into a JSON REST API. Every resource gets
//! collection, item, related-resource and schema routes; every request runs
//! through a fixed middleware pipeline before its resource manager executes
//! it.
//!
//! ## Request Lifecycle
//!
//! 1. The path is matched against the generated routes and a
//!    [`RequestContext`] is stamped out of the route's template.
//! 2. Middlewares run their request stage in order; the first one to answer
//!    short-circuits the rest.
//! 3. The base resource's [`Manager`] executes the query.
//! 4. The middlewares that ran get the response (or the error) in reverse
//!    order.
//!
//! The standard pipeline is error handling, authentication, request
//! authorization, transactions, serialization, sanitization, query building
//! and query authorization.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use apisvc_rest::{Api, MemorySessionStore, SessionAuthenticator, create_app, middleware};
//!
//! let store = Arc::new(MemorySessionStore::new());
//! let api = Api::builder("/api/v1", registry, backends)
//!     .resource("chats", |endpoint| endpoint.authenticator(SessionAuthenticator))?
//!     .middlewares(middleware::standard_pipeline(store, "sessionid"))
//!     .build()?;
//!
//! let app = create_app(Arc::new(api));
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//! axum::serve(listener, app).await?;
//! ```
//!
//! ## API Endpoints
//!
//! | Route | Methods |
//! |-------|---------|
//! | `[base]/<resource>` | GET, POST, PUT, DELETE (bulk) |
//! | `[base]/<resource>/<key>` | GET, PUT, DELETE |
//! | `[base]/<resource>/<key>/<relation>` | GET, POST, PUT, DELETE |
//! | `[base]/<resource>/<key>/<relation>/<key>` | GET, PUT, DELETE |
//! | `[base]/<resource>/schema` | GET |
//! | `/health`, `/_liveness`, `/_readiness` | GET |
//!
//! Collection queries accept `<path>[__<operator>]=<value>` filters,
//! `order_by=<path>[__desc],...`, `with=<relation path>,...` and
//! `slice=<start>,<stop>`, subject to each resource's allow-lists.
//!
//! ## Architecture
//!
//! - [`config`] - Server configuration
//! - [`error`] - Error types and the error body
//! - [`context`] - Per-request state
//! - [`response`] - Pipeline responses
//! - [`authentication`] - Sessions and authenticators
//! - [`authorization`] - Request, query and response authorizers
//! - [`sanitization`] - Field sanitizers
//! - [`manager`] - Routes, query building and dispatch per resource
//! - [`middleware`] - The pipeline stages
//! - [`api`] - The application object
//! - [`handlers`] - HTTP handlers
//! - [`routing`] - Axum route configuration
//! - [`state`] - Application state

// Enforce documentation
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod api;
pub mod authentication;
pub mod authorization;
pub mod config;
pub mod context;
pub mod error;
pub mod handlers;
pub mod manager;
pub mod middleware;
pub mod response;
pub mod routing;
pub mod sanitization;
pub mod state;

// Re-export commonly used types
pub use api::{Api, ApiBuilder, Endpoint};
pub use authentication::{
    Authenticator, MemorySessionStore, ResourceAuthenticator, Session, SessionAuthenticator,
    SessionStore,
};
pub use authorization::{
    Authorizer, ContextAuthorizer, FilterAuthorizer, MacroAuthorizer, MethodAuthorizer,
    ResourceAuthorizer,
};
pub use config::ServerConfig;
pub use context::{ApiRequest, ContextAttribute, RequestContext, Verb};
pub use error::{ErrorBody, RestError, RestResult};
pub use manager::{DefaultQueryHooks, Manager, QueryHooks};
pub use middleware::Middleware;
pub use response::{ApiResponse, Payload};
pub use sanitization::{PrivateFieldSanitizer, ResourceSanitizer, Sanitizer};
pub use state::AppState;

use std::sync::Arc;

use axum::{Router, extract::DefaultBodyLimit};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;

/// Creates the Axum application with default configuration.
///
/// This is a convenience function that creates the app with default settings.
/// For more control, use [`create_app_with_config`].
pub fn create_app(api: Arc<Api>) -> Router {
    create_app_with_config(api, ServerConfig::default())
}

/// Creates the Axum application with custom configuration.
///
/// Wraps the probes and the resource pipeline in request ids, tracing, a
/// request timeout, a body limit and, when enabled, CORS.
///
/// # Example
///
/// ```rust,ignore
/// use apisvc_rest::{create_app_with_config, ServerConfig};
///
/// let config = ServerConfig {
///     port: 3000,
///     enable_cors: true,
///     ..Default::default()
/// };
/// let app = create_app_with_config(Arc::new(api), config);
/// ```
pub fn create_app_with_config(api: Arc<Api>, config: ServerConfig) -> Router {
    info!(
        base_uri = api.base_uri(),
        routes = api.routes().len(),
        "Creating REST API server"
    );

    let state = AppState::new(api, config.clone());
    let router = routing::create_routes(state);

    // Build middleware stack
    let service_builder = ServiceBuilder::new()
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TimeoutLayer::with_status_code(
            axum::http::StatusCode::REQUEST_TIMEOUT,
            std::time::Duration::from_secs(config.request_timeout),
        ));

    let router = router.layer(DefaultBodyLimit::max(config.max_body_size));

    // Add CORS if enabled
    let router = if config.enable_cors {
        let cors = build_cors_layer(&config);
        router.layer(cors)
    } else {
        router
    };

    // Apply remaining middleware
    router.layer(service_builder)
}

/// Builds the CORS layer based on configuration.
fn build_cors_layer(config: &ServerConfig) -> CorsLayer {
    let mut cors = CorsLayer::new();

    // Configure origins
    if config.cors_origins == "*" {
        cors = cors.allow_origin(Any);
    } else {
        let origins: Vec<_> = config
            .cors_origins
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect();
        cors = cors.allow_origin(origins);
    }

    // Configure methods
    if config.cors_methods == "*" {
        cors = cors.allow_methods(Any);
    } else {
        let methods: Vec<_> = config
            .cors_methods
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect();
        cors = cors.allow_methods(methods);
    }

    // Configure headers
    if config.cors_headers == "*" {
        cors = cors.allow_headers(Any);
    } else {
        let headers: Vec<_> = config
            .cors_headers
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect();
        cors = cors.allow_headers(headers);
    }

    cors
}

/// Initializes the tracing subscriber for logging.
///
/// This should be called once at application startup. `RUST_LOG` overrides
/// `level` when set.
///
/// # Arguments
///
/// * `level` - The log level (error, warn, info, debug, trace)
pub fn init_logging(level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "apisvc={level},apisvc_rest={level},apisvc_persistence={level},tower_http=debug"
        ))
    });

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}
