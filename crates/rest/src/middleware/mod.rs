//! The request pipeline.
//!
//! Every request runs the middlewares' request hooks in order. The first hook
//! to return a response short-circuits the rest and the dispatch; otherwise
//! the manager dispatches. The outcome then travels back through the response
//! hooks, in reverse, of every middleware whose request hook ran. A failure at
//! any point is handed to the next middleware's exception hook instead, which
//! may turn it back into a response.
//!
//! The standard pipeline, outermost first:
//!
//! - [`ErrorMiddleware`] - failures become wire error bodies
//! - [`AuthenticationMiddleware`] - session lookup and per-resource authenticators
//! - [`AuthorizationMiddleware`] - allowed-method checks
//! - [`TransactionMiddleware`] - one transaction scope per request
//! - [`SerializationMiddleware`] - request bodies in, JSON out
//! - [`SanitizationMiddleware`] - per-resource sanitizers on data in and out
//! - [`QueryBuilderMiddleware`] - the request's [`Query`](apisvc_persistence::Query)
//! - [`QueryAuthorizationMiddleware`] - query, data and response authorization

pub mod authentication;
pub mod authorization;
pub mod error;
pub mod query;
pub mod sanitization;
pub mod serialization;
pub mod transaction;

pub use authentication::AuthenticationMiddleware;
pub use authorization::AuthorizationMiddleware;
pub use error::ErrorMiddleware;
pub use query::{QueryAuthorizationMiddleware, QueryBuilderMiddleware};
pub use sanitization::SanitizationMiddleware;
pub use serialization::SerializationMiddleware;
pub use transaction::TransactionMiddleware;

use std::fmt::Debug;
use std::sync::Arc;

use apisvc_persistence::StorageError;
use async_trait::async_trait;

use crate::api::Api;
use crate::authentication::SessionStore;
use crate::context::RequestContext;
use crate::response::ApiResponse;

/// One pipeline stage.
#[async_trait]
pub trait Middleware: Send + Sync + Debug {
    /// Stage name for logs.
    fn name(&self) -> &'static str;

    /// Runs before dispatch. Returning a response ends the request early.
    async fn process_request(&self, _api: &Api, _ctx: &mut RequestContext) -> Option<ApiResponse> {
        None
    }

    /// Runs after dispatch on the way out.
    async fn process_response(
        &self,
        _api: &Api,
        _ctx: &mut RequestContext,
        response: ApiResponse,
    ) -> Result<ApiResponse, StorageError> {
        Ok(response)
    }

    /// Runs instead of [`process_response`](Self::process_response) when a
    /// later stage failed. Returning `Ok` recovers.
    async fn process_exception(
        &self,
        _api: &Api,
        _ctx: &mut RequestContext,
        error: StorageError,
    ) -> Result<ApiResponse, StorageError> {
        Err(error)
    }
}

/// The standard pipeline, resolving sessions from `store` through the
/// `cookie` cookie or a bearer token.
pub fn standard_pipeline(store: Arc<dyn SessionStore>, cookie: &str) -> Vec<Arc<dyn Middleware>> {
    vec![
        Arc::new(ErrorMiddleware),
        Arc::new(AuthenticationMiddleware::new(store, cookie)),
        Arc::new(AuthorizationMiddleware),
        Arc::new(TransactionMiddleware),
        Arc::new(SerializationMiddleware),
        Arc::new(SanitizationMiddleware),
        Arc::new(QueryBuilderMiddleware),
        Arc::new(QueryAuthorizationMiddleware),
    ]
}
