//! The catch-all resource handler.
//!
//! Axum only sees the probes; every other request is translated into an
//! [`ApiRequest`] and run through the [`Api`](crate::Api) pipeline, which
//! matches it against the resource routes itself.

use apisvc_persistence::Method;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method as HttpMethod, Uri},
    response::{IntoResponse, Response},
};
use tracing::debug;

use crate::context::ApiRequest;
use crate::error::{RestError, RestResult};
use crate::state::AppState;

/// Maps an HTTP method onto the four the pipeline serves.
pub fn resource_method(method: &HttpMethod) -> RestResult<Method> {
    match *method {
        HttpMethod::GET => Ok(Method::Get),
        HttpMethod::POST => Ok(Method::Post),
        HttpMethod::PUT => Ok(Method::Put),
        HttpMethod::DELETE => Ok(Method::Delete),
        _ => Err(RestError::MethodNotAllowed {
            method: method.to_string(),
        }),
    }
}

/// Handler for every resource route.
///
/// # HTTP Request
///
/// `GET|POST|PUT|DELETE [base]/<resource>[/<key>[/<relation>[/<key>]]]`
/// and `GET [base]/<resource>/schema`
///
/// # Response
///
/// Whatever the pipeline answers. Unmatched paths are `404`, other methods
/// `405`; both carry the standard error body.
pub async fn dispatch_handler(
    State(state): State<AppState>,
    method: HttpMethod,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match dispatch(&state, &method, &uri, headers, body).await {
        Ok(response) => response,
        Err(err) => {
            debug!(
                method = %method,
                uri = %uri,
                error = %err,
                "Request failed outside the pipeline"
            );
            err.into_response()
        }
    }
}

async fn dispatch(
    state: &AppState,
    method: &HttpMethod,
    uri: &Uri,
    headers: HeaderMap,
    body: Bytes,
) -> RestResult<Response> {
    let method = resource_method(method)?;
    let request = ApiRequest::new(method, uri.path())
        .with_query(uri.query().unwrap_or_default())
        .with_headers(headers)
        .with_body(body);
    let response = state.api().process(request).await?;
    Ok(response.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_method() {
        assert_eq!(resource_method(&HttpMethod::GET).unwrap(), Method::Get);
        assert_eq!(resource_method(&HttpMethod::DELETE).unwrap(), Method::Delete);
        let err = resource_method(&HttpMethod::PATCH).unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::METHOD_NOT_ALLOWED);
    }
}
