//! Pipeline responses and their conversion into HTTP responses.

use std::collections::BTreeMap;

use apisvc_persistence::{Collection, Resource, StorageError};
use axum::Json;
use axum::body::{Body, Bytes};
use axum::response::{IntoResponse, Response};
use http::{HeaderMap, HeaderValue, StatusCode};
use http::header::CONTENT_TYPE;

use crate::error::ErrorBody;

/// Content type of every serialized payload.
pub const JSON_CONTENT_TYPE: &str = "application/json; charset=UTF-8";

/// What a response carries. Resource payloads are replaced by
/// [`Payload::Body`] once serialized.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Nothing.
    Empty,
    /// A single resource.
    Resource(Resource),
    /// A plain list of resources.
    Resources(Vec<Resource>),
    /// A page of resources with its total count.
    Collection(Collection),
    /// A free-form document, e.g. a schema description.
    Json(serde_json::Value),
    /// An error body.
    Error(ErrorBody),
    /// Serialized bytes.
    Body(Bytes),
}

impl Payload {
    /// Top-level resources carried by the payload.
    pub fn resources(&self) -> Vec<&Resource> {
        match self {
            Payload::Resource(resource) => vec![resource],
            Payload::Resources(resources) => resources.iter().collect(),
            Payload::Collection(collection) => collection.results.iter().collect(),
            _ => Vec::new(),
        }
    }

    /// Top-level resources, mutably.
    pub fn resources_mut(&mut self) -> Vec<&mut Resource> {
        match self {
            Payload::Resource(resource) => vec![resource],
            Payload::Resources(resources) => resources.iter_mut().collect(),
            Payload::Collection(collection) => collection.results.iter_mut().collect(),
            _ => Vec::new(),
        }
    }

    /// Every resource reachable from the payload through loaded relations,
    /// grouped by resource type.
    pub fn loaded_resources(&self) -> BTreeMap<String, Vec<&Resource>> {
        let mut map: BTreeMap<String, Vec<&Resource>> = BTreeMap::new();
        for resource in self.resources() {
            resource.visit(&mut |r| {
                map.entry(r.resource_name().to_string())
                    .or_default()
                    .push(r)
            });
        }
        map
    }
}

/// Status code, payload and headers.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// HTTP status code.
    pub code: u16,
    /// Response payload.
    pub payload: Payload,
    /// Response headers.
    pub headers: HeaderMap,
}

impl ApiResponse {
    /// Creates a response.
    pub fn new(code: u16, payload: Payload) -> Self {
        Self {
            code,
            payload,
            headers: HeaderMap::new(),
        }
    }

    /// A `200` response.
    pub fn ok(payload: Payload) -> Self {
        Self::new(200, payload)
    }

    /// A `201` response.
    pub fn created(payload: Payload) -> Self {
        Self::new(201, payload)
    }

    /// The response for a failed request.
    pub fn error(err: &StorageError) -> Self {
        let body = ErrorBody::from_storage(err);
        Self::new(body.code, Payload::Error(body))
    }

    /// Success is a code in `[200, 299]`.
    pub fn is_successful(&self) -> bool {
        (200..=299).contains(&self.code)
    }

    /// Sets a header, ignoring values that are not valid header text.
    pub fn with_header(mut self, name: http::HeaderName, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(name, value);
        }
        self
    }
}

impl IntoResponse for ApiResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = match self.payload {
            Payload::Empty => Body::empty().into_response(),
            Payload::Body(bytes) => bytes.into_response(),
            Payload::Json(json) => Json(json).into_response(),
            Payload::Error(body) => Json(body).into_response(),
            // Resource payloads only reach here when serialization was skipped.
            payload @ (Payload::Resource(_) | Payload::Resources(_) | Payload::Collection(_)) => {
                let json: Vec<serde_json::Value> = payload
                    .resources()
                    .iter()
                    .map(|r| serde_json::Value::Object(
                        r.values()
                            .iter()
                            .map(|(k, v)| (k.clone(), v.to_json()))
                            .collect(),
                    ))
                    .collect();
                Json(json).into_response()
            }
        };
        *response.status_mut() = status;
        for (name, value) in self.headers.iter() {
            response.headers_mut().insert(name.clone(), value.clone());
        }
        if !response.headers().contains_key(CONTENT_TYPE) {
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        }
        response
    }
}
