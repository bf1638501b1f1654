//! Per-request state threaded through the middleware pipeline.
//!
//! A [`RequestContext`] is stamped out of the matched route's template for
//! every request and then filled in stage by stage: the session by
//! authentication, the input data by deserialization, the [`Query`] by the
//! query builder. It is dropped when the response is sent.

use std::collections::BTreeMap;
use std::sync::Arc;

use apisvc_persistence::resource::loaded_resource_map;
use apisvc_persistence::{
    Method, Query, RelatedField, Resource, ResourceDescription, TransactionManager, Value,
};
use axum::body::Bytes;
use http::HeaderMap;
use http::header::{AUTHORIZATION, COOKIE};

use crate::authentication::Session;

/// A transport-independent request.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// The request method.
    pub method: Method,
    /// The request path, without query string.
    pub path: String,
    /// Decoded query-string pairs, in order.
    pub params: Vec<(String, String)>,
    /// Request headers.
    pub headers: HeaderMap,
    /// Raw body bytes.
    pub body: Bytes,
}

impl ApiRequest {
    /// Creates a request with no query string, headers or body.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            params: Vec::new(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Decodes `query` (`a=1&b=2`) into the params.
    pub fn with_query(mut self, query: &str) -> Self {
        self.params = url::form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect();
        self
    }

    /// Replaces the headers.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Replaces the body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// The value of cookie `name`.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|h| h.to_str().ok())
            .flat_map(|h| h.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.trim())
    }

    /// The token of an `Authorization: Bearer <token>` header.
    pub fn bearer_token(&self) -> Option<&str> {
        let value = self.headers.get(AUTHORIZATION)?.to_str().ok()?;
        let (scheme, token) = value.split_once(' ')?;
        if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() {
            Some(token.trim())
        } else {
            None
        }
    }
}

/// Which kind of route matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    /// A resource, collection or related-resource route.
    Resource,
    /// The `/<resource>/schema` self-description.
    Schema,
}

/// The per-route part of a request context.
#[derive(Debug, Clone)]
pub struct RouteTemplate {
    /// Route kind.
    pub kind: RouteKind,
    /// The resource type whose manager owns the route.
    pub base: Arc<ResourceDescription>,
    /// The relation traversed from `base`, on related routes.
    pub related: Option<Arc<RelatedField>>,
    /// The resource type the route addresses: the relation's target on
    /// related routes, `base` otherwise.
    pub resource: Arc<ResourceDescription>,
    /// Whether the route addresses a collection.
    pub bulk: bool,
}

/// Deserialized request body.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestData {
    /// A single resource.
    One(Resource),
    /// A list of resources.
    Many(Vec<Resource>),
}

impl RequestData {
    /// Every top-level resource.
    pub fn resources(&self) -> Vec<&Resource> {
        match self {
            RequestData::One(resource) => vec![resource],
            RequestData::Many(resources) => resources.iter().collect(),
        }
    }

    /// Every top-level resource, mutably.
    pub fn resources_mut(&mut self) -> Vec<&mut Resource> {
        match self {
            RequestData::One(resource) => vec![resource],
            RequestData::Many(resources) => resources.iter_mut().collect(),
        }
    }

    /// Every resource in the body, embedded ones included, grouped by type.
    pub fn loaded_resources(&self) -> BTreeMap<String, Vec<&Resource>> {
        match self {
            RequestData::One(resource) => loaded_resource_map(std::slice::from_ref(resource)),
            RequestData::Many(resources) => loaded_resource_map(resources),
        }
    }
}

/// Named context values authorizers key on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextAttribute {
    /// The authenticated user.
    UserId,
    /// The authenticated user's tenant.
    TenantId,
}

impl ContextAttribute {
    /// Attribute name used in messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextAttribute::UserId => "user_id",
            ContextAttribute::TenantId => "tenant_id",
        }
    }
}

/// The verb a request performs, by method, bulk flag and route shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    /// `GET` on a collection.
    All,
    /// `GET` on a single resource.
    One,
    /// `POST` of a single resource.
    Create,
    /// `POST` of a list.
    BulkCreate,
    /// `PUT` of a single resource.
    Update,
    /// `PUT` of a list.
    BulkUpdate,
    /// `DELETE` of a single resource.
    Delete,
    /// `DELETE` on a collection.
    BulkDelete,
    /// `GET` through a relation.
    GetRelated,
    /// `POST` through a relation.
    CreateRelated,
    /// `PUT` through a relation.
    UpdateRelated,
    /// `DELETE` through a relation.
    DeleteRelated,
}

/// Everything known about one request.
#[derive(Debug)]
pub struct RequestContext {
    /// The raw request.
    pub request: ApiRequest,
    /// The request method.
    pub method: Method,
    /// Route kind.
    pub kind: RouteKind,
    /// The resource type whose manager owns the route.
    pub base: Arc<ResourceDescription>,
    /// The relation traversed from `base`, on related routes.
    pub related: Option<Arc<RelatedField>>,
    /// The addressed resource type.
    pub resource: Arc<ResourceDescription>,
    /// Whether the request addresses or carries a collection.
    pub bulk: bool,
    /// Primary key of the base resource, on related routes.
    pub base_key: Option<Value>,
    /// Query-string pairs.
    pub params: Vec<(String, String)>,
    /// Filter pairs the route contributed (primary keys, related-route joins).
    pub route_params: Vec<(String, String)>,
    /// The authenticated session.
    pub session: Option<Session>,
    /// The deserialized body.
    pub data: Option<RequestData>,
    /// The built query.
    pub query: Option<Query>,
    /// The request's transaction scopes.
    pub transactions: TransactionManager,
}

impl RequestContext {
    /// Stamps a context out of a route template.
    pub fn new(template: &RouteTemplate, request: ApiRequest) -> Self {
        Self {
            method: request.method,
            params: request.params.clone(),
            request,
            kind: template.kind,
            base: template.base.clone(),
            related: template.related.clone(),
            resource: template.resource.clone(),
            bulk: template.bulk,
            base_key: None,
            route_params: Vec::new(),
            session: None,
            data: None,
            query: None,
            transactions: TransactionManager::new(),
        }
    }

    /// Whether the request addresses its resource type directly.
    pub fn is_direct_resource(&self) -> bool {
        self.related.is_none()
    }

    /// Whether the request reaches its resource type through a relation.
    pub fn is_related_resource(&self) -> bool {
        self.related.is_some()
    }

    /// The session's value for `attribute`.
    pub fn attribute(&self, attribute: ContextAttribute) -> Option<&Value> {
        let session = self.session.as_ref()?;
        let value = match attribute {
            ContextAttribute::UserId => &session.user_id,
            ContextAttribute::TenantId => &session.tenant_id,
        };
        value.as_ref().filter(|v| !v.is_null())
    }

    /// The authenticated user id.
    pub fn user_id(&self) -> Option<&Value> {
        self.attribute(ContextAttribute::UserId)
    }

    /// The authenticated tenant id.
    pub fn tenant_id(&self) -> Option<&Value> {
        self.attribute(ContextAttribute::TenantId)
    }

    /// Adds a route-derived filter the caller did not write.
    pub fn add_route_param(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.route_params.push((name.into(), value.into()));
    }

    /// The verb this request performs.
    pub fn verb(&self) -> Verb {
        if self.is_related_resource() {
            return match self.method {
                Method::Get => Verb::GetRelated,
                Method::Post => Verb::CreateRelated,
                Method::Put => Verb::UpdateRelated,
                Method::Delete => Verb::DeleteRelated,
            };
        }
        match (self.method, self.bulk) {
            (Method::Get, true) => Verb::All,
            (Method::Get, false) => Verb::One,
            (Method::Post, false) => Verb::Create,
            (Method::Post, true) => Verb::BulkCreate,
            (Method::Put, false) => Verb::Update,
            (Method::Put, true) => Verb::BulkUpdate,
            (Method::Delete, false) => Verb::Delete,
            (Method::Delete, true) => Verb::BulkDelete,
        }
    }
}
