//! Per-resource authorization.
//!
//! An [`Authorizer`] is consulted at four points of the pipeline:
//!
//! 1. [`authorize_request`](Authorizer::authorize_request): the method check,
//!    before anything is parsed.
//! 2. [`authorize_query`](Authorizer::authorize_query): the built query may be
//!    rejected or rewritten (extra filters, a default slice).
//! 3. [`authorize_query_resources`](Authorizer::authorize_query_resources):
//!    every resource in the request body, grouped by type.
//! 4. [`authorize_query_response`](Authorizer::authorize_query_response) and
//!    [`authorize_query_response_resources`](Authorizer::authorize_query_response_resources):
//!    the response payload, including resources embedded through `with`.
//!
//! On related routes both the base resource's and the target resource's
//! authorizers run. Every hook receives `owner`, the resource type whose
//! authorizer is being asked, so an authorizer can tell whether it guards the
//! addressed resource or only the route's base.

mod composite;
mod filter;

pub use composite::{ContextAuthorizer, MacroAuthorizer, MethodAuthorizer};
pub use filter::FilterAuthorizer;

use std::fmt::Debug;
use std::sync::Arc;

use apisvc_persistence::{
    Method, Query, Resource, ResourceDescription, Slice, StorageError, StorageResult,
};
use async_trait::async_trait;
use tracing::debug;

use crate::api::Api;
use crate::context::{RequestContext, Verb};
use crate::response::ApiResponse;

/// Policy hooks for one resource type.
///
/// Every hook has a permissive default apart from the structural checks in
/// [`check_query`] and the type checks on resources, so implementations only
/// override what they restrict.
#[async_trait]
pub trait Authorizer: Send + Sync + Debug {
    /// Rejects methods outside the route's allowed-method table.
    fn authorize_request(
        &self,
        owner: &Arc<ResourceDescription>,
        ctx: &RequestContext,
    ) -> StorageResult<()> {
        let _ = owner;
        check_method(ctx)
    }

    /// Validates the query against the allow-lists and hands it to the
    /// verb-specific hook.
    async fn authorize_query(
        &self,
        api: &Api,
        owner: &Arc<ResourceDescription>,
        ctx: &RequestContext,
        query: Query,
    ) -> StorageResult<Query> {
        let _ = api;
        let query = check_query(owner, ctx, query)?;
        self.authorize_exact_query(owner, ctx, query)
    }

    /// Dispatches to the hook for the request's verb.
    fn authorize_exact_query(
        &self,
        owner: &Arc<ResourceDescription>,
        ctx: &RequestContext,
        query: Query,
    ) -> StorageResult<Query> {
        match ctx.verb() {
            Verb::All => self.authorize_all_query(owner, ctx, query),
            Verb::One => self.authorize_one_query(owner, ctx, query),
            Verb::Create => self.authorize_create_query(owner, ctx, query),
            Verb::BulkCreate => self.authorize_bulk_create_query(owner, ctx, query),
            Verb::Update => self.authorize_update_query(owner, ctx, query),
            Verb::BulkUpdate => self.authorize_bulk_update_query(owner, ctx, query),
            Verb::Delete => self.authorize_delete_query(owner, ctx, query),
            Verb::BulkDelete => self.authorize_bulk_delete_query(owner, ctx, query),
            Verb::GetRelated => self.authorize_get_related_query(owner, ctx, query),
            Verb::CreateRelated => self.authorize_create_related_query(owner, ctx, query),
            Verb::UpdateRelated => self.authorize_update_related_query(owner, ctx, query),
            Verb::DeleteRelated => self.authorize_delete_related_query(owner, ctx, query),
        }
    }

    /// Collection reads.
    fn authorize_all_query(
        &self,
        _owner: &Arc<ResourceDescription>,
        _ctx: &RequestContext,
        query: Query,
    ) -> StorageResult<Query> {
        Ok(query)
    }

    /// Single-resource reads.
    fn authorize_one_query(
        &self,
        _owner: &Arc<ResourceDescription>,
        _ctx: &RequestContext,
        query: Query,
    ) -> StorageResult<Query> {
        Ok(query)
    }

    /// Single creates.
    fn authorize_create_query(
        &self,
        _owner: &Arc<ResourceDescription>,
        _ctx: &RequestContext,
        query: Query,
    ) -> StorageResult<Query> {
        Ok(query)
    }

    /// Bulk creates.
    fn authorize_bulk_create_query(
        &self,
        _owner: &Arc<ResourceDescription>,
        _ctx: &RequestContext,
        query: Query,
    ) -> StorageResult<Query> {
        Ok(query)
    }

    /// Single updates.
    fn authorize_update_query(
        &self,
        _owner: &Arc<ResourceDescription>,
        _ctx: &RequestContext,
        query: Query,
    ) -> StorageResult<Query> {
        Ok(query)
    }

    /// Bulk updates.
    fn authorize_bulk_update_query(
        &self,
        _owner: &Arc<ResourceDescription>,
        _ctx: &RequestContext,
        query: Query,
    ) -> StorageResult<Query> {
        Ok(query)
    }

    /// Single deletes.
    fn authorize_delete_query(
        &self,
        _owner: &Arc<ResourceDescription>,
        _ctx: &RequestContext,
        query: Query,
    ) -> StorageResult<Query> {
        Ok(query)
    }

    /// Bulk deletes.
    fn authorize_bulk_delete_query(
        &self,
        _owner: &Arc<ResourceDescription>,
        _ctx: &RequestContext,
        query: Query,
    ) -> StorageResult<Query> {
        Ok(query)
    }

    /// Reads through a related route.
    fn authorize_get_related_query(
        &self,
        _owner: &Arc<ResourceDescription>,
        _ctx: &RequestContext,
        query: Query,
    ) -> StorageResult<Query> {
        Ok(query)
    }

    /// Creates through a related route.
    fn authorize_create_related_query(
        &self,
        _owner: &Arc<ResourceDescription>,
        _ctx: &RequestContext,
        query: Query,
    ) -> StorageResult<Query> {
        Ok(query)
    }

    /// Updates through a related route.
    fn authorize_update_related_query(
        &self,
        _owner: &Arc<ResourceDescription>,
        _ctx: &RequestContext,
        query: Query,
    ) -> StorageResult<Query> {
        Ok(query)
    }

    /// Deletes through a related route.
    fn authorize_delete_related_query(
        &self,
        _owner: &Arc<ResourceDescription>,
        _ctx: &RequestContext,
        query: Query,
    ) -> StorageResult<Query> {
        Ok(query)
    }

    /// Checks request-body resources of one type. `resources` holds every
    /// resource of the authorizer's type found in the body, embedded ones
    /// included.
    async fn authorize_query_resources(
        &self,
        api: &Api,
        owner: &Arc<ResourceDescription>,
        ctx: &RequestContext,
        resources: &[&Resource],
        query: &Query,
    ) -> StorageResult<()> {
        let _ = (api, owner, ctx, resources, query);
        Ok(())
    }

    /// Checks the response as a whole: the top-level payload must be of the
    /// addressed type.
    async fn authorize_query_response(
        &self,
        api: &Api,
        owner: &Arc<ResourceDescription>,
        ctx: &RequestContext,
        response: &ApiResponse,
    ) -> StorageResult<()> {
        check_resource_types(&ctx.resource, &response.payload.resources())?;
        self.authorize_verb_response(api, owner, ctx, response).await
    }

    /// Verb-specific response hook; `ctx.verb()` tells which verb produced it.
    async fn authorize_verb_response(
        &self,
        _api: &Api,
        _owner: &Arc<ResourceDescription>,
        _ctx: &RequestContext,
        _response: &ApiResponse,
    ) -> StorageResult<()> {
        Ok(())
    }

    /// Checks response resources of one type, top-level and embedded alike.
    async fn authorize_query_response_resources(
        &self,
        api: &Api,
        owner: &Arc<ResourceDescription>,
        ctx: &RequestContext,
        resources: &[&Resource],
        query: Option<&Query>,
    ) -> StorageResult<()> {
        let _ = (api, owner, ctx, resources, query);
        Ok(())
    }
}

/// The default authorizer: method tables, allow-lists and the resource limit.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceAuthorizer;

impl Authorizer for ResourceAuthorizer {}

/// Rejects a method missing from the route's allowed-method table.
pub fn check_method(ctx: &RequestContext) -> StorageResult<()> {
    let allowed: &[Method] = match &ctx.related {
        None => ctx.resource.allowed_methods(ctx.bulk),
        Some(related) => ctx.base.allowed_related_methods(related.name(), ctx.bulk),
    };
    if allowed.contains(&ctx.method) {
        Ok(())
    } else {
        debug!(method = %ctx.method, resource = ctx.resource.name(), "Method not allowed");
        Err(StorageError::unauthorized(format!(
            "'{}' not in {}'s allowed methods",
            ctx.method,
            ctx.resource.name()
        )))
    }
}

/// Checks filters, order-bys and with-relations against `owner`'s
/// allow-lists and bounds the slice by `owner`'s limit.
///
/// Trusted filters, contributed by the route or by another authorizer, are
/// exempt. Queries without a slice
/// get `[0, limit)`, except for creates.
pub fn check_query(
    owner: &Arc<ResourceDescription>,
    ctx: &RequestContext,
    mut query: Query,
) -> StorageResult<Query> {
    // Only the addressed resource's query is checked; a base authorizer on a
    // related route sees the target's query through its own hooks.
    if !Arc::ptr_eq(owner, &ctx.resource) {
        return Ok(query);
    }

    for filter in query.filters() {
        if query.is_trusted(filter) {
            continue;
        }
        if !owner.filter_allowed(&filter.path_name(), filter.operator()) {
            return Err(StorageError::unauthorized(format!(
                "'{}' not in {} allowed filters",
                filter.name(),
                owner.name()
            )));
        }
    }

    for order_by in query.order_bys() {
        let name = order_by.name();
        if !owner.order_by_allowed(&name) {
            return Err(StorageError::unauthorized(format!(
                "'{}' not in {} allowed order bys",
                name,
                owner.name()
            )));
        }
    }

    for with_relation in query.with_relations() {
        let name = with_relation.name();
        if !owner.with_relation_allowed(&name) {
            return Err(StorageError::unauthorized(format!(
                "'{}' not in {} allowed with relations",
                name,
                owner.name()
            )));
        }
    }

    let limit = owner.limit();
    match query.requested_slice() {
        None if ctx.method != Method::Post => query.set_slice(Some(Slice::new(0, limit))),
        Some(slice) if slice.width() > limit => {
            return Err(StorageError::unauthorized(format!(
                "{} max limit exceeded",
                owner.name()
            )));
        }
        _ => {}
    }
    Ok(query)
}

/// Fails unless every resource is of type `expected`.
pub fn check_resource_types(
    expected: &ResourceDescription,
    resources: &[&Resource],
) -> StorageResult<()> {
    match resources
        .iter()
        .find(|r| r.resource_name() != expected.name())
    {
        Some(resource) => Err(StorageError::unauthorized(format!(
            "invalid response, expected {} not {}",
            expected.name(),
            resource.resource_name()
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apisvc_persistence::schema::{Field, RelatedField, ResourceBuilder, SchemaRegistry};
    use apisvc_persistence::path::Operator;

    use crate::context::{ApiRequest, RouteKind, RouteTemplate};

    fn registry() -> Arc<SchemaRegistry> {
        Arc::new(
            SchemaRegistry::builder()
                .resource(
                    ResourceBuilder::new("topics")
                        .field(Field::integer("id").primary_key())
                        .field(Field::string("title")),
                )
                .resource(
                    ResourceBuilder::new("chats")
                        .field(Field::integer("id").primary_key())
                        .field(Field::timestamp("created"))
                        .related(RelatedField::foreign_key("topic", "topics").backref("chats"))
                        .methods([Method::Get])
                        .bulk_methods([Method::Get, Method::Post])
                        .filter("id", [Operator::Eq, Operator::In])
                        .filter("topic__title", [Operator::Eq, Operator::IStartsWith])
                        .order_by("id")
                        .with_relation("topic")
                        .limit(5),
                )
                .build()
                .unwrap(),
        )
    }

    fn context(method: Method, bulk: bool) -> RequestContext {
        let registry = registry();
        let chats = registry.resource("chats").unwrap().clone();
        let template = RouteTemplate {
            kind: RouteKind::Resource,
            base: chats.clone(),
            related: None,
            resource: chats,
            bulk,
        };
        RequestContext::new(&template, ApiRequest::new(method, "/chats"))
    }

    fn query(ctx: &RequestContext, params: &[(&str, &str)]) -> StorageResult<Query> {
        let params: Vec<(String, String)> = params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Query::new(registry(), ctx.resource.clone()).parse(&params)
    }

    #[test]
    fn test_method_tables() {
        assert!(check_method(&context(Method::Get, true)).is_ok());
        assert!(check_method(&context(Method::Post, true)).is_ok());

        let err = check_method(&context(Method::Delete, false)).unwrap_err();
        assert_eq!(err.status_code(), 403);
        assert_eq!(err.to_string(), "'DELETE' not in chats's allowed methods");
    }

    #[test]
    fn test_allowed_filters() {
        let ctx = context(Method::Get, true);
        let q = query(&ctx, &[("topic__title__istartswith", "Web")]).unwrap();
        assert!(check_query(&ctx.resource, &ctx, q).is_ok());

        let q = query(&ctx, &[("topic__title__contains", "Web")]).unwrap();
        let err = check_query(&ctx.resource, &ctx, q).unwrap_err();
        assert_eq!(
            err.to_string(),
            "'topic__title__contains' not in chats allowed filters"
        );
    }

    #[test]
    fn test_trusted_filters_bypass_allow_list() {
        let ctx = context(Method::Get, false);
        let mut q = query(&ctx, &[]).unwrap();
        let filter = apisvc_persistence::path::Filter::parse(
            q.registry(),
            &ctx.resource,
            "topic__id",
            &"1".into(),
        )
        .unwrap();
        q.add_trusted_filter(filter.clone());
        assert!(check_query(&ctx.resource, &ctx, q).is_ok());

        let mut q = query(&ctx, &[]).unwrap();
        q.add_filter(filter);
        assert!(check_query(&ctx.resource, &ctx, q).is_err());
    }

    #[test]
    fn test_order_by_and_with_relation() {
        let ctx = context(Method::Get, true);
        let q = query(&ctx, &[("order_by", "id__desc"), ("with", "topic")]).unwrap();
        assert!(check_query(&ctx.resource, &ctx, q).is_ok());

        let q = query(&ctx, &[("order_by", "created")]).unwrap();
        let err = check_query(&ctx.resource, &ctx, q).unwrap_err();
        assert_eq!(err.to_string(), "'created' not in chats allowed order bys");
    }

    #[test]
    fn test_default_slice_and_limit() {
        let ctx = context(Method::Get, true);
        let q = check_query(&ctx.resource, &ctx, query(&ctx, &[]).unwrap()).unwrap();
        assert_eq!(q.requested_slice(), Some(Slice::new(0, 5)));

        let q = query(&ctx, &[("slice", "0,6")]).unwrap();
        let err = check_query(&ctx.resource, &ctx, q).unwrap_err();
        assert_eq!(err.to_string(), "chats max limit exceeded");

        let ctx = context(Method::Post, true);
        let q = check_query(&ctx.resource, &ctx, query(&ctx, &[]).unwrap()).unwrap();
        assert_eq!(q.requested_slice(), None);
    }
}
