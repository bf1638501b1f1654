//! Resource managers: routes, query building and dispatch for one resource
//! type.

use std::fmt::Debug;
use std::sync::Arc;

use apisvc_persistence::error::ResourceError;
use apisvc_persistence::path::Filter;
use apisvc_persistence::schema::RelationKind;
use apisvc_persistence::{
    Method, Query, Resource, ResourceDescription, SchemaRegistry, StorageError, StorageResult,
    Value,
};
use regex::Regex;
use tracing::debug;

use crate::api::Api;
use crate::context::{RequestContext, RequestData, RouteKind, RouteTemplate, Verb};
use crate::response::{ApiResponse, Payload};

/// Name of the route capture holding the addressed primary key.
const KEY_CAPTURE: &str = "key";

/// Name of the route capture holding the base primary key on related routes.
const BASE_KEY_CAPTURE: &str = "base";

/// Per-verb query construction hooks. Every verb hook defaults to
/// [`build_query`](Self::build_query), which defaults to the parsed query.
pub trait QueryHooks: Send + Sync + Debug {
    /// Shared hook for every verb.
    fn build_query(&self, query: Query) -> StorageResult<Query> {
        Ok(query)
    }

    #[allow(missing_docs)]
    fn build_all_query(&self, query: Query) -> StorageResult<Query> {
        self.build_query(query)
    }

    #[allow(missing_docs)]
    fn build_one_query(&self, query: Query) -> StorageResult<Query> {
        self.build_query(query)
    }

    #[allow(missing_docs)]
    fn build_create_query(&self, query: Query) -> StorageResult<Query> {
        self.build_query(query)
    }

    #[allow(missing_docs)]
    fn build_update_query(&self, query: Query) -> StorageResult<Query> {
        self.build_query(query)
    }

    #[allow(missing_docs)]
    fn build_delete_query(&self, query: Query) -> StorageResult<Query> {
        self.build_query(query)
    }

    #[allow(missing_docs)]
    fn build_bulk_create_query(&self, query: Query) -> StorageResult<Query> {
        self.build_query(query)
    }

    #[allow(missing_docs)]
    fn build_bulk_update_query(&self, query: Query) -> StorageResult<Query> {
        self.build_query(query)
    }

    #[allow(missing_docs)]
    fn build_bulk_delete_query(&self, query: Query) -> StorageResult<Query> {
        self.build_query(query)
    }
}

/// Hooks that leave every query as parsed.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultQueryHooks;

impl QueryHooks for DefaultQueryHooks {}

/// A URI pattern bound to a context template.
#[derive(Debug, Clone)]
pub struct Route {
    pattern: Regex,
    template: RouteTemplate,
}

/// A matched route with its captured keys.
#[derive(Debug)]
pub struct RouteMatch<'a> {
    /// The route's context template.
    pub template: &'a RouteTemplate,
    /// The addressed primary key, on single-resource routes.
    pub key: Option<String>,
    /// The base primary key, on related routes.
    pub base_key: Option<String>,
}

impl Route {
    fn new(pattern: &str, template: RouteTemplate) -> StorageResult<Self> {
        let pattern = Regex::new(pattern).map_err(|e| {
            StorageError::from(apisvc_persistence::error::SchemaError::InvalidPattern {
                pattern: pattern.to_string(),
                message: e.to_string(),
            })
        })?;
        Ok(Self { pattern, template })
    }

    /// The URI pattern.
    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    /// The context template.
    pub fn template(&self) -> &RouteTemplate {
        &self.template
    }

    /// Matches `path`.
    pub fn matches(&self, path: &str) -> Option<RouteMatch<'_>> {
        let captures = self.pattern.captures(path)?;
        Some(RouteMatch {
            template: &self.template,
            key: captures.name(KEY_CAPTURE).map(|m| m.as_str().to_string()),
            base_key: captures
                .name(BASE_KEY_CAPTURE)
                .map(|m| m.as_str().to_string()),
        })
    }
}

/// Routes, query building and dispatch for one resource type.
#[derive(Debug, Clone)]
pub struct Manager {
    description: Arc<ResourceDescription>,
    hooks: Arc<dyn QueryHooks>,
}

impl Manager {
    /// A manager with [`DefaultQueryHooks`].
    pub fn new(description: Arc<ResourceDescription>) -> Self {
        Self {
            description,
            hooks: Arc::new(DefaultQueryHooks),
        }
    }

    /// Replaces the query hooks.
    pub fn with_hooks(mut self, hooks: impl QueryHooks + 'static) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    /// The managed resource type.
    pub fn description(&self) -> &Arc<ResourceDescription> {
        &self.description
    }

    /// The routes this manager serves under `base_uri`, most specific first:
    /// the schema route, the single resource, each visible relation (with
    /// and without a target key), then the collection.
    pub fn uris(&self, registry: &SchemaRegistry, base_uri: &str) -> StorageResult<Vec<Route>> {
        let desc = &self.description;
        let root = format!(
            "^{}/{}",
            regex::escape(base_uri.trim_end_matches('/')),
            regex::escape(desc.name())
        );
        let direct = |kind, bulk| RouteTemplate {
            kind,
            base: desc.clone(),
            related: None,
            resource: desc.clone(),
            bulk,
        };

        let mut routes = vec![
            Route::new(&format!("{}/schema$", root), direct(RouteKind::Schema, false))?,
            Route::new(
                &format!("{}/(?P<{}>[^/]+)$", root, KEY_CAPTURE),
                direct(RouteKind::Resource, false),
            )?,
        ];

        for related in desc.related_fields().iter().filter(|r| !r.is_hidden()) {
            let target = registry.resource(related.target())?.clone();
            let related_root = format!(
                "{}/(?P<{}>[^/]+)/{}",
                root,
                BASE_KEY_CAPTURE,
                regex::escape(related.name())
            );
            let template = |bulk| RouteTemplate {
                kind: RouteKind::Resource,
                base: desc.clone(),
                related: Some(related.clone()),
                resource: target.clone(),
                bulk,
            };
            routes.push(Route::new(
                &format!("{}$", related_root),
                template(related.is_many()),
            )?);
            routes.push(Route::new(
                &format!("{}/(?P<{}>[^/]+)$", related_root, KEY_CAPTURE),
                template(false),
            )?);
        }

        routes.push(Route::new(
            &format!("{}$", root),
            direct(RouteKind::Resource, true),
        )?);
        Ok(routes)
    }

    /// Builds the query for `verb` from `params`, then adds the route's
    /// filters as trusted ones.
    pub fn build_query(&self, api: &Api, ctx: &mut RequestContext) -> StorageResult<Query> {
        let mut query =
            Query::new(api.registry().clone(), self.description.clone()).parse(&ctx.params)?;
        for (name, value) in &ctx.route_params {
            let filter = Filter::parse(
                api.registry(),
                &self.description,
                name,
                &Value::from(value.as_str()),
            )?;
            query.add_trusted_filter(filter);
        }

        let hooks = &self.hooks;
        match (ctx.verb(), ctx.bulk) {
            (Verb::All, _) | (Verb::GetRelated, true) => hooks.build_all_query(query),
            (Verb::One, _) | (Verb::GetRelated, false) => hooks.build_one_query(query),
            (Verb::Create, _) | (Verb::CreateRelated, false) => hooks.build_create_query(query),
            (Verb::BulkCreate, _) | (Verb::CreateRelated, true) => {
                hooks.build_bulk_create_query(query)
            }
            (Verb::Update, _) | (Verb::UpdateRelated, false) => hooks.build_update_query(query),
            (Verb::BulkUpdate, _) | (Verb::UpdateRelated, true) => {
                hooks.build_bulk_update_query(query)
            }
            (Verb::Delete, _) | (Verb::DeleteRelated, false) => hooks.build_delete_query(query),
            (Verb::BulkDelete, _) | (Verb::DeleteRelated, true) => {
                hooks.build_bulk_delete_query(query)
            }
        }
    }

    /// Resolves a related route's base key and turns it into a filter on
    /// the target: `<inverse>=<base key>`, or `<target pk>=<foreign key>`
    /// for forward relations without an inverse.
    ///
    /// Creates through a relation get no filter; the foreign key is set on
    /// the data at dispatch instead.
    pub async fn prepare_related(&self, api: &Api, ctx: &mut RequestContext) -> StorageResult<()> {
        let Some(related) = ctx.related.clone() else {
            return Ok(());
        };
        let raw = ctx.base_key.take().unwrap_or_default();
        let key = self.description.primary_key().validate(&raw)?;
        ctx.base_key = Some(key.clone());

        if ctx.method == Method::Post {
            return Ok(());
        }

        match related.inverse() {
            Some(inverse) => ctx.add_route_param(inverse, key.to_string()),
            None if related.is_forward() => {
                let base = self.fetch(api, ctx, &key).await?;
                let foreign_key = related
                    .fk_field()
                    .map(|f| base.get(f.name()).clone())
                    .unwrap_or_default();
                if foreign_key.is_null() {
                    return Err(ResourceError::NotFound {
                        resource_name: ctx.resource.name().to_string(),
                    }
                    .into());
                }
                let target_key = ctx.resource.primary_key().name().to_string();
                ctx.add_route_param(target_key, foreign_key.to_string());
            }
            None => {
                return Err(StorageError::invalid_query(format!(
                    "relation '{}' cannot be traversed",
                    related.name()
                )));
            }
        }
        Ok(())
    }

    async fn fetch(&self, api: &Api, ctx: &RequestContext, key: &Value) -> StorageResult<Resource> {
        let query = Query::new(api.registry().clone(), self.description.clone());
        let execution = api.execution(&ctx.transactions);
        execution
            .backend(self.description.name())?
            .get(&execution, &query, key)
            .await
    }

    /// Executes the request's query against the addressed resource's backend.
    pub async fn dispatch(
        &self,
        api: &Api,
        ctx: &mut RequestContext,
    ) -> StorageResult<ApiResponse> {
        if ctx.kind == RouteKind::Schema {
            return Ok(ApiResponse::ok(Payload::Json(self.description.describe())));
        }

        let mut data = ctx.data.take();
        let verb = ctx.verb();
        if verb == Verb::CreateRelated {
            self.attach_to_base(ctx, data.as_mut())?;
        }

        let query = ctx
            .query
            .as_ref()
            .ok_or_else(|| StorageError::invalid_query("missing query"))?;
        let execution = api.execution(&ctx.transactions);
        let backend = execution.backend(ctx.resource.name())?;
        debug!(resource = ctx.resource.name(), verb = ?verb, bulk = ctx.bulk, "Dispatching");

        let response = match (ctx.method, ctx.bulk) {
            (Method::Get, true) => {
                ApiResponse::ok(Payload::Collection(backend.all(&execution, query).await?))
            }
            (Method::Get, false) => {
                ApiResponse::ok(Payload::Resource(backend.one(&execution, query).await?))
            }
            (Method::Post, false) => {
                let resource = single(data)?;
                ApiResponse::created(Payload::Resource(
                    backend.create(&execution, query, resource).await?,
                ))
            }
            (Method::Post, true) => {
                let resources = many(data)?;
                ApiResponse::created(Payload::Resources(
                    backend.bulk_create(&execution, query, resources).await?,
                ))
            }
            (Method::Put, false) => {
                let resource = single(data)?;
                ApiResponse::ok(Payload::Resource(
                    backend.update(&execution, query, resource).await?,
                ))
            }
            (Method::Put, true) => {
                let resources = many(data)?;
                ApiResponse::ok(Payload::Resources(
                    backend.bulk_update(&execution, query, resources).await?,
                ))
            }
            (Method::Delete, false) => {
                backend.delete(&execution, query).await?;
                ApiResponse::ok(Payload::Empty)
            }
            (Method::Delete, true) => {
                let resources = many(data)?;
                backend.bulk_delete(&execution, query, &resources).await?;
                ApiResponse::ok(Payload::Empty)
            }
        };
        Ok(response)
    }

    /// Points created resources at the route's base through the relation's
    /// inverse foreign key.
    fn attach_to_base(
        &self,
        ctx: &RequestContext,
        data: Option<&mut RequestData>,
    ) -> StorageResult<()> {
        let Some(related) = ctx.related.as_ref() else {
            return Ok(());
        };
        if related.is_forward() || matches!(related.kind(), RelationKind::ManyToMany(_)) {
            return Err(StorageError::invalid_query(format!(
                "cannot create through '{}'",
                related.name()
            )));
        }
        let foreign_key = related
            .inverse()
            .and_then(|inverse| ctx.resource.related_field(inverse))
            .and_then(|inverse| inverse.fk_field())
            .ok_or_else(|| {
                StorageError::invalid_query(format!("cannot create through '{}'", related.name()))
            })?;
        let key = ctx.base_key.clone().unwrap_or_default();
        if let Some(data) = data {
            for resource in data.resources_mut() {
                resource.set(foreign_key.name(), key.clone());
            }
        }
        Ok(())
    }
}

fn single(data: Option<RequestData>) -> StorageResult<Resource> {
    match data {
        Some(RequestData::One(resource)) => Ok(resource),
        Some(RequestData::Many(_)) => {
            Err(StorageError::invalid_query("expected a single resource"))
        }
        None => Err(StorageError::invalid_query("missing request body")),
    }
}

fn many(data: Option<RequestData>) -> StorageResult<Vec<Resource>> {
    match data {
        Some(RequestData::Many(resources)) => Ok(resources),
        Some(RequestData::One(resource)) => Ok(vec![resource]),
        None => Err(StorageError::invalid_query("missing request body")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apisvc_persistence::RelatedField;
    use apisvc_persistence::schema::{Field, ResourceBuilder};

    fn registry() -> SchemaRegistry {
        SchemaRegistry::builder()
            .resource(
                ResourceBuilder::new("topics")
                    .field(Field::integer("id").primary_key())
                    .field(Field::string("title")),
            )
            .resource(
                ResourceBuilder::new("chats")
                    .field(Field::integer("id").primary_key())
                    .related(RelatedField::foreign_key("topic", "topics").backref("chats"))
                    .related(RelatedField::foreign_key("origin", "topics").hidden()),
            )
            .build()
            .unwrap()
    }

    fn routes(name: &str) -> Vec<Route> {
        let registry = registry();
        let manager = Manager::new(registry.resource(name).unwrap().clone());
        manager.uris(&registry, "/api/v1/").unwrap()
    }

    #[test]
    fn test_route_order() {
        let patterns: Vec<String> = routes("chats")
            .iter()
            .map(|r| r.pattern().to_string())
            .collect();
        assert_eq!(
            patterns,
            [
                "^/api/v1/chats/schema$",
                "^/api/v1/chats/(?P<key>[^/]+)$",
                "^/api/v1/chats/(?P<base>[^/]+)/topic$",
                "^/api/v1/chats/(?P<base>[^/]+)/topic/(?P<key>[^/]+)$",
                "^/api/v1/chats$",
            ]
        );
    }

    #[test]
    fn test_schema_route_wins_over_key() {
        let routes = routes("topics");
        let matched = routes.iter().find_map(|r| r.matches("/api/v1/topics/schema")).unwrap();
        assert_eq!(matched.template.kind, RouteKind::Schema);
        assert!(matched.key.is_none());
    }

    #[test]
    fn test_related_captures() {
        let routes = routes("topics");
        let matched = routes
            .iter()
            .find_map(|r| r.matches("/api/v1/topics/7/chats"))
            .unwrap();
        assert_eq!(matched.base_key.as_deref(), Some("7"));
        assert!(matched.key.is_none());
        assert!(matched.template.bulk);
        assert_eq!(matched.template.resource.name(), "chats");
        assert_eq!(matched.template.base.name(), "topics");

        let matched = routes
            .iter()
            .find_map(|r| r.matches("/api/v1/topics/7/chats/9"))
            .unwrap();
        assert_eq!(matched.key.as_deref(), Some("9"));
        assert!(!matched.template.bulk);

        assert!(routes.iter().all(|r| r.matches("/api/v1/topics/7/chats/9/x").is_none()));
    }
}
