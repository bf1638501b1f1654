//! Row-level ownership: restricts a resource to rows whose `field` path
//! equals a session attribute.

use std::collections::HashSet;
use std::sync::Arc;

use apisvc_persistence::path::Filter;
use apisvc_persistence::{
    Method, Query, Resource, ResourceDescription, StorageError, StorageResult, Value,
};
use async_trait::async_trait;
use tracing::{debug, warn};

use super::{Authorizer, check_query};
use crate::api::Api;
use crate::context::{ContextAttribute, RequestContext};

/// Confines a resource to the rows owned by the session's user or tenant.
///
/// `field` is a filter path from the resource to the owning id, e.g.
/// `tenant_id` or `chat_session__users__id`. The authorizer:
///
/// - adds `field = <attribute>` to every non-create query on the resource,
///   rejecting caller filters on the same path that say otherwise;
/// - on related routes based on the resource, checks that the base row is
///   owned before the relation is followed;
/// - checks incoming data when `field` is a plain field of the resource;
/// - re-queries resources embedded through `with` to prove ownership.
#[derive(Debug, Clone)]
pub struct FilterAuthorizer {
    field: String,
    attribute: ContextAttribute,
    exclude_methods: Vec<Method>,
}

impl FilterAuthorizer {
    /// Restricts by `attribute` along `field`.
    pub fn new(field: impl Into<String>, attribute: ContextAttribute) -> Self {
        Self {
            field: field.into(),
            attribute,
            exclude_methods: Vec::new(),
        }
    }

    /// Restricts to rows owned by the session user.
    pub fn user(field: impl Into<String>) -> Self {
        Self::new(field, ContextAttribute::UserId)
    }

    /// Restricts to rows owned by the session tenant.
    pub fn tenant(field: impl Into<String>) -> Self {
        Self::new(field, ContextAttribute::TenantId)
    }

    /// Methods the restriction does not apply to.
    pub fn exclude_methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.exclude_methods.extend(methods);
        self
    }

    fn subject(&self) -> &'static str {
        match self.attribute {
            ContextAttribute::UserId => "user",
            ContextAttribute::TenantId => "tenant",
        }
    }

    fn excluded(&self, ctx: &RequestContext) -> bool {
        self.exclude_methods.contains(&ctx.method)
    }

    fn owner_value<'a>(&self, ctx: &'a RequestContext) -> StorageResult<&'a Value> {
        ctx.attribute(self.attribute).ok_or_else(|| {
            StorageError::unauthorized(format!("no {} in session", self.attribute.as_str()))
        })
    }

    fn restrict(
        &self,
        owner: &Arc<ResourceDescription>,
        value: &Value,
        mut query: Query,
    ) -> StorageResult<Query> {
        let required = Filter::parse(query.registry(), owner, &self.field, value)?;
        match query.filters().iter().find(|f| f.same_path(&required)) {
            Some(existing) if *existing != required => {
                debug!(filter = %existing.name(), "Conflicting ownership filter");
                Err(StorageError::unauthorized(format!(
                    "invalid {} filter",
                    self.attribute.as_str()
                )))
            }
            Some(_) => Ok(query),
            None => {
                query.add_trusted_filter(required);
                Ok(query)
            }
        }
    }

    async fn check_base(
        &self,
        api: &Api,
        ctx: &RequestContext,
        value: &Value,
    ) -> StorageResult<()> {
        let Some(key) = ctx.base_key.clone() else {
            return Err(StorageError::unauthorized(format!("non-{} resource", self.subject())));
        };
        let query = Query::new(api.registry().clone(), ctx.base.clone())
            .filter(ctx.base.primary_key().name(), key)?
            .filter(&self.field, value.clone())?;
        let execution = api.execution(&ctx.transactions);
        let backend = execution.backend(ctx.base.name())?;
        match backend.one(&execution, &query).await {
            Ok(_) => Ok(()),
            Err(StorageError::Resource(_)) => {
                warn!(resource = ctx.base.name(), "Related route on a foreign base resource");
                Err(StorageError::unauthorized(format!("non-{} resource", self.subject())))
            }
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl Authorizer for FilterAuthorizer {
    async fn authorize_query(
        &self,
        api: &Api,
        owner: &Arc<ResourceDescription>,
        ctx: &RequestContext,
        query: Query,
    ) -> StorageResult<Query> {
        let query = check_query(owner, ctx, query)?;
        if self.excluded(ctx) || ctx.method == Method::Post {
            return Ok(query);
        }
        let value = self.owner_value(ctx)?;

        if Arc::ptr_eq(owner, &ctx.resource) {
            self.restrict(owner, value, query)
        } else if ctx.is_related_resource() && Arc::ptr_eq(owner, &ctx.base) {
            self.check_base(api, ctx, value).await?;
            Ok(query)
        } else {
            Ok(query)
        }
    }

    async fn authorize_query_resources(
        &self,
        _api: &Api,
        owner: &Arc<ResourceDescription>,
        ctx: &RequestContext,
        resources: &[&Resource],
        _query: &Query,
    ) -> StorageResult<()> {
        if self.excluded(ctx) {
            return Ok(());
        }
        let Some(field) = owner.field(&self.field) else {
            return Ok(());
        };
        let expected = field.validate(self.owner_value(ctx)?)?;
        for resource in resources {
            if field.validate(resource.get(field.name()))? != expected {
                return Err(StorageError::unauthorized(format!(
                    "invalid {}",
                    self.attribute.as_str()
                )));
            }
        }
        Ok(())
    }

    async fn authorize_query_response_resources(
        &self,
        api: &Api,
        owner: &Arc<ResourceDescription>,
        ctx: &RequestContext,
        resources: &[&Resource],
        _query: Option<&Query>,
    ) -> StorageResult<()> {
        // Rows of the addressed type were already filtered by the query.
        if self.excluded(ctx) || Arc::ptr_eq(owner, &ctx.resource) || resources.is_empty() {
            return Ok(());
        }
        let value = self.owner_value(ctx)?;

        let mut keys: Vec<Value> = Vec::new();
        let mut seen = HashSet::new();
        for resource in resources {
            let key = resource.primary_key();
            if seen.insert(key.to_string()) {
                keys.push(key.clone());
            }
        }
        let query = Query::new(api.registry().clone(), owner.clone())
            .filter(&self.field, value.clone())?
            .filter(
                &format!("{}__in", owner.primary_key().name()),
                Value::List(keys.clone()),
            )?
            // only the count matters; a wider page would trip the limit check
            .slice(0, keys.len().min(owner.limit()));
        let execution = api.execution(&ctx.transactions);
        let owned = execution.backend(owner.name())?.all(&execution, &query).await?;
        if owned.total_count as usize != keys.len() {
            warn!(
                resource = owner.name(),
                owned = owned.total_count,
                loaded = keys.len(),
                "Embedded resources outside the session's ownership"
            );
            return Err(StorageError::unauthorized(format!(
                "non-{} resources",
                self.subject()
            )));
        }
        Ok(())
    }
}
