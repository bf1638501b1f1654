//! Authorizers built out of other authorizers.

use std::collections::HashMap;
use std::sync::Arc;

use apisvc_persistence::{Method, Query, Resource, ResourceDescription, StorageResult};
use async_trait::async_trait;

use super::{Authorizer, ResourceAuthorizer};
use crate::api::Api;
use crate::context::{ContextAttribute, RequestContext};
use crate::response::ApiResponse;

/// Runs its children in order. The query is threaded through every child's
/// query hook; any child failing fails the stage.
#[derive(Debug, Clone, Default)]
pub struct MacroAuthorizer {
    authorizers: Vec<Arc<dyn Authorizer>>,
}

impl MacroAuthorizer {
    /// Chains `authorizers`.
    pub fn new(authorizers: Vec<Arc<dyn Authorizer>>) -> Self {
        Self { authorizers }
    }

    /// Appends a child.
    pub fn with(mut self, authorizer: impl Authorizer + 'static) -> Self {
        self.authorizers.push(Arc::new(authorizer));
        self
    }
}

#[async_trait]
impl Authorizer for MacroAuthorizer {
    fn authorize_request(
        &self,
        owner: &Arc<ResourceDescription>,
        ctx: &RequestContext,
    ) -> StorageResult<()> {
        self.authorizers
            .iter()
            .try_for_each(|a| a.authorize_request(owner, ctx))
    }

    async fn authorize_query(
        &self,
        api: &Api,
        owner: &Arc<ResourceDescription>,
        ctx: &RequestContext,
        mut query: Query,
    ) -> StorageResult<Query> {
        for authorizer in &self.authorizers {
            query = authorizer.authorize_query(api, owner, ctx, query).await?;
        }
        Ok(query)
    }

    async fn authorize_query_resources(
        &self,
        api: &Api,
        owner: &Arc<ResourceDescription>,
        ctx: &RequestContext,
        resources: &[&Resource],
        query: &Query,
    ) -> StorageResult<()> {
        for authorizer in &self.authorizers {
            authorizer
                .authorize_query_resources(api, owner, ctx, resources, query)
                .await?;
        }
        Ok(())
    }

    async fn authorize_query_response(
        &self,
        api: &Api,
        owner: &Arc<ResourceDescription>,
        ctx: &RequestContext,
        response: &ApiResponse,
    ) -> StorageResult<()> {
        for authorizer in &self.authorizers {
            authorizer
                .authorize_query_response(api, owner, ctx, response)
                .await?;
        }
        Ok(())
    }

    async fn authorize_query_response_resources(
        &self,
        api: &Api,
        owner: &Arc<ResourceDescription>,
        ctx: &RequestContext,
        resources: &[&Resource],
        query: Option<&Query>,
    ) -> StorageResult<()> {
        for authorizer in &self.authorizers {
            authorizer
                .authorize_query_response_resources(api, owner, ctx, resources, query)
                .await?;
        }
        Ok(())
    }
}

/// Forwards every hook to whichever child `select` picks for the request.
macro_rules! delegate_authorizer {
    ($ty:ty) => {
        #[async_trait]
        impl Authorizer for $ty {
            fn authorize_request(
                &self,
                owner: &Arc<ResourceDescription>,
                ctx: &RequestContext,
            ) -> StorageResult<()> {
                self.select(ctx).authorize_request(owner, ctx)
            }

            async fn authorize_query(
                &self,
                api: &Api,
                owner: &Arc<ResourceDescription>,
                ctx: &RequestContext,
                query: Query,
            ) -> StorageResult<Query> {
                self.select(ctx).authorize_query(api, owner, ctx, query).await
            }

            async fn authorize_query_resources(
                &self,
                api: &Api,
                owner: &Arc<ResourceDescription>,
                ctx: &RequestContext,
                resources: &[&Resource],
                query: &Query,
            ) -> StorageResult<()> {
                self.select(ctx)
                    .authorize_query_resources(api, owner, ctx, resources, query)
                    .await
            }

            async fn authorize_query_response(
                &self,
                api: &Api,
                owner: &Arc<ResourceDescription>,
                ctx: &RequestContext,
                response: &ApiResponse,
            ) -> StorageResult<()> {
                self.select(ctx)
                    .authorize_query_response(api, owner, ctx, response)
                    .await
            }

            async fn authorize_query_response_resources(
                &self,
                api: &Api,
                owner: &Arc<ResourceDescription>,
                ctx: &RequestContext,
                resources: &[&Resource],
                query: Option<&Query>,
            ) -> StorageResult<()> {
                self.select(ctx)
                    .authorize_query_response_resources(api, owner, ctx, resources, query)
                    .await
            }
        }
    };
}

/// Picks a child by request method.
#[derive(Debug, Clone)]
pub struct MethodAuthorizer {
    authorizers: HashMap<Method, Arc<dyn Authorizer>>,
    fallback: Arc<dyn Authorizer>,
}

impl Default for MethodAuthorizer {
    fn default() -> Self {
        Self {
            authorizers: HashMap::new(),
            fallback: Arc::new(ResourceAuthorizer),
        }
    }
}

impl MethodAuthorizer {
    /// Methods without a child of their own use `fallback`.
    pub fn new(fallback: impl Authorizer + 'static) -> Self {
        Self {
            authorizers: HashMap::new(),
            fallback: Arc::new(fallback),
        }
    }

    /// Routes `method` to `authorizer`.
    pub fn method(mut self, method: Method, authorizer: impl Authorizer + 'static) -> Self {
        self.authorizers.insert(method, Arc::new(authorizer));
        self
    }

    fn select(&self, ctx: &RequestContext) -> &dyn Authorizer {
        self.authorizers
            .get(&ctx.method)
            .unwrap_or(&self.fallback)
            .as_ref()
    }
}

delegate_authorizer!(MethodAuthorizer);

/// Picks a child by the value of a session attribute, e.g. one policy per
/// tenant.
#[derive(Debug, Clone)]
pub struct ContextAuthorizer {
    attribute: ContextAttribute,
    authorizers: HashMap<String, Arc<dyn Authorizer>>,
    fallback: Arc<dyn Authorizer>,
}

impl ContextAuthorizer {
    /// Requests whose attribute value has no child use `fallback`.
    pub fn new(attribute: ContextAttribute, fallback: impl Authorizer + 'static) -> Self {
        Self {
            attribute,
            authorizers: HashMap::new(),
            fallback: Arc::new(fallback),
        }
    }

    /// Routes requests whose attribute renders as `value` to `authorizer`.
    pub fn value(mut self, value: impl ToString, authorizer: impl Authorizer + 'static) -> Self {
        self.authorizers.insert(value.to_string(), Arc::new(authorizer));
        self
    }

    fn select(&self, ctx: &RequestContext) -> &dyn Authorizer {
        ctx.attribute(self.attribute)
            .and_then(|value| self.authorizers.get(&value.to_string()))
            .unwrap_or(&self.fallback)
            .as_ref()
    }
}

delegate_authorizer!(ContextAuthorizer);

#[cfg(test)]
mod tests {
    use super::*;
    use apisvc_persistence::StorageError;
    use apisvc_persistence::schema::{Field, ResourceBuilder, SchemaRegistry};

    use crate::authentication::Session;
    use crate::context::{ApiRequest, RouteKind, RouteTemplate};

    #[derive(Debug)]
    struct Deny;

    impl Authorizer for Deny {
        fn authorize_request(
            &self,
            _owner: &Arc<ResourceDescription>,
            _ctx: &RequestContext,
        ) -> StorageResult<()> {
            Err(StorageError::unauthorized("denied"))
        }
    }

    #[derive(Debug)]
    struct Allow;

    impl Authorizer for Allow {
        fn authorize_request(
            &self,
            _owner: &Arc<ResourceDescription>,
            _ctx: &RequestContext,
        ) -> StorageResult<()> {
            Ok(())
        }
    }

    fn context(method: Method) -> RequestContext {
        let registry = SchemaRegistry::builder()
            .resource(ResourceBuilder::new("topics").field(Field::integer("id").primary_key()))
            .build()
            .unwrap();
        let topics = registry.resource("topics").unwrap().clone();
        let template = RouteTemplate {
            kind: RouteKind::Resource,
            base: topics.clone(),
            related: None,
            resource: topics,
            bulk: true,
        };
        RequestContext::new(&template, ApiRequest::new(method, "/topics"))
    }

    #[test]
    fn test_macro_stops_at_first_denial() {
        let ctx = context(Method::Get);
        let owner = ctx.resource.clone();
        assert!(MacroAuthorizer::default().with(Allow).authorize_request(&owner, &ctx).is_ok());
        let err = MacroAuthorizer::default()
            .with(Allow)
            .with(Deny)
            .authorize_request(&owner, &ctx)
            .unwrap_err();
        assert_eq!(err.to_string(), "denied");
    }

    #[test]
    fn test_method_selection() {
        let authorizer = MethodAuthorizer::new(Allow).method(Method::Delete, Deny);
        let ctx = context(Method::Get);
        assert!(authorizer.authorize_request(&ctx.resource, &ctx).is_ok());
        let ctx = context(Method::Delete);
        assert!(authorizer.authorize_request(&ctx.resource, &ctx).is_err());
    }

    #[test]
    fn test_context_selection() {
        let authorizer = ContextAuthorizer::new(ContextAttribute::TenantId, Allow).value(2, Deny);
        let mut ctx = context(Method::Get);
        assert!(authorizer.authorize_request(&ctx.resource, &ctx).is_ok());

        ctx.session = Some(Session::new("t", 1, 2));
        assert!(authorizer.authorize_request(&ctx.resource, &ctx).is_err());

        ctx.session = Some(Session::new("t", 1, 1));
        assert!(authorizer.authorize_request(&ctx.resource, &ctx).is_ok());
    }
}
