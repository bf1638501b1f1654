//! Per-resource sanitizers.
//!
//! A sanitizer rewrites resources on their way out of the API
//! ([`sanitize_resource`](Sanitizer::sanitize_resource)) and on their way in
//! ([`desanitize_resource`](Sanitizer::desanitize_resource)). The sanitization
//! middleware applies the sanitizer of each resource's own type to every
//! loaded resource, embedded ones included.

use std::fmt::Debug;

use apisvc_persistence::{Resource, Value};

use crate::context::RequestContext;

/// Rewrites resources of one type at the API boundary.
pub trait Sanitizer: Send + Sync + Debug {
    /// Prepares an outgoing resource.
    fn sanitize_resource(&self, ctx: &RequestContext, resource: &mut Resource) {
        let _ = (ctx, resource);
    }

    /// Prepares an incoming resource.
    fn desanitize_resource(&self, ctx: &RequestContext, resource: &mut Resource) {
        let _ = (ctx, resource);
    }

    /// Applies [`sanitize_resource`](Self::sanitize_resource) to each resource.
    fn sanitize_resources(&self, ctx: &RequestContext, resources: &mut [&mut Resource]) {
        for resource in resources.iter_mut() {
            self.sanitize_resource(ctx, resource);
        }
    }

    /// Applies [`desanitize_resource`](Self::desanitize_resource) to each resource.
    fn desanitize_resources(&self, ctx: &RequestContext, resources: &mut [&mut Resource]) {
        for resource in resources.iter_mut() {
            self.desanitize_resource(ctx, resource);
        }
    }
}

/// Leaves resources untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceSanitizer;

impl Sanitizer for ResourceSanitizer {}

/// Blanks fields on outgoing resources other than the session user's own.
#[derive(Debug, Clone, Default)]
pub struct PrivateFieldSanitizer {
    fields: Vec<String>,
}

impl PrivateFieldSanitizer {
    /// Treats `fields` as private.
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    fn is_own(ctx: &RequestContext, resource: &Resource) -> bool {
        let Some(user_id) = ctx.user_id() else {
            return false;
        };
        resource
            .description()
            .primary_key()
            .validate(user_id)
            .is_ok_and(|key| &key == resource.primary_key())
    }
}

impl Sanitizer for PrivateFieldSanitizer {
    fn sanitize_resource(&self, ctx: &RequestContext, resource: &mut Resource) {
        if Self::is_own(ctx, resource) {
            return;
        }
        for field in &self.fields {
            if resource.has(field) {
                resource.set(field.as_str(), Value::Null);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use apisvc_persistence::Method;
    use apisvc_persistence::schema::{Field, ResourceBuilder, SchemaRegistry};

    use crate::authentication::Session;
    use crate::context::{ApiRequest, RouteKind, RouteTemplate};

    #[test]
    fn test_private_fields_blanked_for_others() {
        let registry = SchemaRegistry::builder()
            .resource(
                ResourceBuilder::new("users")
                    .field(Field::integer("id").primary_key())
                    .field(Field::integer("tenant_id").nullable()),
            )
            .build()
            .unwrap();
        let users: Arc<_> = registry.resource("users").unwrap().clone();
        let template = RouteTemplate {
            kind: RouteKind::Resource,
            base: users.clone(),
            related: None,
            resource: users.clone(),
            bulk: true,
        };
        let mut ctx = RequestContext::new(&template, ApiRequest::new(Method::Get, "/users"));
        ctx.session = Some(Session::new("t", 1, 7));

        let sanitizer = PrivateFieldSanitizer::new(["tenant_id"]);
        let mut own = Resource::new(users.clone()).with("id", 1).with("tenant_id", 7);
        let mut other = Resource::new(users).with("id", 2).with("tenant_id", 7);
        sanitizer.sanitize_resources(&ctx, &mut [&mut own, &mut other]);

        assert_eq!(own.get("tenant_id"), &Value::Int(7));
        assert_eq!(other.get("tenant_id"), &Value::Null);
    }
}
