//! The resources this server exposes and who may touch them.
//!
//! ```text
//! topics <- chats <- chat_sessions <-> users
//!                                       ^
//! user_search (index) ------------------'
//! ```

use std::sync::Arc;

use apisvc_persistence::Method::{Delete, Get, Post, Put};
use apisvc_persistence::path::Operator;
use apisvc_persistence::schema::{
    Field, QueryOption, RangeFacet, RelatedField, ResourceBuilder, SchemaRegistry,
    StructDescription, TermsFacet, Through,
};
use apisvc_persistence::{ResourceDescription, StorageError, StorageResult};
use apisvc_rest::{
    ApiBuilder, Authorizer, ContextAttribute, ContextAuthorizer, FilterAuthorizer,
    MethodAuthorizer, PrivateFieldSanitizer, RequestContext, ResourceAuthorizer,
    SessionAuthenticator,
};

/// Tables backing the relational resources.
pub const DDL: &str = "
    CREATE TABLE IF NOT EXISTS topics (
        id INTEGER PRIMARY KEY,
        title TEXT NOT NULL,
        parent_id INTEGER REFERENCES topics(id)
    );
    CREATE TABLE IF NOT EXISTS chats (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        created TEXT,
        topic_id INTEGER REFERENCES topics(id)
    );
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        tenant_id INTEGER NOT NULL,
        skills TEXT
    );
    CREATE TABLE IF NOT EXISTS chat_sessions (
        id INTEGER PRIMARY KEY,
        chat_id INTEGER NOT NULL REFERENCES chats(id)
    );
    CREATE TABLE IF NOT EXISTS chat_session_users (
        chat_session_id INTEGER NOT NULL REFERENCES chat_sessions(id),
        user_id INTEGER NOT NULL REFERENCES users(id),
        PRIMARY KEY (chat_session_id, user_id)
    );
";

/// Tenant that may manage every tenant's users.
pub const ADMIN_TENANT: i64 = 0;

/// Declares every resource.
pub fn registry() -> StorageResult<Arc<SchemaRegistry>> {
    let skill = Arc::new(
        StructDescription::new("Skill")
            .field(Field::string("name"))
            .field(Field::integer("yrs").nullable()),
    );
    let registry = SchemaRegistry::builder()
        .resource(
            ResourceBuilder::new("topics")
                .field(Field::integer("id").primary_key())
                .field(Field::string("title"))
                .related(RelatedField::foreign_key("parent", "self").nullable())
                .methods([Get, Put, Delete])
                .bulk_methods([Get, Post])
                .related_bulk_methods("chats", [Get, Post])
                .filter("title", [Operator::Eq, Operator::IStartsWith])
                .filter("parent_id", [Operator::Eq, Operator::IsNull])
                .order_by("id|title")
                .with_relation("parent|chats"),
        )
        .resource(
            ResourceBuilder::new("chats")
                .field(Field::integer("id").primary_key())
                .field(Field::string("name"))
                .field(Field::datetime("created").nullable())
                .related(
                    RelatedField::foreign_key("topic", "topics")
                        .nullable()
                        .backref("chats"),
                )
                .methods([Get, Put, Delete])
                .bulk_methods([Get, Post])
                .related_methods("topic", [Get])
                .related_bulk_methods("chat_sessions", [Get, Post])
                .filter("name", [Operator::Eq, Operator::IStartsWith, Operator::In])
                .filter("created", [Operator::Gt, Operator::Gte, Operator::Lt, Operator::Lte])
                .filter("topic(__title)?", [Operator::Eq])
                .order_by("id|name|created")
                .with_relation("topic")
                .with_relation("chat_sessions(__users)?")
                .limit(50),
        )
        .resource(
            ResourceBuilder::new("users")
                .field(Field::integer("id").primary_key())
                .field(Field::string("name"))
                .field(Field::integer("tenant_id"))
                .field(Field::list("skills", Field::structure("skill", skill.clone())).nullable())
                .methods([Get, Put])
                .bulk_methods([Get, Post])
                .filter("name", [Operator::Eq, Operator::IStartsWith])
                .filter("tenant_id", [Operator::Eq])
                .order_by("id|name")
                .with_relation("chat_sessions"),
        )
        .resource(
            ResourceBuilder::new("chat_sessions")
                .field(Field::integer("id").primary_key())
                .related(RelatedField::foreign_key("chat", "chats").backref("chat_sessions"))
                .related(
                    RelatedField::many_to_many(
                        "users",
                        "users",
                        Through::new("chat_session_users", "chat_session_id", "user_id"),
                    )
                    .backref("chat_sessions"),
                )
                .methods([Get, Delete])
                .bulk_methods([Get, Post])
                .related_bulk_methods("users", [Get])
                .filter("chat", [Operator::Eq])
                .order_by("id")
                .with_relation("chat|users"),
        )
        .resource(
            ResourceBuilder::new("user_search")
                .index("users")
                .field(Field::integer("id").primary_key())
                .field(Field::string("name").sort_ext(".raw").filter_ext(".raw"))
                .field(Field::integer("yrs_experience"))
                .field(Field::list("skills", Field::structure("skill", skill)).nullable())
                .field(Field::match_query("q", "name"))
                .related(RelatedField::foreign_key("user", "users"))
                .option(
                    QueryOption::typed("f_skills_size", Field::integer("f_skills_size"))
                        .default_value(10),
                )
                .facet(TermsFacet::new("f_skills", "skills__name").size_option("f_skills_size"))
                .facet(
                    RangeFacet::new("f_yrs", "yrs_experience")
                        .add(Some(0), Some(5))
                        .add(Some(6), None::<i64>),
                )
                .bulk_methods([Get])
                .filter("q", [Operator::Eq])
                .filter("skills__name", [Operator::In])
                .filter("yrs_experience", [Operator::Ranges])
                .order_by("name|yrs_experience")
                .with_relation("user")
                .limit(100),
        )
        .build()?;
    Ok(Arc::new(registry))
}

/// Binds authenticators, authorizers and sanitizers.
///
/// Users are confined to their tenant unless the session belongs to the
/// admin tenant, which alone may create users. Chat sessions are visible
/// only to their members.
pub fn endpoints(builder: ApiBuilder) -> StorageResult<ApiBuilder> {
    let tenant_scoped = ContextAuthorizer::new(
        ContextAttribute::TenantId,
        FilterAuthorizer::tenant("tenant_id"),
    )
    .value(ADMIN_TENANT, ResourceAuthorizer);
    let admin_only = ContextAuthorizer::new(ContextAttribute::TenantId, Deny)
        .value(ADMIN_TENANT, ResourceAuthorizer);
    let users = MethodAuthorizer::new(tenant_scoped).method(Post, admin_only);

    builder
        .resource("users", |endpoint| {
            endpoint
                .authenticator(SessionAuthenticator)
                .authorizer(users)
                .sanitizer(PrivateFieldSanitizer::new(["tenant_id"]))
        })?
        .resource("chat_sessions", |endpoint| {
            endpoint
                .authenticator(SessionAuthenticator)
                .authorizer(FilterAuthorizer::user("users__id"))
        })
}

/// Rejects every request it is asked about.
#[derive(Debug, Clone, Copy)]
struct Deny;

impl Authorizer for Deny {
    fn authorize_request(
        &self,
        owner: &Arc<ResourceDescription>,
        ctx: &RequestContext,
    ) -> StorageResult<()> {
        Err(StorageError::unauthorized(format!(
            "'{}' not permitted on {}",
            ctx.method,
            owner.name()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_declares_every_resource() {
        let registry = registry().unwrap();
        for name in ["topics", "chats", "users", "chat_sessions", "user_search"] {
            assert!(registry.resource(name).is_ok(), "missing {name}");
        }
    }

    #[test]
    fn test_forward_relations_expose_id_fields() {
        let registry = registry().unwrap();
        let chats = registry.resource("chats").unwrap();
        assert!(chats.field("topic_id").is_some());
        assert!(chats.order_by_allowed("created"));
        assert!(chats.filter_allowed("topic__title", Operator::Eq));
        assert!(!chats.filter_allowed("topic__title", Operator::In));
    }
}
