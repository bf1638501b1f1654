//! Schema and access rules for the HTTP tests.
//!
//! ```text
//! topics <- chats <- chat_sessions <-> users
//!                                       ^
//! user_search (index) ------------------'
//! ```
//!
//! `chats` pages at two rows so limits are easy to hit.

use std::sync::Arc;

use apisvc_persistence::Method::{Delete, Get, Post, Put};
use apisvc_persistence::path::Operator;
use apisvc_persistence::schema::{
    Field, QueryOption, RangeFacet, RelatedField, ResourceBuilder, SchemaRegistry,
    StructDescription, TermsFacet, Through,
};
use serde_json::{Value as JsonValue, json};

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

pub fn registry() -> Arc<SchemaRegistry> {
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
                .order_by("title")
                .with_relation("chats"),
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
                .bulk_methods([Get, Post, Delete])
                .related_methods("topic", [Get])
                .related_bulk_methods("chat_sessions", [Get])
                .filter("name", [Operator::Eq, Operator::In])
                .filter("topic__title", [Operator::Eq])
                .order_by("id|name")
                .with_relation("topic")
                .with_relation("chat_sessions(__users)?")
                .limit(2),
        )
        .resource(
            ResourceBuilder::new("users")
                .field(Field::integer("id").primary_key())
                .field(Field::string("name"))
                .field(Field::integer("tenant_id"))
                .field(Field::list("skills", Field::structure("skill", skill.clone())).nullable())
                .methods([Get, Put])
                .bulk_methods([Get])
                .filter("name", [Operator::Eq, Operator::IStartsWith])
                .filter("tenant_id", [Operator::Eq])
                .order_by("name"),
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
                .methods([Get])
                .bulk_methods([Get, Post])
                .related_bulk_methods("users", [Get, Post]),
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
                .filter("yrs_experience", [Operator::Ranges])
                .order_by("name"),
        )
        .build()
        .expect("test schema must register");
    Arc::new(registry)
}

/// A search response with two users and both facets.
pub fn user_search_response() -> JsonValue {
    json!({
        "hits": {
            "total": {"value": 2, "relation": "eq"},
            "hits": [
                {"_id": "1", "_source": {
                    "name": "Ada", "user_id": 1, "yrs_experience": 9, "skills": [{"name": "rust", "yrs": 4}]
                }},
                {"_id": "2", "_source": {"name": "Grace", "user_id": 2, "yrs_experience": 3}}
            ]
        },
        "aggregations": {
            "f_skills": {"buckets": [{"key": "rust", "doc_count": 1}]},
            "f_yrs": {"buckets": [
                {"key": "0:5", "doc_count": 1},
                {"key": "6:", "doc_count": 1}
            ]}
        }
    })
}
