//! SQLite backend integration tests.
//!
//! These tests drive the backend through parsed queries the way request
//! handlers do.

mod common;

use apisvc_persistence::error::QueryError;
use apisvc_persistence::{StorageError, Value};
use apisvc_persistence::resource::Related;
use common::Harness;

// ============================================================================
// Path traversal
// ============================================================================

#[tokio::test]
async fn test_two_hop_filter() {
    let harness = Harness::in_memory();
    harness.seed().await;

    let query = harness.query(
        "chat_sessions",
        &[("chat__topic__title__istartswith", "we")],
    );
    let page = harness
        .backend("chat_sessions")
        .all(&harness.ctx(), &query)
        .await
        .unwrap();
    assert_eq!(page.total_count, 2);
}

#[tokio::test]
async fn test_many_to_many_filter() {
    let harness = Harness::in_memory();
    harness.seed().await;

    let query = harness.query("users", &[("chat_sessions__chat__name", "alpha")]);
    let page = harness.backend("users").all(&harness.ctx(), &query).await.unwrap();
    let names: Vec<&Value> = page.results.iter().map(|u| u.get("name")).collect();
    assert_eq!(names, [&Value::from("ada"), &Value::from("grace")]);
}

#[tokio::test]
async fn test_embedded_list_filter() {
    let harness = Harness::in_memory();
    harness.seed().await;

    let query = harness.query(
        "users",
        &[("skills__name", "rust"), ("order_by", "name__desc")],
    );
    let page = harness.backend("users").all(&harness.ctx(), &query).await.unwrap();
    assert_eq!(page.total_count, 2);
    assert_eq!(page.results[0].get("name"), &Value::from("linus"));
}

#[tokio::test]
async fn test_datetime_range() {
    let harness = Harness::in_memory();
    harness.seed().await;

    let query = harness.query(
        "chats",
        &[("created__range", "2024-03-02:2024-03-31"), ("order_by", "created")],
    );
    let page = harness.backend("chats").all(&harness.ctx(), &query).await.unwrap();
    assert_eq!(page.total_count, 2);
    assert_eq!(page.results[0].get("name"), &Value::from("beta"));
}

#[tokio::test]
async fn test_order_by_relation() {
    let harness = Harness::in_memory();
    harness.seed().await;

    let query = harness.query("chats", &[("order_by", "topic__title,name__desc")]);
    let page = harness.backend("chats").all(&harness.ctx(), &query).await.unwrap();
    let names: Vec<String> = page
        .results
        .iter()
        .map(|c| c.get("name").to_string())
        .collect();
    assert_eq!(names, ["gamma", "beta", "alpha"]);
}

// ============================================================================
// Relation expansion
// ============================================================================

#[tokio::test]
async fn test_with_chain() {
    let harness = Harness::in_memory();
    harness.seed().await;

    let query = harness.query("chat_sessions", &[("with", "chat__topic,users")]);
    let page = harness
        .backend("chat_sessions")
        .all(&harness.ctx(), &query)
        .await
        .unwrap();
    assert_eq!(page.len(), 2);

    let first = &page.results[0];
    let chat = first.related("chat").unwrap().resources()[0];
    assert_eq!(chat.get("name"), &Value::from("alpha"));
    let topic = chat.related("topic").unwrap().resources()[0];
    assert_eq!(topic.get("title"), &Value::from("Web"));
    assert!(!topic.is_loaded("chats"));

    let users = first.related("users").unwrap().resources();
    assert_eq!(users.len(), 2);
    let second_users = page.results[1].related("users").unwrap().resources();
    assert_eq!(second_users[0].get("name"), &Value::from("linus"));
}

#[tokio::test]
async fn test_with_reverse_relation_and_self_reference() {
    let harness = Harness::in_memory();
    harness.seed().await;

    let query = harness.query("topics", &[("with", "chats,parent"), ("order_by", "id")]);
    let page = harness.backend("topics").all(&harness.ctx(), &query).await.unwrap();
    assert_eq!(page.results[0].related("chats").unwrap().resources().len(), 2);
    assert_eq!(page.results[0].related("parent"), Some(&Related::One(None)));
}

// ============================================================================
// Single-resource verbs
// ============================================================================

#[tokio::test]
async fn test_get_respects_filters() {
    let harness = Harness::in_memory();
    harness.seed().await;
    let backend = harness.backend("chats");

    let chat = backend
        .get(&harness.ctx(), &harness.query("chats", &[("topic__title", "Web")]), &Value::from("2"))
        .await
        .unwrap();
    assert_eq!(chat.get("name"), &Value::from("beta"));

    let err = backend
        .get(&harness.ctx(), &harness.query("chats", &[("topic__title", "Ops")]), &Value::Int(2))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn test_update_through_query() {
    let harness = Harness::in_memory();
    harness.seed().await;
    let backend = harness.backend("topics");

    let query = harness.query("topics", &[("id", "2")]);
    let mut topic = backend.one(&harness.ctx(), &query).await.unwrap();
    topic.set("parent_id", 1);
    let updated = backend.update(&harness.ctx(), &query, topic).await.unwrap();
    assert_eq!(updated.get("parent_id"), &Value::Int(1));

    let query = harness.query("topics", &[("parent__title", "Web")]);
    let page = backend.all(&harness.ctx(), &query).await.unwrap();
    assert_eq!(page.results[0].get("title"), &Value::from("Ops"));
}

#[tokio::test]
async fn test_constraint_violation_is_invalid_query() {
    let harness = Harness::in_memory();
    harness.seed().await;

    let session = harness.resource("chat_sessions").with("chat_id", 99);
    let err = harness
        .backend("chat_sessions")
        .create(&harness.ctx(), &harness.query("chat_sessions", &[]), session)
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 400);
    assert_eq!(err.to_string(), "invalid data");
}

#[tokio::test]
async fn test_slice_limit() {
    let harness = Harness::in_memory();
    let query = harness.query("topics", &[("slice", "0,100")]);
    let err = harness
        .backend("topics")
        .all(&harness.ctx(), &query)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "max limit exceeded");
}

// ============================================================================
// Bulk writes
// ============================================================================

#[tokio::test]
async fn test_bulk_update_outside_filter_changes_nothing() {
    let harness = Harness::in_memory();
    harness.seed().await;
    let backend = harness.backend("chats");

    // alpha is on Web, gamma is on Ops
    let mut chats = backend
        .all(&harness.ctx(), &harness.query("chats", &[("name__in", "alpha,gamma")]))
        .await
        .unwrap()
        .results;
    for chat in &mut chats {
        chat.set("name", "renamed");
    }

    let web = harness.query("chats", &[("topic__title", "Web")]);
    let err = backend.bulk_update(&harness.ctx(), &web, chats).await.unwrap_err();
    assert_eq!(err.status_code(), 400);
    assert!(matches!(
        err,
        StorageError::Query(QueryError::CardinalityMismatch {
            expected: 2,
            actual: 1
        })
    ));
    assert!(!harness.transactions.is_poisoned());

    let query = harness.query("chats", &[("order_by", "id")]);
    let page = backend.all(&harness.ctx(), &query).await.unwrap();
    let names: Vec<&Value> = page.results.iter().map(|c| c.get("name")).collect();
    assert_eq!(
        names,
        [&Value::from("alpha"), &Value::from("beta"), &Value::from("gamma")]
    );
}
