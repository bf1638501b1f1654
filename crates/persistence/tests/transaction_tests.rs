//! Transaction scope integration tests.

mod common;

use apisvc_persistence::{StorageError, Value};
use common::Harness;

#[tokio::test]
async fn test_nested_failure_rolls_back_outer_scope() {
    let harness = Harness::in_memory();
    harness.seed().await;
    let backend = harness.backend("topics");

    harness.transactions.begin();
    let created = backend
        .create(
            &harness.ctx(),
            &harness.query("topics", &[]),
            harness.resource("topics").with("title", "Draft"),
        )
        .await
        .unwrap();
    assert_eq!(created.get("title"), &Value::from("Draft"));

    let bad = harness.resource("chats").with("name", "orphan").with("topic_id", 404);
    assert!(
        harness
            .backend("chats")
            .create(&harness.ctx(), &harness.query("chats", &[]), bad)
            .await
            .is_err()
    );
    assert!(harness.transactions.is_poisoned());

    let err = harness.transactions.end().await.unwrap_err();
    assert!(matches!(err, StorageError::Transaction(_)));

    let page = backend
        .all(&harness.ctx(), &harness.query("topics", &[("title", "Draft")]))
        .await
        .unwrap();
    assert_eq!(page.total_count, 0);
}

#[tokio::test]
async fn test_outer_scope_commits_once() {
    let harness = Harness::in_memory();
    let backend = harness.backend("topics");

    harness.transactions.begin();
    for title in ["a", "b"] {
        backend
            .create(
                &harness.ctx(),
                &harness.query("topics", &[]),
                harness.resource("topics").with("title", title),
            )
            .await
            .unwrap();
        assert_eq!(harness.transactions.depth(), 1);
    }
    harness.transactions.end().await.unwrap();

    let page = backend
        .all(&harness.ctx(), &harness.query("topics", &[]))
        .await
        .unwrap();
    assert_eq!(page.total_count, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_on_file_database() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::file(&dir.path().join("apisvc.db"));
    harness.seed().await;

    let mut tasks = Vec::new();
    for i in 0..8 {
        let request = harness.request();
        tasks.push(tokio::spawn(async move {
            let title = format!("topic-{}", i);
            request
                .create(request.resource("topics").with("title", title.as_str()))
                .await;
            let query = request.query("topics", &[("title", title.as_str())]);
            request
                .backend("topics")
                .one(&request.ctx(), &query)
                .await
                .map(|t| t.get("title").clone())
        }));
    }
    for (i, task) in tasks.into_iter().enumerate() {
        let title = task.await.unwrap().unwrap();
        assert_eq!(title, Value::from(format!("topic-{}", i)));
    }

    let page = harness
        .backend("topics")
        .all(&harness.ctx(), &harness.query("topics", &[]))
        .await
        .unwrap();
    assert_eq!(page.total_count, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_bulk_updates_on_overlapping_rows() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::file(&dir.path().join("apisvc.db"));
    harness.seed().await;

    // even writers take alpha and beta, odd writers beta and gamma
    let mut tasks = Vec::new();
    for i in 0..8 {
        let request = harness.request();
        tasks.push(tokio::spawn(async move {
            let keys = if i % 2 == 0 { "1,2" } else { "2,3" };
            let query = request.query("chats", &[("id__in", keys)]);
            let backend = request.backend("chats");
            let mut chats = backend.all(&request.ctx(), &query).await?.results;
            let label = format!("writer-{}", i);
            for chat in &mut chats {
                chat.set("name", label.as_str());
            }
            let updated = backend.bulk_update(&request.ctx(), &query, chats).await?;
            Ok::<_, StorageError>((label, updated))
        }));
    }

    let mut even = Vec::new();
    let mut odd = Vec::new();
    for (i, task) in tasks.into_iter().enumerate() {
        let (label, updated) = task.await.unwrap().unwrap();
        assert_eq!(updated.len(), 2);
        // each batch reads back its own writes, never a mix
        assert!(updated.iter().all(|c| c.get("name") == &Value::from(label.as_str())));
        if i % 2 == 0 {
            even.push(Value::from(label));
        } else {
            odd.push(Value::from(label));
        }
    }

    let query = harness.query("chats", &[("order_by", "id")]);
    let page = harness.backend("chats").all(&harness.ctx(), &query).await.unwrap();
    assert_eq!(page.total_count, 3);
    let names: Vec<&Value> = page.results.iter().map(|c| c.get("name")).collect();
    assert!(even.contains(names[0]));
    assert!(even.contains(names[1]) || odd.contains(names[1]));
    assert!(odd.contains(names[2]));
}
