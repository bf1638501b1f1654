//! Backend wiring for integration tests.

use std::path::Path;
use std::sync::Arc;

use apisvc_persistence::backends::search::{SearchBackend, StaticSearchClient};
use apisvc_persistence::backends::sqlite::SqliteBackend;
use apisvc_persistence::{
    BackendMap, ExecutionContext, Query, QueryBackend, Resource, SchemaRegistry,
    TransactionManager, Value,
};
use chrono::{TimeZone, Utc};

use super::fixtures::{DDL, registry, user_search_response};

/// Registry, backends and one request's transaction manager.
pub struct Harness {
    pub registry: Arc<SchemaRegistry>,
    pub backends: BackendMap,
    pub transactions: TransactionManager,
    pub sqlite: Arc<SqliteBackend>,
    pub search: Arc<StaticSearchClient>,
}

impl Harness {
    /// In-memory SQLite plus a canned search client.
    pub fn in_memory() -> Self {
        let sqlite = SqliteBackend::in_memory().expect("in-memory backend");
        Self::with_sqlite(sqlite)
    }

    /// File-backed SQLite at `path`.
    pub fn file(path: &Path) -> Self {
        let sqlite = SqliteBackend::open(path).expect("file backend");
        Self::with_sqlite(sqlite)
    }

    fn with_sqlite(sqlite: SqliteBackend) -> Self {
        sqlite.init_schema(DDL).expect("schema");
        let sqlite = Arc::new(sqlite);
        let search =
            Arc::new(StaticSearchClient::new().with_response("users", user_search_response()));
        let relational: Arc<dyn QueryBackend> = sqlite.clone();
        let search_backend: Arc<dyn QueryBackend> = Arc::new(SearchBackend::new(search.clone()));
        let backends = BackendMap::new()
            .with("topics", relational.clone())
            .with("chats", relational.clone())
            .with("users", relational.clone())
            .with("chat_sessions", relational)
            .with("user_search", search_backend);
        Self {
            registry: registry(),
            backends,
            transactions: TransactionManager::new(),
            sqlite,
            search,
        }
    }

    /// A fresh harness sharing this one's backends but with its own
    /// transaction manager, as a concurrent request would have.
    pub fn request(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            backends: self.backends.clone(),
            transactions: TransactionManager::new(),
            sqlite: self.sqlite.clone(),
            search: self.search.clone(),
        }
    }

    pub fn ctx(&self) -> ExecutionContext<'_> {
        ExecutionContext::new(&self.registry, &self.transactions, &self.backends)
    }

    pub fn backend(&self, resource: &str) -> Arc<dyn QueryBackend> {
        self.backends.get(resource).cloned().expect("bound backend")
    }

    pub fn query(&self, resource: &str, params: &[(&str, &str)]) -> Query {
        let params: Vec<(String, String)> = params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Query::for_resource(self.registry.clone(), resource)
            .and_then(|q| q.parse(&params))
            .expect("valid query")
    }

    pub fn resource(&self, name: &str) -> Resource {
        Resource::new(self.registry.resource(name).expect("declared").clone())
    }

    pub async fn create(&self, resource: Resource) -> Resource {
        let name = resource.resource_name().to_string();
        self.backend(&name)
            .create(&self.ctx(), &self.query(&name, &[]), resource)
            .await
            .expect("create")
    }

    /// Two topics, three chats, two chat sessions and three users:
    ///
    /// | chat | topic | sessions | users |
    /// |------|-------|----------|-------|
    /// | alpha | Web | 1 | ada, grace |
    /// | beta | Web | 2 | linus |
    /// | gamma | Ops | - | - |
    pub async fn seed(&self) {
        let web = self.create(self.resource("topics").with("title", "Web")).await;
        let ops = self.create(self.resource("topics").with("title", "Ops")).await;

        let mut chats = Vec::new();
        for (day, name, topic) in [(1, "alpha", &web), (2, "beta", &web), (3, "gamma", &ops)] {
            let created = Utc.with_ymd_and_hms(2024, 3, day, 9, 0, 0).unwrap();
            let chat = self
                .resource("chats")
                .with("name", name)
                .with("created", created)
                .with("topic_id", topic.primary_key().clone());
            chats.push(self.create(chat).await);
        }

        for (name, tenant, skills) in [
            ("ada", 1, vec!["rust", "sql"]),
            ("grace", 1, vec!["cobol"]),
            ("linus", 2, vec!["c", "rust"]),
        ] {
            let skills: Vec<Value> = skills
                .into_iter()
                .map(|s| Value::from(serde_json::json!({"name": s, "yrs": 3})))
                .collect();
            let user = self
                .resource("users")
                .with("name", name)
                .with("tenant_id", tenant)
                .with("skills", skills);
            self.create(user).await;
        }

        for chat in &chats[..2] {
            let session = self
                .resource("chat_sessions")
                .with("chat_id", chat.primary_key().clone());
            self.create(session).await;
        }
        self.sqlite
            .execute_batch(
                "INSERT INTO chat_session_users (chat_session_id, user_id) VALUES (1, 1), (1, 2), (2, 3);",
            )
            .expect("link rows");
    }
}
