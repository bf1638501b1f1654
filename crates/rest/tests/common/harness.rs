//! REST API test harness.
//!
//! Builds the API over in-memory SQLite and a canned search client, seeds
//! it, and serves it through an axum-test [`TestServer`].

use std::sync::Arc;

use apisvc_persistence::backends::search::{SearchBackend, StaticSearchClient};
use apisvc_persistence::backends::sqlite::SqliteBackend;
use apisvc_persistence::{
    BackendMap, ExecutionContext, Query, QueryBackend, Resource, SchemaRegistry,
    TransactionManager, Value,
};
use apisvc_rest::{
    Api, ApiBuilder, FilterAuthorizer, MemorySessionStore, ServerConfig,
    Session, SessionAuthenticator, create_app_with_config, middleware,
};
use axum::http::{HeaderName, HeaderValue};
use axum_test::TestServer;
use chrono::{TimeZone, Utc};

use super::fixtures::{DDL, registry, user_search_response};

pub const COOKIE: HeaderName = HeaderName::from_static("cookie");
pub const SESSION_COOKIE: &str = "sessionid";
pub const BASE: &str = "/api/v1";

/// Test harness for REST API testing.
///
/// # Example
///
/// ```rust,ignore
/// let harness = RestTestHarness::seeded().await;
/// let response = harness.server.get("/api/v1/chats").await;
/// response.assert_status_ok();
/// ```
pub struct RestTestHarness {
    /// The test server instance.
    pub server: TestServer,
    /// The routed API.
    pub api: Arc<Api>,
    /// Sessions the authentication middleware resolves.
    pub sessions: Arc<MemorySessionStore>,
    /// The relational backend.
    pub sqlite: Arc<SqliteBackend>,
    /// The canned search client.
    pub search: Arc<StaticSearchClient>,
}

impl RestTestHarness {
    /// An empty database behind the standard pipeline.
    pub fn new() -> Self {
        Self::with_endpoints(|builder| {
            builder
                .resource("users", |endpoint| {
                    endpoint
                        .authenticator(SessionAuthenticator)
                        .authorizer(FilterAuthorizer::tenant("tenant_id"))
                })
                .expect("users endpoint")
        })
    }

    /// Like [`new`](Self::new) with the standard seed data.
    pub async fn seeded() -> Self {
        let harness = Self::new();
        harness.seed().await;
        harness
    }

    /// An empty database with endpoints configured by `configure`.
    pub fn with_endpoints(configure: impl FnOnce(ApiBuilder) -> ApiBuilder) -> Self {
        let sqlite = SqliteBackend::in_memory().expect("in-memory backend");
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

        let sessions = Arc::new(MemorySessionStore::new());
        let builder = Api::builder(BASE, registry(), backends)
            .middlewares(middleware::standard_pipeline(sessions.clone(), SESSION_COOKIE));
        let api = Arc::new(configure(builder).build().expect("api"));

        let app = create_app_with_config(api.clone(), ServerConfig::for_testing());
        let server = TestServer::new(app).expect("Failed to create test server");

        Self {
            server,
            api,
            sessions,
            sqlite,
            search,
        }
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        self.api.registry()
    }

    /// Opens a session and returns the cookie header carrying it.
    pub fn login(&self, user_id: i64, tenant_id: i64) -> HeaderValue {
        let session = self.sessions.issue(user_id, tenant_id);
        HeaderValue::from_str(&format!("{}={}", SESSION_COOKIE, session.token))
            .expect("cookie header")
    }

    /// A session whose attributes are absent.
    pub fn anonymous_login(&self) -> HeaderValue {
        self.sessions.insert(Session {
            token: "anonymous".to_string(),
            ..Default::default()
        });
        HeaderValue::from_static("sessionid=anonymous")
    }

    pub fn ctx<'a>(&'a self, transactions: &'a TransactionManager) -> ExecutionContext<'a> {
        self.api.execution(transactions)
    }

    pub fn resource(&self, name: &str) -> Resource {
        Resource::new(self.registry().resource(name).expect("declared").clone())
    }

    async fn create(&self, resource: Resource) -> Resource {
        let name = resource.resource_name().to_string();
        let transactions = TransactionManager::new();
        let query = Query::for_resource(self.registry().clone(), &name).expect("query");
        self.api
            .backends()
            .get(&name)
            .expect("bound backend")
            .create(&self.ctx(&transactions), &query, resource)
            .await
            .expect("create")
    }

    /// Counts rows of `resource` straight from the backend.
    pub async fn count(&self, name: &str) -> u64 {
        let transactions = TransactionManager::new();
        let query = Query::for_resource(self.registry().clone(), name)
            .expect("query")
            .slice(0, 1);
        self.api
            .backends()
            .get(name)
            .expect("bound backend")
            .all(&self.ctx(&transactions), &query)
            .await
            .expect("all")
            .total_count
    }

    /// Two topics, three chats, two chat sessions and three users:
    ///
    /// | chat | topic | sessions | users |
    /// |------|-------|----------|-------|
    /// | alpha | Web | 1 | ada (t1), grace (t1) |
    /// | beta | Web | 2 | linus (t2) |
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

        for (name, tenant) in [("ada", 1), ("grace", 1), ("linus", 2)] {
            let user = self
                .resource("users")
                .with("name", name)
                .with("tenant_id", tenant)
                .with("skills", Vec::<Value>::new());
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

/// `/api/v1/<path>`.
pub fn uri(path: &str) -> String {
    format!("{}/{}", BASE, path.trim_start_matches('/'))
}
