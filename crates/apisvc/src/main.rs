//! apisvc
//!
//! Serves chats, chat sessions, topics and users over HTTP, with an optional
//! user search index.

mod schema;

use std::sync::Arc;

use apisvc_persistence::{BackendMap, QueryBackend};
use apisvc_rest::{
    Api, MemorySessionStore, ServerConfig, create_app_with_config, init_logging, middleware,
};
use clap::Parser;
use tracing::{info, warn};

#[cfg(feature = "sqlite")]
use apisvc_persistence::backends::sqlite::SqliteBackend;

/// Creates and initializes a SQLite backend from the server configuration.
#[cfg(feature = "sqlite")]
fn create_sqlite_backend(config: &ServerConfig) -> anyhow::Result<SqliteBackend> {
    let db_path = config.database_url.as_deref().unwrap_or(":memory:");
    info!(database = %db_path, "Initializing SQLite backend");

    let backend = if db_path == ":memory:" {
        SqliteBackend::in_memory()?
    } else {
        SqliteBackend::open(db_path)?
    };
    backend.init_schema(schema::DDL)?;

    Ok(backend)
}

/// Binds the user search index when search nodes are configured.
#[cfg(feature = "elasticsearch")]
fn bind_search(config: &ServerConfig, backends: BackendMap) -> anyhow::Result<BackendMap> {
    use apisvc_persistence::backends::elasticsearch::{ElasticsearchClient, ElasticsearchConfig};
    use apisvc_persistence::backends::search::SearchBackend;

    let nodes = config.search_nodes();
    if nodes.is_empty() {
        info!("No search nodes configured, user_search is not routed");
        return Ok(backends);
    }
    info!(nodes = ?nodes, "Initializing Elasticsearch client");
    let client = ElasticsearchClient::new(ElasticsearchConfig {
        nodes,
        ..Default::default()
    })?;
    let search: Arc<dyn QueryBackend> = Arc::new(SearchBackend::new(Arc::new(client)));
    Ok(backends.with("user_search", search))
}

/// Fallback when the elasticsearch feature is not enabled.
#[cfg(not(feature = "elasticsearch"))]
fn bind_search(config: &ServerConfig, backends: BackendMap) -> anyhow::Result<BackendMap> {
    if !config.search_nodes().is_empty() {
        anyhow::bail!(
            "Search nodes require the 'elasticsearch' feature. \
             Build with: cargo build -p apisvc --features elasticsearch"
        );
    }
    Ok(backends)
}

/// Starts the Axum HTTP server.
async fn serve(app: axum::Router, config: &ServerConfig) -> anyhow::Result<()> {
    let addr = config.socket_addr();
    info!(address = %addr, "Server listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse();
    init_logging(&config.log_level);

    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("Configuration error: {}", error);
        }
        std::process::exit(1);
    }

    info!(
        port = config.port,
        host = %config.host,
        base_uri = %config.base_uri,
        "Starting apisvc"
    );

    start(config).await
}

#[cfg(feature = "sqlite")]
async fn start(config: ServerConfig) -> anyhow::Result<()> {
    let registry = schema::registry()?;

    let sqlite: Arc<dyn QueryBackend> = Arc::new(create_sqlite_backend(&config)?);
    let mut backends = BackendMap::new();
    for name in ["topics", "chats", "users", "chat_sessions"] {
        backends = backends.with(name, sqlite.clone());
    }
    let backends = bind_search(&config, backends)?;

    let sessions = Arc::new(MemorySessionStore::new());
    if config.database_url.is_none() {
        let admin = sessions.issue(1, schema::ADMIN_TENANT);
        warn!(token = %admin.token, "In-memory database, issued an admin session");
    }

    let api = schema::endpoints(Api::builder(&config.base_uri, registry, backends))?
        .middlewares(middleware::standard_pipeline(sessions, &config.session_cookie))
        .build()?;

    let app = create_app_with_config(Arc::new(api), config.clone());
    serve(app, &config).await
}

#[cfg(not(feature = "sqlite"))]
compile_error!("The sqlite backend feature must be enabled");
