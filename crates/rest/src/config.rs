//! Server configuration for the apisvc REST API.
//!
//! This module provides configuration types for the REST server, supporting
//! both programmatic configuration and environment variable overrides.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `APISVC_PORT` | 8080 | Server port |
//! | `APISVC_HOST` | 127.0.0.1 | Host to bind |
//! | `APISVC_LOG_LEVEL` | info | Log level |
//! | `APISVC_DATABASE_URL` | (in-memory) | SQLite database path |
//! | `APISVC_BASE_URI` | /api/v1 | Prefix of every resource route |
//! | `APISVC_MAX_BODY_SIZE` | 10485760 | Max request body (bytes) |
//! | `APISVC_REQUEST_TIMEOUT` | 30 | Request timeout (seconds) |
//! | `APISVC_ENABLE_CORS` | true | Enable CORS |
//! | `APISVC_CORS_ORIGINS` | * | Allowed origins |
//! | `APISVC_CORS_METHODS` | GET,POST,PUT,DELETE,OPTIONS | Allowed methods |
//! | `APISVC_CORS_HEADERS` | * | Allowed headers |
//! | `APISVC_SESSION_COOKIE` | sessionid | Cookie carrying the session token |
//! | `APISVC_ELASTICSEARCH_NODES` | (none) | Comma-separated search nodes |
//!
//! # Example
//!
//! ```rust
//! use apisvc_rest::ServerConfig;
//!
//! let config = ServerConfig {
//!     port: 3000,
//!     base_uri: "/api/v2".to_string(),
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use clap::Parser;

/// Server configuration for the apisvc REST API.
///
/// This struct can be constructed from environment variables using [`ServerConfig::from_env`],
/// from command line arguments using [`ServerConfig::parse`], or programmatically.
#[derive(Debug, Clone, Parser)]
#[command(name = "apisvc")]
#[command(about = "Resource API server")]
pub struct ServerConfig {
    /// Port to listen on.
    #[arg(short, long, env = "APISVC_PORT", default_value = "8080")]
    pub port: u16,

    /// Host address to bind to.
    #[arg(long, env = "APISVC_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, env = "APISVC_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// SQLite database path. In-memory when absent.
    #[arg(long, env = "APISVC_DATABASE_URL")]
    pub database_url: Option<String>,

    /// Prefix of every resource route and resource URI.
    #[arg(long, env = "APISVC_BASE_URI", default_value = "/api/v1")]
    pub base_uri: String,

    /// Maximum request body size in bytes.
    #[arg(long, env = "APISVC_MAX_BODY_SIZE", default_value = "10485760")]
    pub max_body_size: usize,

    /// Request timeout in seconds.
    #[arg(long, env = "APISVC_REQUEST_TIMEOUT", default_value = "30")]
    pub request_timeout: u64,

    /// Enable CORS.
    #[arg(long, env = "APISVC_ENABLE_CORS", default_value = "true")]
    pub enable_cors: bool,

    /// Allowed CORS origins (comma-separated, or * for all).
    #[arg(long, env = "APISVC_CORS_ORIGINS", default_value = "*")]
    pub cors_origins: String,

    /// Allowed CORS methods (comma-separated, or * for all).
    #[arg(long, env = "APISVC_CORS_METHODS", default_value = "GET,POST,PUT,DELETE,OPTIONS")]
    pub cors_methods: String,

    /// Allowed CORS headers (comma-separated, or * for all).
    #[arg(long, env = "APISVC_CORS_HEADERS", default_value = "*")]
    pub cors_headers: String,

    /// Name of the cookie carrying the session token.
    #[arg(long, env = "APISVC_SESSION_COOKIE", default_value = "sessionid")]
    pub session_cookie: String,

    /// Comma-separated Elasticsearch node URLs for search resources.
    #[arg(long, env = "APISVC_ELASTICSEARCH_NODES")]
    pub elasticsearch_nodes: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "127.0.0.1".to_string(),
            log_level: "info".to_string(),
            database_url: None,
            base_uri: "/api/v1".to_string(),
            max_body_size: 10 * 1024 * 1024, // 10MB
            request_timeout: 30,
            enable_cors: true,
            cors_origins: "*".to_string(),
            cors_methods: "GET,POST,PUT,DELETE,OPTIONS".to_string(),
            cors_headers: "*".to_string(),
            session_cookie: "sessionid".to_string(),
            elasticsearch_nodes: None,
        }
    }
}

impl ServerConfig {
    /// Creates a new ServerConfig from environment variables.
    ///
    /// This is a convenience method that parses environment variables without
    /// requiring command line arguments.
    pub fn from_env() -> Self {
        Self::try_parse_from(["apisvc"]).unwrap_or_default()
    }

    /// Returns the socket address to bind to.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Elasticsearch nodes, trimmed, empty entries dropped.
    pub fn search_nodes(&self) -> Vec<String> {
        self.elasticsearch_nodes
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Validates the configuration and returns errors if any.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.port == 0 {
            errors.push("Port cannot be 0".to_string());
        }

        if self.max_body_size == 0 {
            errors.push("Max body size cannot be 0".to_string());
        }

        if self.request_timeout == 0 {
            errors.push("Request timeout cannot be 0".to_string());
        }

        if !self.base_uri.is_empty() && !self.base_uri.starts_with('/') {
            errors.push("Base URI must start with '/'".to_string());
        }

        if self.session_cookie.trim().is_empty() {
            errors.push("Session cookie name cannot be empty".to_string());
        }

        for node in self.search_nodes() {
            if url::Url::parse(&node).is_err() {
                errors.push(format!("Invalid Elasticsearch node URL: {}", node));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Creates a configuration suitable for testing.
    ///
    /// This uses ephemeral port 0 and disables features that might interfere
    /// with tests.
    pub fn for_testing() -> Self {
        Self {
            port: 0, // Let OS assign port
            log_level: "debug".to_string(),
            request_timeout: 5, // Shorter timeout for tests
            enable_cors: false,
            ..Default::default()
        }
    }
}
