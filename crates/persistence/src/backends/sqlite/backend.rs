//! SQLite backend implementation.

use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{BackendError, StorageError, StorageResult};
use crate::query::ExecutionContext;

use super::transaction::SqliteTransaction;

/// SQLite backend serving table-bound resources.
pub struct SqliteBackend {
    pool: Pool<SqliteConnectionManager>,
    config: SqliteBackendConfig,
    is_memory: bool,
    /// Identifies this backend's transaction in a request scope.
    key: String,
}

impl Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("config", &self.config)
            .field("is_memory", &self.is_memory)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// Configuration for the SQLite backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteBackendConfig {
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of idle connections.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in milliseconds.
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u32,

    /// Enable WAL mode for better concurrency.
    #[serde(default = "default_true")]
    pub enable_wal: bool,

    /// Enable foreign key constraints.
    #[serde(default = "default_true")]
    pub enable_foreign_keys: bool,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connection_timeout_ms() -> u64 {
    30000
}

fn default_busy_timeout_ms() -> u32 {
    5000
}

fn default_true() -> bool {
    true
}

impl Default for SqliteBackendConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connection_timeout_ms: default_connection_timeout_ms(),
            busy_timeout_ms: default_busy_timeout_ms(),
            enable_wal: true,
            enable_foreign_keys: true,
        }
    }
}

fn connection_error(message: impl ToString) -> StorageError {
    StorageError::Backend(BackendError::ConnectionFailed {
        backend_name: "sqlite".to_string(),
        message: message.to_string(),
    })
}

impl SqliteBackend {
    /// Creates a new in-memory SQLite backend.
    ///
    /// Every connection to `:memory:` is a separate database, so the pool
    /// holds exactly one connection for the backend's lifetime.
    pub fn in_memory() -> StorageResult<Self> {
        let config = SqliteBackendConfig {
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        };
        let manager = Self::init_manager(SqliteConnectionManager::memory(), &config);
        let pool = Pool::builder()
            .max_size(1)
            .min_idle(Some(1))
            .idle_timeout(None)
            .max_lifetime(None)
            .connection_timeout(Duration::from_millis(config.connection_timeout_ms))
            .build(manager)
            .map_err(connection_error)?;
        Ok(Self::from_pool(pool, config, true))
    }

    /// Opens or creates a file-based SQLite database.
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        Self::with_config(path, SqliteBackendConfig::default())
    }

    /// Creates a file-based backend with custom configuration.
    pub fn with_config<P: AsRef<Path>>(
        path: P,
        config: SqliteBackendConfig,
    ) -> StorageResult<Self> {
        let path_str = path.as_ref().to_string_lossy();
        if path_str == ":memory:" {
            return Self::in_memory();
        }

        let manager = Self::init_manager(SqliteConnectionManager::file(path.as_ref()), &config);
        let pool = Pool::builder()
            .max_size(config.max_connections)
            .min_idle(Some(config.min_connections))
            .connection_timeout(Duration::from_millis(config.connection_timeout_ms))
            .build(manager)
            .map_err(connection_error)?;

        let backend = Self::from_pool(pool, config, false);
        if backend.config.enable_wal {
            let conn = backend.get_connection()?;
            conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        }
        info!(path = %path_str, "Opened SQLite database");
        Ok(backend)
    }

    fn from_pool(
        pool: Pool<SqliteConnectionManager>,
        config: SqliteBackendConfig,
        is_memory: bool,
    ) -> Self {
        Self {
            pool,
            config,
            is_memory,
            key: format!("sqlite:{}", uuid::Uuid::new_v4()),
        }
    }

    /// Applies per-connection pragmas to every pooled connection.
    fn init_manager(
        manager: SqliteConnectionManager,
        config: &SqliteBackendConfig,
    ) -> SqliteConnectionManager {
        let busy_timeout = Duration::from_millis(u64::from(config.busy_timeout_ms));
        let foreign_keys = config.enable_foreign_keys;
        manager.with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            if foreign_keys {
                conn.execute_batch("PRAGMA foreign_keys = ON")?;
            }
            Ok(())
        })
    }

    /// Runs DDL (or any batch of statements) outside request transactions.
    pub fn execute_batch(&self, sql: &str) -> StorageResult<()> {
        let conn = self.get_connection()?;
        conn.execute_batch(sql)?;
        Ok(())
    }

    /// Initializes the database schema from `ddl`. Statements should be
    /// idempotent (`CREATE TABLE IF NOT EXISTS`).
    pub fn init_schema(&self, ddl: &str) -> StorageResult<()> {
        self.execute_batch(ddl)?;
        info!("Initialized SQLite schema");
        Ok(())
    }

    /// Get a connection from the pool.
    pub(crate) fn get_connection(
        &self,
    ) -> StorageResult<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(connection_error)
    }

    /// The transaction this backend participates with in the current
    /// request scope, started and registered on first use.
    pub(crate) fn transaction(
        &self,
        ctx: &ExecutionContext<'_>,
    ) -> StorageResult<Arc<dyn crate::core::Transaction>> {
        if let Some(existing) = ctx.transactions.participant(&self.key) {
            return Ok(existing);
        }
        if !ctx.transactions.is_active() {
            return Err(crate::error::TransactionError::NotActive.into());
        }
        let tx: Arc<dyn crate::core::Transaction> =
            Arc::new(SqliteTransaction::begin(self.get_connection()?)?);
        ctx.transactions.register(self.key.clone(), tx.clone())?;
        Ok(tx)
    }

    /// Runs `f` on the request's connection.
    pub(crate) fn with_connection<T>(
        &self,
        ctx: &ExecutionContext<'_>,
        f: impl FnOnce(&rusqlite::Connection) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let tx = self.transaction(ctx)?;
        let sqlite = tx
            .as_any()
            .downcast_ref::<SqliteTransaction>()
            .ok_or_else(|| {
                StorageError::Backend(BackendError::Internal {
                    backend_name: "sqlite".to_string(),
                    message: format!("participant '{}' is not a SQLite transaction", self.key),
                    source: None,
                })
            })?;
        sqlite.with_connection(f)
    }

    /// Returns whether this is an in-memory database.
    pub fn is_memory(&self) -> bool {
        self.is_memory
    }

    /// Returns the backend configuration.
    pub fn config(&self) -> &SqliteBackendConfig {
        &self.config
    }

    /// Checks that a connection can be acquired and used.
    pub fn health_check(&self) -> StorageResult<()> {
        let conn = self.get_connection()?;
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }
}
