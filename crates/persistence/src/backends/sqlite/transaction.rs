//! Transaction support for the SQLite backend.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::core::Transaction;
use crate::error::{StorageError, StorageResult, TransactionError};

fn transaction_error(message: String) -> StorageError {
    StorageError::Transaction(TransactionError::Failed {
        backend_name: "sqlite".to_string(),
        message,
    })
}

/// A SQLite transaction holding one pooled connection until it ends.
pub struct SqliteTransaction {
    /// The connection used for this transaction.
    conn: Mutex<PooledConnection<SqliteConnectionManager>>,
    /// Whether the transaction is still active.
    active: AtomicBool,
}

impl std::fmt::Debug for SqliteTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteTransaction")
            .field("active", &self.active.load(Ordering::SeqCst))
            .finish()
    }
}

impl SqliteTransaction {
    /// Starts a transaction on `conn`.
    pub(crate) fn begin(conn: PooledConnection<SqliteConnectionManager>) -> StorageResult<Self> {
        // Write lock is taken up front; other requests wait on busy_timeout.
        conn.execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| transaction_error(format!("Failed to begin transaction: {}", e)))?;

        Ok(Self {
            conn: Mutex::new(conn),
            active: AtomicBool::new(true),
        })
    }

    /// Whether the transaction can still run statements.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Runs `f` on the transaction's connection.
    pub(crate) fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> StorageResult<T>,
    ) -> StorageResult<T> {
        if !self.is_active() {
            return Err(TransactionError::NotActive.into());
        }
        let conn = self.conn.lock();
        f(&conn)
    }

    fn finish(&self, statement: &str) -> StorageResult<()> {
        if !self.active.swap(false, Ordering::SeqCst) {
            return Err(TransactionError::NotActive.into());
        }
        let conn = self.conn.lock();
        conn.execute_batch(statement).map_err(|e| {
            transaction_error(format!("Failed to {}: {}", statement.to_lowercase(), e))
        })
    }
}

impl Drop for SqliteTransaction {
    fn drop(&mut self) {
        if self.active.swap(false, Ordering::SeqCst) {
            let _ = self.conn.get_mut().execute_batch("ROLLBACK");
        }
    }
}

#[async_trait]
impl Transaction for SqliteTransaction {
    fn backend_name(&self) -> &str {
        "sqlite"
    }

    async fn commit(&self) -> StorageResult<()> {
        self.finish("COMMIT")
    }

    async fn rollback(&self) -> StorageResult<()> {
        self.finish("ROLLBACK")
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
