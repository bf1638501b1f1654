//! SQLite backend implementation.
//!
//! Serves resources bound to relational tables. Supports both in-memory
//! databases (great for testing) and file-based databases.
//!
//! # Features
//!
//! - Filters compiled to `WHERE` clauses with one `LEFT JOIN` per relation path
//! - JSON columns addressed through `json_extract` and `json_each`
//! - One transaction per request scope, shared by every verb
//!
//! # Example
//!
//! ```no_run
//! use apisvc_persistence::backends::sqlite::SqliteBackend;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = SqliteBackend::in_memory()?;
//! backend.init_schema("CREATE TABLE IF NOT EXISTS topics (id INTEGER PRIMARY KEY, title TEXT)")?;
//! # Ok(())
//! # }
//! ```

mod backend;
mod query_builder;
mod storage;
mod transaction;

pub use backend::{SqliteBackend, SqliteBackendConfig};
pub use query_builder::{SelectBuilder, SqlFragment, SqlParam};
pub use transaction::SqliteTransaction;
