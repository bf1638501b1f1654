//! Backend implementations.
//!
//! | Backend | Feature | Serves |
//! |---------|---------|--------|
//! | SQLite | `sqlite` (default) | table-bound resources, read and write |
//! | Search | always | index-bound resources, read only, through a [`search::SearchClient`] |
//! | Elasticsearch | `elasticsearch` | a [`search::SearchClient`] over a cluster |
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(feature = "sqlite")]
//! use apisvc_persistence::backends::sqlite::SqliteBackend;
//!
//! # #[cfg(feature = "sqlite")]
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = SqliteBackend::in_memory()?;
//! let backend = SqliteBackend::open("./data/apisvc.db")?;
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub mod search;

#[cfg(feature = "elasticsearch")]
pub mod elasticsearch;
