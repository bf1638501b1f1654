//! apisvc Persistence Layer
//!
//! Declarative resource schemas and the machinery that turns them into
//! queries against a relational store or a search index.
//!
//! # Architecture
//!
//! - [`value`] - the dynamic [`Value`] every layer exchanges
//! - [`schema`] - fields, relations, resource descriptions and the registry
//! - [`path`] - `__`-delimited filter, order-by and with-relation expressions
//! - [`query`] - the backend-agnostic [`Query`] and the [`QueryBackend`] seam
//! - [`resource`] - materialized resources and collections
//! - [`format`] - streaming wire formats with link stubs for unloaded relations
//! - [`core`] - the request-scoped, reference-counted [`TransactionManager`]
//! - [`backends`] - SQLite (`sqlite`, default) and search (`elasticsearch` client)
//! - [`error`] - the error taxonomy with HTTP-style status codes
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use apisvc_persistence::schema::{Field, RelatedField, ResourceBuilder, SchemaRegistry};
//! use apisvc_persistence::query::Query;
//!
//! let registry = Arc::new(
//!     SchemaRegistry::builder()
//!         .resource(
//!             ResourceBuilder::new("topics")
//!                 .field(Field::integer("id").primary_key())
//!                 .field(Field::string("title")),
//!         )
//!         .resource(
//!             ResourceBuilder::new("chats")
//!                 .field(Field::integer("id").primary_key())
//!                 .related(RelatedField::foreign_key("topic", "topics").backref("chats")),
//!         )
//!         .build()
//!         .unwrap(),
//! );
//!
//! let query = Query::for_resource(registry, "chats")
//!     .unwrap()
//!     .filter("topic__title__istartswith", "Web")
//!     .unwrap()
//!     .order_by("id__desc")
//!     .unwrap();
//! assert_eq!(query.filters()[0].name(), "topic__title__istartswith");
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod backends;
pub mod core;
pub mod error;
pub mod format;
pub mod path;
pub mod query;
pub mod resource;
pub mod schema;
pub mod types;
pub mod value;

// Re-export commonly used types at crate root
pub use core::{Transaction, TransactionManager};
pub use error::{StorageError, StorageResult};
pub use query::{BackendMap, ExecutionContext, Query, QueryBackend};
pub use resource::{Collection, Related, Resource};
pub use schema::{Field, RelatedField, ResourceDescription, SchemaRegistry};
pub use types::{Method, Slice, SortDirection};
pub use value::Value;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
