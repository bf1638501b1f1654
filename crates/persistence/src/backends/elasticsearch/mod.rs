//! Elasticsearch client for the search backend.
//!
//! ```no_run
//! use std::sync::Arc;
//! use apisvc_persistence::backends::elasticsearch::{ElasticsearchClient, ElasticsearchConfig};
//! use apisvc_persistence::backends::search::SearchBackend;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ElasticsearchClient::new(ElasticsearchConfig::default())?;
//! let backend = SearchBackend::new(Arc::new(client));
//! # Ok(())
//! # }
//! ```

mod client;

pub use client::{ElasticsearchAuth, ElasticsearchClient, ElasticsearchConfig};
