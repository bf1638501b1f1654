//! Search backend implementation.

use std::fmt::Debug;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::error::StorageResult;
use crate::schema::ResourceDescription;

use super::client::SearchClient;

/// Search backend serving index-bound resources. Read-only.
#[derive(Debug, Clone)]
pub struct SearchBackend {
    client: Arc<dyn SearchClient>,
    config: SearchBackendConfig,
}

/// Configuration for the search backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchBackendConfig {
    /// Prefix applied to every index name.
    #[serde(default)]
    pub index_prefix: String,

    /// Request exact totals instead of the engine's lower bound.
    #[serde(default = "default_true")]
    pub track_total_hits: bool,

    /// Largest `from + size` the engine accepts.
    #[serde(default = "default_max_result_window")]
    pub max_result_window: usize,
}

fn default_true() -> bool {
    true
}

fn default_max_result_window() -> usize {
    10_000
}

impl Default for SearchBackendConfig {
    fn default() -> Self {
        Self {
            index_prefix: String::new(),
            track_total_hits: true,
            max_result_window: default_max_result_window(),
        }
    }
}

impl SearchBackend {
    /// Creates a backend over `client` with default configuration.
    pub fn new(client: Arc<dyn SearchClient>) -> Self {
        Self::with_config(client, SearchBackendConfig::default())
    }

    /// Creates a backend with custom configuration.
    pub fn with_config(client: Arc<dyn SearchClient>, config: SearchBackendConfig) -> Self {
        Self { client, config }
    }

    /// Returns the backend configuration.
    pub fn config(&self) -> &SearchBackendConfig {
        &self.config
    }

    /// Index name for a resource type.
    pub fn index_name(&self, description: &ResourceDescription) -> String {
        format!("{}{}", self.config.index_prefix, description.binding().name())
    }

    /// Sends `body` to the resource's index.
    pub(crate) async fn search(
        &self,
        description: &ResourceDescription,
        body: JsonValue,
    ) -> StorageResult<JsonValue> {
        let index = self.index_name(description);
        debug!(index = %index, body = %body, "Executing search");
        self.client.search(&index, body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::search::StaticSearchClient;
    use crate::schema::{Field, ResourceBuilder, SchemaRegistry};

    #[test]
    fn test_config_defaults() {
        let config: SearchBackendConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.index_prefix, "");
        assert!(config.track_total_hits);
        assert_eq!(config.max_result_window, 10_000);
    }

    #[test]
    fn test_index_name() {
        let registry = SchemaRegistry::builder()
            .resource(
                ResourceBuilder::new("user_search")
                    .index("users")
                    .field(Field::integer("id").primary_key()),
            )
            .build()
            .unwrap();
        let backend = SearchBackend::with_config(
            Arc::new(StaticSearchClient::new()),
            SearchBackendConfig {
                index_prefix: "dev_".to_string(),
                ..Default::default()
            },
        );
        let description = registry.resource("user_search").unwrap();
        assert_eq!(backend.index_name(description), "dev_users");
    }
}
