//! Application state shared by every request handler.

use std::sync::Arc;

use crate::api::Api;
use crate::config::ServerConfig;

/// Shared application state for the REST API.
///
/// Holds the built [`Api`] and the server configuration; both are immutable
/// after startup.
///
/// # Example
///
/// ```rust,ignore
/// use apisvc_rest::{Api, AppState, ServerConfig};
///
/// let api = Api::builder("/api/v1", registry, backends).build()?;
/// let state = AppState::new(Arc::new(api), ServerConfig::default());
/// ```
pub struct AppState {
    /// The routed API.
    api: Arc<Api>,

    /// Server configuration.
    config: Arc<ServerConfig>,
}

// Api is not Clone; only the Arcs are.
impl Clone for AppState {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            config: Arc::clone(&self.config),
        }
    }
}

impl AppState {
    /// Creates a new AppState with the given API and configuration.
    pub fn new(api: Arc<Api>, config: ServerConfig) -> Self {
        Self {
            api,
            config: Arc::new(config),
        }
    }

    /// Returns a reference to the API.
    pub fn api(&self) -> &Api {
        &self.api
    }

    /// Returns a clone of the API Arc.
    pub fn api_arc(&self) -> Arc<Api> {
        Arc::clone(&self.api)
    }

    /// Returns a reference to the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns the configured route prefix.
    pub fn base_uri(&self) -> &str {
        self.api.base_uri()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apisvc_persistence::schema::{Field, ResourceBuilder};
    use apisvc_persistence::{BackendMap, SchemaRegistry};

    fn api() -> Arc<Api> {
        let registry = SchemaRegistry::builder()
            .resource(ResourceBuilder::new("topics").field(Field::integer("id").primary_key()))
            .build()
            .unwrap();
        let api = Api::builder("/api/v1/", Arc::new(registry), BackendMap::new())
            .build()
            .unwrap();
        Arc::new(api)
    }

    #[test]
    fn test_app_state_creation() {
        let state = AppState::new(api(), ServerConfig::default());
        assert_eq!(state.base_uri(), "/api/v1");
        assert_eq!(state.config().port, 8080);
        // No backend is bound, so nothing is routed.
        assert!(state.api().routes().is_empty());
    }

    #[test]
    fn test_app_state_clone() {
        let state = AppState::new(api(), ServerConfig::default());
        let cloned = state.clone();
        assert!(Arc::ptr_eq(&state.api_arc(), &cloned.api_arc()));
    }
}
