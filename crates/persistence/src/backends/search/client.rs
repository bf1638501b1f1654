//! The search-engine seam.

use std::collections::HashMap;
use std::fmt::Debug;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;

use crate::error::{BackendError, StorageResult};

/// Runs a structured search request against an index.
#[async_trait]
pub trait SearchClient: Send + Sync + Debug {
    /// Sends `body` to `index` and returns the raw response body.
    async fn search(&self, index: &str, body: JsonValue) -> StorageResult<JsonValue>;
}

/// A client answering from canned responses, recording every request.
///
/// Useful for tests and for running without a search cluster.
#[derive(Debug, Default)]
pub struct StaticSearchClient {
    responses: Mutex<HashMap<String, Vec<JsonValue>>>,
    requests: Mutex<Vec<(String, JsonValue)>>,
}

impl StaticSearchClient {
    /// Creates a client with no canned responses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response for `index`. Responses are served in order; the
    /// last one is repeated once the queue drains.
    pub fn respond(&self, index: impl Into<String>, response: JsonValue) {
        self.responses
            .lock()
            .entry(index.into())
            .or_default()
            .push(response);
    }

    /// Builder form of [`respond`](Self::respond).
    pub fn with_response(self, index: impl Into<String>, response: JsonValue) -> Self {
        self.respond(index, response);
        self
    }

    /// Every `(index, body)` received so far.
    pub fn requests(&self) -> Vec<(String, JsonValue)> {
        self.requests.lock().clone()
    }

    /// The most recent request body.
    pub fn last_request(&self) -> Option<JsonValue> {
        self.requests.lock().last().map(|(_, body)| body.clone())
    }
}

#[async_trait]
impl SearchClient for StaticSearchClient {
    async fn search(&self, index: &str, body: JsonValue) -> StorageResult<JsonValue> {
        self.requests.lock().push((index.to_string(), body));
        let mut responses = self.responses.lock();
        let queue = responses.get_mut(index).ok_or_else(|| BackendError::QueryFailed {
            message: format!("no such index '{}'", index),
        })?;
        match queue.len() {
            0 => Err(BackendError::QueryFailed {
                message: format!("no response for index '{}'", index),
            }
            .into()),
            1 => Ok(queue[0].clone()),
            _ => Ok(queue.remove(0)),
        }
    }
}
