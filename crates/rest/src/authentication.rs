//! Sessions and per-resource authenticators.
//!
//! The session middleware resolves a [`Session`] from the request through a
//! [`SessionStore`]; each resource's [`Authenticator`] then decides whether the
//! request may proceed.

use std::collections::HashMap;
use std::fmt::Debug;

use apisvc_persistence::{StorageError, StorageResult, Value};
use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::context::RequestContext;

/// An authenticated session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    /// Session token.
    pub token: String,
    /// The authenticated user.
    pub user_id: Option<Value>,
    /// The user's tenant.
    pub tenant_id: Option<Value>,
}

impl Session {
    /// Creates a session for `user_id` in `tenant_id`.
    pub fn new(
        token: impl Into<String>,
        user_id: impl Into<Value>,
        tenant_id: impl Into<Value>,
    ) -> Self {
        Self {
            token: token.into(),
            user_id: Some(user_id.into()),
            tenant_id: Some(tenant_id.into()),
        }
    }
}

/// Looks sessions up by token.
#[async_trait]
pub trait SessionStore: Send + Sync + Debug {
    /// The session for `token`, if it exists.
    async fn get_session(&self, token: &str) -> StorageResult<Option<Session>>;
}

/// A process-local session store.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl MemorySessionStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a session.
    pub fn insert(&self, session: Session) {
        self.sessions.write().insert(session.token.clone(), session);
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(self, session: Session) -> Self {
        self.insert(session);
        self
    }

    /// Opens a session under a fresh random token and returns it.
    pub fn issue(&self, user_id: impl Into<Value>, tenant_id: impl Into<Value>) -> Session {
        let session = Session::new(uuid::Uuid::new_v4().to_string(), user_id, tenant_id);
        self.insert(session.clone());
        session
    }

    /// Removes the session for `token`.
    pub fn remove(&self, token: &str) -> Option<Session> {
        self.sessions.write().remove(token)
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get_session(&self, token: &str) -> StorageResult<Option<Session>> {
        Ok(self.sessions.read().get(token).cloned())
    }
}

/// Decides whether a request may reach a resource.
pub trait Authenticator: Send + Sync + Debug {
    /// Fails with [`StorageError::unauthenticated`] to reject the request.
    fn authenticate_request(&self, ctx: &RequestContext) -> StorageResult<()>;
}

/// Lets every request through.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceAuthenticator;

impl Authenticator for ResourceAuthenticator {
    fn authenticate_request(&self, _ctx: &RequestContext) -> StorageResult<()> {
        Ok(())
    }
}

/// Requires a session carrying both a user id and a tenant id.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionAuthenticator;

impl Authenticator for SessionAuthenticator {
    fn authenticate_request(&self, ctx: &RequestContext) -> StorageResult<()> {
        if ctx.user_id().is_none() || ctx.tenant_id().is_none() {
            debug!(path = %ctx.request.path, "Rejected request without a valid session");
            return Err(StorageError::unauthenticated("invalid session"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemorySessionStore::new().with(Session::new("abc", 1, 1));
        let session = store.get_session("abc").await.unwrap().unwrap();
        assert_eq!(session.user_id, Some(Value::Int(1)));
        assert!(store.get_session("nope").await.unwrap().is_none());

        let issued = store.issue(2, 1);
        assert_eq!(issued.token.len(), 36);
        assert_eq!(store.get_session(&issued.token).await.unwrap(), Some(issued));

        store.remove("abc");
        assert!(store.get_session("abc").await.unwrap().is_none());
    }
}
