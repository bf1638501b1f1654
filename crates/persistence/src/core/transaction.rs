//! Reference-counted transaction scopes.
//!
//! One [`TransactionManager`] is created per request and passed explicitly to
//! every component. Nested scopes share the backend transactions registered
//! in the outermost scope:
//!
//! | Call | Depth > 1 | Depth 1 (outermost) |
//! |------|-----------|---------------------|
//! | [`end`](TransactionManager::end) | decrement | commit every participant, or roll back if poisoned |
//! | [`rollback`](TransactionManager::rollback) | decrement, poison | roll back every participant |
//!
//! A poisoned scope can never commit: the outermost `end` rolls back and
//! reports [`TransactionError::RolledBack`].

use std::any::Any;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{StorageResult, TransactionError};

/// A backend transaction participating in a request scope.
#[async_trait]
pub trait Transaction: Send + Sync + Debug {
    /// Backend name for diagnostics.
    fn backend_name(&self) -> &str;

    /// Commits the transaction.
    async fn commit(&self) -> StorageResult<()>;

    /// Rolls the transaction back.
    async fn rollback(&self) -> StorageResult<()>;

    /// Allows backends to recover their concrete transaction type.
    fn as_any(&self) -> &dyn Any;
}

#[derive(Debug, Default)]
struct ScopeState {
    depth: usize,
    poisoned: bool,
    participants: Vec<(String, Arc<dyn Transaction>)>,
}

/// Tracks nested transaction scopes for one request.
#[derive(Debug, Default)]
pub struct TransactionManager {
    state: Mutex<ScopeState>,
}

impl TransactionManager {
    /// Creates a manager with no open scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a (possibly nested) scope.
    pub fn begin(&self) {
        let mut state = self.state.lock();
        state.depth += 1;
    }

    /// Whether a scope is open.
    pub fn is_active(&self) -> bool {
        self.state.lock().depth > 0
    }

    /// Whether a nested scope has failed.
    pub fn is_poisoned(&self) -> bool {
        self.state.lock().poisoned
    }

    /// Current nesting depth.
    pub fn depth(&self) -> usize {
        self.state.lock().depth
    }

    /// Registers a backend transaction under `key` in the open scope.
    pub fn register(
        &self,
        key: impl Into<String>,
        transaction: Arc<dyn Transaction>,
    ) -> StorageResult<()> {
        let mut state = self.state.lock();
        if state.depth == 0 {
            return Err(TransactionError::NotActive.into());
        }
        let key = key.into();
        debug!(
            key = %key,
            backend = transaction.backend_name(),
            "Registered transaction participant"
        );
        state.participants.push((key, transaction));
        Ok(())
    }

    /// The transaction registered under `key`, if any.
    pub fn participant(&self, key: &str) -> Option<Arc<dyn Transaction>> {
        self.state
            .lock()
            .participants
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, tx)| tx.clone())
    }

    /// Closes a scope successfully. The outermost scope commits, unless a
    /// nested scope poisoned it.
    pub async fn end(&self) -> StorageResult<()> {
        let (participants, poisoned) = {
            let mut state = self.state.lock();
            if state.depth == 0 {
                return Err(TransactionError::NotActive.into());
            }
            state.depth -= 1;
            if state.depth > 0 {
                return Ok(());
            }
            let poisoned = std::mem::take(&mut state.poisoned);
            (std::mem::take(&mut state.participants), poisoned)
        };

        if poisoned {
            rollback_all(participants).await;
            return Err(TransactionError::RolledBack {
                reason: "a nested scope failed".to_string(),
            }
            .into());
        }

        let mut remaining = participants.into_iter();
        while let Some((key, tx)) = remaining.next() {
            if let Err(e) = tx.commit().await {
                warn!(key = %key, error = %e, "Commit failed; rolling back remaining participants");
                rollback_all(remaining.collect()).await;
                return Err(e);
            }
            debug!(key = %key, "Committed transaction");
        }
        Ok(())
    }

    /// Closes a scope unsuccessfully. Nested scopes poison the outermost one;
    /// the outermost scope rolls back every participant.
    pub async fn rollback(&self) -> StorageResult<()> {
        let participants = {
            let mut state = self.state.lock();
            if state.depth == 0 {
                return Err(TransactionError::NotActive.into());
            }
            state.depth -= 1;
            if state.depth > 0 {
                state.poisoned = true;
                return Ok(());
            }
            state.poisoned = false;
            std::mem::take(&mut state.participants)
        };
        rollback_all(participants).await;
        Ok(())
    }

    /// Resets to no open scope, rolling back anything left registered.
    pub async fn clear(&self) {
        let participants = {
            let mut state = self.state.lock();
            state.depth = 0;
            state.poisoned = false;
            std::mem::take(&mut state.participants)
        };
        rollback_all(participants).await;
    }

    /// Runs `work` inside a nested scope: `end` on success, `rollback` on error.
    pub async fn scope<T, F, Fut>(&self, work: F) -> StorageResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        self.begin();
        match work().await {
            Ok(value) => {
                self.end().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_error) = self.rollback().await {
                    warn!(error = %rollback_error, "Rollback failed");
                }
                Err(e)
            }
        }
    }
}

async fn rollback_all(participants: Vec<(String, Arc<dyn Transaction>)>) {
    for (key, tx) in participants {
        match tx.rollback().await {
            Ok(()) => debug!(key = %key, "Rolled back transaction"),
            Err(e) => warn!(key = %key, error = %e, "Rollback failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct Recorder {
        commits: AtomicUsize,
        rollbacks: AtomicUsize,
    }

    #[async_trait]
    impl Transaction for Recorder {
        fn backend_name(&self) -> &str {
            "recorder"
        }

        async fn commit(&self) -> StorageResult<()> {
            self.commits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn rollback(&self) -> StorageResult<()> {
            self.rollbacks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[tokio::test]
    async fn test_commit_only_at_outermost_scope() {
        let manager = TransactionManager::new();
        let tx = Arc::new(Recorder::default());
        manager.begin();
        manager.register("db", tx.clone()).unwrap();
        manager.begin();
        manager.end().await.unwrap();
        assert_eq!(tx.commits.load(Ordering::SeqCst), 0);
        assert!(manager.participant("db").is_some());

        manager.end().await.unwrap();
        assert_eq!(tx.commits.load(Ordering::SeqCst), 1);
        assert!(!manager.is_active());
        assert!(manager.participant("db").is_none());
    }

    #[tokio::test]
    async fn test_nested_failure_poisons_outer_scope() {
        let manager = TransactionManager::new();
        let tx = Arc::new(Recorder::default());
        manager.begin();
        manager.register("db", tx.clone()).unwrap();
        manager.begin();
        manager.rollback().await.unwrap();
        assert!(manager.is_poisoned());
        assert_eq!(tx.rollbacks.load(Ordering::SeqCst), 0);

        let err = manager.end().await.unwrap_err();
        assert!(err.to_string().contains("rolled back"));
        assert_eq!(tx.commits.load(Ordering::SeqCst), 0);
        assert_eq!(tx.rollbacks.load(Ordering::SeqCst), 1);
        assert!(!manager.is_poisoned());
    }

    #[tokio::test]
    async fn test_scope_helper() {
        let manager = TransactionManager::new();
        let tx = Arc::new(Recorder::default());
        manager.begin();
        manager.register("db", tx.clone()).unwrap();

        let result: StorageResult<()> = manager
            .scope(|| async { Err(crate::error::StorageError::invalid_query("boom")) })
            .await;
        assert!(result.is_err());
        assert_eq!(manager.depth(), 1);
        assert!(manager.is_poisoned());

        manager.rollback().await.unwrap();
        assert_eq!(tx.rollbacks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unbalanced_and_clear() {
        let manager = TransactionManager::new();
        assert!(manager.end().await.is_err());
        assert!(manager.register("db", Arc::new(Recorder::default())).is_err());

        let tx = Arc::new(Recorder::default());
        manager.begin();
        manager.begin();
        manager.register("db", tx.clone()).unwrap();
        manager.clear().await;
        assert!(!manager.is_active());
        assert_eq!(tx.rollbacks.load(Ordering::SeqCst), 1);
    }
}
