//! The backend seam and relation materialization shared by every backend.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::Query;
use crate::core::TransactionManager;
use crate::error::{QueryError, SchemaError, StorageError, StorageResult};
use crate::resource::{Collection, Related, Resource};
use crate::schema::{RelatedField, SchemaRegistry};
use crate::value::Value;

/// Rows fetched for a relation: each target resource paired with the
/// backend-form key of the owner it belongs to.
pub type RelatedRows = Vec<(Value, Resource)>;

/// A concrete execution engine a [`Query`] compiles against.
///
/// Write verbs default to [`QueryError::Unsupported`] so read-only backends
/// only implement the reads.
#[async_trait]
pub trait QueryBackend: Send + Sync + Debug {
    /// Backend name for diagnostics.
    fn backend_name(&self) -> &str;

    /// The resource with `primary_key` among the query's matches.
    async fn get(
        &self,
        ctx: &ExecutionContext<'_>,
        query: &Query,
        primary_key: &Value,
    ) -> StorageResult<Resource>;

    /// The query's single match.
    async fn one(&self, ctx: &ExecutionContext<'_>, query: &Query) -> StorageResult<Resource>;

    /// A page of matches plus the total result-set size.
    async fn all(&self, ctx: &ExecutionContext<'_>, query: &Query) -> StorageResult<Collection>;

    /// Persists a new resource and returns it as stored.
    async fn create(
        &self,
        _ctx: &ExecutionContext<'_>,
        _query: &Query,
        _resource: Resource,
    ) -> StorageResult<Resource> {
        Err(self.unsupported("create"))
    }

    /// Overwrites the query's single match.
    async fn update(
        &self,
        _ctx: &ExecutionContext<'_>,
        _query: &Query,
        _resource: Resource,
    ) -> StorageResult<Resource> {
        Err(self.unsupported("update"))
    }

    /// Deletes the query's single match.
    async fn delete(&self, _ctx: &ExecutionContext<'_>, _query: &Query) -> StorageResult<()> {
        Err(self.unsupported("delete"))
    }

    /// Persists several new resources.
    async fn bulk_create(
        &self,
        _ctx: &ExecutionContext<'_>,
        _query: &Query,
        _resources: Vec<Resource>,
    ) -> StorageResult<Vec<Resource>> {
        Err(self.unsupported("bulk_create"))
    }

    /// Overwrites exactly the given resources, all of which must match the query.
    async fn bulk_update(
        &self,
        _ctx: &ExecutionContext<'_>,
        _query: &Query,
        _resources: Vec<Resource>,
    ) -> StorageResult<Vec<Resource>> {
        Err(self.unsupported("bulk_update"))
    }

    /// Deletes exactly the given resources, all of which must match the query.
    async fn bulk_delete(
        &self,
        _ctx: &ExecutionContext<'_>,
        _query: &Query,
        _resources: &[Resource],
    ) -> StorageResult<()> {
        Err(self.unsupported("bulk_delete"))
    }

    /// Fetches the targets of `relation` for the owners identified by `keys`
    /// (backend-form foreign keys for forward relations, primary keys otherwise).
    async fn fetch_related(
        &self,
        ctx: &ExecutionContext<'_>,
        relation: &RelatedField,
        keys: &[Value],
    ) -> StorageResult<RelatedRows>;

    /// The error raised by verbs this backend does not implement.
    fn unsupported(&self, operation: &str) -> StorageError {
        QueryError::Unsupported {
            backend_name: self.backend_name().to_string(),
            operation: operation.to_string(),
        }
        .into()
    }
}

/// Which backend serves each resource type.
#[derive(Debug, Clone, Default)]
pub struct BackendMap {
    backends: HashMap<String, Arc<dyn QueryBackend>>,
}

impl BackendMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `resource` to `backend`.
    pub fn insert(&mut self, resource: impl Into<String>, backend: Arc<dyn QueryBackend>) {
        self.backends.insert(resource.into(), backend);
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, resource: impl Into<String>, backend: Arc<dyn QueryBackend>) -> Self {
        self.insert(resource, backend);
        self
    }

    /// The backend bound to `resource`.
    pub fn get(&self, resource: &str) -> Option<&Arc<dyn QueryBackend>> {
        self.backends.get(resource)
    }
}

/// Everything a backend needs from the request it runs in.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionContext<'a> {
    /// Schemas of every resource type.
    pub registry: &'a SchemaRegistry,
    /// The request's transaction scopes.
    pub transactions: &'a TransactionManager,
    /// Backends of every resource type, for relation loading.
    pub backends: &'a BackendMap,
}

impl<'a> ExecutionContext<'a> {
    /// Bundles the request collaborators.
    pub fn new(
        registry: &'a SchemaRegistry,
        transactions: &'a TransactionManager,
        backends: &'a BackendMap,
    ) -> Self {
        Self {
            registry,
            transactions,
            backends,
        }
    }

    /// The backend bound to `resource`.
    pub fn backend(&self, resource: &str) -> StorageResult<&'a Arc<dyn QueryBackend>> {
        self.backends.get(resource).ok_or_else(|| {
            SchemaError::InvalidDeclaration {
                resource: resource.to_string(),
                message: "no backend bound".to_string(),
            }
            .into()
        })
    }
}

/// Materializes every relation expansion of `query` on `resources`, one
/// batch per hop.
pub async fn apply_with_relations(
    ctx: &ExecutionContext<'_>,
    query: &Query,
    resources: &mut [Resource],
) -> StorageResult<()> {
    for with_relation in query.with_relations() {
        let mut batch: Vec<&mut Resource> = resources.iter_mut().collect();
        for relation in with_relation.relations() {
            load_relation(ctx, relation, &mut batch).await?;
            batch = batch
                .into_iter()
                .flat_map(|r| match r.related_mut(relation.name()) {
                    Some(related) => related.resources_mut(),
                    None => Vec::new(),
                })
                .collect();
        }
    }
    Ok(())
}

/// Loads `relation` on every resource of `batch` that has not loaded it yet,
/// with a single fetch from the target's backend.
pub async fn load_relation(
    ctx: &ExecutionContext<'_>,
    relation: &RelatedField,
    batch: &mut [&mut Resource],
) -> StorageResult<()> {
    let mut owner_keys = Vec::with_capacity(batch.len());
    let mut keys: Vec<Value> = Vec::new();
    for resource in batch.iter() {
        if resource.is_loaded(relation.name()) {
            owner_keys.push(None);
            continue;
        }
        let key = owner_key(relation, resource)?;
        if let Some(key) = &key
            && !keys.contains(key)
        {
            keys.push(key.clone());
        }
        owner_keys.push(Some(key));
    }
    if owner_keys.iter().all(Option::is_none) {
        return Ok(());
    }

    let rows = if keys.is_empty() {
        Vec::new()
    } else {
        let backend = ctx.backend(relation.target())?;
        debug!(
            relation = relation.name(),
            owner = relation.owner(),
            keys = keys.len(),
            "Loading relation"
        );
        backend.fetch_related(ctx, relation, &keys).await?
    };
    let mut grouped: BTreeMap<String, Vec<Resource>> = BTreeMap::new();
    for (key, resource) in rows {
        grouped.entry(key.to_string()).or_default().push(resource);
    }

    for (resource, key) in batch.iter_mut().zip(owner_keys) {
        let Some(key) = key else {
            continue;
        };
        let targets = key
            .and_then(|k| grouped.get(&k.to_string()).cloned())
            .unwrap_or_default();
        let related = if relation.is_many() {
            Related::Many(targets)
        } else {
            Related::One(targets.into_iter().next().map(Box::new))
        };
        resource.set_related(relation.name(), related);
    }
    Ok(())
}

/// Backend-form key identifying `resource` on the owning side of `relation`.
fn owner_key(relation: &RelatedField, resource: &Resource) -> StorageResult<Option<Value>> {
    let key = match relation.fk_field() {
        Some(fk) => fk.validate_for_backend(resource.get(fk.name()))?,
        None => {
            let pk = resource.description().primary_key();
            pk.validate_for_backend(resource.primary_key())?
        }
    };
    Ok((!key.is_null()).then_some(key))
}
