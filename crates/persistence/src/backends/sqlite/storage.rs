//! [`QueryBackend`] implementation for SQLite.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::Connection;
use rusqlite::types::ValueRef;
use tracing::debug;

use crate::error::{QueryError, ResourceError, StorageError, StorageResult};
use crate::query::{ExecutionContext, Query, QueryBackend, RelatedRows, apply_with_relations};
use crate::resource::{Collection, Resource, RowOptions};
use crate::schema::{RelatedField, RelationKind, ResourceDescription};
use crate::types::Slice;
use crate::value::Value;

use super::SqliteBackend;
use super::query_builder::{SelectBuilder, SqlFragment, SqlParam, quote};

type Row = BTreeMap<String, Value>;

/// Column carrying the owner key of many-to-many rows.
const OWNER_KEY_COLUMN: &str = "__owner_key";

fn not_found(description: &ResourceDescription) -> StorageError {
    ResourceError::NotFound {
        resource_name: description.name().to_string(),
    }
    .into()
}

/// Columns stored as JSON text because fields address paths inside them.
fn json_columns(description: &ResourceDescription) -> HashSet<String> {
    description
        .fields()
        .iter()
        .filter(|f| f.accessor().is_nested())
        .map(|f| f.accessor().column().to_string())
        .collect()
}

fn read_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::String(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

fn query_rows(
    conn: &Connection,
    fragment: &SqlFragment,
    json: &HashSet<String>,
) -> StorageResult<Vec<Row>> {
    debug!(sql = %fragment.sql, params = fragment.params.len(), "Executing query");
    let mut stmt = conn.prepare(&fragment.sql)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let mut rows = stmt.query(rusqlite::params_from_iter(fragment.params.iter()))?;

    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Row::new();
        for (i, column) in columns.iter().enumerate() {
            let mut value = read_value(row.get_ref(i)?);
            if json.contains(column)
                && let Value::String(text) = &value
            {
                let parsed: serde_json::Value = serde_json::from_str(text)?;
                value = Value::from(parsed);
            }
            values.insert(column.clone(), value);
        }
        result.push(values);
    }
    Ok(result)
}

fn query_resources(
    conn: &Connection,
    fragment: &SqlFragment,
    description: &Arc<ResourceDescription>,
) -> StorageResult<Vec<Resource>> {
    query_rows(conn, fragment, &json_columns(description))?
        .iter()
        .map(|row| Resource::from_row(description.clone(), row, &[]))
        .collect()
}

fn query_scalar_column(conn: &Connection, fragment: &SqlFragment) -> StorageResult<Vec<Value>> {
    debug!(sql = %fragment.sql, "Executing key query");
    let mut stmt = conn.prepare(&fragment.sql)?;
    let mut rows = stmt.query(rusqlite::params_from_iter(fragment.params.iter()))?;
    let mut values = Vec::new();
    while let Some(row) = rows.next()? {
        values.push(read_value(row.get_ref(0)?));
    }
    Ok(values)
}

fn count(conn: &Connection, fragment: &SqlFragment) -> StorageResult<u64> {
    let total: i64 = conn.query_row(
        &fragment.sql,
        rusqlite::params_from_iter(fragment.params.iter()),
        |row| row.get(0),
    )?;
    Ok(u64::try_from(total).unwrap_or_default())
}

fn insert(
    conn: &Connection,
    description: &Arc<ResourceDescription>,
    resource: &Resource,
) -> StorageResult<Resource> {
    let row = resource.to_row(&RowOptions::default())?;
    let table = quote(description.binding().name());
    let sql = if row.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES", table)
    } else {
        let columns: Vec<String> = row.keys().map(|c| quote(c)).collect();
        let placeholders: Vec<String> = (1..=row.len()).map(|i| format!("?{}", i)).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns.join(", "),
            placeholders.join(", ")
        )
    };
    let params: Vec<SqlParam> = row.values().map(SqlParam::from).collect();
    debug!(sql = %sql, "Inserting row");
    conn.execute(&sql, rusqlite::params_from_iter(params.iter()))?;

    let rowid = conn.last_insert_rowid();
    let reload = SqlFragment::with_params(
        format!("SELECT * FROM {} WHERE rowid = ?1", table),
        vec![SqlParam::Integer(rowid)],
    );
    query_resources(conn, &reload, description)?
        .pop()
        .ok_or_else(|| not_found(description))
}

fn update(
    conn: &Connection,
    description: &Arc<ResourceDescription>,
    key: &Value,
    resource: &Resource,
) -> StorageResult<()> {
    let row = resource.to_row(&RowOptions::default())?;
    if row.is_empty() {
        return Ok(());
    }
    let assignments: Vec<String> = row
        .keys()
        .enumerate()
        .map(|(i, c)| format!("{} = ?{}", quote(c), i + 1))
        .collect();
    let mut params: Vec<SqlParam> = row.values().map(SqlParam::from).collect();
    params.push(SqlParam::from(key));
    let sql = format!(
        "UPDATE {} SET {} WHERE {} = ?{}",
        quote(description.binding().name()),
        assignments.join(", "),
        quote(description.primary_key().accessor().column()),
        params.len()
    );
    debug!(sql = %sql, "Updating row");
    conn.execute(&sql, rusqlite::params_from_iter(params.iter()))?;
    Ok(())
}

fn delete(
    conn: &Connection,
    description: &ResourceDescription,
    keys: &[Value],
) -> StorageResult<usize> {
    if keys.is_empty() {
        return Ok(0);
    }
    let placeholders: Vec<String> = (1..=keys.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "DELETE FROM {} WHERE {} IN ({})",
        quote(description.binding().name()),
        quote(description.primary_key().accessor().column()),
        placeholders.join(", ")
    );
    let params: Vec<SqlParam> = keys.iter().map(SqlParam::from).collect();
    debug!(sql = %sql, "Deleting rows");
    Ok(conn.execute(&sql, rusqlite::params_from_iter(params.iter()))?)
}

impl SqliteBackend {
    /// Backend-form primary keys of the query's matches.
    fn matching_keys(
        &self,
        ctx: &ExecutionContext<'_>,
        query: &Query,
    ) -> StorageResult<Vec<Value>> {
        let keys = SelectBuilder::new(query.registry(), query.resource())
            .filters(query.filters())?
            .build_keys();
        self.with_connection(ctx, |conn| query_scalar_column(conn, &keys))
    }

    /// The backend-form key of the query's single match.
    fn single_key(&self, ctx: &ExecutionContext<'_>, query: &Query) -> StorageResult<Value> {
        let mut keys = self.matching_keys(ctx, query)?;
        match keys.len() {
            0 => Err(not_found(query.resource())),
            1 => Ok(keys.remove(0)),
            _ => Err(StorageError::invalid_query("multiple resources found")),
        }
    }

    /// Checks that `resources` are exactly the query's matches among their
    /// own keys, returning those keys.
    fn checked_keys(
        &self,
        ctx: &ExecutionContext<'_>,
        query: &Query,
        resources: &[Resource],
    ) -> StorageResult<Vec<Value>> {
        let pk = query.resource().primary_key();
        let keys = resources
            .iter()
            .map(|r| pk.validate_for_backend(r.primary_key()).map_err(Into::into))
            .collect::<StorageResult<Vec<_>>>()?;
        let select = SelectBuilder::new(query.registry(), query.resource())
            .filters(query.filters())?
            .primary_keys(&keys)
            .build_keys();
        let matched = self.with_connection(ctx, |conn| query_scalar_column(conn, &select))?;
        if matched.len() != resources.len() {
            return Err(QueryError::CardinalityMismatch {
                expected: resources.len(),
                actual: matched.len(),
            }
            .into());
        }
        Ok(keys)
    }

    fn load(
        &self,
        ctx: &ExecutionContext<'_>,
        query: &Query,
        key: &Value,
    ) -> StorageResult<Resource> {
        let select = SelectBuilder::new(query.registry(), query.resource())
            .primary_keys(std::slice::from_ref(key))
            .build_select(Some(Slice::new(0, 1)));
        self.with_connection(ctx, |conn| query_resources(conn, &select, query.resource()))?
            .pop()
            .ok_or_else(|| not_found(query.resource()))
    }
}

#[async_trait]
impl QueryBackend for SqliteBackend {
    fn backend_name(&self) -> &str {
        "sqlite"
    }

    async fn get(
        &self,
        ctx: &ExecutionContext<'_>,
        query: &Query,
        primary_key: &Value,
    ) -> StorageResult<Resource> {
        ctx.transactions
            .scope(|| async {
                let description = query.resource();
                let key = description.primary_key().validate_for_backend(primary_key)?;
                let select = SelectBuilder::new(query.registry(), description)
                    .filters(query.filters())?
                    .primary_keys(&[key])
                    .build_select(Some(Slice::new(0, 1)));
                let mut resource = self
                    .with_connection(ctx, |conn| query_resources(conn, &select, description))?
                    .pop()
                    .ok_or_else(|| not_found(description))?;
                apply_with_relations(ctx, query, std::slice::from_mut(&mut resource)).await?;
                Ok(resource)
            })
            .await
    }

    async fn one(&self, ctx: &ExecutionContext<'_>, query: &Query) -> StorageResult<Resource> {
        ctx.transactions
            .scope(|| async {
                let description = query.resource();
                let select = SelectBuilder::new(query.registry(), description)
                    .filters(query.filters())?
                    .order_bys(query.order_bys())?
                    .build_select(Some(Slice::new(0, 2)));
                let mut resources =
                    self.with_connection(ctx, |conn| query_resources(conn, &select, description))?;
                if resources.len() > 1 {
                    return Err(StorageError::invalid_query("multiple resources found"));
                }
                let mut resource = resources.pop().ok_or_else(|| not_found(description))?;
                apply_with_relations(ctx, query, std::slice::from_mut(&mut resource)).await?;
                Ok(resource)
            })
            .await
    }

    async fn all(&self, ctx: &ExecutionContext<'_>, query: &Query) -> StorageResult<Collection> {
        ctx.transactions
            .scope(|| async {
                let description = query.resource();
                let slice = query.bounded_slice()?;
                let builder = SelectBuilder::new(query.registry(), description)
                    .filters(query.filters())?
                    .order_bys(query.order_bys())?;
                let select = builder.build_select(Some(slice));
                let total = builder.build_count();
                let (mut results, total_count) = self.with_connection(ctx, |conn| {
                    Ok((
                        query_resources(conn, &select, description)?,
                        count(conn, &total)?,
                    ))
                })?;
                apply_with_relations(ctx, query, &mut results).await?;
                debug!(
                    resource = description.name(),
                    returned = results.len(),
                    total = total_count,
                    "Loaded collection"
                );
                Ok(Collection::new(results, total_count))
            })
            .await
    }

    async fn create(
        &self,
        ctx: &ExecutionContext<'_>,
        query: &Query,
        resource: Resource,
    ) -> StorageResult<Resource> {
        if !query.is_empty() {
            return Err(QueryError::CreateQueryNotEmpty.into());
        }
        ctx.transactions
            .scope(|| async {
                self.with_connection(ctx, |conn| insert(conn, query.resource(), &resource))
            })
            .await
    }

    async fn update(
        &self,
        ctx: &ExecutionContext<'_>,
        query: &Query,
        resource: Resource,
    ) -> StorageResult<Resource> {
        ctx.transactions
            .scope(|| async {
                let key = self.single_key(ctx, query)?;
                self.with_connection(ctx, |conn| update(conn, query.resource(), &key, &resource))?;
                self.load(ctx, query, &key)
            })
            .await
    }

    async fn delete(&self, ctx: &ExecutionContext<'_>, query: &Query) -> StorageResult<()> {
        ctx.transactions
            .scope(|| async {
                let key = self.single_key(ctx, query)?;
                self.with_connection(ctx, |conn| delete(conn, query.resource(), &[key]))?;
                Ok(())
            })
            .await
    }

    async fn bulk_create(
        &self,
        ctx: &ExecutionContext<'_>,
        query: &Query,
        resources: Vec<Resource>,
    ) -> StorageResult<Vec<Resource>> {
        if !query.is_empty() {
            return Err(QueryError::CreateQueryNotEmpty.into());
        }
        ctx.transactions
            .scope(|| async {
                self.with_connection(ctx, |conn| {
                    resources
                        .iter()
                        .map(|r| insert(conn, query.resource(), r))
                        .collect()
                })
            })
            .await
    }

    async fn bulk_update(
        &self,
        ctx: &ExecutionContext<'_>,
        query: &Query,
        resources: Vec<Resource>,
    ) -> StorageResult<Vec<Resource>> {
        ctx.transactions
            .scope(|| async {
                let keys = self.checked_keys(ctx, query, &resources)?;
                self.with_connection(ctx, |conn| {
                    for (key, resource) in keys.iter().zip(&resources) {
                        update(conn, query.resource(), key, resource)?;
                    }
                    Ok(())
                })?;
                keys.iter().map(|key| self.load(ctx, query, key)).collect()
            })
            .await
    }

    async fn bulk_delete(
        &self,
        ctx: &ExecutionContext<'_>,
        query: &Query,
        resources: &[Resource],
    ) -> StorageResult<()> {
        ctx.transactions
            .scope(|| async {
                let keys = self.checked_keys(ctx, query, resources)?;
                self.with_connection(ctx, |conn| delete(conn, query.resource(), &keys))?;
                Ok(())
            })
            .await
    }

    async fn fetch_related(
        &self,
        ctx: &ExecutionContext<'_>,
        relation: &RelatedField,
        keys: &[Value],
    ) -> StorageResult<RelatedRows> {
        let target = ctx.registry.resource(relation.target())?.clone();
        let owner = ctx.registry.resource(relation.owner())?.clone();
        let table = quote(target.binding().name());
        let target_pk = quote(target.primary_key().accessor().column());
        let placeholders: Vec<String> = (1..=keys.len()).map(|i| format!("?{}", i)).collect();
        let placeholders = placeholders.join(", ");

        let (sql, key_column) = match relation.kind() {
            RelationKind::ForeignKey | RelationKind::OneToOne => (
                format!(
                    "SELECT t.* FROM {table} AS t WHERE t.{target_pk} IN ({placeholders}) \
                     ORDER BY t.{target_pk}"
                ),
                target.primary_key().accessor().column().to_string(),
            ),
            RelationKind::ReverseForeignKey | RelationKind::ReverseOneToOne => {
                let column = relation.key_column().unwrap_or_default();
                (
                    format!(
                        "SELECT t.* FROM {table} AS t WHERE t.{col} IN ({placeholders}) \
                         ORDER BY t.{target_pk}",
                        col = quote(column)
                    ),
                    column.to_string(),
                )
            }
            RelationKind::ManyToMany(through) => (
                format!(
                    "SELECT t.*, j.{source} AS {owner_key} FROM {table} AS t \
                     JOIN {link} AS j ON j.{target_col} = t.{target_pk} \
                     WHERE j.{source} IN ({placeholders}) ORDER BY t.{target_pk}",
                    source = quote(&through.source_column),
                    owner_key = quote(OWNER_KEY_COLUMN),
                    link = quote(&through.table),
                    target_col = quote(&through.target_column),
                ),
                OWNER_KEY_COLUMN.to_string(),
            ),
        };
        debug!(
            relation = relation.name(),
            owner = owner.name(),
            target = target.name(),
            "Fetching related rows"
        );
        let fragment = SqlFragment::with_params(sql, keys.iter().map(SqlParam::from).collect());

        ctx.transactions
            .scope(|| async {
                let rows = self.with_connection(ctx, |conn| {
                    query_rows(conn, &fragment, &json_columns(&target))
                })?;
                rows.into_iter()
                    .map(|mut row| {
                        let key = if key_column == OWNER_KEY_COLUMN {
                            row.remove(OWNER_KEY_COLUMN)
                        } else {
                            row.get(&key_column).cloned()
                        }
                        .unwrap_or(Value::Null);
                        Ok((key, Resource::from_row(target.clone(), &row, &[])?))
                    })
                    .collect()
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TransactionManager;
    use crate::query::BackendMap;
    use crate::resource::Related;
    use crate::schema::{Field, ResourceBuilder, SchemaRegistry};

    const DDL: &str = "
        CREATE TABLE topics (id INTEGER PRIMARY KEY, title TEXT NOT NULL);
        CREATE TABLE chats (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            topic_id INTEGER REFERENCES topics(id),
            meta TEXT,
            tags TEXT
        );
    ";

    struct Fixture {
        registry: Arc<SchemaRegistry>,
        backends: BackendMap,
        transactions: TransactionManager,
    }

    impl Fixture {
        fn new() -> Self {
            let registry = SchemaRegistry::builder()
                .resource(
                    ResourceBuilder::new("topics")
                        .field(Field::integer("id").primary_key())
                        .field(Field::string("title")),
                )
                .resource(
                    ResourceBuilder::new("chats")
                        .field(Field::integer("id").primary_key())
                        .field(Field::string("name"))
                        .field(Field::string("city").attname("meta.city").nullable())
                        .field(Field::list("tags", Field::string("tag")).nullable())
                        .related(
                            RelatedField::foreign_key("topic", "topics")
                                .nullable()
                                .backref("chats"),
                        ),
                )
                .build()
                .unwrap();
            let backend = Arc::new(SqliteBackend::in_memory().unwrap());
            backend.init_schema(DDL).unwrap();
            let backend: Arc<dyn QueryBackend> = backend;
            Self {
                registry: Arc::new(registry),
                backends: BackendMap::new()
                    .with("topics", backend.clone())
                    .with("chats", backend),
                transactions: TransactionManager::new(),
            }
        }

        fn ctx(&self) -> ExecutionContext<'_> {
            ExecutionContext::new(&self.registry, &self.transactions, &self.backends)
        }

        fn query(&self, resource: &str, params: &[(&str, &str)]) -> Query {
            let params: Vec<(String, String)> = params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            Query::for_resource(self.registry.clone(), resource)
                .unwrap()
                .parse(&params)
                .unwrap()
        }

        fn backend(&self) -> &Arc<dyn QueryBackend> {
            self.backends.get("chats").unwrap()
        }

        fn resource(&self, name: &str) -> Resource {
            Resource::new(self.registry.resource(name).unwrap().clone())
        }

        async fn seed(&self) {
            let ctx = self.ctx();
            let backend = self.backend();
            let web = backend
                .create(
                    &ctx,
                    &self.query("topics", &[]),
                    self.resource("topics").with("title", "Web"),
                )
                .await
                .unwrap();
            backend
                .create(
                    &ctx,
                    &self.query("topics", &[]),
                    self.resource("topics").with("title", "Ops"),
                )
                .await
                .unwrap();
            for (name, city, tags) in [
                ("alpha", "Boston", vec!["rust", "sql"]),
                ("beta", "Denver", vec!["go"]),
                ("gamma", "Boston", vec![]),
            ] {
                let tags: Vec<Value> = tags.into_iter().map(Value::from).collect();
                let chat = self
                    .resource("chats")
                    .with("name", name)
                    .with("city", city)
                    .with("tags", tags)
                    .with(
                        "topic_id",
                        if name == "gamma" {
                            Value::Null
                        } else {
                            web.primary_key().clone()
                        },
                    );
                backend
                    .create(&ctx, &self.query("chats", &[]), chat)
                    .await
                    .unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let fixture = Fixture::new();
        fixture.seed().await;
        let ctx = fixture.ctx();
        let backend = fixture.backend();

        let chat = backend
            .get(&ctx, &fixture.query("chats", &[]), &Value::Int(1))
            .await
            .unwrap();
        assert_eq!(chat.get("name"), &Value::from("alpha"));
        assert_eq!(chat.get("city"), &Value::from("Boston"));
        assert_eq!(
            chat.get("tags"),
            &Value::List(vec![Value::from("rust"), Value::from("sql")])
        );

        let err = backend
            .get(&ctx, &fixture.query("chats", &[("name", "beta")]), &Value::Int(1))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "chats resource not found");
        assert!(!fixture.transactions.is_active());
    }

    #[tokio::test]
    async fn test_all_filters_order_and_count() {
        let fixture = Fixture::new();
        fixture.seed().await;
        let ctx = fixture.ctx();
        let backend = fixture.backend();

        let query = fixture.query(
            "chats",
            &[("city", "Boston"), ("order_by", "name__desc"), ("slice", "0,1")],
        );
        let page = backend.all(&ctx, &query).await.unwrap();
        assert_eq!(page.total_count, 2);
        assert_eq!(page.len(), 1);
        assert_eq!(page.results[0].get("name"), &Value::from("gamma"));

        let query = fixture.query("chats", &[("topic__title__iexact", "web")]);
        assert_eq!(backend.all(&ctx, &query).await.unwrap().total_count, 2);

        let query = fixture.query("chats", &[("tags__contains", "rust")]);
        let page = backend.all(&ctx, &query).await.unwrap();
        assert_eq!(page.total_count, 1);
        assert_eq!(page.results[0].get("name"), &Value::from("alpha"));

        let query = fixture.query("chats", &[("topic__isnull", "true")]);
        assert_eq!(backend.all(&ctx, &query).await.unwrap().total_count, 1);

        let query = fixture.query("chats", &[("name__startswith", "a"), ("id__in", "1,2")]);
        assert_eq!(backend.all(&ctx, &query).await.unwrap().total_count, 1);
    }

    #[tokio::test]
    async fn test_reverse_relation_filter_is_distinct() {
        let fixture = Fixture::new();
        fixture.seed().await;
        let ctx = fixture.ctx();
        let query = fixture.query("topics", &[("chats__city", "Boston")]);
        let page = fixture.backend().all(&ctx, &query).await.unwrap();
        assert_eq!(page.total_count, 1);
        assert_eq!(page.results.len(), 1);
    }

    #[tokio::test]
    async fn test_with_relations() {
        let fixture = Fixture::new();
        fixture.seed().await;
        let ctx = fixture.ctx();
        let backend = fixture.backend();

        let query = fixture.query("chats", &[("with", "topic")]);
        let page = backend.all(&ctx, &query).await.unwrap();
        let topic = page.results[0].related("topic").unwrap().resources();
        assert_eq!(topic[0].get("title"), &Value::from("Web"));
        assert_eq!(page.results[2].related("topic"), Some(&Related::One(None)));

        let query = fixture.query("topics", &[("with", "chats")]);
        let page = backend.all(&ctx, &query).await.unwrap();
        assert_eq!(page.results[0].related("chats").unwrap().resources().len(), 2);
        assert_eq!(page.results[1].related("chats"), Some(&Related::Many(Vec::new())));
    }

    #[tokio::test]
    async fn test_one_update_delete() {
        let fixture = Fixture::new();
        fixture.seed().await;
        let ctx = fixture.ctx();
        let backend = fixture.backend();

        let err = backend
            .one(&ctx, &fixture.query("chats", &[("city", "Boston")]))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "multiple resources found");

        let query = fixture.query("chats", &[("id", "2")]);
        let mut chat = backend.one(&ctx, &query).await.unwrap();
        chat.set("name", "beta2");
        let updated = backend.update(&ctx, &query, chat).await.unwrap();
        assert_eq!(updated.get("name"), &Value::from("beta2"));
        assert_eq!(updated.get("city"), &Value::from("Denver"));

        backend.delete(&ctx, &query).await.unwrap();
        let err = backend.one(&ctx, &query).await.unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn test_create_rules() {
        let fixture = Fixture::new();
        let ctx = fixture.ctx();
        let backend = fixture.backend();

        let err = backend
            .create(
                &ctx,
                &fixture.query("topics", &[("title", "x")]),
                fixture.resource("topics").with("title", "Web"),
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "create query must be empty");

        let err = backend
            .create(
                &ctx,
                &fixture.query("chats", &[]),
                fixture.resource("chats").with("name", "x").with("topic_id", 99),
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid data");
        assert_eq!(
            backend.all(&ctx, &fixture.query("chats", &[])).await.unwrap().total_count,
            0
        );
    }

    #[tokio::test]
    async fn test_bulk_operations() {
        let fixture = Fixture::new();
        fixture.seed().await;
        let ctx = fixture.ctx();
        let backend = fixture.backend();

        let boston = fixture.query("chats", &[("city", "Boston")]);
        let mut chats = backend.all(&ctx, &boston).await.unwrap().results;
        for chat in &mut chats {
            chat.set("name", "renamed");
        }
        let updated = backend.bulk_update(&ctx, &boston, chats).await.unwrap();
        assert!(updated.iter().all(|c| c.get("name") == &Value::from("renamed")));

        let denver = backend
            .all(&ctx, &fixture.query("chats", &[("city", "Denver")]))
            .await
            .unwrap()
            .results;
        let err = backend.bulk_delete(&ctx, &boston, &denver).await.unwrap_err();
        assert_eq!(err.to_string(), "resources provided does not match filter results");

        let created = backend
            .bulk_create(
                &ctx,
                &fixture.query("topics", &[]),
                vec![
                    fixture.resource("topics").with("title", "A"),
                    fixture.resource("topics").with("title", "B"),
                ],
            )
            .await
            .unwrap();
        assert_eq!(created.len(), 2);
        backend
            .bulk_delete(&ctx, &fixture.query("topics", &[("title__in", "A,B")]), &created)
            .await
            .unwrap();
        assert_eq!(
            backend.all(&ctx, &fixture.query("topics", &[])).await.unwrap().total_count,
            2
        );
    }

    #[tokio::test]
    async fn test_outer_scope_rollback() {
        let fixture = Fixture::new();
        let ctx = fixture.ctx();
        let backend = fixture.backend();

        fixture.transactions.begin();
        backend
            .create(
                &ctx,
                &fixture.query("topics", &[]),
                fixture.resource("topics").with("title", "Web"),
            )
            .await
            .unwrap();
        fixture.transactions.rollback().await.unwrap();

        assert_eq!(
            backend.all(&ctx, &fixture.query("topics", &[])).await.unwrap().total_count,
            0
        );
    }
}
