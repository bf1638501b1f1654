//! [`QueryBackend`] implementation for the search backend.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value as JsonValue, json};
use tracing::debug;

use crate::error::{BackendError, QueryError, ResourceError, StorageError, StorageResult};
use crate::path::Operator;
use crate::query::{ExecutionContext, Query, QueryBackend, RelatedRows, apply_with_relations};
use crate::resource::{Collection, Resource};
use crate::schema::{Facet, FacetView, RelatedField, RelationKind, ResourceDescription};
use crate::types::Slice;
use crate::value::Value;

use super::SearchBackend;
use super::query_builder::{SearchRequestBuilder, search_field_name};

type Row = BTreeMap<String, Value>;

fn malformed(message: impl Into<String>) -> StorageError {
    BackendError::QueryFailed {
        message: format!("malformed search response: {}", message.into()),
    }
    .into()
}

/// Source documents of a response, the primary key filled from `_id` when
/// the source omits it.
fn hit_rows(response: &JsonValue, description: &ResourceDescription) -> StorageResult<Vec<Row>> {
    let hits = response
        .pointer("/hits/hits")
        .and_then(JsonValue::as_array)
        .ok_or_else(|| malformed("missing hits"))?;
    let pk = description.primary_key();
    hits.iter()
        .map(|hit| {
            let mut row: Row = match hit.get("_source") {
                Some(JsonValue::Object(source)) => source
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from(v.clone())))
                    .collect(),
                _ => Row::new(),
            };
            if pk.accessor().get(&row).is_none_or(Value::is_null)
                && let Some(id) = hit.get("_id")
            {
                pk.accessor().set(&mut row, Value::from(id.clone()));
            }
            Ok(row)
        })
        .collect()
}

fn to_resources(
    rows: &[Row],
    description: &Arc<ResourceDescription>,
) -> StorageResult<Vec<Resource>> {
    rows.iter()
        .map(|row| Resource::from_row(description.clone(), row, &[]))
        .collect()
}

/// `hits.total` in either its object or its legacy numeric form.
fn total_hits(response: &JsonValue) -> u64 {
    match response.pointer("/hits/total") {
        Some(JsonValue::Object(total)) => {
            total.get("value").and_then(JsonValue::as_u64).unwrap_or(0)
        }
        Some(total) => total.as_u64().unwrap_or(0),
        None => 0,
    }
}

/// Operand tokens of the current filters on `facet`'s path.
fn enabled_tokens(query: &Query, facet: &Facet) -> Vec<String> {
    let operator = match facet {
        Facet::Terms(_) => Operator::In,
        Facet::Range(_) => Operator::Ranges,
    };
    query
        .filters()
        .iter()
        .filter(|f| f.operator() == operator && f.path_name() == facet.field())
        .flat_map(|f| f.operation().raw_operands().iter().cloned())
        .collect()
}

fn bucket_key(bucket: &JsonValue) -> Option<String> {
    match bucket.get("key_as_string").or_else(|| bucket.get("key"))? {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Null => None,
        other => Some(other.to_string()),
    }
}

fn doc_count(bucket: &JsonValue) -> u64 {
    bucket.get("doc_count").and_then(JsonValue::as_u64).unwrap_or(0)
}

/// One view per declared facet present in the response aggregations.
pub(crate) fn facet_views(query: &Query, response: &JsonValue) -> Vec<FacetView> {
    let Some(aggregations) = response.get("aggregations") else {
        return Vec::new();
    };
    query
        .resource()
        .facets()
        .iter()
        .filter_map(|facet| {
            let buckets = aggregations.get(facet.name())?.get("buckets")?;
            let current = enabled_tokens(query, facet);
            let view = match facet {
                Facet::Terms(terms) => {
                    let items: Vec<(String, u64)> = buckets
                        .as_array()?
                        .iter()
                        .filter_map(|b| Some((bucket_key(b)?, doc_count(b))))
                        .collect();
                    terms.view(&current, &items)
                }
                Facet::Range(range) => {
                    // Buckets come back as an array carrying our keys, or keyed.
                    let counts: Vec<u64> = range
                        .ranges()
                        .iter()
                        .enumerate()
                        .map(|(i, r)| {
                            let token = r.token();
                            match buckets {
                                JsonValue::Object(keyed) => keyed.get(&token).map(doc_count),
                                JsonValue::Array(items) => items
                                    .iter()
                                    .find(|b| bucket_key(b).as_deref() == Some(token.as_str()))
                                    .or_else(|| items.get(i))
                                    .map(doc_count),
                                _ => None,
                            }
                            .unwrap_or(0)
                        })
                        .collect();
                    range.view(&current, &counts)
                }
            };
            Some(view)
        })
        .collect()
}

impl SearchBackend {
    fn check_window(&self, slice: Slice) -> StorageResult<()> {
        let window = self.config().max_result_window;
        if slice.stop > window {
            return Err(QueryError::MaxLimitExceeded {
                requested: slice.stop,
                limit: window,
            }
            .into());
        }
        Ok(())
    }

    fn builder<'a>(&self, query: &'a Query) -> SearchRequestBuilder<'a> {
        SearchRequestBuilder::new(query).track_total_hits(self.config().track_total_hits)
    }

    async fn run(
        &self,
        query: &Query,
        builder: SearchRequestBuilder<'_>,
        slice: Slice,
        facets: bool,
    ) -> StorageResult<(Vec<Resource>, JsonValue)> {
        let description = query.resource();
        let body = builder.build(slice, facets)?;
        let response = self.search(description, body).await?;
        let rows = hit_rows(&response, description)?;
        Ok((to_resources(&rows, description)?, response))
    }

    async fn single(
        &self,
        ctx: &ExecutionContext<'_>,
        query: &Query,
        builder: SearchRequestBuilder<'_>,
    ) -> StorageResult<Resource> {
        let description = query.resource();
        let (mut resources, _) = self.run(query, builder, Slice::new(0, 2), false).await?;
        if resources.len() > 1 {
            return Err(StorageError::invalid_query("multiple resources found"));
        }
        let mut resource = resources.pop().ok_or_else(|| {
            StorageError::from(ResourceError::NotFound {
                resource_name: description.name().to_string(),
            })
        })?;
        apply_with_relations(ctx, query, std::slice::from_mut(&mut resource)).await?;
        Ok(resource)
    }
}

#[async_trait]
impl QueryBackend for SearchBackend {
    fn backend_name(&self) -> &str {
        "search"
    }

    async fn get(
        &self,
        ctx: &ExecutionContext<'_>,
        query: &Query,
        primary_key: &Value,
    ) -> StorageResult<Resource> {
        let pk = query.resource().primary_key();
        let key = pk.validate_for_backend(primary_key)?;
        let clause = json!({"term": { search_field_name(&[], pk, None): key.to_json() }});
        self.single(ctx, query, self.builder(query).filter_clause(clause))
            .await
    }

    async fn one(&self, ctx: &ExecutionContext<'_>, query: &Query) -> StorageResult<Resource> {
        self.single(ctx, query, self.builder(query)).await
    }

    async fn all(&self, ctx: &ExecutionContext<'_>, query: &Query) -> StorageResult<Collection> {
        let slice = query.bounded_slice()?;
        self.check_window(slice)?;
        let (mut results, response) = self.run(query, self.builder(query), slice, true).await?;
        apply_with_relations(ctx, query, &mut results).await?;

        let mut collection = Collection::new(results, total_hits(&response));
        collection.facets = facet_views(query, &response);
        debug!(
            resource = query.resource().name(),
            returned = collection.len(),
            total = collection.total_count,
            facets = collection.facets.len(),
            "Loaded search collection"
        );
        Ok(collection)
    }

    async fn fetch_related(
        &self,
        ctx: &ExecutionContext<'_>,
        relation: &RelatedField,
        keys: &[Value],
    ) -> StorageResult<RelatedRows> {
        let target = ctx.registry.resource(relation.target())?.clone();
        let key_column = match relation.kind() {
            RelationKind::ForeignKey | RelationKind::OneToOne => {
                target.primary_key().accessor().path()
            }
            RelationKind::ReverseForeignKey | RelationKind::ReverseOneToOne => relation
                .key_column()
                .map(str::to_string)
                .ok_or_else(|| StorageError::invalid_query("relation has no key column"))?,
            RelationKind::ManyToMany(_) => return Err(self.unsupported("many_to_many")),
        };

        let terms: Vec<JsonValue> = keys.iter().map(Value::to_json).collect();
        let body = json!({
            "query": {"bool": {"filter": [{"terms": { key_column.as_str(): terms }}]}},
            "size": self.config().max_result_window,
        });
        let response = self.search(&target, body).await?;
        let rows = hit_rows(&response, &target)?;

        rows.iter()
            .map(|row| {
                let owner = row.get(&key_column).cloned().unwrap_or(Value::Null);
                Ok((owner, Resource::from_row(target.clone(), row, &[])?))
            })
            .collect()
    }
}
