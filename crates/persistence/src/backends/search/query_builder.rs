//! Compiles a [`Query`] into a search request body.
//!
//! ```json
//! {
//!   "query": {"bool": {"must": {"match": {"bio": "rust"}}, "filter": [...]}},
//!   "sort": [{"name.raw": {"order": "asc"}}],
//!   "from": 0, "size": 20, "track_total_hits": true,
//!   "aggs": {"f_skills": {"terms": {"field": "skills.name.raw", "size": 10}}}
//! }
//! ```

use serde_json::{Map, Value as JsonValue, json};

use crate::error::{QueryError, StorageError, StorageResult};
use crate::path::{Filter, Hop, Operator, PATH_DELIMITER, resolve};
use crate::query::Query;
use crate::schema::datetime::parse_datetime;
use crate::schema::{Facet, Field, FieldKind, QueryKind, RangeFacet};
use crate::types::{Slice, SortDirection};
use crate::value::{Value, format_datetime};

/// Separator of search index field paths.
pub const FIELD_DELIMITER: &str = ".";

/// Builds search request bodies for one query.
#[derive(Debug)]
pub struct SearchRequestBuilder<'a> {
    query: &'a Query,
    track_total_hits: bool,
    extra_filters: Vec<JsonValue>,
}

impl<'a> SearchRequestBuilder<'a> {
    /// Starts a builder over `query`.
    pub fn new(query: &'a Query) -> Self {
        Self {
            query,
            track_total_hits: true,
            extra_filters: Vec::new(),
        }
    }

    /// Whether to request an exact total.
    pub fn track_total_hits(mut self, track: bool) -> Self {
        self.track_total_hits = track;
        self
    }

    /// Adds a raw filter clause.
    pub fn filter_clause(mut self, clause: JsonValue) -> Self {
        self.extra_filters.push(clause);
        self
    }

    /// The request body for the window `slice`, facets included when `facets` is set.
    pub fn build(&self, slice: Slice, facets: bool) -> StorageResult<JsonValue> {
        let mut body = Map::new();
        body.insert("query".to_string(), self.build_query()?);
        let sort = self.build_sort();
        if !sort.is_empty() {
            body.insert("sort".to_string(), JsonValue::Array(sort));
        }
        body.insert("from".to_string(), json!(slice.start));
        body.insert("size".to_string(), json!(slice.width()));
        body.insert("track_total_hits".to_string(), json!(self.track_total_hits));
        if facets {
            let aggs = self.build_aggs()?;
            if !aggs.is_empty() {
                body.insert("aggs".to_string(), JsonValue::Object(aggs));
            }
        }
        Ok(JsonValue::Object(body))
    }

    /// The `query` clause: full-text matches from query fields, structured
    /// clauses from every other filter.
    pub fn build_query(&self) -> StorageResult<JsonValue> {
        let mut text = Vec::new();
        let mut structured = self.extra_filters.clone();
        for filter in self.query.filters() {
            match filter.target().kind() {
                FieldKind::Query(kind) => text.push(text_clause(filter, kind)?),
                _ => structured.push(filter_clause(filter)?),
            }
        }

        let text_query = match text.len() {
            0 => json!({"match_all": {}}),
            1 => text.remove(0),
            _ => json!({"bool": {"must": text}}),
        };
        if structured.is_empty() {
            return Ok(text_query);
        }
        Ok(json!({"bool": {"must": text_query, "filter": structured}}))
    }

    /// Sort entries; fields without a sort extension are not sortable and skipped.
    pub fn build_sort(&self) -> Vec<JsonValue> {
        self.query
            .order_bys()
            .iter()
            .filter_map(|order_by| {
                let ext = order_by.target().sort_extension()?;
                let name = search_field_name(order_by.hops(), order_by.target(), Some(ext));
                let order = match order_by.direction() {
                    SortDirection::Ascending => "asc",
                    SortDirection::Descending => "desc",
                };
                Some(json!({ name: {"order": order} }))
            })
            .collect()
    }

    /// One aggregation per declared facet.
    pub fn build_aggs(&self) -> StorageResult<Map<String, JsonValue>> {
        let mut aggs = Map::new();
        for facet in self.query.resource().facets() {
            let field = facet_search_field(self.query, facet)?;
            let agg = match facet {
                Facet::Terms(terms) => {
                    let size = terms.size_for(|name| self.query.options().get(name));
                    json!({"terms": {"field": field, "size": size}})
                }
                Facet::Range(range) => range_agg(range, &field)?,
            };
            aggs.insert(facet.name().to_string(), agg);
        }
        Ok(aggs)
    }
}

/// Index field addressed by a resolved path: hop names (embedded hops by
/// their backend path), then the target's backend path and `ext`.
pub fn search_field_name(hops: &[Hop], target: &Field, ext: Option<&str>) -> String {
    let mut parts: Vec<String> = hops
        .iter()
        .map(|hop| match hop {
            Hop::Relation(relation) => relation.name().to_string(),
            Hop::Embedded(field) => field.accessor().path(),
        })
        .collect();
    parts.push(target.accessor().path());
    let mut name = parts.join(FIELD_DELIMITER);
    if let Some(ext) = ext {
        name.push_str(ext);
    }
    name
}

/// Index field aggregated by `facet`.
pub fn facet_search_field(query: &Query, facet: &Facet) -> StorageResult<String> {
    let explicit = match facet {
        Facet::Terms(f) => f.explicit_search_field(),
        Facet::Range(f) => f.explicit_search_field(),
    };
    if let Some(field) = explicit {
        return Ok(field.to_string());
    }
    let invalid = || QueryError::Invalid {
        message: format!("invalid facet field '{}'", facet.field()),
    };
    let segments: Vec<&str> = facet.field().split(PATH_DELIMITER).collect();
    let resolved = resolve(query.registry(), query.resource(), &segments, &invalid)?;
    Ok(search_field_name(
        &resolved.hops,
        &resolved.target,
        resolved.target.filter_extension(),
    ))
}

fn text_clause(filter: &Filter, kind: &QueryKind) -> StorageResult<JsonValue> {
    if filter.operator() != Operator::Eq {
        return Err(StorageError::invalid_query(format!(
            "query field '{}' only supports eq",
            filter.target().name()
        )));
    }
    let text = filter.operation().operand().to_json();
    Ok(match kind {
        QueryKind::Match { search_field } => json!({"match": { search_field.as_str(): text }}),
        QueryKind::MultiMatch { search_fields } => {
            json!({"multi_match": {"query": text, "fields": search_fields}})
        }
    })
}

fn element_field(target: &Field) -> &Field {
    match target.kind() {
        FieldKind::List(inner) => inner,
        _ => target,
    }
}

/// The structured clause for one filter.
pub fn filter_clause(filter: &Filter) -> StorageResult<JsonValue> {
    let target = filter.target();
    let element = element_field(target);
    let operation = filter.operation();
    let operands: Vec<JsonValue> = operation
        .map_operands(|v| element.validate_for_backend(v).map_err(Into::into))?
        .iter()
        .map(Value::to_json)
        .collect();
    let field = search_field_name(filter.hops(), target, target.filter_extension());
    let first = operands.first().cloned().unwrap_or(JsonValue::Null);
    let is_list = matches!(target.kind(), FieldKind::List(_));

    let clause = match operation.operator() {
        Operator::Eq | Operator::Exact if first.is_null() => missing(&field),
        Operator::Eq | Operator::Exact => json!({"term": { field.as_str(): first }}),
        Operator::IExact => {
            json!({"term": { field.as_str(): {"value": first, "case_insensitive": true} }})
        }
        Operator::Gt => json!({"range": { field.as_str(): {"gt": first} }}),
        Operator::Gte => json!({"range": { field.as_str(): {"gte": first} }}),
        Operator::Lt => json!({"range": { field.as_str(): {"lt": first} }}),
        Operator::Lte => json!({"range": { field.as_str(): {"lte": first} }}),
        Operator::In => json!({"terms": { field.as_str(): operands }}),
        Operator::Contains => {
            let clauses: Vec<JsonValue> = operands
                .iter()
                .map(|operand| {
                    if is_list {
                        json!({"term": { field.as_str(): operand }})
                    } else {
                        let pattern = format!("*{}*", wildcard_text(operand));
                        json!({"wildcard": { field.as_str(): pattern }})
                    }
                })
                .collect();
            json!({"bool": {"filter": clauses}})
        }
        Operator::StartsWith => json!({"prefix": { field.as_str(): first }}),
        Operator::IStartsWith => {
            json!({"prefix": { field.as_str(): {"value": first, "case_insensitive": true} }})
        }
        Operator::EndsWith => {
            json!({"wildcard": { field.as_str(): format!("*{}", wildcard_text(&first)) }})
        }
        Operator::IEndsWith => json!({"wildcard": { field.as_str(): {
            "value": format!("*{}", wildcard_text(&first)),
            "case_insensitive": true
        } }}),
        Operator::Range => match operands.as_slice() {
            [start, end] => range_clause(&field, start, end),
            _ => {
                return Err(StorageError::invalid_query(format!(
                    "invalid range '{}'",
                    filter.name()
                )));
            }
        },
        Operator::Ranges => {
            let should: Vec<JsonValue> = operands
                .iter()
                .filter_map(|range| match range.as_array().map(Vec::as_slice) {
                    Some([start, end]) => Some(range_clause(&field, start, end)),
                    _ => None,
                })
                .collect();
            json!({"bool": {"should": should, "minimum_should_match": 1}})
        }
        Operator::IsNull if first.as_bool() == Some(true) => missing(&field),
        Operator::IsNull => json!({"exists": {"field": field}}),
    };
    Ok(clause)
}

fn missing(field: &str) -> JsonValue {
    json!({"bool": {"must_not": {"exists": {"field": field}}}})
}

fn text_of(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Operand text with the wildcard metacharacters escaped.
fn wildcard_text(value: &JsonValue) -> String {
    let text = text_of(value);
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '*' | '?' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn range_clause(field: &str, start: &JsonValue, end: &JsonValue) -> JsonValue {
    let mut bounds = Map::new();
    if !start.is_null() {
        bounds.insert("gte".to_string(), start.clone());
    }
    if !end.is_null() {
        bounds.insert("lte".to_string(), end.clone());
    }
    json!({"range": { field: bounds }})
}

fn range_agg(facet: &RangeFacet, field: &str) -> StorageResult<JsonValue> {
    let mut ranges = Vec::with_capacity(facet.ranges().len());
    for range in facet.ranges() {
        let mut bucket = Map::new();
        bucket.insert("key".to_string(), json!(range.token()));
        if let Some(start) = &range.start {
            bucket.insert("from".to_string(), bound(facet, start)?);
        }
        if let Some(end) = &range.end {
            bucket.insert("to".to_string(), bound(facet, end)?);
        }
        ranges.push(JsonValue::Object(bucket));
    }
    let kind = if facet.is_dates() { "date_range" } else { "range" };
    Ok(json!({ kind: {"field": field, "ranges": ranges} }))
}

/// Numeric bounds go out as numbers; date bounds are resolved (relative
/// expressions included) at request time.
fn bound(facet: &RangeFacet, raw: &str) -> StorageResult<JsonValue> {
    if facet.is_dates() {
        let dt = parse_datetime(raw).ok_or_else(|| {
            StorageError::invalid_query(format!("invalid date bound '{}'", raw))
        })?;
        return Ok(json!(format_datetime(&dt)));
    }
    if let Ok(n) = raw.parse::<i64>() {
        return Ok(json!(n));
    }
    match raw.parse::<f64>() {
        Ok(f) => Ok(json!(f)),
        Err(_) => Ok(json!(raw)),
    }
}
