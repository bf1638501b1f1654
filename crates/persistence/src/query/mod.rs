//! The backend-agnostic query model.
//!
//! A [`Query`] accumulates parsed filters, orderings, relation expansions,
//! an optional slice and the resource's named options. Backends implementing
//! [`QueryBackend`] compile it into engine-specific requests.
//!
//! ```text
//! GET /chats?topic__title__istartswith=Web&order_by=created__desc&with=topic&slice=0,10
//! ```
//!
//! | Key | Meaning |
//! |-----|---------|
//! | `order_by` | comma separated [`OrderBy`] expressions |
//! | `slice` | `start,stop` |
//! | `with` | comma separated [`WithRelation`] expressions |
//! | declared option names | named options |
//! | anything else | a [`Filter`] |

mod backend;

pub use backend::{
    BackendMap, ExecutionContext, QueryBackend, RelatedRows, apply_with_relations, load_relation,
};

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{QueryError, StorageResult};
use crate::path::{Filter, OrderBy, WithRelation};
use crate::schema::{ResourceDescription, SchemaRegistry};
use crate::types::Slice;
use crate::value::Value;

/// Query-string key holding orderings.
pub const ORDER_BY_KEY: &str = "order_by";
/// Query-string key holding the slice.
pub const SLICE_KEY: &str = "slice";
/// Query-string key holding relation expansions.
pub const WITH_KEY: &str = "with";

const LIST_DELIMITER: char = ',';

/// Filters, orderings, expansions, slice and options over one resource type.
#[derive(Debug, Clone)]
pub struct Query {
    registry: Arc<SchemaRegistry>,
    resource: Arc<ResourceDescription>,
    filters: Vec<Filter>,
    trusted: Vec<Filter>,
    slice: Option<Slice>,
    order_bys: Vec<OrderBy>,
    with_relations: Vec<WithRelation>,
    options: BTreeMap<String, Value>,
}

impl Query {
    /// Creates an empty query with every declared option at its default.
    pub fn new(registry: Arc<SchemaRegistry>, resource: Arc<ResourceDescription>) -> Self {
        let options = resource
            .options()
            .iter()
            .map(|o| (o.name().to_string(), o.default().cloned().unwrap_or(Value::Null)))
            .collect();
        Self {
            registry,
            resource,
            filters: Vec::new(),
            trusted: Vec::new(),
            slice: None,
            order_bys: Vec::new(),
            with_relations: Vec::new(),
            options,
        }
    }

    /// Creates an empty query for the named resource.
    pub fn for_resource(registry: Arc<SchemaRegistry>, name: &str) -> StorageResult<Self> {
        let resource = registry.resource(name)?.clone();
        Ok(Self::new(registry, resource))
    }

    /// Parses query-string pairs. Reserved keys and declared option names are
    /// consumed first; every remaining key is a filter.
    pub fn parse(mut self, params: &[(String, String)]) -> StorageResult<Self> {
        let mut filters = Vec::new();
        for (key, value) in params {
            match key.as_str() {
                ORDER_BY_KEY => {
                    for expression in split_list(value) {
                        self = self.order_by(expression)?;
                    }
                }
                WITH_KEY => {
                    for expression in split_list(value) {
                        self = self.with_relation(expression)?;
                    }
                }
                SLICE_KEY => {
                    let slice: Slice = value.parse().map_err(|_| QueryError::InvalidSlice {
                        value: value.clone(),
                    })?;
                    self.slice = Some(slice);
                }
                name if self.resource.option(name).is_some() => {
                    self = self.option(name, value.as_str())?;
                }
                _ => filters.push((key, value)),
            }
        }
        for (key, value) in filters {
            self = self.filter(key, value.as_str())?;
        }
        Ok(self)
    }

    /// Adds a filter parsed from `path[__operator]`.
    pub fn filter(mut self, expression: &str, operand: impl Into<Value>) -> StorageResult<Self> {
        let filter = Filter::parse(&self.registry, &self.resource, expression, &operand.into())?;
        self.filters.push(filter);
        Ok(self)
    }

    /// Adds an ordering parsed from `path[__asc|__desc]`.
    pub fn order_by(mut self, expression: &str) -> StorageResult<Self> {
        let order_by = OrderBy::parse(&self.registry, &self.resource, expression)?;
        self.order_bys.push(order_by);
        Ok(self)
    }

    /// Adds a relation expansion.
    pub fn with_relation(mut self, expression: &str) -> StorageResult<Self> {
        let with_relation = WithRelation::parse(&self.registry, &self.resource, expression)?;
        self.with_relations.push(with_relation);
        Ok(self)
    }

    /// Sets a declared option.
    pub fn option(mut self, name: &str, value: impl Into<Value>) -> StorageResult<Self> {
        let option = self
            .resource
            .option(name)
            .ok_or_else(|| QueryError::InvalidOption {
                name: name.to_string(),
            })?;
        let value = option.validate(&value.into())?;
        self.options.insert(name.to_string(), value);
        Ok(self)
    }

    /// Requests rows `[start, stop)`.
    pub fn slice(mut self, start: usize, stop: usize) -> Self {
        self.slice = Some(Slice::new(start, stop));
        self
    }

    /// Appends an already resolved filter.
    pub fn add_filter(&mut self, filter: Filter) {
        self.filters.push(filter);
    }

    /// Appends a filter the caller did not write, e.g. one derived from the
    /// route or injected by an authorizer. Trusted filters are exempt from
    /// the allowed-filter check.
    pub fn add_trusted_filter(&mut self, filter: Filter) {
        self.trusted.push(filter.clone());
        self.filters.push(filter);
    }

    /// Whether `filter` was added with [`add_trusted_filter`](Self::add_trusted_filter).
    pub fn is_trusted(&self, filter: &Filter) -> bool {
        self.trusted.contains(filter)
    }

    /// Replaces the requested slice.
    pub fn set_slice(&mut self, slice: Option<Slice>) {
        self.slice = slice;
    }

    /// The schema registry the query was parsed against.
    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// The queried resource type.
    pub fn resource(&self) -> &Arc<ResourceDescription> {
        &self.resource
    }

    /// Parsed filters.
    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    /// The requested slice, if any.
    pub fn requested_slice(&self) -> Option<Slice> {
        self.slice
    }

    /// Parsed orderings.
    pub fn order_bys(&self) -> &[OrderBy] {
        &self.order_bys
    }

    /// Parsed relation expansions.
    pub fn with_relations(&self) -> &[WithRelation] {
        &self.with_relations
    }

    /// Option values, defaults included.
    pub fn options(&self) -> &BTreeMap<String, Value> {
        &self.options
    }

    /// Value of a named option; null when undeclared.
    pub fn option_value(&self, name: &str) -> &Value {
        self.options.get(name).unwrap_or(&Value::Null)
    }

    /// True when no filter, slice, ordering or expansion was added.
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
            && self.slice.is_none()
            && self.order_bys.is_empty()
            && self.with_relations.is_empty()
    }

    /// The window a backend reads: the requested slice, bounded by the
    /// resource's limit, or `[0, limit)` when none was requested.
    pub fn bounded_slice(&self) -> StorageResult<Slice> {
        let limit = self.resource.limit();
        match self.slice {
            Some(slice) if slice.width() > limit => Err(QueryError::MaxLimitExceeded {
                requested: slice.width(),
                limit,
            }
            .into()),
            Some(slice) => Ok(slice),
            None => Ok(Slice::new(0, limit)),
        }
    }
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value
        .split(LIST_DELIMITER)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}
