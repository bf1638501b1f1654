//! Resource and struct descriptions.

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use serde_json::json;

use super::facet::Facet;
use super::field::{Field, FieldKind};
use super::option::QueryOption;
use super::related::RelatedField;
use crate::error::SchemaError;
use crate::path::Operator;
use crate::types::Method;

/// Default pagination limit.
pub const DEFAULT_LIMIT: usize = 20;

/// The declared members of a nested structure.
#[derive(Debug, Clone)]
pub struct StructDescription {
    name: String,
    fields: Vec<Arc<Field>>,
}

impl StructDescription {
    /// Starts a structure declaration.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Adds a member.
    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(Arc::new(field));
        self
    }

    /// Structure name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Members in declaration order.
    pub fn fields(&self) -> &[Arc<Field>] {
        &self.fields
    }

    /// Looks up a member by name.
    pub fn member(&self, name: &str) -> Option<&Arc<Field>> {
        self.fields.iter().find(|f| f.name() == name)
    }
}

/// One allowed-filter rule: a name pattern and the operators it permits.
#[derive(Debug, Clone)]
pub struct FilterRule {
    pattern: Regex,
    operators: Vec<Operator>,
}

impl FilterRule {
    /// The compiled name pattern.
    pub fn pattern(&self) -> &Regex {
        &self.pattern
    }

    /// Permitted operators.
    pub fn operators(&self) -> &[Operator] {
        &self.operators
    }
}

/// Where a resource lives in its backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    /// A relational table.
    Table(String),
    /// A search index.
    Index(String),
}

impl Binding {
    /// Table or index name.
    pub fn name(&self) -> &str {
        match self {
            Binding::Table(name) | Binding::Index(name) => name,
        }
    }
}

/// The immutable schema of one resource type.
#[derive(Debug, Clone)]
pub struct ResourceDescription {
    name: String,
    binding: Binding,
    primary_key: Arc<Field>,
    fields: Vec<Arc<Field>>,
    related_fields: Vec<Arc<RelatedField>>,
    allowed_methods: Vec<Method>,
    allowed_bulk_methods: Vec<Method>,
    allowed_related_methods: HashMap<String, Vec<Method>>,
    allowed_related_bulk_methods: HashMap<String, Vec<Method>>,
    allowed_filters: Vec<FilterRule>,
    allowed_order_bys: Vec<Regex>,
    allowed_with_relations: Vec<Regex>,
    limit: usize,
    options: Vec<QueryOption>,
    facets: Vec<Facet>,
}

impl ResourceDescription {
    /// Resource name, also its route segment.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backend binding.
    pub fn binding(&self) -> &Binding {
        &self.binding
    }

    /// Primary-key field.
    pub fn primary_key(&self) -> &Arc<Field> {
        &self.primary_key
    }

    /// Plain fields, including the keys of forward relations.
    pub fn fields(&self) -> &[Arc<Field>] {
        &self.fields
    }

    /// Looks up a plain field by name.
    pub fn field(&self, name: &str) -> Option<&Arc<Field>> {
        self.fields.iter().find(|f| f.name() == name)
    }

    /// Relations.
    pub fn related_fields(&self) -> &[Arc<RelatedField>] {
        &self.related_fields
    }

    /// Looks up a relation by name.
    pub fn related_field(&self, name: &str) -> Option<&Arc<RelatedField>> {
        self.related_fields.iter().find(|f| f.name() == name)
    }

    /// Methods allowed on the resource itself.
    pub fn allowed_methods(&self, bulk: bool) -> &[Method] {
        if bulk {
            &self.allowed_bulk_methods
        } else {
            &self.allowed_methods
        }
    }

    /// Methods allowed when the resource is reached through `relation`.
    pub fn allowed_related_methods(&self, relation: &str, bulk: bool) -> &[Method] {
        let table = if bulk {
            &self.allowed_related_bulk_methods
        } else {
            &self.allowed_related_methods
        };
        table.get(relation).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Allowed-filter rules.
    pub fn allowed_filters(&self) -> &[FilterRule] {
        &self.allowed_filters
    }

    /// Whether a filter name (without operator) may be used with `operator`.
    pub fn filter_allowed(&self, name: &str, operator: Operator) -> bool {
        self.allowed_filters
            .iter()
            .any(|rule| rule.pattern.is_match(name) && rule.operators.contains(&operator))
    }

    /// Whether an order-by name may be used.
    pub fn order_by_allowed(&self, name: &str) -> bool {
        self.allowed_order_bys.iter().any(|p| p.is_match(name))
    }

    /// Whether a relation path may be expanded.
    pub fn with_relation_allowed(&self, name: &str) -> bool {
        self.allowed_with_relations.iter().any(|p| p.is_match(name))
    }

    /// Allowed order-by patterns.
    pub fn allowed_order_bys(&self) -> &[Regex] {
        &self.allowed_order_bys
    }

    /// Allowed relation-expansion patterns.
    pub fn allowed_with_relations(&self) -> &[Regex] {
        &self.allowed_with_relations
    }

    /// Pagination limit.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Declared options.
    pub fn options(&self) -> &[QueryOption] {
        &self.options
    }

    /// Looks up an option by name.
    pub fn option(&self, name: &str) -> Option<&QueryOption> {
        self.options.iter().find(|o| o.name() == name)
    }

    /// Declared facets.
    pub fn facets(&self) -> &[Facet] {
        &self.facets
    }

    /// Self-description served to API clients: field types, methods, filters,
    /// orderings, relations and limit.
    pub fn describe(&self) -> serde_json::Value {
        fn describe_fields(fields: &[Arc<Field>]) -> serde_json::Map<String, serde_json::Value> {
            fields
                .iter()
                .filter(|f| !f.is_hidden())
                .map(|f| {
                    let mut entry = json!({
                        "nullable": f.is_nullable(),
                        "readonly": f.is_readonly(),
                        "type": field_type_name(f.kind()),
                    });
                    if let (Some(desc), Some(obj)) = (f.embedded_struct(), entry.as_object_mut())
                    {
                        obj.insert(
                            "fields".to_string(),
                            serde_json::Value::Object(describe_fields(desc.fields())),
                        );
                    }
                    (f.name().to_string(), entry)
                })
                .collect()
        }

        let mut fields = describe_fields(&self.fields);
        for related in self.related_fields.iter().filter(|r| !r.is_hidden()) {
            fields.insert(
                related.name().to_string(),
                json!({
                    "nullable": related.is_nullable(),
                    "readonly": related.is_readonly(),
                    "type": "related",
                    "many": related.is_many(),
                    "resource": related.target(),
                }),
            );
        }
        let filters: serde_json::Map<String, serde_json::Value> = self
            .allowed_filters
            .iter()
            .map(|rule| {
                (
                    pattern_source(&rule.pattern).to_string(),
                    json!(rule.operators.iter().map(Operator::as_str).collect::<Vec<_>>()),
                )
            })
            .collect();
        json!({
            "resource_name": self.name,
            "methods": self.allowed_methods.iter().map(Method::as_str).collect::<Vec<_>>(),
            "bulk_methods": self.allowed_bulk_methods.iter().map(Method::as_str).collect::<Vec<_>>(),
            "fields": fields,
            "filters": filters,
            "order_bys": self.allowed_order_bys.iter().map(pattern_source).collect::<Vec<_>>(),
            "with_relations": self.allowed_with_relations.iter().map(pattern_source).collect::<Vec<_>>(),
            "limit": self.limit,
        })
    }
}

/// The declared pattern of an allow-list regex, without the whole-name anchor.
fn pattern_source(pattern: &Regex) -> &str {
    let source = pattern.as_str();
    source
        .strip_prefix("^(?:")
        .and_then(|s| s.strip_suffix(")$"))
        .unwrap_or(source)
}

fn field_type_name(kind: &FieldKind) -> &'static str {
    match kind {
        FieldKind::String | FieldKind::Uri | FieldKind::Encoded | FieldKind::Query(_) => "string",
        FieldKind::Integer => "integer",
        FieldKind::Float => "float",
        FieldKind::Timestamp => "timestamp",
        FieldKind::Boolean => "boolean",
        FieldKind::Date => "date",
        FieldKind::DateTime => "datetime",
        FieldKind::Enum(_) => "enum",
        FieldKind::List(_) => "list",
        FieldKind::Dict => "dict",
        FieldKind::Struct(_) => "struct",
    }
}

/// Declares a resource type. Finalized by
/// [`SchemaRegistryBuilder::build`](super::SchemaRegistryBuilder::build).
#[derive(Debug, Clone)]
pub struct ResourceBuilder {
    pub(crate) name: String,
    binding: Option<Binding>,
    pub(crate) fields: Vec<Field>,
    pub(crate) related_fields: Vec<RelatedField>,
    allowed_methods: Vec<Method>,
    allowed_bulk_methods: Vec<Method>,
    allowed_related_methods: HashMap<String, Vec<Method>>,
    allowed_related_bulk_methods: HashMap<String, Vec<Method>>,
    filters: Vec<(String, Vec<Operator>)>,
    order_bys: Vec<String>,
    with_relations: Vec<String>,
    limit: usize,
    options: Vec<QueryOption>,
    facets: Vec<Facet>,
}

impl ResourceBuilder {
    /// Starts declaring a resource; binds to a table of the same name by default.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            binding: None,
            fields: Vec::new(),
            related_fields: Vec::new(),
            allowed_methods: Vec::new(),
            allowed_bulk_methods: Vec::new(),
            allowed_related_methods: HashMap::new(),
            allowed_related_bulk_methods: HashMap::new(),
            filters: Vec::new(),
            order_bys: Vec::new(),
            with_relations: Vec::new(),
            limit: DEFAULT_LIMIT,
            options: Vec::new(),
            facets: Vec::new(),
        }
    }

    /// Binds to a relational table.
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.binding = Some(Binding::Table(table.into()));
        self
    }

    /// Binds to a search index.
    pub fn index(mut self, index: impl Into<String>) -> Self {
        self.binding = Some(Binding::Index(index.into()));
        self
    }

    /// Adds a plain field.
    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    /// Adds a relation.
    pub fn related(mut self, related: RelatedField) -> Self {
        self.related_fields.push(related);
        self
    }

    /// Methods allowed on single resources.
    pub fn methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.allowed_methods = methods.into_iter().collect();
        self
    }

    /// Methods allowed on collections.
    pub fn bulk_methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.allowed_bulk_methods = methods.into_iter().collect();
        self
    }

    /// Methods allowed on a single related resource reached through `relation`.
    pub fn related_methods(
        mut self,
        relation: impl Into<String>,
        methods: impl IntoIterator<Item = Method>,
    ) -> Self {
        self.allowed_related_methods
            .insert(relation.into(), methods.into_iter().collect());
        self
    }

    /// Methods allowed on related collections reached through `relation`.
    pub fn related_bulk_methods(
        mut self,
        relation: impl Into<String>,
        methods: impl IntoIterator<Item = Method>,
    ) -> Self {
        self.allowed_related_bulk_methods
            .insert(relation.into(), methods.into_iter().collect());
        self
    }

    /// Allows filters whose name matches `pattern` with the given operators.
    pub fn filter(
        mut self,
        pattern: impl Into<String>,
        operators: impl IntoIterator<Item = Operator>,
    ) -> Self {
        self.filters
            .push((pattern.into(), operators.into_iter().collect()));
        self
    }

    /// Allows order-bys whose name matches `pattern`.
    pub fn order_by(mut self, pattern: impl Into<String>) -> Self {
        self.order_bys.push(pattern.into());
        self
    }

    /// Allows relation expansions whose path matches `pattern`.
    pub fn with_relation(mut self, pattern: impl Into<String>) -> Self {
        self.with_relations.push(pattern.into());
        self
    }

    /// Pagination limit.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Declares a query option.
    pub fn option(mut self, option: QueryOption) -> Self {
        self.options.push(option);
        self
    }

    /// Declares a facet.
    pub fn facet(mut self, facet: impl Into<Facet>) -> Self {
        self.facets.push(facet.into());
        self
    }

    /// Freezes the declaration. Relations must already be bound.
    pub(crate) fn finish(self) -> Result<ResourceDescription, SchemaError> {
        let mut fields: Vec<Arc<Field>> = Vec::with_capacity(self.fields.len());
        for field in self.fields {
            if fields.iter().any(|f| f.name() == field.name()) {
                return Err(SchemaError::DuplicateField {
                    resource: self.name.clone(),
                    name: field.name().to_string(),
                });
            }
            fields.push(Arc::new(field));
        }
        for related in &self.related_fields {
            if fields.iter().any(|f| f.name() == related.name())
                || self
                    .related_fields
                    .iter()
                    .filter(|r| r.name() == related.name())
                    .count()
                    > 1
            {
                return Err(SchemaError::DuplicateField {
                    resource: self.name.clone(),
                    name: related.name().to_string(),
                });
            }
            if let Some(fk) = related.fk_field()
                && !fields.iter().any(|f| f.name() == fk.name())
            {
                fields.push(fk.clone());
            }
        }
        let primary_key = fields
            .iter()
            .find(|f| f.is_primary_key())
            .cloned()
            .ok_or_else(|| SchemaError::MissingPrimaryKey {
                resource: self.name.clone(),
            })?;

        let compile = |pattern: &str| {
            Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| SchemaError::InvalidPattern {
                pattern: pattern.to_string(),
                message: e.to_string(),
            })
        };
        let allowed_filters = self
            .filters
            .iter()
            .map(|(pattern, operators)| {
                Ok(FilterRule {
                    pattern: compile(pattern)?,
                    operators: operators.clone(),
                })
            })
            .collect::<Result<Vec<_>, SchemaError>>()?;
        let allowed_order_bys = self
            .order_bys
            .iter()
            .map(|p| compile(p))
            .collect::<Result<Vec<_>, _>>()?;
        let allowed_with_relations = self
            .with_relations
            .iter()
            .map(|p| compile(p))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ResourceDescription {
            binding: self
                .binding
                .unwrap_or_else(|| Binding::Table(self.name.clone())),
            name: self.name,
            primary_key,
            fields,
            related_fields: self.related_fields.into_iter().map(Arc::new).collect(),
            allowed_methods: self.allowed_methods,
            allowed_bulk_methods: self.allowed_bulk_methods,
            allowed_related_methods: self.allowed_related_methods,
            allowed_related_bulk_methods: self.allowed_related_bulk_methods,
            allowed_filters,
            allowed_order_bys,
            allowed_with_relations,
            limit: self.limit,
            options: self.options,
            facets: self.facets,
        })
    }
}
