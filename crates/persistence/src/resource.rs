//! Materialized resources.
//!
//! A [`Resource`] is a tagged record: its description, plain field values and
//! the set of relations that have been materialized. A relation that is absent
//! from the loaded set was never fetched; it is distinct from a relation that
//! was loaded and turned out empty.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::StorageResult;
use crate::schema::{FacetView, ResourceDescription};
use crate::value::Value;

/// A materialized relation.
#[derive(Debug, Clone, PartialEq)]
pub enum Related {
    /// A single-valued relation; `None` when the key is absent.
    One(Option<Box<Resource>>),
    /// A multi-valued relation.
    Many(Vec<Resource>),
}

impl Related {
    /// The related resources, whatever the cardinality.
    pub fn resources(&self) -> Vec<&Resource> {
        match self {
            Related::One(Some(r)) => vec![r.as_ref()],
            Related::One(None) => Vec::new(),
            Related::Many(items) => items.iter().collect(),
        }
    }

    /// Mutable form of [`resources`](Self::resources).
    pub fn resources_mut(&mut self) -> Vec<&mut Resource> {
        match self {
            Related::One(Some(r)) => vec![r.as_mut()],
            Related::One(None) => Vec::new(),
            Related::Many(items) => items.iter_mut().collect(),
        }
    }
}

/// One instance of a resource type.
#[derive(Debug, Clone)]
pub struct Resource {
    description: Arc<ResourceDescription>,
    values: BTreeMap<String, Value>,
    relations: BTreeMap<String, Related>,
}

impl PartialEq for Resource {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.description, &other.description)
            && self.values == other.values
            && self.relations == other.relations
    }
}

/// Which fields [`Resource::to_row`] writes.
#[derive(Debug, Clone, Default)]
pub struct RowOptions<'a> {
    /// Write the primary key.
    pub include_primary_key: bool,
    /// Write read-only fields.
    pub include_readonly: bool,
    /// Write hidden fields.
    pub include_hidden: bool,
    /// Field names never written.
    pub excludes: &'a [&'a str],
}

impl Resource {
    /// Creates a resource with every declared default applied.
    pub fn new(description: Arc<ResourceDescription>) -> Self {
        let values = description
            .fields()
            .iter()
            .filter_map(|f| f.default().map(|d| (f.name().to_string(), d.clone())))
            .collect();
        Self {
            description,
            values,
            relations: BTreeMap::new(),
        }
    }

    /// Builds a resource from a backend row, converting each field through
    /// [`Field::from_backend`](crate::schema::Field::from_backend). Query
    /// fields and `excludes` are skipped.
    pub fn from_row(
        description: Arc<ResourceDescription>,
        row: &BTreeMap<String, Value>,
        excludes: &[&str],
    ) -> StorageResult<Self> {
        let mut values = BTreeMap::new();
        for field in description.fields() {
            if field.is_query() || excludes.contains(&field.name()) {
                continue;
            }
            let raw = field.accessor().get(row).unwrap_or(&Value::Null);
            values.insert(field.name().to_string(), field.from_backend(raw)?);
        }
        Ok(Self {
            description,
            values,
            relations: BTreeMap::new(),
        })
    }

    /// Converts to a backend row keyed by backend path.
    pub fn to_row(&self, options: &RowOptions<'_>) -> StorageResult<BTreeMap<String, Value>> {
        let mut row = BTreeMap::new();
        for field in self.description.fields() {
            if field.is_query()
                || (field.is_primary_key() && !options.include_primary_key)
                || (field.is_readonly() && !options.include_readonly)
                || (field.is_hidden() && !options.include_hidden)
                || options.excludes.contains(&field.name())
            {
                continue;
            }
            let value = field.validate_for_backend(self.get(field.name()))?;
            field.accessor().set(&mut row, value);
        }
        Ok(row)
    }

    /// The resource's schema.
    pub fn description(&self) -> &Arc<ResourceDescription> {
        &self.description
    }

    /// Resource type name.
    pub fn resource_name(&self) -> &str {
        self.description.name()
    }

    /// A field value; absent fields read as null.
    pub fn get(&self, name: &str) -> &Value {
        self.values.get(name).unwrap_or(&Value::Null)
    }

    /// Whether a value was set for the field.
    pub fn has(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Sets a field value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    /// Builder form of [`set`](Self::set).
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// All field values.
    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    /// Primary-key value.
    pub fn primary_key(&self) -> &Value {
        self.get(self.description.primary_key().name())
    }

    /// Sets the primary-key value.
    pub fn set_primary_key(&mut self, value: impl Into<Value>) {
        let name = self.description.primary_key().name().to_string();
        self.set(name, value);
    }

    /// Whether the relation has been materialized on this instance.
    pub fn is_loaded(&self, relation: &str) -> bool {
        self.relations.contains_key(relation)
    }

    /// A materialized relation, or `None` when it was never loaded.
    pub fn related(&self, relation: &str) -> Option<&Related> {
        self.relations.get(relation)
    }

    /// Mutable access to a materialized relation.
    pub fn related_mut(&mut self, relation: &str) -> Option<&mut Related> {
        self.relations.get_mut(relation)
    }

    /// Marks the relation as loaded with the given contents.
    pub fn set_related(&mut self, relation: impl Into<String>, related: Related) {
        self.relations.insert(relation.into(), related);
    }

    /// Loaded relations by name.
    pub fn relations(&self) -> &BTreeMap<String, Related> {
        &self.relations
    }

    /// Visits this resource and every resource reachable through loaded
    /// relations, depth first.
    pub fn visit<'a>(&'a self, visitor: &mut dyn FnMut(&'a Resource)) {
        visitor(self);
        for related in self.relations.values() {
            for resource in related.resources() {
                resource.visit(visitor);
            }
        }
    }

    /// Mutable form of [`visit`](Self::visit).
    pub fn visit_mut(&mut self, visitor: &mut dyn FnMut(&mut Resource)) {
        visitor(self);
        for related in self.relations.values_mut() {
            for resource in related.resources_mut() {
                resource.visit_mut(visitor);
            }
        }
    }
}

/// Groups every loaded resource (roots plus anything reachable through loaded
/// relations) by resource type name.
pub fn loaded_resource_map(resources: &[Resource]) -> BTreeMap<String, Vec<&Resource>> {
    let mut map: BTreeMap<String, Vec<&Resource>> = BTreeMap::new();
    for resource in resources {
        resource.visit(&mut |r| {
            map.entry(r.resource_name().to_string())
                .or_default()
                .push(r)
        });
    }
    map
}

/// A page of results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Collection {
    /// Size of the full result set, independent of the page.
    pub total_count: u64,
    /// Facet views (search backend only).
    pub facets: Vec<FacetView>,
    /// The page.
    pub results: Vec<Resource>,
}

impl Collection {
    /// Wraps a page.
    pub fn new(results: Vec<Resource>, total_count: u64) -> Self {
        Self {
            total_count,
            facets: Vec::new(),
            results,
        }
    }

    /// Number of resources in the page.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Returns true for an empty page.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, RelatedField, ResourceBuilder, SchemaRegistry};

    fn registry() -> SchemaRegistry {
        SchemaRegistry::builder()
            .resource(
                ResourceBuilder::new("topics")
                    .field(Field::integer("id").primary_key())
                    .field(Field::string("title"))
                    .field(Field::string("secret").hidden().nullable())
                    .field(Field::string("city").attname("location.city").nullable())
                    .field(Field::integer("rank").default_value(0).readonly()),
            )
            .resource(
                ResourceBuilder::new("chats")
                    .field(Field::integer("id").primary_key())
                    .related(RelatedField::foreign_key("topic", "topics").backref("chats")),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_defaults_and_row_mapping() {
        let registry = registry();
        let topics = registry.resource("topics").unwrap().clone();
        let topic = Resource::new(topics.clone())
            .with("id", 3)
            .with("title", "Web")
            .with("city", "Boston");
        assert_eq!(topic.get("rank"), &Value::Int(0));

        let row = topic.to_row(&RowOptions::default()).unwrap();
        assert!(!row.contains_key("id"));
        assert!(!row.contains_key("rank"));
        assert!(!row.contains_key("secret"));
        assert_eq!(
            row.get("location").and_then(|l| l.get("city")),
            Some(&Value::from("Boston"))
        );

        let row = topic
            .to_row(&RowOptions {
                include_primary_key: true,
                include_readonly: true,
                ..Default::default()
            })
            .unwrap();
        let back = Resource::from_row(topics, &row, &[]).unwrap();
        assert_eq!(back.get("city"), &Value::from("Boston"));
        assert_eq!(back.primary_key(), &Value::Int(3));
    }

    #[test]
    fn test_missing_required_field() {
        let registry = registry();
        let topics = registry.resource("topics").unwrap().clone();
        let err = Resource::new(topics).to_row(&RowOptions::default()).unwrap_err();
        assert_eq!(err.to_string(), "'title' not nullable");
    }

    #[test]
    fn test_loaded_tracking() {
        let registry = registry();
        let topics = registry.resource("topics").unwrap().clone();
        let chats = registry.resource("chats").unwrap().clone();
        let mut chat = Resource::new(chats).with("id", 1).with("topic_id", 3);
        assert!(!chat.is_loaded("topic"));

        chat.set_related("topic", Related::One(None));
        assert!(chat.is_loaded("topic"));

        let topic = Resource::new(topics).with("id", 3).with("title", "Web");
        chat.set_related("topic", Related::One(Some(Box::new(topic))));
        let map = loaded_resource_map(std::slice::from_ref(&chat));
        assert_eq!(map["chats"].len(), 1);
        assert_eq!(map["topics"].len(), 1);

        chat.visit_mut(&mut |r| r.set("visited", true));
        assert_eq!(
            chat.related("topic").unwrap().resources()[0].get("visited"),
            &Value::Bool(true)
        );
    }
}
