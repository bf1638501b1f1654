//! Resource framing on top of the [`Formatter`] primitives.
//!
//! ```text
//! {
//!   "meta": {"resource_name": "chats", "resource_uri": "/chats/7", "loaded": true, "many": false},
//!   "id": 7,
//!   "topic": {"meta": {"resource_name": "topics", "resource_uri": "/topics/3", "loaded": false, "many": false}},
//!   "chat_sessions": [ ... ]
//! }
//! ```
//!
//! Relations that were never materialized are written as link stubs. Writing
//! never triggers a load.

use std::sync::Arc;

use super::Formatter;
use crate::error::{StorageResult, ValidationError};
use crate::resource::{Collection, Related, Resource};
use crate::schema::{FacetView, RelatedField, ResourceDescription, SchemaRegistry};
use crate::value::Value;

/// The `meta` block of a resource, link stub or collection.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResourceMeta {
    /// Resource type name.
    pub resource_name: String,
    /// Canonical URI, when known.
    pub resource_uri: Option<String>,
    /// False for link stubs.
    pub loaded: bool,
    /// True for collections and multi-valued relations.
    pub many: bool,
    /// Full result-set size (collections only).
    pub total_count: Option<u64>,
    /// Facet views (search collections only).
    pub facets: Vec<FacetView>,
}

impl ResourceMeta {
    /// Writes the block as a struct.
    pub fn write(&self, formatter: &mut dyn Formatter) -> StorageResult<()> {
        formatter.write_struct_begin()?;
        formatter.write_field_begin("resource_name")?;
        formatter.write_string(&self.resource_name)?;
        formatter.write_field_end()?;
        formatter.write_field_begin("resource_uri")?;
        match &self.resource_uri {
            Some(uri) => formatter.write_string(uri)?,
            None => formatter.write_null()?,
        }
        formatter.write_field_end()?;
        formatter.write_field_begin("loaded")?;
        formatter.write_bool(self.loaded)?;
        formatter.write_field_end()?;
        formatter.write_field_begin("many")?;
        formatter.write_bool(self.many)?;
        formatter.write_field_end()?;
        if let Some(total) = self.total_count {
            formatter.write_field_begin("total_count")?;
            formatter.write_integer(i64::try_from(total).unwrap_or(i64::MAX))?;
            formatter.write_field_end()?;
        }
        if !self.facets.is_empty() {
            formatter.write_field_begin("facets")?;
            formatter.write_list_begin(self.facets.len())?;
            for facet in &self.facets {
                formatter.write_dynamic(&facet.to_value())?;
            }
            formatter.write_list_end()?;
            formatter.write_field_end()?;
        }
        formatter.write_struct_end()
    }

    /// Reads a block. Unknown members are ignored; `loaded` defaults to true.
    pub fn read(formatter: &mut dyn Formatter) -> StorageResult<Self> {
        let mut meta = ResourceMeta {
            loaded: true,
            ..Default::default()
        };
        formatter.read_struct_begin()?;
        while let Some(name) = formatter.read_field_begin()? {
            match name.as_str() {
                "resource_name" => meta.resource_name = formatter.read_string()?,
                "resource_uri" => {
                    meta.resource_uri = if formatter.read_null()? {
                        None
                    } else {
                        Some(formatter.read_string()?)
                    }
                }
                "loaded" => meta.loaded = formatter.read_bool()?,
                "many" => meta.many = formatter.read_bool()?,
                "total_count" => {
                    meta.total_count = if formatter.read_null()? {
                        None
                    } else {
                        u64::try_from(formatter.read_integer()?).ok()
                    }
                }
                "facets" => {
                    let raw = formatter.read_dynamic()?;
                    meta.facets = serde_json::from_value(raw.to_json()).unwrap_or_default();
                }
                _ => {
                    formatter.read_dynamic()?;
                }
            }
            formatter.read_field_end()?;
        }
        formatter.read_struct_end()?;
        Ok(meta)
    }
}

/// Writes resources, link stubs and collections.
#[derive(Debug, Clone, Default)]
pub struct ResourceWriter {
    base_uri: String,
}

impl ResourceWriter {
    /// URIs are prefixed with `base_uri` (may be empty).
    pub fn new(base_uri: impl Into<String>) -> Self {
        Self {
            base_uri: base_uri.into().trim_end_matches('/').to_string(),
        }
    }

    /// `<base>/<resource>`.
    pub fn collection_uri(&self, description: &ResourceDescription) -> String {
        format!("{}/{}", self.base_uri, description.name())
    }

    /// `<base>/<resource>/<primary key>`.
    pub fn resource_uri(&self, resource: &Resource) -> String {
        format!(
            "{}/{}/{}",
            self.base_uri,
            resource.resource_name(),
            resource.primary_key()
        )
    }

    fn relation_uri(&self, resource: &Resource, related: &RelatedField) -> Option<String> {
        if related.is_forward() {
            let key = related
                .fk_field()
                .map(|f| resource.get(f.name()))
                .unwrap_or(&Value::Null);
            if key.is_null() {
                return None;
            }
            Some(format!("{}/{}/{}", self.base_uri, related.target(), key))
        } else {
            Some(format!("{}/{}", self.resource_uri(resource), related.name()))
        }
    }

    /// Writes one resource with its loaded relations inline.
    pub fn write_resource(
        &self,
        formatter: &mut dyn Formatter,
        resource: &Resource,
    ) -> StorageResult<()> {
        let description = resource.description();
        formatter.write_struct_begin()?;
        formatter.write_field_begin("meta")?;
        ResourceMeta {
            resource_name: description.name().to_string(),
            resource_uri: Some(self.resource_uri(resource)),
            loaded: true,
            many: false,
            ..Default::default()
        }
        .write(formatter)?;
        formatter.write_field_end()?;

        for field in description
            .fields()
            .iter()
            .filter(|f| !f.is_hidden() && !f.is_query())
        {
            formatter.write_field_begin(field.name())?;
            field.write(formatter, resource.get(field.name()))?;
            formatter.write_field_end()?;
        }

        for related in description.related_fields().iter().filter(|r| !r.is_hidden()) {
            formatter.write_field_begin(related.name())?;
            match resource.related(related.name()) {
                Some(Related::One(Some(target))) => self.write_resource(formatter, target)?,
                Some(Related::One(None)) => formatter.write_null()?,
                Some(Related::Many(targets)) => self.write_resources(formatter, targets)?,
                None => self.write_link(formatter, resource, related)?,
            }
            formatter.write_field_end()?;
        }
        formatter.write_struct_end()
    }

    fn write_link(
        &self,
        formatter: &mut dyn Formatter,
        resource: &Resource,
        related: &RelatedField,
    ) -> StorageResult<()> {
        let Some(uri) = self.relation_uri(resource, related) else {
            return formatter.write_null();
        };
        formatter.write_struct_begin()?;
        formatter.write_field_begin("meta")?;
        ResourceMeta {
            resource_name: related.target().to_string(),
            resource_uri: Some(uri),
            loaded: false,
            many: related.is_many(),
            ..Default::default()
        }
        .write(formatter)?;
        formatter.write_field_end()?;
        formatter.write_struct_end()
    }

    /// Writes a list of resources.
    pub fn write_resources(
        &self,
        formatter: &mut dyn Formatter,
        resources: &[Resource],
    ) -> StorageResult<()> {
        formatter.write_list_begin(resources.len())?;
        for resource in resources {
            self.write_resource(formatter, resource)?;
        }
        formatter.write_list_end()
    }

    /// Writes a collection envelope: `meta` (with total count and facets)
    /// plus a `results` list.
    pub fn write_collection(
        &self,
        formatter: &mut dyn Formatter,
        description: &ResourceDescription,
        collection: &Collection,
        resource_uri: Option<String>,
    ) -> StorageResult<()> {
        formatter.write_struct_begin()?;
        formatter.write_field_begin("meta")?;
        ResourceMeta {
            resource_name: description.name().to_string(),
            resource_uri: Some(resource_uri.unwrap_or_else(|| self.collection_uri(description))),
            loaded: true,
            many: true,
            total_count: Some(collection.total_count),
            facets: collection.facets.clone(),
        }
        .write(formatter)?;
        formatter.write_field_end()?;
        formatter.write_field_begin("results")?;
        self.write_resources(formatter, &collection.results)?;
        formatter.write_field_end()?;
        formatter.write_struct_end()
    }
}

/// Reads resources. A `meta` block, when present, selects the concrete
/// resource type; otherwise the expected type is used.
pub struct ResourceReader<'a> {
    registry: &'a SchemaRegistry,
    expected: Arc<ResourceDescription>,
}

impl<'a> ResourceReader<'a> {
    /// Creates a reader defaulting to `expected`.
    pub fn new(registry: &'a SchemaRegistry, expected: Arc<ResourceDescription>) -> Self {
        Self { registry, expected }
    }

    /// Reads one resource.
    pub fn read_resource(&self, formatter: &mut dyn Formatter) -> StorageResult<Resource> {
        match self.read_struct(formatter, &self.expected)? {
            Some(resource) => Ok(resource),
            None => Err(ValidationError::new("link stub where a resource was expected").into()),
        }
    }

    /// Reads a list of resources, or a collection envelope's `results`.
    pub fn read_resources(&self, formatter: &mut dyn Formatter) -> StorageResult<Vec<Resource>> {
        if formatter.peek_list()? {
            return self.read_list(formatter, &self.expected);
        }
        formatter.read_struct_begin()?;
        let mut results = Vec::new();
        while let Some(name) = formatter.read_field_begin()? {
            match name.as_str() {
                "meta" => {
                    ResourceMeta::read(formatter)?;
                }
                "results" => results = self.read_list(formatter, &self.expected)?,
                other => {
                    return Err(ValidationError::new(format!("unknown field '{}'", other)).into());
                }
            }
            formatter.read_field_end()?;
        }
        formatter.read_struct_end()?;
        Ok(results)
    }

    fn read_list(
        &self,
        formatter: &mut dyn Formatter,
        expected: &Arc<ResourceDescription>,
    ) -> StorageResult<Vec<Resource>> {
        let len = formatter.read_list_begin()?;
        let mut resources = Vec::with_capacity(len);
        for _ in 0..len {
            if let Some(resource) = self.read_struct(formatter, expected)? {
                resources.push(resource);
            }
        }
        formatter.read_list_end()?;
        Ok(resources)
    }

    /// Reads a resource struct; `None` for a link stub.
    fn read_struct(
        &self,
        formatter: &mut dyn Formatter,
        expected: &Arc<ResourceDescription>,
    ) -> StorageResult<Option<Resource>> {
        formatter.read_struct_begin()?;
        let mut description = expected.clone();
        if formatter.read_named_field_begin("meta")? {
            let meta = ResourceMeta::read(formatter)?;
            formatter.read_field_end()?;
            if !meta.resource_name.is_empty() {
                description = self.registry.resource(&meta.resource_name)?.clone();
            }
            if !meta.loaded {
                while formatter.read_field_begin()?.is_some() {
                    formatter.read_dynamic()?;
                    formatter.read_field_end()?;
                }
                formatter.read_struct_end()?;
                return Ok(None);
            }
        }

        let mut resource = Resource::new(description.clone());
        while let Some(name) = formatter.read_field_begin()? {
            if let Some(field) = description.field(&name) {
                let value = field.read(formatter)?;
                resource.set(name, value);
            } else if let Some(related) = description.related_field(&name) {
                let target = self.registry.resource(related.target())?.clone();
                if formatter.read_null()? {
                    if !related.is_many() {
                        resource.set_related(name, Related::One(None));
                    }
                } else if formatter.peek_list()? {
                    let items = self.read_list(formatter, &target)?;
                    resource.set_related(name, Related::Many(items));
                } else if let Some(item) = self.read_struct(formatter, &target)? {
                    resource.set_related(name, Related::One(Some(Box::new(item))));
                }
            } else {
                return Err(ValidationError::for_field(
                    &name,
                    format!("unknown field '{}'", name),
                )
                .into());
            }
            formatter.read_field_end()?;
        }
        formatter.read_struct_end()?;
        Ok(Some(resource))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::JsonFormatter;
    use crate::schema::{Field, RelatedField, ResourceBuilder};
    use serde_json::json;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::builder()
            .resource(
                ResourceBuilder::new("topics")
                    .field(Field::integer("id").primary_key())
                    .field(Field::string("title")),
            )
            .resource(
                ResourceBuilder::new("chats")
                    .field(Field::integer("id").primary_key())
                    .field(Field::string("name"))
                    .field(Field::string("token").hidden().nullable())
                    .related(RelatedField::foreign_key("topic", "topics").backref("chats")),
            )
            .build()
            .unwrap()
    }

    fn write(resource: &Resource) -> serde_json::Value {
        let mut f = JsonFormatter::new();
        ResourceWriter::new("").write_resource(&mut f, resource).unwrap();
        f.into_json().unwrap()
    }

    #[test]
    fn test_unloaded_relation_is_link_stub() {
        let registry = registry();
        let chats = registry.resource("chats").unwrap().clone();
        let chat = Resource::new(chats)
            .with("id", 7)
            .with("name", "standup")
            .with("token", "s3cret")
            .with("topic_id", 3);
        let json = write(&chat);
        assert_eq!(
            json,
            json!({
                "meta": {"resource_name": "chats", "resource_uri": "/chats/7", "loaded": true, "many": false},
                "id": 7,
                "name": "standup",
                "topic_id": 3,
                "topic": {"meta": {"resource_name": "topics", "resource_uri": "/topics/3", "loaded": false, "many": false}},
            })
        );
    }

    #[test]
    fn test_loaded_relations_inline() {
        let registry = registry();
        let topics = registry.resource("topics").unwrap().clone();
        let chats = registry.resource("chats").unwrap().clone();
        let mut topic = Resource::new(topics).with("id", 3).with("title", "Web");
        let chat = Resource::new(chats).with("id", 7).with("name", "a").with("topic_id", 3);
        topic.set_related("chats", Related::Many(vec![chat]));

        let json = write(&topic);
        assert_eq!(json["chats"][0]["meta"]["resource_uri"], "/chats/7");
        assert_eq!(json["chats"][0]["topic"]["meta"]["loaded"], false);
    }

    #[test]
    fn test_collection_envelope() {
        let registry = registry();
        let topics = registry.resource("topics").unwrap().clone();
        let collection = Collection::new(
            vec![Resource::new(topics.clone()).with("id", 1).with("title", "x")],
            12,
        );
        let mut f = JsonFormatter::new();
        ResourceWriter::new("http://localhost/api/")
            .write_collection(&mut f, &topics, &collection, None)
            .unwrap();
        let json = f.into_json().unwrap();
        assert_eq!(json["meta"]["total_count"], 12);
        assert_eq!(json["meta"]["many"], true);
        assert_eq!(json["meta"]["resource_uri"], "http://localhost/api/topics");
        assert_eq!(json["results"][0]["meta"]["resource_uri"], "http://localhost/api/topics/1");
    }

    #[test]
    fn test_read_round_trip_with_nested() {
        let registry = registry();
        let chats = registry.resource("chats").unwrap().clone();
        let body = json!({
            "meta": {"resource_name": "chats", "resource_uri": "/chats/7", "loaded": true, "many": false},
            "id": 7,
            "name": "standup",
            "topic_id": 3,
            "topic": {"meta": {"resource_name": "topics", "loaded": false, "many": false}}
        });
        let mut f = JsonFormatter::from_json(body);
        let chat = ResourceReader::new(&registry, chats.clone())
            .read_resource(&mut f)
            .unwrap();
        assert_eq!(chat.primary_key(), &Value::Int(7));
        assert!(!chat.is_loaded("topic"));

        let body = json!({"name": "x", "topic_id": "4", "topic": {"id": 4, "title": "Web"}});
        let mut f = JsonFormatter::from_json(body);
        let chat = ResourceReader::new(&registry, chats).read_resource(&mut f).unwrap();
        assert_eq!(chat.get("topic_id"), &Value::Int(4));
        match chat.related("topic") {
            Some(Related::One(Some(topic))) => assert_eq!(topic.get("title"), &Value::from("Web")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_read_rejects_unknown_fields() {
        let registry = registry();
        let chats = registry.resource("chats").unwrap().clone();
        let mut f = JsonFormatter::from_json(json!({"name": "x", "colour": "red"}));
        let err = ResourceReader::new(&registry, chats).read_resource(&mut f).unwrap_err();
        assert_eq!(err.to_string(), "unknown field 'colour'");
    }

    #[test]
    fn test_read_list_body() {
        let registry = registry();
        let topics = registry.resource("topics").unwrap().clone();
        let mut f = JsonFormatter::from_json(json!([{"title": "a"}, {"title": "b"}]));
        let reader = ResourceReader::new(&registry, topics);
        let resources = reader.read_resources(&mut f).unwrap();
        assert_eq!(resources.len(), 2);
        assert_eq!(resources[1].get("title"), &Value::from("b"));
    }
}
