use std::sync::Arc;

use super::{PATH_DELIMITER, join_path};
use crate::error::{QueryError, StorageResult};
use crate::schema::{RelatedField, ResourceDescription, SchemaRegistry};

/// A chain of relations whose data is embedded instead of linked.
#[derive(Debug, Clone)]
pub struct WithRelation {
    relations: Vec<Arc<RelatedField>>,
}

impl PartialEq for WithRelation {
    fn eq(&self, other: &Self) -> bool {
        self.relations.len() == other.relations.len()
            && self
                .relations
                .iter()
                .zip(&other.relations)
                .all(|(a, b)| Arc::ptr_eq(a, b))
    }
}

impl WithRelation {
    /// Parses `relation[__relation...]`. Every segment must be a relation.
    pub fn parse(
        registry: &SchemaRegistry,
        resource: &Arc<ResourceDescription>,
        expression: &str,
    ) -> StorageResult<Self> {
        let invalid = || QueryError::InvalidWithRelation {
            expression: expression.to_string(),
        };
        let mut current = resource.clone();
        let mut relations = Vec::new();
        for segment in expression.split(PATH_DELIMITER) {
            let related = current.related_field(segment).cloned().ok_or_else(invalid)?;
            current = registry.resource(related.target())?.clone();
            relations.push(related);
        }
        Ok(Self { relations })
    }

    /// Relations in traversal order.
    pub fn relations(&self) -> &[Arc<RelatedField>] {
        &self.relations
    }

    /// Path name, e.g. `chat__topic`.
    pub fn name(&self) -> String {
        join_path(self.relations.iter().map(|r| r.name()), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::fixtures::registry;

    #[test]
    fn test_parse_chain() {
        let registry = registry();
        let sessions = registry.resource("chat_sessions").unwrap();
        let with = WithRelation::parse(&registry, sessions, "chat__topic").unwrap();
        assert_eq!(with.relations().len(), 2);
        assert_eq!(with.name(), "chat__topic");
    }

    #[test]
    fn test_fields_rejected() {
        let registry = registry();
        let chats = registry.resource("chats").unwrap();
        let err = WithRelation::parse(&registry, chats, "topic__title").unwrap_err();
        assert_eq!(err.to_string(), "invalid with relation 'topic__title'");
    }
}
