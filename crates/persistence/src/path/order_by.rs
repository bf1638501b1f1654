use std::str::FromStr;
use std::sync::Arc;

use super::{Hop, PATH_DELIMITER, join_path, resolve};
use crate::error::{QueryError, StorageResult};
use crate::schema::{Field, RelatedField, ResourceDescription, SchemaRegistry};
use crate::types::SortDirection;

/// A resolved ordering.
#[derive(Debug, Clone)]
pub struct OrderBy {
    hops: Vec<Hop>,
    target: Arc<Field>,
    direction: SortDirection,
}

impl PartialEq for OrderBy {
    fn eq(&self, other: &Self) -> bool {
        self.hops == other.hops
            && Arc::ptr_eq(&self.target, &other.target)
            && self.direction == other.direction
    }
}

impl OrderBy {
    /// Parses `path[__asc|__desc]`.
    pub fn parse(
        registry: &SchemaRegistry,
        resource: &Arc<ResourceDescription>,
        expression: &str,
    ) -> StorageResult<Self> {
        let invalid = || QueryError::InvalidOrderBy {
            expression: expression.to_string(),
        };
        let mut segments: Vec<&str> = expression.split(PATH_DELIMITER).collect();
        let direction = match segments.last().map(|s| SortDirection::from_str(s)) {
            Some(Ok(direction)) => {
                segments.pop();
                direction
            }
            _ => SortDirection::Ascending,
        };
        if segments.iter().any(|s| s.is_empty()) {
            return Err(invalid().into());
        }
        let resolved = resolve(registry, resource, &segments, &invalid)?;
        Ok(Self {
            hops: resolved.hops,
            target: resolved.target,
            direction,
        })
    }

    /// Resolved hops.
    pub fn hops(&self) -> &[Hop] {
        &self.hops
    }

    /// Relation hops only.
    pub fn relations(&self) -> impl Iterator<Item = &Arc<RelatedField>> {
        self.hops.iter().filter_map(Hop::relation)
    }

    /// Field sorted on.
    pub fn target(&self) -> &Arc<Field> {
        &self.target
    }

    /// Sort direction.
    pub fn direction(&self) -> SortDirection {
        self.direction
    }

    /// Path without direction, e.g. `topic__title`.
    pub fn name(&self) -> String {
        join_path(self.hops.iter().map(Hop::name), Some(self.target.name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::fixtures::registry;

    #[test]
    fn test_direction_suffix() {
        let registry = registry();
        let chats = registry.resource("chats").unwrap();
        let order = OrderBy::parse(&registry, chats, "created__desc").unwrap();
        assert_eq!(order.direction(), SortDirection::Descending);
        assert_eq!(order.name(), "created");

        let order = OrderBy::parse(&registry, chats, "topic__title").unwrap();
        assert_eq!(order.direction(), SortDirection::Ascending);
        assert_eq!(order.name(), "topic__title");
    }

    #[test]
    fn test_defaults_to_primary_key() {
        let registry = registry();
        let chats = registry.resource("chats").unwrap();
        let order = OrderBy::parse(&registry, chats, "topic__asc").unwrap();
        assert_eq!(order.target().name(), "id");
        assert_eq!(order.relations().count(), 1);
    }

    #[test]
    fn test_invalid() {
        let registry = registry();
        let chats = registry.resource("chats").unwrap();
        let err = OrderBy::parse(&registry, chats, "rank__desc").unwrap_err();
        assert_eq!(err.to_string(), "invalid order by 'rank__desc'");
    }
}
