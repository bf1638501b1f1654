//! Path expressions: filters, orderings and relation expansions.
//!
//! Every expression is a `__`-delimited path over a resource schema:
//!
//! ```text
//! topic__title__istartswith=Web     filter: hop `topic`, field `title`
//! order_by=created__desc            ordering on `created`
//! with=chat__topic                  expand `chat`, then its `topic`
//! ```
//!
//! Each hop must name a relation of the current resource (or an embedded
//! struct field); a plain field may only appear last. When no field is named
//! the terminal resource's primary key is used. Parsing fails before any
//! backend is touched.

mod filter;
mod operation;
mod order_by;
mod with_relation;

pub use filter::Filter;
pub use operation::{OPERAND_DELIMITER, Operation, Operator, RANGE_DELIMITER};
pub use order_by::OrderBy;
pub use with_relation::WithRelation;

use std::sync::Arc;

use crate::error::{QueryError, StorageResult};
use crate::schema::{Field, RelatedField, ResourceDescription, SchemaRegistry, StructDescription};

/// Delimiter between path segments.
pub const PATH_DELIMITER: &str = "__";

/// One step of a resolved path.
#[derive(Debug, Clone)]
pub enum Hop {
    /// Follows a relation to its target resource.
    Relation(Arc<RelatedField>),
    /// Descends into an embedded struct (or list of structs) field.
    Embedded(Arc<Field>),
}

impl Hop {
    /// Segment name.
    pub fn name(&self) -> &str {
        match self {
            Hop::Relation(r) => r.name(),
            Hop::Embedded(f) => f.name(),
        }
    }

    /// The relation, for relation hops.
    pub fn relation(&self) -> Option<&Arc<RelatedField>> {
        match self {
            Hop::Relation(r) => Some(r),
            Hop::Embedded(_) => None,
        }
    }
}

impl PartialEq for Hop {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Hop::Relation(a), Hop::Relation(b)) => Arc::ptr_eq(a, b),
            (Hop::Embedded(a), Hop::Embedded(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Joins hop names and an optional trailing segment.
pub(crate) fn join_path<'a>(
    hops: impl IntoIterator<Item = &'a str>,
    tail: Option<&'a str>,
) -> String {
    hops.into_iter()
        .chain(tail)
        .collect::<Vec<_>>()
        .join(PATH_DELIMITER)
}

enum Scope {
    Resource(Arc<ResourceDescription>),
    Struct(Arc<StructDescription>),
}

/// Outcome of walking a path.
pub(crate) struct Resolved {
    pub hops: Vec<Hop>,
    pub target: Arc<Field>,
    /// Resource reached after the last relation hop.
    pub resource: Arc<ResourceDescription>,
}

/// Walks `segments` from `root`. Plain fields are only legal as the last
/// segment; embedded structs and relations may appear anywhere.
pub(crate) fn resolve(
    registry: &SchemaRegistry,
    root: &Arc<ResourceDescription>,
    segments: &[&str],
    invalid: &dyn Fn() -> QueryError,
) -> StorageResult<Resolved> {
    let mut hops = Vec::new();
    let mut resource = root.clone();
    let mut scope = Scope::Resource(root.clone());
    let mut target = None;

    for (i, segment) in segments.iter().enumerate() {
        let last = i + 1 == segments.len();
        let field = match &scope {
            Scope::Resource(desc) => desc.field(segment).cloned(),
            Scope::Struct(desc) => desc.member(segment).cloned(),
        };
        if let Some(field) = field {
            if let Some(embedded) = field.embedded_struct().cloned() {
                hops.push(Hop::Embedded(field));
                scope = Scope::Struct(embedded);
            } else if last {
                target = Some(field);
            } else {
                return Err(invalid().into());
            }
            continue;
        }
        let related = match &scope {
            Scope::Resource(desc) => desc.related_field(segment).cloned(),
            Scope::Struct(_) => None,
        };
        let Some(related) = related else {
            return Err(invalid().into());
        };
        resource = registry.resource(related.target())?.clone();
        scope = Scope::Resource(resource.clone());
        hops.push(Hop::Relation(related));
    }

    let target = match (target, &scope) {
        (Some(field), _) => field,
        (None, Scope::Resource(desc)) => desc.primary_key().clone(),
        (None, Scope::Struct(_)) => return Err(invalid().into()),
    };
    Ok(Resolved {
        hops,
        target,
        resource,
    })
}
