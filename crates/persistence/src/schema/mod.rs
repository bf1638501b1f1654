//! Resource schemas.
//!
//! Every other component consults these declarations; none re-implements
//! type coercion.
//!
//! | Item | Purpose |
//! |------|---------|
//! | [`Field`] | typed attribute, wire/domain/backend conversions |
//! | [`RelatedField`] | reference to another resource type |
//! | [`ResourceDescription`] | frozen per-resource schema |
//! | [`SchemaRegistry`] | lookup by resource name |
//! | [`Facet`] | search facet declarations |
//! | [`QueryOption`] | named typed query parameters |

mod accessor;
pub mod datetime;
mod description;
pub mod encoding;
mod facet;
mod field;
mod option;
mod registry;
mod related;

pub use accessor::Accessor;
pub use description::{
    Binding, DEFAULT_LIMIT, FilterRule, ResourceBuilder, ResourceDescription, StructDescription,
};
pub use facet::{
    DEFAULT_TERMS_SIZE, Facet, FacetItemView, FacetRange, FacetView, RangeFacet, TermsFacet,
};
pub use field::{EnumMapping, Field, FieldKind, QueryKind};
pub use option::QueryOption;
pub use registry::{SchemaRegistry, SchemaRegistryBuilder};
pub use related::{HIDDEN_BACKREF_SUFFIX, RelatedField, RelationKind, SELF_TARGET, Through};
