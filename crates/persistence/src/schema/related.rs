//! Relation declarations between resource types.

use std::sync::Arc;

use super::field::Field;

/// Name a relation can use to target its own declaring resource.
pub const SELF_TARGET: &str = "self";

/// Suffix on a backref name that registers the inverse as hidden.
pub const HIDDEN_BACKREF_SUFFIX: char = '+';

/// Join table of a many-to-many relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Through {
    /// Join table (or index) name.
    pub table: String,
    /// Column referencing the owning resource's primary key.
    pub source_column: String,
    /// Column referencing the target resource's primary key.
    pub target_column: String,
}

impl Through {
    /// Creates a join table description.
    pub fn new(
        table: impl Into<String>,
        source_column: impl Into<String>,
        target_column: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            source_column: source_column.into(),
            target_column: target_column.into(),
        }
    }

    /// The same join table seen from the other side.
    pub fn reversed(&self) -> Self {
        Self {
            table: self.table.clone(),
            source_column: self.target_column.clone(),
            target_column: self.source_column.clone(),
        }
    }
}

/// Cardinality and storage shape of a relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationKind {
    /// Single-valued; the owner stores the target's key in `column`.
    ForeignKey,
    /// Single-valued and unique; the owner stores the target's key in `column`.
    OneToOne,
    /// Multi-valued inverse of a foreign key; the target stores the owner's key in `column`.
    ReverseForeignKey,
    /// Single-valued inverse of a one-to-one; the target stores the owner's key in `column`.
    ReverseOneToOne,
    /// Multi-valued via a join table.
    ManyToMany(Through),
}

/// A field describing a reference to another resource type.
#[derive(Debug, Clone)]
pub struct RelatedField {
    name: String,
    owner: String,
    target: String,
    kind: RelationKind,
    column: Option<String>,
    backref: Option<String>,
    inverse: Option<String>,
    nullable: bool,
    readonly: bool,
    hidden: bool,
    encoded: bool,
    fk_field: Option<Arc<Field>>,
}

impl RelatedField {
    fn new(name: impl Into<String>, target: impl Into<String>, kind: RelationKind) -> Self {
        Self {
            name: name.into(),
            owner: String::new(),
            target: target.into(),
            kind,
            column: None,
            backref: None,
            inverse: None,
            nullable: false,
            readonly: false,
            hidden: false,
            encoded: false,
            fk_field: None,
        }
    }

    /// A foreign key to `target`, stored in `<name>_id` unless overridden.
    pub fn foreign_key(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(name, target, RelationKind::ForeignKey)
    }

    /// A unique foreign key to `target`.
    pub fn one_to_one(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(name, target, RelationKind::OneToOne)
    }

    /// The multi-valued side of a foreign key declared on `target`.
    pub fn reverse_foreign_key(
        name: impl Into<String>,
        target: impl Into<String>,
        column: impl Into<String>,
    ) -> Self {
        Self::new(name, target, RelationKind::ReverseForeignKey).column(column)
    }

    /// The single-valued side of a one-to-one declared on `target`.
    pub fn reverse_one_to_one(
        name: impl Into<String>,
        target: impl Into<String>,
        column: impl Into<String>,
    ) -> Self {
        Self::new(name, target, RelationKind::ReverseOneToOne).column(column)
    }

    /// A many-to-many relation through a join table.
    pub fn many_to_many(
        name: impl Into<String>,
        target: impl Into<String>,
        through: Through,
    ) -> Self {
        Self::new(name, target, RelationKind::ManyToMany(through))
    }

    /// Overrides the key column.
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    /// Registers an inverse relation with this name on the target.
    /// A trailing `+` registers it hidden.
    pub fn backref(mut self, name: impl Into<String>) -> Self {
        self.backref = Some(name.into());
        self
    }

    /// Allows a missing target.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Excludes the key from writes.
    pub fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    /// Excludes the relation from routes and serialization.
    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    /// Exposes the foreign key as an obfuscated identifier.
    pub fn encoded(mut self) -> Self {
        self.encoded = true;
        self
    }

    /// Relation name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declaring resource name.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Target resource name.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Cardinality and storage shape.
    pub fn kind(&self) -> &RelationKind {
        &self.kind
    }

    /// Key column: on the owner for forward relations, on the target for reverse ones.
    pub fn key_column(&self) -> Option<&str> {
        self.column.as_deref()
    }

    /// Join table for many-to-many relations.
    pub fn through(&self) -> Option<&Through> {
        match &self.kind {
            RelationKind::ManyToMany(through) => Some(through),
            _ => None,
        }
    }

    /// Declared backref, including any hidden suffix.
    pub fn backref_name(&self) -> Option<&str> {
        self.backref.as_deref()
    }

    /// Name of the inverse relation on the target, once registered.
    pub fn inverse(&self) -> Option<&str> {
        self.inverse.as_deref()
    }

    /// Whether the relation yields a list.
    pub fn is_many(&self) -> bool {
        matches!(
            self.kind,
            RelationKind::ReverseForeignKey | RelationKind::ManyToMany(_)
        )
    }

    /// Whether the owner stores the key (foreign key or one-to-one).
    pub fn is_forward(&self) -> bool {
        matches!(self.kind, RelationKind::ForeignKey | RelationKind::OneToOne)
    }

    /// Whether the relation targets its own declaring resource.
    pub fn is_self_referential(&self) -> bool {
        self.owner == self.target
    }

    /// Whether absence is allowed.
    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    /// Whether writes skip the key.
    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    /// Whether routes and serialization skip this relation.
    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    /// Whether the key is exposed encoded.
    pub fn is_encoded(&self) -> bool {
        self.encoded
    }

    /// Plain field exposing the stored key of a forward relation (`chat_id`).
    pub fn fk_field(&self) -> Option<&Arc<Field>> {
        self.fk_field.as_ref()
    }

    /// Binds the relation to its owner, resolving `self` and default columns.
    pub(crate) fn bind(&mut self, owner: &str) {
        self.owner = owner.to_string();
        if self.target == SELF_TARGET {
            self.target = owner.to_string();
        }
        if self.is_forward() {
            let column = self
                .column
                .get_or_insert_with(|| format!("{}_id", self.name))
                .clone();
            let name = format!("{}_id", self.name);
            let mut field = if self.encoded {
                Field::encoded(name)
            } else {
                Field::integer(name)
            }
            .attname(&column);
            if self.nullable {
                field = field.nullable();
            }
            if self.readonly {
                field = field.readonly();
            }
            self.fk_field = Some(Arc::new(field));
        }
    }

    /// Builds the inverse relation registered on the target.
    /// Returns `None` when no backref was declared.
    pub(crate) fn synthesize_inverse(&self) -> Option<RelatedField> {
        let backref = self.backref.as_deref()?;
        let (name, hidden) = match backref.strip_suffix(HIDDEN_BACKREF_SUFFIX) {
            Some(stripped) => (stripped, true),
            None => (backref, false),
        };
        let column = self.column.clone().unwrap_or_default();
        let kind = match &self.kind {
            RelationKind::ForeignKey => RelationKind::ReverseForeignKey,
            RelationKind::OneToOne => RelationKind::ReverseOneToOne,
            RelationKind::ReverseForeignKey => RelationKind::ForeignKey,
            RelationKind::ReverseOneToOne => RelationKind::OneToOne,
            RelationKind::ManyToMany(through) => RelationKind::ManyToMany(through.reversed()),
        };
        let mut inverse = RelatedField::new(name, self.owner.clone(), kind);
        if !matches!(inverse.kind, RelationKind::ManyToMany(_)) {
            inverse.column = Some(column);
        }
        inverse.hidden = hidden;
        inverse.nullable = true;
        inverse.encoded = self.encoded;
        inverse.inverse = Some(self.name.clone());
        Some(inverse)
    }

    pub(crate) fn set_inverse(&mut self, name: &str) {
        self.inverse = Some(name.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldKind;

    #[test]
    fn test_bind_foreign_key() {
        let mut rel = RelatedField::foreign_key("chat", "chats").encoded();
        rel.bind("chat_sessions");
        assert_eq!(rel.owner(), "chat_sessions");
        assert_eq!(rel.key_column(), Some("chat_id"));
        let fk = rel.fk_field().unwrap();
        assert_eq!(fk.name(), "chat_id");
        assert!(matches!(fk.kind(), FieldKind::Encoded));
        assert!(!fk.is_nullable());
    }

    #[test]
    fn test_self_target() {
        let mut rel = RelatedField::foreign_key("parent", SELF_TARGET).nullable();
        rel.bind("topics");
        assert_eq!(rel.target(), "topics");
        assert!(rel.is_self_referential());
        assert!(rel.fk_field().unwrap().is_nullable());
    }

    #[test]
    fn test_hidden_backref() {
        let mut rel = RelatedField::foreign_key("chat", "chats").backref("chat_sessions+");
        rel.bind("chat_sessions");
        let inverse = rel.synthesize_inverse().unwrap();
        assert_eq!(inverse.name(), "chat_sessions");
        assert!(inverse.is_hidden());
        assert!(inverse.is_many());
        assert_eq!(inverse.target(), "chat_sessions");
        assert_eq!(inverse.key_column(), Some("chat_id"));
        assert_eq!(inverse.inverse(), Some("chat"));
    }

    #[test]
    fn test_many_to_many_inverse_swaps_columns() {
        let mut rel = RelatedField::many_to_many(
            "users",
            "users",
            Through::new("chat_user", "chat_session_id", "user_id"),
        )
        .backref("chat_sessions");
        rel.bind("chat_sessions");
        let inverse = rel.synthesize_inverse().unwrap();
        let through = inverse.through().unwrap();
        assert_eq!(through.source_column, "user_id");
        assert_eq!(through.target_column, "chat_session_id");
        assert!(!inverse.is_hidden());
        assert!(rel.fk_field().is_none());
    }
}
