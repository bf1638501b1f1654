//! Typed field declarations.
//!
//! A [`Field`] is the single source of truth for converting a value between
//! its wire form, its domain form (what a [`Resource`](crate::resource::Resource)
//! holds) and its backend form:
//!
//! ```text
//!   wire ──validate──▶ domain ──validate_for_backend──▶ backend
//!   wire ◀───write──── domain ◀────from_backend──────── backend
//! ```
//!
//! Both `validate` and `validate_for_backend` reject absence for fields that
//! are neither nullable nor the primary key.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;

use super::accessor::Accessor;
use super::datetime::{from_timestamp, parse_datetime, to_timestamp};
use super::description::StructDescription;
use super::encoding::{basic_decode, basic_encode};
use crate::error::{StorageError, StorageResult, ValidationError};
use crate::format::Formatter;
use crate::value::{Value, integral_in_range};

/// The value domain of a field.
#[derive(Debug, Clone)]
pub enum FieldKind {
    /// Free text; any scalar is rendered to a string.
    String,
    /// A URI, treated like a string.
    Uri,
    /// A 64-bit integer.
    Integer,
    /// A 64-bit float.
    Float,
    /// Epoch seconds as a float.
    Timestamp,
    /// A boolean.
    Boolean,
    /// A calendar date.
    Date,
    /// An instant, normalized to UTC.
    DateTime,
    /// An integer identifier exposed as an obfuscated base-62 string.
    Encoded,
    /// A closed set of wire keys mapped onto backend values.
    Enum(EnumMapping),
    /// A homogeneous list validated element-wise.
    List(Box<Field>),
    /// An arbitrary string-keyed map.
    Dict,
    /// A nested declared structure.
    Struct(Arc<StructDescription>),
    /// Drives full-text search; never stored or returned.
    Query(QueryKind),
}

/// Full-text query flavors for [`FieldKind::Query`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryKind {
    /// Match against one search field.
    Match {
        /// Search index field.
        search_field: String,
    },
    /// Match against several search fields.
    MultiMatch {
        /// Search index fields.
        search_fields: Vec<String>,
    },
}

/// Bidirectional mapping between enumeration keys and backend values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EnumMapping {
    entries: Vec<(String, Value)>,
}

impl EnumMapping {
    /// Creates an empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a key and the backend value it maps to.
    pub fn entry(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entries.push((key.into(), value.into()));
        self
    }

    /// Backend value for a key.
    pub fn value_for(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Key for a backend value.
    pub fn key_for(&self, value: &Value) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, v)| v == value)
            .map(|(k, _)| k.as_str())
    }

    /// All keys in declaration order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }
}

/// A typed, validated attribute of a resource or struct.
#[derive(Debug, Clone)]
pub struct Field {
    name: String,
    accessor: Accessor,
    kind: FieldKind,
    nullable: bool,
    readonly: bool,
    hidden: bool,
    primary_key: bool,
    default: Option<Value>,
    sort_ext: Option<String>,
    filter_ext: Option<String>,
}

impl Field {
    /// Creates a field of the given kind. The backend path defaults to the name.
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        let name = name.into();
        Self {
            accessor: Accessor::new(&name),
            name,
            kind,
            nullable: false,
            readonly: false,
            hidden: false,
            primary_key: false,
            default: None,
            sort_ext: None,
            filter_ext: None,
        }
    }

    /// A string field.
    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::String)
    }

    /// A URI field.
    pub fn uri(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Uri)
    }

    /// An integer field.
    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Integer)
    }

    /// A float field.
    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Float)
    }

    /// A timestamp (epoch seconds) field.
    pub fn timestamp(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Timestamp)
    }

    /// A boolean field.
    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Boolean)
    }

    /// A date field.
    pub fn date(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Date)
    }

    /// A UTC date-time field.
    pub fn datetime(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::DateTime)
    }

    /// An obfuscated identifier field.
    pub fn encoded(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Encoded)
    }

    /// An enumeration field.
    pub fn enumeration(name: impl Into<String>, mapping: EnumMapping) -> Self {
        Self::new(name, FieldKind::Enum(mapping))
    }

    /// A list field whose elements are validated by `inner`.
    pub fn list(name: impl Into<String>, inner: Field) -> Self {
        Self::new(name, FieldKind::List(Box::new(inner)))
    }

    /// A free-form map field.
    pub fn dict(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Dict)
    }

    /// A nested structure field.
    pub fn structure(name: impl Into<String>, description: Arc<StructDescription>) -> Self {
        Self::new(name, FieldKind::Struct(description))
    }

    /// A full-text field matching one search field. Nullable by default.
    pub fn match_query(name: impl Into<String>, search_field: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldKind::Query(QueryKind::Match {
                search_field: search_field.into(),
            }),
        )
        .nullable()
    }

    /// A full-text field matching several search fields. Nullable by default.
    pub fn multi_match_query<I, S>(name: impl Into<String>, search_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            name,
            FieldKind::Query(QueryKind::MultiMatch {
                search_fields: search_fields.into_iter().map(Into::into).collect(),
            }),
        )
        .nullable()
    }

    /// Marks the field as the primary key.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Allows absence.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Excludes the field from writes to the backend.
    pub fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    /// Excludes the field from serialization.
    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    /// Value used when the wire omits the field.
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Overrides the dotted backend attribute path.
    pub fn attname(mut self, path: &str) -> Self {
        self.accessor = Accessor::new(path);
        self
    }

    /// Search index suffix used when sorting; only fields with one are sortable.
    pub fn sort_ext(mut self, ext: impl Into<String>) -> Self {
        self.sort_ext = Some(ext.into());
        self
    }

    /// Search index suffix used when filtering and faceting.
    pub fn filter_ext(mut self, ext: impl Into<String>) -> Self {
        self.filter_ext = Some(ext.into());
        self
    }

    /// Wire name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dotted backend attribute path.
    pub fn attname_path(&self) -> String {
        self.accessor.path()
    }

    /// Resolved backend accessor.
    pub fn accessor(&self) -> &Accessor {
        &self.accessor
    }

    /// Value domain.
    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    /// Whether absence is allowed.
    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    /// Whether writes skip this field.
    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    /// Whether serialization skips this field.
    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    /// Whether this is the primary key.
    pub fn is_primary_key(&self) -> bool {
        self.primary_key
    }

    /// Declared default.
    pub fn default(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    /// Search sort suffix.
    pub fn sort_extension(&self) -> Option<&str> {
        self.sort_ext.as_deref()
    }

    /// Search filter suffix.
    pub fn filter_extension(&self) -> Option<&str> {
        self.filter_ext.as_deref()
    }

    /// Whether this field only drives full-text search.
    pub fn is_query(&self) -> bool {
        matches!(self.kind, FieldKind::Query(_))
    }

    /// The nested structure a path may descend into: a struct field or a
    /// list of structs.
    pub fn embedded_struct(&self) -> Option<&Arc<StructDescription>> {
        match &self.kind {
            FieldKind::Struct(desc) => Some(desc),
            FieldKind::List(inner) => match &inner.kind {
                FieldKind::Struct(desc) => Some(desc),
                _ => None,
            },
            _ => None,
        }
    }

    /// Coerces a wire value into its domain form.
    pub fn validate(&self, value: &Value) -> Result<Value, ValidationError> {
        let domain = self.to_domain(value)?;
        self.check_nullable(domain)
    }

    /// Coerces a wire or domain value into its backend form.
    pub fn validate_for_backend(&self, value: &Value) -> Result<Value, ValidationError> {
        let domain = self.to_domain(value)?;
        let backend = self.domain_to_backend(domain)?;
        self.check_nullable(backend)
    }

    /// Converts a value read from a backend row into its domain form.
    pub fn from_backend(&self, value: &Value) -> Result<Value, ValidationError> {
        let domain = match (&self.kind, value) {
            (_, Value::Null) => Value::Null,
            (FieldKind::Enum(mapping), v) => match mapping.key_for(v) {
                Some(key) => Value::String(key.to_string()),
                None => return Err(self.invalid("enum value", v)),
            },
            (FieldKind::Dict | FieldKind::List(_) | FieldKind::Struct(_), Value::String(s)) => {
                let parsed: serde_json::Value = serde_json::from_str(s)
                    .map_err(|_| self.invalid(self.kind_label(), value))?;
                self.container_from_backend(&Value::from(parsed))?
            }
            (FieldKind::List(_) | FieldKind::Struct(_), v) => self.container_from_backend(v)?,
            (_, v) => v.clone(),
        };
        self.validate(&domain)
    }

    fn container_from_backend(&self, value: &Value) -> Result<Value, ValidationError> {
        match (&self.kind, value) {
            (FieldKind::List(inner), Value::List(items)) => items
                .iter()
                .map(|item| inner.from_backend(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            (FieldKind::Struct(desc), Value::Map(map)) => {
                let mut result = BTreeMap::new();
                for member in desc.fields() {
                    let raw = member.accessor().get(map).cloned().unwrap_or(Value::Null);
                    result.insert(member.name().to_string(), member.from_backend(&raw)?);
                }
                Ok(Value::Map(result))
            }
            (_, v) => Ok(v.clone()),
        }
    }

    fn check_nullable(&self, value: Value) -> Result<Value, ValidationError> {
        if value.is_null() && !self.primary_key && !self.nullable {
            return Err(ValidationError::not_nullable(&self.name));
        }
        Ok(value)
    }

    fn invalid(&self, label: &str, value: &Value) -> ValidationError {
        ValidationError::for_field(&self.name, format!("invalid {} '{}'", label, value))
    }

    fn kind_label(&self) -> &'static str {
        match &self.kind {
            FieldKind::String | FieldKind::Uri | FieldKind::Query(_) => "string",
            FieldKind::Integer => "integer",
            FieldKind::Float | FieldKind::Timestamp => "float",
            FieldKind::Boolean => "boolean",
            FieldKind::Date => "date",
            FieldKind::DateTime => "datetime",
            FieldKind::Encoded => "encoded id",
            FieldKind::Enum(_) => "enum value",
            FieldKind::List(_) => "list",
            FieldKind::Dict => "dict",
            FieldKind::Struct(_) => "struct",
        }
    }

    fn to_domain(&self, value: &Value) -> Result<Value, ValidationError> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        let label = self.kind_label();
        match &self.kind {
            FieldKind::String | FieldKind::Uri | FieldKind::Query(_) => match value {
                Value::String(s) => Ok(Value::String(s.clone())),
                Value::List(_) | Value::Map(_) => Err(self.invalid(label, value)),
                other => Ok(Value::String(other.to_string())),
            },
            FieldKind::Encoded => match value {
                Value::Int(i) if *i >= 0 => Ok(Value::String(basic_encode(*i as u64))),
                Value::String(s) if basic_decode(s).is_some() => Ok(Value::String(s.clone())),
                _ => Err(self.invalid(label, value)),
            },
            FieldKind::Integer => match value {
                Value::Int(i) => Ok(Value::Int(*i)),
                Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
                Value::Float(f) if integral_in_range(*f) => Ok(Value::Int(*f as i64)),
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::Int)
                    .map_err(|_| self.invalid(label, value)),
                _ => Err(self.invalid(label, value)),
            },
            FieldKind::Float => match value {
                Value::Int(_) | Value::Float(_) => {
                    Ok(Value::Float(value.as_f64().unwrap_or_default()))
                }
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| self.invalid(label, value)),
                _ => Err(self.invalid(label, value)),
            },
            FieldKind::Timestamp => match value {
                Value::Int(_) | Value::Float(_) => {
                    Ok(Value::Float(value.as_f64().unwrap_or_default()))
                }
                Value::DateTime(dt) => Ok(Value::Float(to_timestamp(dt))),
                Value::String(s) => match s.trim().parse::<f64>() {
                    Ok(f) => Ok(Value::Float(f)),
                    Err(_) => parse_datetime(s)
                        .map(|dt| Value::Float(to_timestamp(&dt)))
                        .ok_or_else(|| self.invalid(label, value)),
                },
                _ => Err(self.invalid(label, value)),
            },
            FieldKind::Boolean => match value {
                Value::Bool(b) => Ok(Value::Bool(*b)),
                Value::Int(1) => Ok(Value::Bool(true)),
                Value::Int(0) => Ok(Value::Bool(false)),
                Value::String(s) => match s.as_str() {
                    "t" | "T" | "true" | "True" | "1" => Ok(Value::Bool(true)),
                    "f" | "F" | "false" | "False" | "0" => Ok(Value::Bool(false)),
                    _ => Err(self.invalid(label, value)),
                },
                _ => Err(self.invalid(label, value)),
            },
            FieldKind::Date => match value {
                Value::Date(d) => Ok(Value::Date(*d)),
                Value::DateTime(dt) => Ok(Value::Date(dt.date_naive())),
                Value::String(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                    .ok()
                    .or_else(|| parse_datetime(s).map(|dt| dt.date_naive()))
                    .map(Value::Date)
                    .ok_or_else(|| self.invalid(label, value)),
                _ => Err(self.invalid(label, value)),
            },
            FieldKind::DateTime => match value {
                Value::DateTime(dt) => Ok(Value::DateTime(*dt)),
                Value::Date(d) => d
                    .and_hms_opt(0, 0, 0)
                    .map(|n| Value::DateTime(n.and_utc()))
                    .ok_or_else(|| self.invalid(label, value)),
                Value::Int(_) | Value::Float(_) => value
                    .as_f64()
                    .and_then(from_timestamp)
                    .map(Value::DateTime)
                    .ok_or_else(|| self.invalid(label, value)),
                Value::String(s) => parse_datetime(s)
                    .map(Value::DateTime)
                    .ok_or_else(|| self.invalid(label, value)),
                _ => Err(self.invalid(label, value)),
            },
            FieldKind::Enum(mapping) => {
                let key = match value {
                    Value::String(s) => s.clone(),
                    Value::List(_) | Value::Map(_) => return Err(self.invalid(label, value)),
                    other => other.to_string(),
                };
                if mapping.value_for(&key).is_some() {
                    Ok(Value::String(key))
                } else {
                    Err(self.invalid(label, value))
                }
            }
            FieldKind::List(inner) => match value {
                Value::List(items) => items
                    .iter()
                    .map(|item| inner.validate(item))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::List),
                Value::String(s) => s
                    .split(',')
                    .map(|item| inner.validate(&Value::from(item)))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::List),
                _ => Err(self.invalid(label, value)),
            },
            FieldKind::Dict => match value {
                Value::Map(map) => Ok(Value::Map(map.clone())),
                _ => Err(self.invalid(label, value)),
            },
            FieldKind::Struct(desc) => match value {
                Value::Map(map) => {
                    if let Some(unknown) = map.keys().find(|k| desc.member(k).is_none()) {
                        return Err(ValidationError::for_field(
                            &self.name,
                            format!("unknown field '{}' in {}", unknown, desc.name()),
                        ));
                    }
                    let mut result = BTreeMap::new();
                    for member in desc.fields() {
                        let raw = map
                            .get(member.name())
                            .cloned()
                            .or_else(|| member.default().cloned())
                            .unwrap_or(Value::Null);
                        result.insert(member.name().to_string(), member.validate(&raw)?);
                    }
                    Ok(Value::Map(result))
                }
                _ => Err(self.invalid(label, value)),
            },
        }
    }

    fn domain_to_backend(&self, domain: Value) -> Result<Value, ValidationError> {
        match (&self.kind, domain) {
            (_, Value::Null) => Ok(Value::Null),
            (FieldKind::Encoded, Value::String(s)) => basic_decode(&s)
                .and_then(|id| i64::try_from(id).ok())
                .map(Value::Int)
                .ok_or_else(|| self.invalid("encoded id", &Value::String(s.clone()))),
            (FieldKind::Enum(mapping), Value::String(key)) => mapping
                .value_for(&key)
                .cloned()
                .ok_or_else(|| self.invalid("enum value", &Value::String(key.clone()))),
            (FieldKind::List(inner), Value::List(items)) => items
                .iter()
                .map(|item| inner.validate_for_backend(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            (FieldKind::Struct(desc), Value::Map(map)) => {
                let mut result = BTreeMap::new();
                for member in desc.fields() {
                    let raw = map.get(member.name()).cloned().unwrap_or(Value::Null);
                    member
                        .accessor()
                        .set(&mut result, member.validate_for_backend(&raw)?);
                }
                Ok(Value::Map(result))
            }
            (_, other) => Ok(other),
        }
    }

    /// Writes a domain value through the formatter.
    pub fn write(&self, formatter: &mut dyn Formatter, value: &Value) -> StorageResult<()> {
        match (&self.kind, value) {
            (_, Value::Null) => formatter.write_null(),
            (FieldKind::Integer, Value::Int(i)) => formatter.write_integer(*i),
            (FieldKind::Float | FieldKind::Timestamp, v) if v.as_f64().is_some() => {
                formatter.write_float(v.as_f64().unwrap_or_default())
            }
            (FieldKind::Boolean, Value::Bool(b)) => formatter.write_bool(*b),
            (FieldKind::Date, Value::Date(d)) => formatter.write_date(d),
            (FieldKind::DateTime, Value::DateTime(dt)) => formatter.write_datetime(dt),
            (FieldKind::List(inner), Value::List(items)) => {
                formatter.write_list_begin(items.len())?;
                for item in items {
                    inner.write(formatter, item)?;
                }
                formatter.write_list_end()
            }
            (FieldKind::Struct(desc), Value::Map(map)) => {
                formatter.write_struct_begin()?;
                for member in desc.fields().iter().filter(|f| !f.is_hidden()) {
                    formatter.write_field_begin(member.name())?;
                    member.write(formatter, map.get(member.name()).unwrap_or(&Value::Null))?;
                    formatter.write_field_end()?;
                }
                formatter.write_struct_end()
            }
            (
                FieldKind::String
                | FieldKind::Uri
                | FieldKind::Encoded
                | FieldKind::Enum(_)
                | FieldKind::Query(_),
                v,
            ) => formatter.write_string(&v.to_string()),
            (_, v) => formatter.write_dynamic(v),
        }
    }

    /// Reads a wire value through the formatter and validates it.
    pub fn read(&self, formatter: &mut dyn Formatter) -> StorageResult<Value> {
        let raw = self.read_raw(formatter)?;
        Ok(self.validate(&raw)?)
    }

    fn read_raw(&self, formatter: &mut dyn Formatter) -> StorageResult<Value> {
        if formatter.read_null()? {
            return Ok(Value::Null);
        }
        let value = match &self.kind {
            FieldKind::Integer => Value::Int(formatter.read_integer()?),
            FieldKind::Float | FieldKind::Timestamp => Value::Float(formatter.read_float()?),
            FieldKind::Boolean => Value::Bool(formatter.read_bool()?),
            FieldKind::Date => Value::Date(formatter.read_date()?),
            FieldKind::DateTime => Value::DateTime(formatter.read_datetime()?),
            FieldKind::List(inner) => {
                let len = formatter.read_list_begin()?;
                let mut items = Vec::with_capacity(len);
                for _ in 0..len {
                    items.push(inner.read_raw(formatter)?);
                }
                formatter.read_list_end()?;
                Value::List(items)
            }
            FieldKind::Struct(desc) => {
                formatter.read_struct_begin()?;
                let mut map = BTreeMap::new();
                while let Some(name) = formatter.read_field_begin()? {
                    let member = desc.member(&name).ok_or_else(|| {
                        StorageError::from(ValidationError::for_field(
                            &self.name,
                            format!("unknown field '{}' in {}", name, desc.name()),
                        ))
                    })?;
                    map.insert(name.clone(), member.read_raw(formatter)?);
                    formatter.read_field_end()?;
                }
                formatter.read_struct_end()?;
                Value::Map(map)
            }
            FieldKind::Dict => formatter.read_dynamic()?,
            FieldKind::Encoded => formatter.read_dynamic()?,
            FieldKind::String | FieldKind::Uri | FieldKind::Enum(_) | FieldKind::Query(_) => {
                Value::String(formatter.read_string()?)
            }
        };
        Ok(value)
    }
}
