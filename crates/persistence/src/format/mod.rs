//! Streaming wire formats for resources.
//!
//! A [`Formatter`] exposes symmetric read/write primitives (struct, list and
//! field boundaries plus one call per scalar type) over an underlying buffer.
//! Type dispatch lives on [`Field`](crate::schema::Field): each field knows
//! which primitive to call, so the formatter stays schema-agnostic.
//!
//! Resource-level framing (metadata blocks, link stubs for relations that were
//! never loaded, collections) is implemented once in [`resource`] on top of
//! the primitives.
//!
//! | Format | Type |
//! |--------|------|
//! | JSON | [`JsonFormatter`] |

mod json;
pub mod resource;

pub use json::JsonFormatter;
pub use resource::{ResourceMeta, ResourceReader, ResourceWriter};

use chrono::{DateTime, NaiveDate, Utc};

use crate::error::StorageResult;
use crate::value::Value;

/// Symmetric streaming read/write primitives for one wire format.
///
/// Writers must be driven in a well-nested order: every `*_begin` is matched
/// by its `*_end`, and inside a struct every value is preceded by
/// [`write_field_begin`](Formatter::write_field_begin).
pub trait Formatter: Send {
    /// MIME type of the produced documents.
    fn content_type(&self) -> &'static str;

    /// Opens a struct (object).
    fn write_struct_begin(&mut self) -> StorageResult<()>;
    /// Closes the innermost struct.
    fn write_struct_end(&mut self) -> StorageResult<()>;
    /// Names the next value written inside the current struct.
    fn write_field_begin(&mut self, name: &str) -> StorageResult<()>;
    /// Ends the current field.
    fn write_field_end(&mut self) -> StorageResult<()>;
    /// Opens a list of `len` elements.
    fn write_list_begin(&mut self, len: usize) -> StorageResult<()>;
    /// Closes the innermost list.
    fn write_list_end(&mut self) -> StorageResult<()>;
    /// Writes an absent value.
    fn write_null(&mut self) -> StorageResult<()>;
    /// Writes a string.
    fn write_string(&mut self, value: &str) -> StorageResult<()>;
    /// Writes an integer.
    fn write_integer(&mut self, value: i64) -> StorageResult<()>;
    /// Writes a float.
    fn write_float(&mut self, value: f64) -> StorageResult<()>;
    /// Writes a boolean.
    fn write_bool(&mut self, value: bool) -> StorageResult<()>;
    /// Writes a date.
    fn write_date(&mut self, value: &NaiveDate) -> StorageResult<()>;
    /// Writes an instant.
    fn write_datetime(&mut self, value: &DateTime<Utc>) -> StorageResult<()>;
    /// Writes an arbitrary value tree (dict fields, metadata).
    fn write_dynamic(&mut self, value: &Value) -> StorageResult<()>;

    /// Enters the next value, which must be a struct.
    fn read_struct_begin(&mut self) -> StorageResult<()>;
    /// Leaves the innermost struct.
    fn read_struct_end(&mut self) -> StorageResult<()>;
    /// Advances to the next field of the current struct, returning its name,
    /// or `None` once every field was read.
    fn read_field_begin(&mut self) -> StorageResult<Option<String>>;
    /// Seeks the named field of the current struct regardless of position.
    /// Returns false when the struct has no such field.
    fn read_named_field_begin(&mut self, name: &str) -> StorageResult<bool>;
    /// Ends the current field.
    fn read_field_end(&mut self) -> StorageResult<()>;
    /// Enters the next value, which must be a list, returning its length.
    fn read_list_begin(&mut self) -> StorageResult<usize>;
    /// Leaves the innermost list.
    fn read_list_end(&mut self) -> StorageResult<()>;
    /// Returns true when the next value is a list, without consuming it.
    fn peek_list(&mut self) -> StorageResult<bool>;
    /// Consumes the next value if it is absent, returning true in that case.
    fn read_null(&mut self) -> StorageResult<bool>;
    /// Reads a string.
    fn read_string(&mut self) -> StorageResult<String>;
    /// Reads an integer.
    fn read_integer(&mut self) -> StorageResult<i64>;
    /// Reads a float.
    fn read_float(&mut self) -> StorageResult<f64>;
    /// Reads a boolean.
    fn read_bool(&mut self) -> StorageResult<bool>;
    /// Reads a date.
    fn read_date(&mut self) -> StorageResult<NaiveDate>;
    /// Reads an instant.
    fn read_datetime(&mut self) -> StorageResult<DateTime<Utc>>;
    /// Reads an arbitrary value tree.
    fn read_dynamic(&mut self) -> StorageResult<Value>;
}
