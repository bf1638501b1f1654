use std::collections::VecDeque;

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Map, Value as JsonValue};

use super::Formatter;
use crate::error::{BackendError, StorageError, StorageResult, ValidationError};
use crate::schema::datetime::{from_timestamp, parse_datetime};
use crate::value::{Value, format_datetime, integral_in_range};

/// JSON formatter.
///
/// Writing assembles a document tree that is rendered by
/// [`into_bytes`](Self::into_bytes); reading walks a parsed document with a
/// stack of object and array cursors.
#[derive(Debug, Default)]
pub struct JsonFormatter {
    output: Option<JsonValue>,
    write_stack: Vec<WriteFrame>,
    input: Option<JsonValue>,
    read_stack: Vec<ReadFrame>,
}

#[derive(Debug)]
enum WriteFrame {
    Object {
        map: Map<String, JsonValue>,
        key: Option<String>,
    },
    Array(Vec<JsonValue>),
}

#[derive(Debug)]
enum ReadFrame {
    Object {
        entries: VecDeque<(String, JsonValue)>,
        current: Option<JsonValue>,
    },
    Array(VecDeque<JsonValue>),
}

fn format_error(message: impl Into<String>) -> StorageError {
    BackendError::SerializationError {
        message: message.into(),
    }
    .into()
}

fn invalid(label: &str, value: &JsonValue) -> StorageError {
    let shown = match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    };
    ValidationError::new(format!("invalid {} '{}'", label, shown)).into()
}

impl JsonFormatter {
    /// A formatter ready for writing.
    pub fn new() -> Self {
        Self::default()
    }

    /// A formatter reading the given document.
    pub fn from_slice(bytes: &[u8]) -> StorageResult<Self> {
        let input = serde_json::from_slice(bytes)
            .map_err(|e| ValidationError::new(format!("invalid json: {}", e)))?;
        Ok(Self::from_json(input))
    }

    /// A formatter reading an already parsed document.
    pub fn from_json(input: JsonValue) -> Self {
        Self {
            input: Some(input),
            ..Self::default()
        }
    }

    /// The written document.
    pub fn into_json(self) -> StorageResult<JsonValue> {
        if !self.write_stack.is_empty() {
            return Err(format_error("unterminated struct or list"));
        }
        self.output
            .ok_or_else(|| format_error("nothing was written"))
    }

    /// The written document, rendered.
    pub fn into_bytes(self) -> StorageResult<Vec<u8>> {
        Ok(serde_json::to_vec(&self.into_json()?)?)
    }

    fn emit(&mut self, value: JsonValue) -> StorageResult<()> {
        match self.write_stack.last_mut() {
            None => {
                self.output = Some(value);
                Ok(())
            }
            Some(WriteFrame::Array(items)) => {
                items.push(value);
                Ok(())
            }
            Some(WriteFrame::Object { map, key }) => {
                let name = key
                    .take()
                    .ok_or_else(|| format_error("value written outside a field"))?;
                map.insert(name, value);
                Ok(())
            }
        }
    }

    fn next_value(&mut self) -> StorageResult<JsonValue> {
        match self.read_stack.last_mut() {
            None => self
                .input
                .take()
                .ok_or_else(|| format_error("document already consumed")),
            Some(ReadFrame::Array(items)) => items
                .pop_front()
                .ok_or_else(|| format_error("list exhausted")),
            Some(ReadFrame::Object { current, .. }) => current
                .take()
                .ok_or_else(|| format_error("no field selected")),
        }
    }

    fn peek_value(&self) -> Option<&JsonValue> {
        match self.read_stack.last() {
            None => self.input.as_ref(),
            Some(ReadFrame::Array(items)) => items.front(),
            Some(ReadFrame::Object { current, .. }) => current.as_ref(),
        }
    }
}

impl Formatter for JsonFormatter {
    fn content_type(&self) -> &'static str {
        "application/json; charset=UTF-8"
    }

    fn write_struct_begin(&mut self) -> StorageResult<()> {
        self.write_stack.push(WriteFrame::Object {
            map: Map::new(),
            key: None,
        });
        Ok(())
    }

    fn write_struct_end(&mut self) -> StorageResult<()> {
        match self.write_stack.pop() {
            Some(WriteFrame::Object { map, .. }) => self.emit(JsonValue::Object(map)),
            _ => Err(format_error("struct end without begin")),
        }
    }

    fn write_field_begin(&mut self, name: &str) -> StorageResult<()> {
        match self.write_stack.last_mut() {
            Some(WriteFrame::Object { key, .. }) => {
                *key = Some(name.to_string());
                Ok(())
            }
            _ => Err(format_error("field outside a struct")),
        }
    }

    fn write_field_end(&mut self) -> StorageResult<()> {
        match self.write_stack.last_mut() {
            Some(WriteFrame::Object { key: None, .. }) => Ok(()),
            _ => Err(format_error("field ended without a value")),
        }
    }

    fn write_list_begin(&mut self, len: usize) -> StorageResult<()> {
        self.write_stack.push(WriteFrame::Array(Vec::with_capacity(len)));
        Ok(())
    }

    fn write_list_end(&mut self) -> StorageResult<()> {
        match self.write_stack.pop() {
            Some(WriteFrame::Array(items)) => self.emit(JsonValue::Array(items)),
            _ => Err(format_error("list end without begin")),
        }
    }

    fn write_null(&mut self) -> StorageResult<()> {
        self.emit(JsonValue::Null)
    }

    fn write_string(&mut self, value: &str) -> StorageResult<()> {
        self.emit(JsonValue::String(value.to_string()))
    }

    fn write_integer(&mut self, value: i64) -> StorageResult<()> {
        self.emit(JsonValue::from(value))
    }

    fn write_float(&mut self, value: f64) -> StorageResult<()> {
        self.emit(Value::Float(value).to_json())
    }

    fn write_bool(&mut self, value: bool) -> StorageResult<()> {
        self.emit(JsonValue::Bool(value))
    }

    fn write_date(&mut self, value: &NaiveDate) -> StorageResult<()> {
        self.emit(JsonValue::String(value.format("%Y-%m-%d").to_string()))
    }

    fn write_datetime(&mut self, value: &DateTime<Utc>) -> StorageResult<()> {
        self.emit(JsonValue::String(format_datetime(value)))
    }

    fn write_dynamic(&mut self, value: &Value) -> StorageResult<()> {
        self.emit(value.to_json())
    }

    fn read_struct_begin(&mut self) -> StorageResult<()> {
        match self.next_value()? {
            JsonValue::Object(map) => {
                self.read_stack.push(ReadFrame::Object {
                    entries: map.into_iter().collect(),
                    current: None,
                });
                Ok(())
            }
            other => Err(invalid("struct", &other)),
        }
    }

    fn read_struct_end(&mut self) -> StorageResult<()> {
        match self.read_stack.pop() {
            Some(ReadFrame::Object { .. }) => Ok(()),
            _ => Err(format_error("struct end without begin")),
        }
    }

    fn read_field_begin(&mut self) -> StorageResult<Option<String>> {
        match self.read_stack.last_mut() {
            Some(ReadFrame::Object { entries, current }) => Ok(entries.pop_front().map(
                |(name, value)| {
                    *current = Some(value);
                    name
                },
            )),
            _ => Err(format_error("field outside a struct")),
        }
    }

    fn read_named_field_begin(&mut self, name: &str) -> StorageResult<bool> {
        match self.read_stack.last_mut() {
            Some(ReadFrame::Object { entries, current }) => {
                match entries.iter().position(|(key, _)| key == name) {
                    Some(index) => {
                        *current = entries.remove(index).map(|(_, value)| value);
                        Ok(true)
                    }
                    None => Ok(false),
                }
            }
            _ => Err(format_error("field outside a struct")),
        }
    }

    fn read_field_end(&mut self) -> StorageResult<()> {
        match self.read_stack.last_mut() {
            Some(ReadFrame::Object { current, .. }) => {
                *current = None;
                Ok(())
            }
            _ => Err(format_error("field end outside a struct")),
        }
    }

    fn read_list_begin(&mut self) -> StorageResult<usize> {
        match self.next_value()? {
            JsonValue::Array(items) => {
                let len = items.len();
                self.read_stack.push(ReadFrame::Array(items.into()));
                Ok(len)
            }
            other => Err(invalid("list", &other)),
        }
    }

    fn read_list_end(&mut self) -> StorageResult<()> {
        match self.read_stack.pop() {
            Some(ReadFrame::Array(_)) => Ok(()),
            _ => Err(format_error("list end without begin")),
        }
    }

    fn peek_list(&mut self) -> StorageResult<bool> {
        Ok(matches!(self.peek_value(), Some(JsonValue::Array(_))))
    }

    fn read_null(&mut self) -> StorageResult<bool> {
        match self.peek_value() {
            Some(JsonValue::Null) => {
                self.next_value()?;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(format_error("no value to read")),
        }
    }

    fn read_string(&mut self) -> StorageResult<String> {
        match self.next_value()? {
            JsonValue::String(s) => Ok(s),
            JsonValue::Number(n) => Ok(n.to_string()),
            JsonValue::Bool(b) => Ok(b.to_string()),
            other => Err(invalid("string", &other)),
        }
    }

    fn read_integer(&mut self) -> StorageResult<i64> {
        let value = self.next_value()?;
        match &value {
            JsonValue::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| integral_in_range(*f)).map(|f| f as i64)),
            JsonValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
        .ok_or_else(|| invalid("integer", &value))
    }

    fn read_float(&mut self) -> StorageResult<f64> {
        let value = self.next_value()?;
        match &value {
            JsonValue::Number(n) => n.as_f64(),
            JsonValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
        .ok_or_else(|| invalid("float", &value))
    }

    fn read_bool(&mut self) -> StorageResult<bool> {
        match self.next_value()? {
            JsonValue::Bool(b) => Ok(b),
            other => Err(invalid("boolean", &other)),
        }
    }

    fn read_date(&mut self) -> StorageResult<NaiveDate> {
        let value = self.next_value()?;
        value
            .as_str()
            .and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok())
            .ok_or_else(|| invalid("date", &value))
    }

    fn read_datetime(&mut self) -> StorageResult<DateTime<Utc>> {
        let value = self.next_value()?;
        match &value {
            JsonValue::String(s) => parse_datetime(s),
            JsonValue::Number(n) => n.as_f64().and_then(from_timestamp),
            _ => None,
        }
        .ok_or_else(|| invalid("datetime", &value))
    }

    fn read_dynamic(&mut self) -> StorageResult<Value> {
        Ok(Value::from(self.next_value()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_write_nested() {
        let mut f = JsonFormatter::new();
        f.write_struct_begin().unwrap();
        f.write_field_begin("name").unwrap();
        f.write_string("web").unwrap();
        f.write_field_end().unwrap();
        f.write_field_begin("ids").unwrap();
        f.write_list_begin(2).unwrap();
        f.write_integer(1).unwrap();
        f.write_integer(2).unwrap();
        f.write_list_end().unwrap();
        f.write_field_end().unwrap();
        f.write_struct_end().unwrap();
        assert_eq!(f.into_json().unwrap(), json!({"name": "web", "ids": [1, 2]}));
    }

    #[test]
    fn test_unbalanced_write() {
        let mut f = JsonFormatter::new();
        f.write_struct_begin().unwrap();
        assert!(f.write_string("orphan").is_err());
        assert!(f.into_json().is_err());
    }

    #[test]
    fn test_read_fields_in_order_and_by_name() {
        let mut f = JsonFormatter::from_json(json!({"a": 1, "meta": {"x": true}, "b": "two"}));
        f.read_struct_begin().unwrap();
        assert!(f.read_named_field_begin("meta").unwrap());
        f.read_struct_begin().unwrap();
        assert_eq!(f.read_field_begin().unwrap().as_deref(), Some("x"));
        assert!(f.read_bool().unwrap());
        f.read_field_end().unwrap();
        assert_eq!(f.read_field_begin().unwrap(), None);
        f.read_struct_end().unwrap();
        f.read_field_end().unwrap();

        let mut seen = Vec::new();
        while let Some(name) = f.read_field_begin().unwrap() {
            seen.push(name);
            f.read_dynamic().unwrap();
            f.read_field_end().unwrap();
        }
        f.read_struct_end().unwrap();
        assert_eq!(seen, ["a", "b"]);
    }

    #[test]
    fn test_scalar_coercion_errors() {
        let mut f = JsonFormatter::from_json(json!(["12", "x", null, "2024-03-01T00:00:00Z"]));
        assert_eq!(f.read_list_begin().unwrap(), 4);
        assert_eq!(f.read_integer().unwrap(), 12);
        let err = f.read_integer().unwrap_err();
        assert_eq!(err.to_string(), "invalid integer 'x'");
        assert!(f.read_null().unwrap());
        assert!(!f.read_null().unwrap());
        assert_eq!(f.read_datetime().unwrap().to_rfc3339(), "2024-03-01T00:00:00+00:00");
        f.read_list_end().unwrap();
    }

    #[test]
    fn test_integral_floats_outside_i64_are_rejected() {
        let mut f = JsonFormatter::from_json(json!([3.0, 1e19, -1e19]));
        assert_eq!(f.read_list_begin().unwrap(), 3);
        assert_eq!(f.read_integer().unwrap(), 3);
        assert!(f.read_integer().is_err());
        assert!(f.read_integer().is_err());
    }

    #[test]
    fn test_invalid_document() {
        let err = JsonFormatter::from_slice(b"{not json").unwrap_err();
        assert_eq!(err.status_code(), 400);
    }
}
