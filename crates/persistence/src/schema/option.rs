//! Named, typed query options a resource may declare (e.g. facet sizes).

use super::field::Field;
use crate::error::ValidationError;
use crate::value::Value;

/// A free-form query parameter declared on a resource.
#[derive(Debug, Clone)]
pub struct QueryOption {
    name: String,
    field: Option<Field>,
    default: Option<Value>,
}

impl QueryOption {
    /// Declares an untyped option; values pass through unchanged.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field: None,
            default: None,
        }
    }

    /// Declares an option whose values are validated by `field`.
    pub fn typed(name: impl Into<String>, field: Field) -> Self {
        Self {
            name: name.into(),
            field: Some(field.nullable()),
            default: None,
        }
    }

    /// Value used when the request omits the option.
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Option name, also its query-string key.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared default.
    pub fn default(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    /// Coerces a raw value through the option's field.
    pub fn validate(&self, value: &Value) -> Result<Value, ValidationError> {
        match &self.field {
            Some(field) => field.validate(value),
            None => Ok(value.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_option() {
        let option = QueryOption::typed("f_skills_size", Field::integer("size")).default_value(10);
        assert_eq!(option.validate(&Value::from("25")), Ok(Value::Int(25)));
        assert!(option.validate(&Value::from("many")).is_err());
        assert_eq!(option.default(), Some(&Value::Int(10)));
    }

    #[test]
    fn test_list_option_splits() {
        let option = QueryOption::typed("fields", Field::list("fields", Field::string("f")));
        assert_eq!(
            option.validate(&Value::from("a,b")),
            Ok(Value::List(vec![Value::from("a"), Value::from("b")]))
        );
    }

    #[test]
    fn test_untyped_passthrough() {
        let option = QueryOption::new("mode");
        assert_eq!(option.validate(&Value::from("x")), Ok(Value::from("x")));
    }
}
