//! Predicate operators and their bound operands.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{QueryError, StorageResult};
use crate::schema::{Field, FieldKind};
use crate::value::Value;

/// Separator for multi-valued operands (`in`, `contains`, `ranges`).
pub const OPERAND_DELIMITER: char = ',';

/// Separator between the bounds of a range.
pub const RANGE_DELIMITER: char = ':';

/// The predicate vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    Exact,
    IExact,
    In,
    StartsWith,
    IStartsWith,
    EndsWith,
    IEndsWith,
    Range,
    Ranges,
    IsNull,
}

impl Operator {
    /// Every operator, in vocabulary order.
    pub const ALL: [Operator; 16] = [
        Operator::Eq,
        Operator::Gt,
        Operator::Gte,
        Operator::Lt,
        Operator::Lte,
        Operator::Contains,
        Operator::Exact,
        Operator::IExact,
        Operator::In,
        Operator::StartsWith,
        Operator::IStartsWith,
        Operator::EndsWith,
        Operator::IEndsWith,
        Operator::Range,
        Operator::Ranges,
        Operator::IsNull,
    ];

    /// Query-string suffix.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Gt => "gt",
            Operator::Gte => "gte",
            Operator::Lt => "lt",
            Operator::Lte => "lte",
            Operator::Contains => "contains",
            Operator::Exact => "exact",
            Operator::IExact => "iexact",
            Operator::In => "in",
            Operator::StartsWith => "startswith",
            Operator::IStartsWith => "istartswith",
            Operator::EndsWith => "endswith",
            Operator::IEndsWith => "iendswith",
            Operator::Range => "range",
            Operator::Ranges => "ranges",
            Operator::IsNull => "isnull",
        }
    }

    /// Whether a delimited string operand is split into several values.
    pub fn is_multi(&self) -> bool {
        matches!(self, Operator::In | Operator::Contains | Operator::Ranges)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operator::ALL
            .iter()
            .find(|op| op.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown operator: {}", s))
    }
}

/// An operator bound to a target field and validated operands.
///
/// For [`Operator::Range`] the operands are exactly `[start, end]`; for
/// [`Operator::Ranges`] each operand is a two-element list. Empty range bounds
/// are open and stored as [`Value::Null`].
#[derive(Debug, Clone)]
pub struct Operation {
    operator: Operator,
    target: Arc<Field>,
    operands: Vec<Value>,
    raw_operands: Vec<String>,
}

impl PartialEq for Operation {
    fn eq(&self, other: &Self) -> bool {
        self.operator == other.operator
            && Arc::ptr_eq(&self.target, &other.target)
            && self.operands == other.operands
    }
}

impl Operation {
    /// Parses and validates operands through the target field.
    ///
    /// `expression` is only used to name the filter in errors.
    pub fn parse(
        operator: Operator,
        target: Arc<Field>,
        operand: &Value,
        expression: &str,
    ) -> StorageResult<Self> {
        let raw_operands = split_operands(operator, operand);
        let element = element_field(&target);
        let invalid = || QueryError::InvalidFilter {
            expression: expression.to_string(),
        };

        let operands = match operator {
            Operator::IsNull => {
                let flag = Field::boolean(target.name()).validate(operand)?;
                vec![flag]
            }
            Operator::Range => {
                if let Value::List(items) = operand {
                    match items.as_slice() {
                        [start, end] => {
                            vec![list_bound(element, start)?, list_bound(element, end)?]
                        }
                        _ => return Err(invalid().into()),
                    }
                } else {
                    let bounds: Vec<&str> = raw_operands
                        .first()
                        .map(|r| r.split(RANGE_DELIMITER).collect())
                        .unwrap_or_default();
                    if bounds.len() != 2 {
                        return Err(invalid().into());
                    }
                    vec![bound(element, bounds[0])?, bound(element, bounds[1])?]
                }
            }
            Operator::Ranges => {
                let mut ranges = Vec::with_capacity(raw_operands.len());
                for token in &raw_operands {
                    let (start, end) = token.split_once(RANGE_DELIMITER).ok_or_else(invalid)?;
                    ranges.push(Value::List(vec![bound(element, start)?, bound(element, end)?]));
                }
                ranges
            }
            _ => match operand {
                Value::List(items) => items
                    .iter()
                    .map(|item| element.validate(item))
                    .collect::<Result<Vec<_>, _>>()?,
                _ if operator.is_multi() => raw_operands
                    .iter()
                    .map(|token| element.validate(&Value::from(token.as_str())))
                    .collect::<Result<Vec<_>, _>>()?,
                single => vec![element.validate(single)?],
            },
        };

        Ok(Self {
            operator,
            target,
            operands,
            raw_operands,
        })
    }

    /// Builds an operation from already validated operands.
    pub fn new(operator: Operator, target: Arc<Field>, operands: Vec<Value>) -> Self {
        let raw_operands = operands.iter().map(Value::to_string).collect();
        Self {
            operator,
            target,
            operands,
            raw_operands,
        }
    }

    /// The operator.
    pub fn operator(&self) -> Operator {
        self.operator
    }

    /// The terminal field.
    pub fn target(&self) -> &Arc<Field> {
        &self.target
    }

    /// Validated operands in domain form.
    pub fn operands(&self) -> &[Value] {
        &self.operands
    }

    /// The first operand, for single-valued operators.
    pub fn operand(&self) -> &Value {
        self.operands.first().unwrap_or(&Value::Null)
    }

    /// Operand tokens as they appeared in the request.
    pub fn raw_operands(&self) -> &[String] {
        &self.raw_operands
    }

    /// `(start, end)` pairs of a `ranges` or `range` operation.
    pub fn ranges(&self) -> Vec<(&Value, &Value)> {
        match self.operator {
            Operator::Range => match self.operands.as_slice() {
                [start, end] => vec![(start, end)],
                _ => Vec::new(),
            },
            _ => self
                .operands
                .iter()
                .filter_map(|op| match op.as_list() {
                    Some([start, end]) => Some((start, end)),
                    _ => None,
                })
                .collect(),
        }
    }

    /// Applies `convert` to every scalar operand (range bounds included),
    /// keeping the operand shape.
    pub fn map_operands<F>(&self, mut convert: F) -> StorageResult<Vec<Value>>
    where
        F: FnMut(&Value) -> StorageResult<Value>,
    {
        self.operands
            .iter()
            .map(|op| match (self.operator, op) {
                (Operator::Ranges, Value::List(bounds)) => bounds
                    .iter()
                    .map(|b| if b.is_null() { Ok(Value::Null) } else { convert(b) })
                    .collect::<StorageResult<Vec<_>>>()
                    .map(Value::List),
                (Operator::IsNull, v) => Ok(v.clone()),
                (Operator::Range, v) if v.is_null() => Ok(Value::Null),
                (_, v) => convert(v),
            })
            .collect()
    }
}

/// The field operands are validated through: list elements for list fields.
fn element_field(target: &Field) -> &Field {
    match target.kind() {
        FieldKind::List(inner) => inner,
        _ => target,
    }
}

fn bound(field: &Field, token: &str) -> StorageResult<Value> {
    if token.is_empty() {
        return Ok(Value::Null);
    }
    Ok(field.validate(&Value::from(token))?)
}

fn list_bound(field: &Field, value: &Value) -> StorageResult<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    Ok(field.validate(value)?)
}

fn split_operands(operator: Operator, operand: &Value) -> Vec<String> {
    match operand {
        Value::List(items) => items.iter().map(Value::to_string).collect(),
        Value::String(s) if operator.is_multi() => {
            s.split(OPERAND_DELIMITER).map(str::to_string).collect()
        }
        other => vec![other.to_string()],
    }
}
