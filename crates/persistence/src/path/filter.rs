use std::str::FromStr;
use std::sync::Arc;

use super::{Hop, Operation, Operator, PATH_DELIMITER, join_path, resolve};
use crate::error::{QueryError, StorageResult};
use crate::schema::{Field, RelatedField, ResourceDescription, SchemaRegistry};
use crate::value::Value;

/// A resolved path plus an operation on its terminal field.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    hops: Vec<Hop>,
    operation: Operation,
}

impl Filter {
    /// Builds a filter from resolved parts.
    pub fn new(hops: Vec<Hop>, operation: Operation) -> Self {
        Self { hops, operation }
    }

    /// Parses `path[__operator]` with its operand. A missing operator means `eq`.
    pub fn parse(
        registry: &SchemaRegistry,
        resource: &Arc<ResourceDescription>,
        expression: &str,
        operand: &Value,
    ) -> StorageResult<Self> {
        let invalid = || QueryError::InvalidFilter {
            expression: expression.to_string(),
        };
        let mut segments: Vec<&str> = expression.split(PATH_DELIMITER).collect();
        let operator = match segments.last().map(|s| Operator::from_str(s)) {
            Some(Ok(op)) => {
                segments.pop();
                op
            }
            _ => Operator::Eq,
        };
        if segments.iter().any(|s| s.is_empty()) {
            return Err(invalid().into());
        }
        let resolved = resolve(registry, resource, &segments, &invalid)?;
        let operation = Operation::parse(operator, resolved.target, operand, expression)?;
        Ok(Self::new(resolved.hops, operation))
    }

    /// Parses every `(expression, operand)` pair.
    pub fn parse_all<'a>(
        registry: &SchemaRegistry,
        resource: &Arc<ResourceDescription>,
        args: impl IntoIterator<Item = (&'a str, &'a Value)>,
    ) -> StorageResult<Vec<Self>> {
        args.into_iter()
            .map(|(expression, operand)| Self::parse(registry, resource, expression, operand))
            .collect()
    }

    /// Resolved hops.
    pub fn hops(&self) -> &[Hop] {
        &self.hops
    }

    /// Relation hops only.
    pub fn relations(&self) -> impl Iterator<Item = &Arc<RelatedField>> {
        self.hops.iter().filter_map(Hop::relation)
    }

    /// The bound operation.
    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    /// Shorthand for the operation's operator.
    pub fn operator(&self) -> Operator {
        self.operation.operator()
    }

    /// Shorthand for the operation's target field.
    pub fn target(&self) -> &Arc<Field> {
        self.operation.target()
    }

    /// Path without the operator, e.g. `topic__title`.
    pub fn path_name(&self) -> String {
        join_path(
            self.hops.iter().map(Hop::name),
            Some(self.operation.target().name()),
        )
    }

    /// Full name, e.g. `topic__title__istartswith`.
    pub fn name(&self) -> String {
        format!(
            "{}{}{}",
            self.path_name(),
            PATH_DELIMITER,
            self.operation.operator()
        )
    }

    /// Whether both filters constrain the same path.
    pub fn same_path(&self, other: &Filter) -> bool {
        self.hops == other.hops && Arc::ptr_eq(self.target(), other.target())
    }
}
