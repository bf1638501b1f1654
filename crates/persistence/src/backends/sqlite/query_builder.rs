//! Compiles a [`Query`] into SQLite statements.
//!
//! Every relation hop becomes a `LEFT JOIN`, keyed by the hop prefix so that
//! repeated traversals of the same path share one alias. Rows are grouped by
//! the root primary key, so to-many joins never duplicate results.

use std::collections::HashMap;
use std::sync::Arc;

use rusqlite::ToSql;
use rusqlite::types::ToSqlOutput;

use crate::error::{QueryError, StorageResult};
use crate::path::{Filter, Hop, Operator, OrderBy};
use crate::schema::{
    Accessor, Field, FieldKind, RelatedField, RelationKind, ResourceDescription, SchemaRegistry,
};
use crate::types::{Slice, SortDirection};
use crate::value::{Value, format_datetime};

/// A fragment of SQL with bound parameters.
#[derive(Debug, Clone, Default)]
pub struct SqlFragment {
    /// The SQL text, using numbered `?N` placeholders.
    pub sql: String,
    /// Bound parameter values.
    pub params: Vec<SqlParam>,
}

impl SqlFragment {
    /// Creates a fragment without parameters.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Creates a fragment with parameters.
    pub fn with_params(sql: impl Into<String>, params: Vec<SqlParam>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// A bound SQL parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    /// String parameter.
    String(String),
    /// Integer parameter.
    Integer(i64),
    /// Float parameter.
    Float(f64),
    /// Null parameter.
    Null,
}

impl From<&Value> for SqlParam {
    /// Booleans become 0/1, dates and datetimes canonical strings, containers JSON text.
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => SqlParam::Null,
            Value::Bool(b) => SqlParam::Integer(i64::from(*b)),
            Value::Int(i) => SqlParam::Integer(*i),
            Value::Float(f) => SqlParam::Float(*f),
            Value::String(s) => SqlParam::String(s.clone()),
            Value::Date(d) => SqlParam::String(d.format("%Y-%m-%d").to_string()),
            Value::DateTime(dt) => SqlParam::String(format_datetime(dt)),
            Value::List(_) | Value::Map(_) => SqlParam::String(value.to_json().to_string()),
        }
    }
}

impl ToSql for SqlParam {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlParam::String(s) => ToSqlOutput::from(s.as_str()),
            SqlParam::Integer(i) => ToSqlOutput::from(*i),
            SqlParam::Float(f) => ToSqlOutput::from(*f),
            SqlParam::Null => ToSqlOutput::from(rusqlite::types::Null),
        })
    }
}

/// Quotes an identifier.
pub(crate) fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// Escapes `%`, `_` and the escape character itself for `LIKE ... ESCAPE '\'`.
fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn json_path<'a>(segments: impl IntoIterator<Item = &'a str>) -> String {
    let mut path = String::from("$");
    for segment in segments {
        path.push('.');
        path.push_str(segment);
    }
    path
}

/// The SQL expression addressing a field.
enum Column {
    /// A scalar expression.
    Plain(String),
    /// A member of each element of a JSON array.
    Each { source: String, member: Vec<String> },
}

/// Builds `SELECT`, `COUNT` and key lookups over one resource table.
pub struct SelectBuilder<'a> {
    registry: &'a SchemaRegistry,
    resource: &'a Arc<ResourceDescription>,
    joins: Vec<String>,
    aliases: HashMap<String, (String, Arc<ResourceDescription>)>,
    conditions: Vec<String>,
    orderings: Vec<String>,
    params: Vec<SqlParam>,
    next_alias: usize,
}

/// Alias of the queried table.
pub const ROOT_ALIAS: &str = "t0";

impl<'a> SelectBuilder<'a> {
    /// Starts a statement over `resource`'s table.
    pub fn new(registry: &'a SchemaRegistry, resource: &'a Arc<ResourceDescription>) -> Self {
        Self {
            registry,
            resource,
            joins: Vec::new(),
            aliases: HashMap::new(),
            conditions: Vec::new(),
            orderings: Vec::new(),
            params: Vec::new(),
            next_alias: 1,
        }
    }

    /// Adds every filter as an `AND`ed condition.
    pub fn filters(mut self, filters: &[Filter]) -> StorageResult<Self> {
        for filter in filters {
            let condition = self.predicate(filter)?;
            self.conditions.push(condition);
        }
        Ok(self)
    }

    /// Restricts to rows whose primary key is among `keys` (backend form).
    pub fn primary_keys(mut self, keys: &[Value]) -> Self {
        let column = self.root_primary_key();
        let condition = self.in_list(&column, keys);
        self.conditions.push(condition);
        self
    }

    /// Adds orderings. The primary key is always the final tie-breaker.
    pub fn order_bys(mut self, order_bys: &[OrderBy]) -> StorageResult<Self> {
        for order_by in order_bys {
            let alias = self.join_hops(order_by.hops())?;
            let column = self.column(&alias, order_by.hops(), order_by.target());
            let Column::Plain(expression) = column else {
                return Err(QueryError::InvalidOrderBy {
                    expression: order_by.name(),
                }
                .into());
            };
            let direction = match order_by.direction() {
                SortDirection::Ascending => "ASC",
                SortDirection::Descending => "DESC",
            };
            self.orderings.push(format!("{} {}", expression, direction));
        }
        Ok(self)
    }

    /// `SELECT` of whole root rows, paged by `slice`.
    pub fn build_select(&self, slice: Option<Slice>) -> SqlFragment {
        let mut sql = format!(
            "SELECT {root}.* FROM {body} GROUP BY {pk}",
            root = ROOT_ALIAS,
            body = self.body(),
            pk = self.root_primary_key(),
        );
        let mut orderings = self.orderings.clone();
        orderings.push(format!("{} ASC", self.root_primary_key()));
        sql.push_str(" ORDER BY ");
        sql.push_str(&orderings.join(", "));

        let mut params = self.params.clone();
        if let Some(slice) = slice {
            params.push(SqlParam::Integer(slice.width() as i64));
            params.push(SqlParam::Integer(slice.start as i64));
            sql.push_str(&format!(" LIMIT ?{} OFFSET ?{}", params.len() - 1, params.len()));
        }
        SqlFragment::with_params(sql, params)
    }

    /// `COUNT` of distinct matching root rows.
    pub fn build_count(&self) -> SqlFragment {
        SqlFragment::with_params(
            format!(
                "SELECT COUNT(DISTINCT {}) FROM {}",
                self.root_primary_key(),
                self.body()
            ),
            self.params.clone(),
        )
    }

    /// Distinct primary keys of matching root rows.
    pub fn build_keys(&self) -> SqlFragment {
        SqlFragment::with_params(
            format!(
                "SELECT DISTINCT {pk} FROM {body} ORDER BY {pk}",
                pk = self.root_primary_key(),
                body = self.body()
            ),
            self.params.clone(),
        )
    }

    fn body(&self) -> String {
        let mut body = format!("{} AS {}", quote(self.resource.binding().name()), ROOT_ALIAS);
        for join in &self.joins {
            body.push(' ');
            body.push_str(join);
        }
        if !self.conditions.is_empty() {
            body.push_str(" WHERE ");
            body.push_str(
                &self
                    .conditions
                    .iter()
                    .map(|c| format!("({})", c))
                    .collect::<Vec<_>>()
                    .join(" AND "),
            );
        }
        body
    }

    fn root_primary_key(&self) -> String {
        format!(
            "{}.{}",
            ROOT_ALIAS,
            quote(self.resource.primary_key().accessor().column())
        )
    }

    fn bind(&mut self, value: &Value) -> String {
        self.params.push(SqlParam::from(value));
        format!("?{}", self.params.len())
    }

    fn alias(&mut self, prefix: &str) -> String {
        let alias = format!("{}{}", prefix, self.next_alias);
        self.next_alias += 1;
        alias
    }

    /// Joins every relation hop not joined yet; returns the alias of the
    /// table reached.
    fn join_hops(&mut self, hops: &[Hop]) -> StorageResult<String> {
        let mut current = (ROOT_ALIAS.to_string(), self.resource.clone());
        let mut prefix = String::new();
        for relation in hops.iter().filter_map(Hop::relation) {
            if !prefix.is_empty() {
                prefix.push_str("__");
            }
            prefix.push_str(relation.name());
            if let Some(joined) = self.aliases.get(&prefix) {
                current = joined.clone();
                continue;
            }
            let target = self.registry.resource(relation.target())?.clone();
            let alias = self.join_relation(&current.0, &current.1, relation, &target);
            current = (alias, target);
            self.aliases.insert(prefix.clone(), current.clone());
        }
        Ok(current.0)
    }

    fn join_relation(
        &mut self,
        owner_alias: &str,
        owner: &ResourceDescription,
        relation: &RelatedField,
        target: &ResourceDescription,
    ) -> String {
        let alias = self.alias("t");
        let table = quote(target.binding().name());
        let target_pk = quote(target.primary_key().accessor().column());
        let owner_pk = quote(owner.primary_key().accessor().column());
        let column = quote(relation.key_column().unwrap_or_default());
        let join = match relation.kind() {
            RelationKind::ForeignKey | RelationKind::OneToOne => format!(
                "LEFT JOIN {table} AS {alias} ON {alias}.{target_pk} = {owner_alias}.{column}"
            ),
            RelationKind::ReverseForeignKey | RelationKind::ReverseOneToOne => format!(
                "LEFT JOIN {table} AS {alias} ON {alias}.{column} = {owner_alias}.{owner_pk}"
            ),
            RelationKind::ManyToMany(through) => {
                let link = self.alias("j");
                format!(
                    "LEFT JOIN {through} AS {link} ON {link}.{source} = {owner_alias}.{owner_pk} \
                     LEFT JOIN {table} AS {alias} ON {alias}.{target_pk} = {link}.{target}",
                    through = quote(&through.table),
                    source = quote(&through.source_column),
                    target = quote(&through.target_column),
                )
            }
        };
        self.joins.push(join);
        alias
    }

    fn column(&self, alias: &str, hops: &[Hop], target: &Field) -> Column {
        let embedded: Vec<&Field> = hops
            .iter()
            .filter_map(|h| match h {
                Hop::Embedded(field) => Some(field.as_ref()),
                Hop::Relation(_) => None,
            })
            .collect();
        let Some(first) = embedded.first() else {
            return Column::Plain(accessor_expression(alias, target.accessor()));
        };

        let base = format!("{}.{}", alias, quote(first.accessor().column()));
        let mut path: Vec<String> = first.accessor().nested().to_vec();
        let mut each: Option<String> = None;
        if matches!(first.kind(), FieldKind::List(_)) {
            each = Some(extract(&base, &path));
            path.clear();
        }
        for field in embedded.iter().skip(1) {
            path.extend(field.accessor().path().split('.').map(str::to_string));
            if each.is_none() && matches!(field.kind(), FieldKind::List(_)) {
                each = Some(extract(&base, &path));
                path.clear();
            }
        }
        path.extend(target.accessor().path().split('.').map(str::to_string));
        match each {
            Some(source) => Column::Each {
                source,
                member: path,
            },
            None => Column::Plain(extract(&base, &path)),
        }
    }

    fn predicate(&mut self, filter: &Filter) -> StorageResult<String> {
        let alias = self.join_hops(filter.hops())?;
        let target = filter.target();
        let element = element_field(target);
        let operation = filter.operation();
        let operands =
            operation.map_operands(|v| element.validate_for_backend(v).map_err(Into::into))?;
        let operator = operation.operator();

        let column = match self.column(&alias, filter.hops(), target) {
            Column::Plain(expression) if matches!(target.kind(), FieldKind::List(_)) => {
                Column::Each {
                    source: expression,
                    member: Vec::new(),
                }
            }
            column => column,
        };
        match column {
            Column::Plain(expression) => Ok(self.operator_sql(&expression, operator, &operands)),
            Column::Each { source, member } if operator == Operator::Contains => {
                let parts: Vec<String> = operands
                    .iter()
                    .map(|operand| {
                        self.exists(&source, &member, Operator::Eq, std::slice::from_ref(operand))
                    })
                    .collect();
                Ok(all_of(parts))
            }
            Column::Each { source, member } => {
                Ok(self.exists(&source, &member, operator, &operands))
            }
        }
    }

    fn exists(
        &mut self,
        source: &str,
        member: &[String],
        operator: Operator,
        operands: &[Value],
    ) -> String {
        let alias = self.alias("je");
        let value = format!("{}.value", alias);
        let element = if member.is_empty() {
            value
        } else {
            extract(&value, member)
        };
        let inner = self.operator_sql(&element, operator, operands);
        format!(
            "EXISTS (SELECT 1 FROM json_each({}) AS {} WHERE {})",
            source, alias, inner
        )
    }

    fn operator_sql(&mut self, column: &str, operator: Operator, operands: &[Value]) -> String {
        let first = operands.first().cloned().unwrap_or(Value::Null);
        match operator {
            Operator::Eq | Operator::Exact if first.is_null() => format!("{} IS NULL", column),
            Operator::Eq | Operator::Exact => format!("{} = {}", column, self.bind(&first)),
            Operator::Gt => format!("{} > {}", column, self.bind(&first)),
            Operator::Gte => format!("{} >= {}", column, self.bind(&first)),
            Operator::Lt => format!("{} < {}", column, self.bind(&first)),
            Operator::Lte => format!("{} <= {}", column, self.bind(&first)),
            Operator::IExact => format!("LOWER({}) = LOWER({})", column, self.bind(&first)),
            Operator::Contains => {
                let parts = operands
                    .iter()
                    .map(|operand| format!("instr({}, {}) > 0", column, self.bind(operand)))
                    .collect();
                all_of(parts)
            }
            Operator::In => self.in_list(column, operands),
            Operator::StartsWith => {
                let p = self.bind(&first);
                format!("substr({column}, 1, length({p})) = {p}")
            }
            Operator::EndsWith => {
                let p = self.bind(&first);
                format!("substr({column}, -length({p})) = {p}")
            }
            Operator::IStartsWith => {
                let pattern = Value::String(format!("{}%", escape_like(&first.to_string())));
                format!("{} LIKE {} ESCAPE '\\'", column, self.bind(&pattern))
            }
            Operator::IEndsWith => {
                let pattern = Value::String(format!("%{}", escape_like(&first.to_string())));
                format!("{} LIKE {} ESCAPE '\\'", column, self.bind(&pattern))
            }
            Operator::Range => match operands {
                [start, end] => self.between(column, start, end),
                _ => "0".to_string(),
            },
            Operator::Ranges => {
                let parts: Vec<String> = operands
                    .iter()
                    .filter_map(|range| match range.as_list() {
                        Some([start, end]) => Some(self.between(column, start, end)),
                        _ => None,
                    })
                    .collect();
                if parts.is_empty() {
                    "0".to_string()
                } else {
                    parts
                        .iter()
                        .map(|p| format!("({})", p))
                        .collect::<Vec<_>>()
                        .join(" OR ")
                }
            }
            Operator::IsNull => match first.as_bool() {
                Some(false) => format!("{} IS NOT NULL", column),
                _ => format!("{} IS NULL", column),
            },
        }
    }

    fn in_list(&mut self, column: &str, operands: &[Value]) -> String {
        if operands.is_empty() {
            return "0".to_string();
        }
        let placeholders: Vec<String> = operands.iter().map(|v| self.bind(v)).collect();
        format!("{} IN ({})", column, placeholders.join(", "))
    }

    fn between(&mut self, column: &str, start: &Value, end: &Value) -> String {
        match (start.is_null(), end.is_null()) {
            (false, false) => format!(
                "{} BETWEEN {} AND {}",
                column,
                self.bind(start),
                self.bind(end)
            ),
            (false, true) => format!("{} >= {}", column, self.bind(start)),
            (true, false) => format!("{} <= {}", column, self.bind(end)),
            (true, true) => "1".to_string(),
        }
    }
}

fn all_of(parts: Vec<String>) -> String {
    if parts.is_empty() {
        return "1".to_string();
    }
    parts
        .iter()
        .map(|p| format!("({})", p))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn extract(base: &str, path: &[String]) -> String {
    if path.is_empty() {
        return base.to_string();
    }
    format!(
        "json_extract({}, '{}')",
        base,
        json_path(path.iter().map(String::as_str))
    )
}

fn accessor_expression(alias: &str, accessor: &Accessor) -> String {
    let column = format!("{}.{}", alias, quote(accessor.column()));
    extract(&column, accessor.nested())
}

/// The field list operands are validated through.
fn element_field(target: &Field) -> &Field {
    match target.kind() {
        FieldKind::List(inner) => inner,
        _ => target,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::fixtures::registry;
    use crate::query::Query;
    use std::sync::Arc;

    fn query(resource: &str, params: &[(&str, &str)]) -> Query {
        let params: Vec<(String, String)> = params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Query::for_resource(Arc::new(registry()), resource)
            .unwrap()
            .parse(&params)
            .unwrap()
    }

    #[test]
    fn test_two_hop_join_and_operator() {
        let query = query("chat_sessions", &[("chat__topic__title__istartswith", "We_b")]);
        let builder = SelectBuilder::new(query.registry(), query.resource())
            .filters(query.filters())
            .unwrap();
        let select = builder.build_select(Some(Slice::new(0, 20)));
        assert!(select.sql.contains(
            "LEFT JOIN \"chats\" AS t1 ON t1.\"id\" = t0.\"chat_id\" \
             LEFT JOIN \"topics\" AS t2 ON t2.\"id\" = t1.\"topic_id\""
        ));
        assert!(select.sql.contains("t2.\"title\" LIKE ?1 ESCAPE '\\'"));
        assert!(select.sql.ends_with("LIMIT ?2 OFFSET ?3"));
        assert_eq!(select.params[0], SqlParam::String("We\\_b%".to_string()));
        assert_eq!(select.params[1], SqlParam::Integer(20));

        let count = builder.build_count();
        assert!(count.sql.starts_with("SELECT COUNT(DISTINCT t0.\"id\")"));
        assert_eq!(count.params.len(), 1);
    }

    #[test]
    fn test_shared_join_prefix() {
        let query = query(
            "chat_sessions",
            &[("chat__name", "a"), ("chat__topic__title", "b"), ("order_by", "chat__name__desc")],
        );
        let builder = SelectBuilder::new(query.registry(), query.resource())
            .filters(query.filters())
            .unwrap()
            .order_bys(query.order_bys())
            .unwrap();
        let select = builder.build_select(None);
        assert_eq!(select.sql.matches("LEFT JOIN \"chats\"").count(), 1);
        assert!(select.sql.contains("ORDER BY t1.\"name\" DESC, t0.\"id\" ASC"));
    }

    #[test]
    fn test_many_to_many_join() {
        let query = query("chat_sessions", &[("users__name__in", "ann,bob")]);
        let select = SelectBuilder::new(query.registry(), query.resource())
            .filters(query.filters())
            .unwrap()
            .build_select(None);
        assert!(select.sql.contains(
            "LEFT JOIN \"chat_session_users\" AS j2 ON j2.\"chat_session_id\" = t0.\"id\""
        ));
        assert!(select.sql.contains("t1.\"name\" IN (?1, ?2)"));
    }

    #[test]
    fn test_embedded_list_filter() {
        let query = query("users", &[("skills__name", "rust")]);
        let select = SelectBuilder::new(query.registry(), query.resource())
            .filters(query.filters())
            .unwrap()
            .build_select(None);
        assert!(select.sql.contains(
            "EXISTS (SELECT 1 FROM json_each(t0.\"skills\") AS je1 WHERE json_extract(je1.value, '$.name') = ?1)"
        ));
    }

    #[test]
    fn test_range_and_isnull() {
        let query = query(
            "chats",
            &[("id__range", "3:"), ("topic__isnull", "false")],
        );
        let select = SelectBuilder::new(query.registry(), query.resource())
            .filters(query.filters())
            .unwrap()
            .build_select(None);
        assert!(select.sql.contains("(t0.\"id\" >= ?1)"));
        assert!(select.sql.contains("t1.\"id\" IS NOT NULL"));
    }
}
