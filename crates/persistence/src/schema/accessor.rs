//! Resolved accessors for dotted backend attribute paths.

use std::collections::BTreeMap;

use crate::value::Value;

/// Reads and writes a (possibly nested) attribute of a backend row.
///
/// The path is split once when the field is declared; `profile.city` addresses
/// the `city` member of the `profile` column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accessor {
    segments: Vec<String>,
}

impl Accessor {
    /// Resolves a dotted path.
    pub fn new(path: &str) -> Self {
        Self {
            segments: path.split('.').map(str::to_string).collect(),
        }
    }

    /// The top-level column or document key.
    pub fn column(&self) -> &str {
        &self.segments[0]
    }

    /// Members below the top-level column.
    pub fn nested(&self) -> &[String] {
        &self.segments[1..]
    }

    /// Returns true when the path descends into a column.
    pub fn is_nested(&self) -> bool {
        self.segments.len() > 1
    }

    /// Full dotted path.
    pub fn path(&self) -> String {
        self.segments.join(".")
    }

    /// Reads the attribute, or `None` when any segment is absent.
    pub fn get<'a>(&self, row: &'a BTreeMap<String, Value>) -> Option<&'a Value> {
        let mut current = row.get(self.column())?;
        for segment in self.nested() {
            current = current.get(segment)?;
        }
        Some(current)
    }

    /// Writes the attribute, creating intermediate maps as needed.
    pub fn set(&self, row: &mut BTreeMap<String, Value>, value: Value) {
        let mut map = row;
        let (last, parents) = match self.segments.split_last() {
            Some(split) => split,
            None => return,
        };
        for segment in parents {
            let entry = map
                .entry(segment.clone())
                .or_insert_with(|| Value::Map(BTreeMap::new()));
            if !matches!(entry, Value::Map(_)) {
                *entry = Value::Map(BTreeMap::new());
            }
            map = match entry {
                Value::Map(inner) => inner,
                _ => return,
            };
        }
        map.insert(last.clone(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_access() {
        let accessor = Accessor::new("title");
        let mut row = BTreeMap::new();
        accessor.set(&mut row, Value::from("Rust"));
        assert_eq!(accessor.get(&row), Some(&Value::from("Rust")));
        assert!(!accessor.is_nested());
        assert_eq!(accessor.column(), "title");
    }

    #[test]
    fn test_nested_access() {
        let accessor = Accessor::new("profile.location.city");
        let mut row = BTreeMap::new();
        accessor.set(&mut row, Value::from("Boston"));
        assert_eq!(accessor.get(&row), Some(&Value::from("Boston")));
        assert_eq!(accessor.column(), "profile");
        assert_eq!(accessor.nested(), ["location".to_string(), "city".to_string()]);
        assert!(Accessor::new("profile.zip").get(&row).is_none());
    }

    #[test]
    fn test_set_replaces_scalar_parent() {
        let accessor = Accessor::new("profile.city");
        let mut row = BTreeMap::new();
        row.insert("profile".to_string(), Value::Int(1));
        accessor.set(&mut row, Value::from("Austin"));
        assert_eq!(accessor.get(&row), Some(&Value::from("Austin")));
    }
}
