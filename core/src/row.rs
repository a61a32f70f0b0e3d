//! Ordered column-name → value records as returned by an [`Executor`](crate::Executor).

use compact_str::CompactString;
use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::value::Value;

/// One fetched record. Column order follows the statement's projection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    fields: Vec<(CompactString, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity),
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn get_mut(&mut self, column: &str) -> Option<&mut Value> {
        self.fields
            .iter_mut()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.get(column).is_some()
    }

    /// Sets `column`, replacing an existing value in place or appending a new one.
    pub fn insert(&mut self, column: impl Into<CompactString>, value: impl Into<Value>) {
        let column = column.into();
        let value = value.into();
        match self.get_mut(&column) {
            Some(slot) => *slot = value,
            None => self.fields.push((column, value)),
        }
    }

    pub fn remove(&mut self, column: &str) -> Option<Value> {
        let index = self.fields.iter().position(|(name, _)| name == column)?;
        Some(self.fields.remove(index).1)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for Row
where
    K: Into<CompactString>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (column, value) in iter {
            row.insert(column, value);
        }
        row
    }
}

impl IntoIterator for Row {
    type Item = (CompactString, Value);
    type IntoIter = std::vec::IntoIter<(CompactString, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name.as_str(), value)?;
        }
        map.end()
    }
}

/// Builds a [`Row`] from `column => value` pairs.
///
/// ```ignore
/// let row = row! { "id" => 1, "code" => "A-12" };
/// ```
#[macro_export]
macro_rules! row {
    () => { $crate::Row::new() };
    ($($column:expr => $value:expr),+ $(,)?) => {{
        let mut row = $crate::Row::new();
        $( row.insert($column, $crate::Value::from($value)); )+
        row
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_replaces_in_place() {
        let mut row = crate::row! { "id" => 1, "name" => "a" };
        row.insert("id", 2);
        assert_eq!(row.columns().collect::<Vec<_>>(), ["id", "name"]);
        assert_eq!(row.get("id"), Some(&Value::Int(2)));
    }

    #[test]
    fn serializes_as_ordered_object() {
        let mut row = crate::row! { "z" => 1, "a" => Value::Null };
        row.insert("nested", Value::Records(vec![crate::row! { "x" => true }]));
        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(json, r#"{"z":1,"a":null,"nested":[{"x":true}]}"#);
    }

    #[test]
    fn remove_returns_value() {
        let mut row = crate::row! { "id" => 1 };
        assert_eq!(row.remove("id"), Some(Value::Int(1)));
        assert!(row.is_empty());
        assert_eq!(row.remove("id"), None);
    }
}
