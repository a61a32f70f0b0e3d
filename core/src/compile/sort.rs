use compact_str::CompactString;

use super::ReachableColumns;
use crate::error::{Loc, Result};
use crate::grammar::sort::{Direction, SortItem, SortKeyNode, parse_sort};

/// One `ORDER BY` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub column: CompactString,
    pub direction: Direction,
    /// Set once the key is resolved against a nullable column; drives seek predicates.
    pub nullable: bool,
    /// Table of a joined column; `None` is the queried entity.
    pub table: Option<CompactString>,
}

impl SortKey {
    pub fn new(column: &str, direction: Direction) -> Self {
        Self {
            column: CompactString::from(column),
            direction,
            nullable: false,
            table: None,
        }
    }

    /// Key on a column brought in by a join, such as a derived rank table.
    pub fn joined(table: &str, column: &str, direction: Direction) -> Self {
        Self {
            table: Some(CompactString::from(table)),
            ..Self::new(column, direction)
        }
    }
}

/// Ordered sort keys for the main query plus per-relation keys for embedded rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortSpec {
    keys: Vec<SortKey>,
    embedded: Vec<(CompactString, Vec<SortKey>)>,
}

impl SortSpec {
    pub fn keys(&self) -> &[SortKey] {
        &self.keys
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(|k| k.column.as_str())
    }

    pub fn contains(&self, column: &str) -> bool {
        self.keys.iter().any(|k| k.column == column)
    }

    /// Keys given for the rows embedded under `relation`.
    pub fn embedded(&self, relation: &str) -> Option<&[SortKey]> {
        self.embedded
            .iter()
            .find(|(name, _)| name == relation)
            .map(|(_, keys)| keys.as_slice())
    }

    pub fn embedded_relations(&self) -> impl Iterator<Item = &str> {
        self.embedded.iter().map(|(name, _)| name.as_str())
    }

    /// Same columns with every direction flipped; used to walk backwards from a cursor.
    pub fn reversed(&self) -> Self {
        Self {
            keys: self
                .keys
                .iter()
                .map(|k| SortKey {
                    direction: k.direction.reversed(),
                    ..k.clone()
                })
                .collect(),
            embedded: self.embedded.clone(),
        }
    }

    /// Flags keys whose column is nullable.
    pub fn mark_nullable(&mut self, columns: &ReachableColumns) {
        for key in &mut self.keys {
            let found = match &key.table {
                Some(table) => columns
                    .iter()
                    .find(|c| c.table == *table && c.column == key.column),
                None => columns.get(&key.column),
            };
            key.nullable = found.is_some_and(|c| c.nullable);
        }
    }

    /// Makes `key` the leading sort key, dropping any other key on the same column.
    pub fn prepend(&mut self, key: SortKey) {
        self.keys.retain(|k| k.column != key.column);
        self.keys.insert(0, key);
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    fn set(&mut self, column: &str, direction: Direction) {
        match self.keys.iter_mut().find(|k| k.column == column) {
            Some(key) => key.direction = direction,
            None => self.keys.push(SortKey::new(column, direction)),
        }
    }
}

/// Compiles `sort_by` and appends tie-break columns.
///
/// Tie-break columns are `extra_sort_fields` when given (ascending), otherwise the primary key
/// (descending, so an unsorted listing shows the newest rows first). Primary-key columns still
/// missing after that are appended in the same direction, so the order is always total.
pub fn compile_sort<P: AsRef<str>>(
    sort_by: Option<&str>,
    primary_key: &[P],
    extra_sort_fields: &[&str],
) -> Result<SortSpec> {
    let mut spec = SortSpec::default();

    if let Some(sort_by) = sort_by.filter(|s| !s.trim().is_empty()) {
        let loc = Loc::query("sort_by");
        let items = parse_sort(sort_by)
            .map_err(|e| e.into_query_error("sort_by", sort_by, loc.clone()))?;
        for item in items {
            match item {
                SortItem::Key(SortKeyNode {
                    field, direction, ..
                }) => spec.set(&field, direction),
                SortItem::Group { relation, keys, .. } => {
                    let keys = keys
                        .iter()
                        .map(|k| SortKey::new(&k.field, k.direction))
                        .collect();
                    match spec.embedded.iter_mut().find(|(name, _)| *name == relation) {
                        Some((_, slot)) => *slot = keys,
                        None => spec.embedded.push((relation, keys)),
                    }
                }
            }
        }
    }

    let (tie_break, direction): (Vec<&str>, _) = if extra_sort_fields.is_empty() {
        (primary_key.iter().map(AsRef::as_ref).collect(), Direction::Desc)
    } else {
        (extra_sort_fields.to_vec(), Direction::Asc)
    };
    let primary_key = primary_key.iter().map(AsRef::as_ref);
    for column in tie_break.into_iter().chain(primary_key) {
        if !spec.contains(column) {
            spec.keys.push(SortKey::new(column, direction));
        }
    }

    Ok(spec)
}
