use std::fmt;

use compact_str::CompactString;
use smallvec::SmallVec;

use crate::error::{QueryError, Result};
use crate::value::ColumnType;

/// A typed column of an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: CompactString,
    pub ty: ColumnType,
    pub nullable: bool,
}

impl Column {
    pub fn new(name: &str, ty: ColumnType) -> Self {
        Self {
            name: CompactString::from(name),
            ty,
            nullable: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// An unresolved `table.column` reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnPath {
    pub table: CompactString,
    pub column: CompactString,
}

impl ColumnPath {
    pub fn new(table: &str, column: &str) -> Self {
        Self {
            table: CompactString::from(table),
            column: CompactString::from(column),
        }
    }
}

impl fmt::Display for ColumnPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

/// A column resolved against the schema, annotated with its owning table and type.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    pub table: CompactString,
    pub column: CompactString,
    pub ty: ColumnType,
    pub nullable: bool,
}

impl ColumnRef {
    pub fn of(table: &str, column: &Column) -> Self {
        Self {
            table: CompactString::from(table),
            column: column.name.clone(),
            ty: column.ty,
            nullable: column.nullable,
        }
    }

    pub fn path(&self) -> ColumnPath {
        ColumnPath {
            table: self.table.clone(),
            column: self.column.clone(),
        }
    }
}

/// Row-level ownership anchor of an entity.
///
/// When the acting role is the configured admin role and an admin column is declared, the
/// admin column replaces the owner column.
#[derive(Debug, Clone, PartialEq)]
pub struct OwnerScope {
    pub owner_column: ColumnPath,
    pub admin_column: Option<ColumnPath>,
}

impl OwnerScope {
    pub fn new(table: &str, column: &str) -> Self {
        Self {
            owner_column: ColumnPath::new(table, column),
            admin_column: None,
        }
    }

    pub fn with_admin_column(mut self, table: &str, column: &str) -> Self {
        self.admin_column = Some(ColumnPath::new(table, column));
        self
    }

    pub fn column_for(&self, role: &str, admin_role: &str) -> &ColumnPath {
        match &self.admin_column {
            Some(admin) if role == admin_role => admin,
            _ => &self.owner_column,
        }
    }
}

/// A named relational table or view. Immutable once registered in a [`Schema`](super::Schema).
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDescriptor {
    name: CompactString,
    columns: Vec<Column>,
    primary_key: SmallVec<[CompactString; 2]>,
    owner: Option<OwnerScope>,
}

impl EntityDescriptor {
    pub fn new(name: &str) -> Self {
        Self {
            name: CompactString::from(name),
            columns: Vec::new(),
            primary_key: SmallVec::new(),
            owner: None,
        }
    }

    pub fn with_column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    pub fn with_primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| CompactString::from(*c)).collect();
        self
    }

    pub fn owned_by(mut self, owner: OwnerScope) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_ref(&self, name: &str) -> Option<ColumnRef> {
        self.column(name).map(|c| ColumnRef::of(&self.name, c))
    }

    pub fn column_refs(&self) -> impl Iterator<Item = ColumnRef> + '_ {
        self.columns.iter().map(|c| ColumnRef::of(&self.name, c))
    }

    pub fn primary_key(&self) -> &[CompactString] {
        &self.primary_key
    }

    pub fn owner(&self) -> Option<&OwnerScope> {
        self.owner.as_ref()
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.primary_key.is_empty() {
            return Err(QueryError::Build(format!(
                "entity {} declares no primary key",
                self.name
            )));
        }
        for (i, column) in self.columns.iter().enumerate() {
            if self.columns[..i].iter().any(|c| c.name == column.name) {
                return Err(QueryError::Build(format!(
                    "entity {} declares column {} twice",
                    self.name, column.name
                )));
            }
        }
        if let Some(missing) = self.primary_key.iter().find(|pk| !self.has_column(pk)) {
            return Err(QueryError::Build(format!(
                "primary key column {missing} is not a column of {}",
                self.name
            )));
        }
        Ok(())
    }
}
