//! Database constraint violations and their translation into domain conflicts.

use core::fmt;

use hashbrown::HashMap;

use crate::config::{ConflictRule, EngineConfig};
use crate::error::{Loc, QueryError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstraintKind {
    Unique,
    ForeignKey,
    Check,
    NotNull,
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConstraintKind::Unique => "unique",
            ConstraintKind::ForeignKey => "foreign key",
            ConstraintKind::Check => "check",
            ConstraintKind::NotNull => "not null",
        })
    }
}

/// A violated constraint as reported by the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintViolation {
    pub kind: ConstraintKind,
    pub table: Option<String>,
    pub constraint: Option<String>,
    pub detail: Option<String>,
}

impl ConstraintViolation {
    pub fn new(kind: ConstraintKind) -> Self {
        Self {
            kind,
            table: None,
            constraint: None,
            detail: None,
        }
    }

    pub fn on_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn named(mut self, constraint: impl Into<String>) -> Self {
        self.constraint = Some(constraint.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl fmt::Display for ConstraintViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} constraint", self.kind)?;
        if let Some(constraint) = &self.constraint {
            write!(f, " {constraint}")?;
        }
        if let Some(table) = &self.table {
            write!(f, " on {table}")?;
        }
        if let Some(detail) = &self.detail {
            write!(f, ": {detail}")?;
        }
        Ok(())
    }
}

/// Constraint name to domain conflict.
#[derive(Debug, Clone, Default)]
pub struct ConflictMap {
    rules: HashMap<String, ConflictRule>,
}

impl ConflictMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            rules: config
                .conflicts
                .iter()
                .map(|(name, rule)| (name.clone(), rule.clone()))
                .collect(),
        }
    }

    pub fn insert(&mut self, constraint: &str, rule: ConflictRule) -> &mut Self {
        self.rules.insert(constraint.to_owned(), rule);
        self
    }

    /// [`QueryError::Conflict`] when the constraint has a rule, [`QueryError::Constraint`]
    /// otherwise.
    pub fn translate(&self, violation: ConstraintViolation) -> QueryError {
        let rule = violation
            .constraint
            .as_deref()
            .and_then(|name| self.rules.get(name));
        match rule {
            Some(rule) => QueryError::Conflict {
                loc: rule.loc.iter().map(String::as_str).collect::<Loc>(),
                code: rule.code.as_str().into(),
                message: rule.message.clone(),
            },
            None => QueryError::Constraint(violation),
        }
    }

    /// Translates a constraint error, passing any other error through.
    pub fn map_err(&self, err: QueryError) -> QueryError {
        match err {
            QueryError::Constraint(violation) => self.translate(violation),
            other => other,
        }
    }
}
