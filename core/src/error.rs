//! Error types shared by every stage of the query engine.
//!
//! Every user-facing variant carries a [`Loc`], the machine-readable path of the input that
//! failed (for example `["query", "q.user"]`), so one compiler can serve several parameters.

use core::fmt;

use compact_str::CompactString;
use serde::Serialize;
use smallvec::SmallVec;
use thiserror::Error;

use crate::config::ConfigError;
use crate::constraint::ConstraintViolation;
use crate::permission::Operation;

// =============================================================================
// Loc
// =============================================================================

/// Path to the input that caused an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Loc(SmallVec<[CompactString; 4]>);

impl Loc {
    /// `["query", param]`
    pub fn query(param: &str) -> Self {
        Self::from(["query", param])
    }

    /// Returns a copy of this path with one more segment.
    pub fn join(&self, segment: &str) -> Self {
        let mut next = self.clone();
        next.0.push(CompactString::from(segment));
        next
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(CompactString::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<const N: usize> From<[&str; N]> for Loc {
    fn from(segments: [&str; N]) -> Self {
        Self(segments.iter().map(|s| CompactString::from(*s)).collect())
    }
}

impl<'a> FromIterator<&'a str> for Loc {
    fn from_iter<I: IntoIterator<Item = &'a str>>(segments: I) -> Self {
        Self(segments.into_iter().map(CompactString::from).collect())
    }
}

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            f.write_str(segment)?;
        }
        Ok(())
    }
}

// =============================================================================
// Error kinds
// =============================================================================

/// Coarse classification with stable numeric codes for API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    BadRequest,
    DataConflict,
    QueryParserError,
    NotFound,
    Forbidden,
    Internal,
}

impl ErrorKind {
    pub const fn code(self) -> u16 {
        match self {
            ErrorKind::BadRequest => 1,
            ErrorKind::DataConflict => 2,
            ErrorKind::QueryParserError => 3,
            ErrorKind::NotFound => 4,
            ErrorKind::Forbidden => 5,
            ErrorKind::Internal => 6,
        }
    }
}

/// Serializable error payload for the HTTP layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub loc: Loc,
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub code: u16,
    pub msg: String,
}

// =============================================================================
// QueryError
// =============================================================================

#[derive(Debug, Error)]
pub enum QueryError {
    /// Malformed `fields`, `embed`, `q`, `pq` or `sort_by` string
    #[error("Invalid {param} syntax at position {position} near `{fragment}`: {message}")]
    Grammar {
        loc: Loc,
        param: CompactString,
        fragment: String,
        position: usize,
        message: String,
    },

    /// A column name that is not reachable from the query
    #[error("The column {column} specified in {loc} is not found on the data model")]
    UnknownColumn { loc: Loc, column: String },

    /// A relation name that is not declared for the entity
    #[error("The relation {relation} specified in {loc} is not found on the data model")]
    UnknownRelation { loc: Loc, relation: String },

    /// Well-formed input that cannot be honoured
    #[error("{message}")]
    Validation { loc: Loc, message: String },

    /// Inconsistent builder state or schema declaration
    #[error("Build error: {0}")]
    Build(String),

    /// An `own` grant on an entity without a declared owner column, or without a belongs-to
    /// chain to the table holding it
    #[error("Cannot resolve the owner of {entity}: {reason}")]
    OwnershipResolution { entity: String, reason: String },

    /// Terminal `Deny` state of the permission check
    #[error("Not enough permissions to {operation} {entity}")]
    AuthorizationDenied { entity: String, operation: Operation },

    /// No row matched a single-record lookup
    #[error("Record not found")]
    NotFound { loc: Loc },

    /// Constraint violation translated into a domain conflict
    #[error("{message}")]
    Conflict {
        loc: Loc,
        code: CompactString,
        message: String,
    },

    /// Constraint violation with no known translation
    #[error("Constraint violation: {0}")]
    Constraint(ConstraintViolation),

    /// Opaque failure reported by the executor
    #[error("Execution error: {0}")]
    Execution(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl QueryError {
    pub(crate) fn validation(loc: Loc, message: impl Into<String>) -> Self {
        QueryError::Validation {
            loc,
            message: message.into(),
        }
    }

    pub(crate) fn unknown_column(loc: Loc, column: &str) -> Self {
        QueryError::UnknownColumn {
            loc,
            column: column.to_owned(),
        }
    }

    pub(crate) fn unknown_relation(loc: Loc, relation: &str) -> Self {
        QueryError::UnknownRelation {
            loc,
            relation: relation.to_owned(),
        }
    }

    /// The input path this error points at, if it concerns user input.
    pub fn loc(&self) -> Option<&Loc> {
        match self {
            QueryError::Grammar { loc, .. }
            | QueryError::UnknownColumn { loc, .. }
            | QueryError::UnknownRelation { loc, .. }
            | QueryError::Validation { loc, .. }
            | QueryError::NotFound { loc }
            | QueryError::Conflict { loc, .. } => Some(loc),
            _ => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            QueryError::Grammar { .. }
            | QueryError::UnknownColumn { .. }
            | QueryError::UnknownRelation { .. } => ErrorKind::QueryParserError,
            QueryError::Validation { .. } => ErrorKind::BadRequest,
            QueryError::NotFound { .. } => ErrorKind::NotFound,
            QueryError::AuthorizationDenied { .. } => ErrorKind::Forbidden,
            QueryError::Conflict { .. } | QueryError::Constraint(_) => ErrorKind::DataConflict,
            QueryError::Build(_)
            | QueryError::OwnershipResolution { .. }
            | QueryError::Execution(_)
            | QueryError::Config(_) => ErrorKind::Internal,
        }
    }

    pub fn body(&self) -> ErrorBody {
        let kind = self.kind();
        ErrorBody {
            loc: self.loc().cloned().unwrap_or_default(),
            kind,
            code: kind.code(),
            msg: self.to_string(),
        }
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, QueryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loc_display_joins_segments() {
        let loc = Loc::query("q").join("user");
        assert_eq!(loc.to_string(), "query.q.user");
        assert_eq!(loc.segments().count(), 3);
    }

    #[test]
    fn body_carries_loc_and_code() {
        let err = QueryError::unknown_column(Loc::query("sort_by").join("age"), "age");
        let body = err.body();
        assert_eq!(body.kind, ErrorKind::QueryParserError);
        assert_eq!(body.code, 3);
        assert_eq!(body.loc, Loc::from(["query", "sort_by", "age"]));

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["type"], "QUERY_PARSER_ERROR");
        assert_eq!(json["loc"][2], "age");
    }

    #[test]
    fn internal_errors_have_no_loc() {
        let err = QueryError::Build("join arity".into());
        assert!(err.loc().is_none());
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
