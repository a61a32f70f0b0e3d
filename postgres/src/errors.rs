//! Mapping of driver errors onto [`QueryError`].

use crudql_core::{ConstraintKind, ConstraintViolation, QueryError};

/// Constraint kind of an integrity-violation SQLSTATE (class 23).
pub fn constraint_kind(sqlstate: &str) -> Option<ConstraintKind> {
    match sqlstate {
        "23505" => Some(ConstraintKind::Unique),
        "23503" => Some(ConstraintKind::ForeignKey),
        "23514" => Some(ConstraintKind::Check),
        "23502" => Some(ConstraintKind::NotNull),
        _ => None,
    }
}

/// Builds the violation reported by the server, if the SQLSTATE is one of ours.
pub fn violation(
    sqlstate: &str,
    table: Option<&str>,
    constraint: Option<&str>,
    detail: Option<&str>,
) -> Option<ConstraintViolation> {
    let mut violation = ConstraintViolation::new(constraint_kind(sqlstate)?);
    if let Some(table) = table {
        violation = violation.on_table(table);
    }
    if let Some(constraint) = constraint {
        violation = violation.named(constraint);
    }
    if let Some(detail) = detail {
        violation = violation.with_detail(detail);
    }
    Some(violation)
}

/// Converts a driver error. Constraint violations keep their table and constraint names so a
/// [`ConflictMap`](crudql_core::ConflictMap) can translate them.
pub fn map_error(error: tokio_postgres::Error) -> QueryError {
    if let Some(db) = error.as_db_error() {
        if let Some(found) = violation(db.code().code(), db.table(), db.constraint(), db.detail()) {
            return QueryError::Constraint(found);
        }
    }
    #[cfg(feature = "tracing")]
    tracing::warn!(error = %error, "crudql.postgres.error");
    QueryError::Execution(error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrity_codes_map_to_kinds() {
        assert_eq!(constraint_kind("23505"), Some(ConstraintKind::Unique));
        assert_eq!(constraint_kind("23503"), Some(ConstraintKind::ForeignKey));
        assert_eq!(constraint_kind("23514"), Some(ConstraintKind::Check));
        assert_eq!(constraint_kind("23502"), Some(ConstraintKind::NotNull));
        assert_eq!(constraint_kind("42P01"), None);
    }

    #[test]
    fn violation_keeps_names() {
        let found = violation(
            "23505",
            Some("patient"),
            Some("patient_code_key"),
            Some("Key (code)=(P1) already exists."),
        )
        .unwrap();
        assert_eq!(found.kind, ConstraintKind::Unique);
        assert_eq!(found.table.as_deref(), Some("patient"));
        assert_eq!(found.constraint.as_deref(), Some("patient_code_key"));
        assert!(violation("40001", None, None, None).is_none());
    }
}
