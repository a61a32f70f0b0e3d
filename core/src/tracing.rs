//! Tracing utilities for query, embed and permission observability.
//!
//! Enable the `tracing` feature to emit events via the `tracing` crate.
//! These macros no-op when the feature is disabled, avoiding `#[cfg]` boilerplate
//! at every call site.

/// Emit a debug-level tracing event with the SQL text and parameter count.
///
/// ```ignore
/// crudql_trace_query!(&sql, params.len());
/// ```
#[macro_export]
macro_rules! crudql_trace_query {
    ($sql:expr, $param_count:expr) => {
        #[cfg(feature = "tracing")]
        tracing::debug!(sql = %$sql, params = $param_count, "crudql.query");
    };
}

/// Emit a debug-level tracing event for one embed fetch.
///
/// ```ignore
/// crudql_trace_embed!("visits", keys.len(), rows.len());
/// ```
#[macro_export]
macro_rules! crudql_trace_embed {
    ($relation:expr, $keys:expr, $rows:expr) => {
        #[cfg(feature = "tracing")]
        tracing::debug!(relation = %$relation, keys = $keys, rows = $rows, "crudql.embed");
    };
}

/// Emit a debug-level tracing event for a permission decision.
///
/// ```ignore
/// crudql_trace_permission!("patient", operation, grant);
/// ```
#[macro_export]
macro_rules! crudql_trace_permission {
    ($entity:expr, $operation:expr, $grant:expr) => {
        #[cfg(feature = "tracing")]
        tracing::debug!(entity = %$entity, operation = %$operation, grant = ?$grant, "crudql.permission");
    };
}

/// Emit a trace-level event when a permission lookup misses the cache.
///
/// ```ignore
/// crudql_trace_cache_miss!(role, entity, kind);
/// ```
#[macro_export]
macro_rules! crudql_trace_cache_miss {
    ($role:expr, $entity:expr, $kind:expr) => {
        #[cfg(feature = "tracing")]
        tracing::trace!(role = %$role, entity = %$entity, kind = ?$kind, "crudql.permission.cache_miss");
    };
}
