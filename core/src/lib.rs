//! Core of the crudql query engine.
//!
//! Request DSLs (`fields`, `embed`, `q`, `sort_by`) are parsed by [`grammar`], resolved against
//! a [`RelationGraph`] by [`compile`], assembled into one statement by [`QueryBuilder`] and run
//! through an [`Executor`]. Related rows are attached by [`EmbedResolver`], pages are linked by
//! [`pagination`], and `own` grants become owner-chain filters in [`permission`].

pub mod builder;
pub mod compile;
pub mod config;
pub mod constraint;
pub mod embed;
pub mod engine;
pub mod error;
pub mod executor;
pub mod grammar;
pub mod join;
pub mod pagination;
pub mod permission;
pub mod row;
pub mod schema;
pub mod sql;
mod tracing;
pub mod value;

// Re-export key types and traits
pub use builder::{LeadingSort, Projection, QueryBuilder};
pub use compile::{
    CompiledSelection, Predicate, ReachableColumns, Selection, SelectionTree, SortKey, SortSpec,
    compile_relation_search, compile_search, compile_selection, compile_sort,
};
pub use config::{ConfigError, EngineConfig};
pub use constraint::{ConflictMap, ConstraintKind, ConstraintViolation};
pub use embed::EmbedResolver;
pub use engine::{Engine, GetRequest, SearchPage, SearchRequest};
pub use error::{ErrorBody, ErrorKind, Loc, QueryError, Result};
pub use executor::Executor;
pub use grammar::sort::Direction;
pub use join::{JoinClause, JoinTarget, JoinType};
pub use pagination::{LinkBase, PageDirection, PageLinks, pagination_links, seek_expression};
pub use permission::{
    Actor, CachedOracle, CapabilityOracle, Grant, Operation, PermissionGate, PermissionKind,
    Target, Verdict, is_create_record_owner, is_record_owner, scope_to_owner,
};
pub use row::Row;
pub use schema::{
    Column, ColumnPath, ColumnRef, DerivedTable, DerivedTemplate, DynamicRelation, EntityDescriptor,
    OwnerScope, Relation, RelationArgs, RelationContext, RelationGraph, RelationKind, Schema,
};
pub use sql::{BindCounter, Fragment, Placeholders, Statement};
pub use value::{ColumnType, Value};
