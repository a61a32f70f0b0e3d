//! # crudql
//!
//! A query engine for generic HTTP CRUD endpoints. Query-string DSLs select fields, embed
//! related entities, filter and sort; results are paginated with keyset cursors and scoped to
//! their owners when a role only holds an `own` grant.
//!
//! ## Quick Start
//!
//! ```rust
//! use crudql::prelude::*;
//!
//! # fn main() -> crudql::Result<()> {
//! let mut schema = Schema::new();
//! schema
//!     .register(
//!         EntityDescriptor::new("clinic")
//!             .with_column(Column::new("id", ColumnType::BigInt))
//!             .with_column(Column::new("name", ColumnType::Text))
//!             .with_primary_key(&["id"]),
//!     )?
//!     .register(
//!         EntityDescriptor::new("patient")
//!             .with_column(Column::new("id", ColumnType::BigInt))
//!             .with_column(Column::new("code", ColumnType::Text))
//!             .with_column(Column::new("clinic_id", ColumnType::BigInt))
//!             .with_primary_key(&["id"]),
//!     )?;
//! schema.relate(Relation::belongs_to("clinic", "patient", "clinic", &[("clinic_id", "id")]))?;
//!
//! let mut builder = QueryBuilder::new(&schema, "patient")?;
//! let sort = compile_sort(Some("code:asc"), builder.entity().primary_key(), &[])?;
//! builder.apply_sort(&sort)?.limit(20);
//! let columns = builder.reachable_columns()?;
//! let filter = compile_search("code.beg:'p'", &columns, builder.binds_mut(), Loc::query("q"))?;
//! builder.where_(filter);
//!
//! let statement = builder.build()?;
//! assert_eq!(
//!     statement.sql(),
//!     r#"SELECT "patient"."id", "patient"."code", "patient"."clinic_id" FROM "patient" WHERE (lower("patient"."code") LIKE :patient_code_1) ORDER BY "patient"."code" ASC, "patient"."id" DESC LIMIT 21"#
//! );
//! # Ok(())
//! # }
//! ```
//!
//! ## Executors
//!
//! | Database   | Driver         | Feature Flag     |
//! |------------|----------------|------------------|
//! | PostgreSQL | tokio-postgres | `tokio-postgres` |
//!
//! Any other store plugs in by implementing [`Executor`].

pub use crudql_core::*;

/// PostgreSQL executor over `tokio_postgres`.
#[cfg(feature = "tokio-postgres")]
pub mod postgres {
    pub use crudql_postgres::*;
}

/// Everything needed to declare a schema and serve requests.
pub mod prelude {
    pub use crudql_core::{
        Actor, CachedOracle, CapabilityOracle, Column, ColumnPath, ColumnType, Direction,
        DynamicRelation, DerivedTemplate, EmbedResolver, Engine, EngineConfig, EntityDescriptor,
        Executor, GetRequest, Grant, LeadingSort, LinkBase, Loc, Operation, OwnerScope, QueryBuilder,
        QueryError, Relation, RelationContext, RelationGraph, Row, Schema, SearchPage,
        SearchRequest, SortSpec, Target, Value, Verdict, compile_search, compile_selection,
        compile_sort, pagination_links, row,
    };

    #[cfg(feature = "tokio-postgres")]
    pub use crudql_postgres::PgExecutor;
}
