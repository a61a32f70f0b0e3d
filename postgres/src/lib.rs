//! PostgreSQL executor for crudql.
//!
//! Renders statements with `$n` placeholders, binds engine values through
//! `tokio_postgres::types::ToSql`, decodes result rows by column type and reports integrity
//! violations as typed constraint errors.

#[cfg(feature = "tokio-postgres")]
pub mod errors;
#[cfg(feature = "tokio-postgres")]
mod executor;
#[cfg(feature = "tokio-postgres")]
pub mod rows;
#[cfg(feature = "tokio-postgres")]
pub mod values;

#[cfg(feature = "tokio-postgres")]
pub use executor::PgExecutor;
#[cfg(feature = "tokio-postgres")]
pub use values::PgValue;
