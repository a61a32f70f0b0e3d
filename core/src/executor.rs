//! The database seam.
//!
//! The engine never opens connections, retries or manages transactions. It hands finished
//! [`Statement`]s to an [`Executor`] and consumes the rows it returns. Implementations map
//! constraint violations to [`QueryError::Constraint`](crate::QueryError::Constraint) so they
//! can be translated by a [`ConflictMap`](crate::ConflictMap).

use core::future::Future;

use crate::error::Result;
use crate::row::Row;
use crate::sql::Statement;

pub trait Executor: Sync {
    /// Runs a statement and returns every row in order.
    fn fetch_all(&self, statement: &Statement) -> impl Future<Output = Result<Vec<Row>>> + Send;

    /// Runs a statement and returns its first row, if any.
    fn fetch_optional(
        &self,
        statement: &Statement,
    ) -> impl Future<Output = Result<Option<Row>>> + Send {
        async move { Ok(self.fetch_all(statement).await?.into_iter().next()) }
    }
}

impl<E: Executor + ?Sized> Executor for &E {
    fn fetch_all(&self, statement: &Statement) -> impl Future<Output = Result<Vec<Row>>> + Send {
        (**self).fetch_all(statement)
    }

    fn fetch_optional(
        &self,
        statement: &Statement,
    ) -> impl Future<Output = Result<Option<Row>>> + Send {
        (**self).fetch_optional(statement)
    }
}
