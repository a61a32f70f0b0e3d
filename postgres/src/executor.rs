use crudql_core::sql::Placeholders;
use crudql_core::{Executor, Result, Row, Statement};
use smallvec::SmallVec;
use tokio_postgres::GenericClient;
use tokio_postgres::types::ToSql;

use crate::errors::map_error;
use crate::rows::decode_row;
use crate::values::PgValue;

/// [`Executor`] over a tokio-postgres client or transaction.
///
/// # Example
///
/// ```no_run
/// use crudql_postgres::PgExecutor;
/// use tokio_postgres::NoTls;
///
/// # async fn run() -> Result<(), tokio_postgres::Error> {
/// let (client, connection) = tokio_postgres::connect("host=localhost user=postgres", NoTls).await?;
/// tokio::spawn(async move { connection.await });
///
/// let executor = PgExecutor::new(&client);
/// # let _ = executor;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct PgExecutor<'c, C> {
    client: &'c C,
}

impl<'c, C: GenericClient + Sync> PgExecutor<'c, C> {
    #[inline]
    pub const fn new(client: &'c C) -> Self {
        Self { client }
    }

    /// Gets a reference to the underlying client
    #[inline]
    pub fn client(&self) -> &C {
        self.client
    }
}

impl<C: GenericClient + Sync> Executor for PgExecutor<'_, C> {
    async fn fetch_all(&self, statement: &Statement) -> Result<Vec<Row>> {
        let rendered = statement.render(Placeholders::Numbered);
        let values: SmallVec<[PgValue<'_>; 8]> = rendered.values().map(PgValue).collect();

        // Convert PgValue to &dyn ToSql
        let param_refs: SmallVec<[&(dyn ToSql + Sync); 8]> = values
            .iter()
            .map(|v| v as &(dyn ToSql + Sync))
            .collect();

        let rows = self
            .client
            .query(rendered.sql.as_str(), &param_refs[..])
            .await
            .map_err(map_error)?;

        rows.iter().map(decode_row).collect()
    }
}
