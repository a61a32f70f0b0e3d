use compact_str::CompactString;

use super::grant::{Actor, CapabilityOracle, Grant, Operation};
use super::owner::{is_create_record_owner, is_record_owner};
use crate::error::{QueryError, Result};
use crate::executor::Executor;
use crate::row::Row;
use crate::schema::{ColumnPath, RelationGraph};
use crate::value::Value;

/// What an operation is checked against.
#[derive(Debug, Clone, Copy)]
pub enum Target<'a> {
    /// Every row the caller may list
    Collection,
    /// A stored record, by primary-key values in declaration order
    Record(&'a [Value]),
    /// A record about to be created
    Proposed(&'a Row),
}

/// Terminal state of one permission check.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Allow,
    /// Allowed for rows whose owner column equals the actor id
    Scoped(ColumnPath),
    Deny,
}

impl Verdict {
    pub fn is_denied(&self) -> bool {
        matches!(self, Verdict::Deny)
    }
}

/// Runs the grant lookup and, for `own` grants, the ownership check of one operation.
///
/// A `none` grant is decided without touching the database.
pub struct PermissionGate<'g, O> {
    graph: &'g dyn RelationGraph,
    oracle: O,
    admin_role: CompactString,
}

impl<'g, O: CapabilityOracle> PermissionGate<'g, O> {
    pub fn new(graph: &'g dyn RelationGraph, oracle: O, admin_role: &str) -> Self {
        Self {
            graph,
            oracle,
            admin_role: CompactString::from(admin_role),
        }
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    pub async fn check<E>(
        &self,
        executor: &E,
        actor: &Actor,
        entity: &str,
        operation: Operation,
        target: Target<'_>,
    ) -> Result<Verdict>
    where
        E: Executor + ?Sized,
    {
        let grant = self
            .oracle
            .grant(&actor.role, entity, operation.kind())
            .await?;
        crate::crudql_trace_permission!(entity, operation, grant);

        let owner = match grant {
            Grant::None => return Ok(Verdict::Deny),
            Grant::All => return Ok(Verdict::Allow),
            Grant::Own => self.owner_column(entity, &actor.role)?,
        };

        match (operation, target) {
            (Operation::Search, Target::Collection) => {
                // Fail early on a broken chain rather than at build time.
                self.graph.owner_chain(entity, &owner.table)?;
                Ok(Verdict::Scoped(owner))
            }
            (
                Operation::Get | Operation::Update | Operation::Merge | Operation::Delete,
                Target::Record(key),
            ) => {
                let owned =
                    is_record_owner(self.graph, executor, entity, key, &owner, &actor.id).await?;
                Ok(if owned { Verdict::Allow } else { Verdict::Deny })
            }
            (Operation::Create, Target::Proposed(row)) => {
                let owned =
                    is_create_record_owner(self.graph, executor, entity, row, &owner, &actor.id)
                        .await?;
                Ok(if owned { Verdict::Allow } else { Verdict::Deny })
            }
            (operation, target) => Err(QueryError::Build(format!(
                "{operation} on {entity} cannot be checked against {target:?}"
            ))),
        }
    }

    fn owner_column(&self, entity: &str, role: &str) -> Result<ColumnPath> {
        let scope = self.graph.require_entity(entity)?.owner().ok_or_else(|| {
            QueryError::OwnershipResolution {
                entity: entity.to_owned(),
                reason: "an `own` grant applies but no owner column is declared".to_owned(),
            }
        })?;
        Ok(scope.column_for(role, &self.admin_role).clone())
    }
}
