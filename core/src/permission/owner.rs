use std::collections::VecDeque;

use compact_str::CompactString;
use hashbrown::HashSet;

use crate::builder::QueryBuilder;
use crate::error::{Loc, QueryError, Result};
use crate::executor::Executor;
use crate::row::Row;
use crate::schema::{ColumnPath, JoinOperand, Relation, RelationGraph, RelationKind, RelationTarget};
use crate::sql::Fragment;
use crate::value::Value;

/// Result-set name of the owner column in ownership lookups.
const OWNER_ALIAS: &str = "__owner";

/// Shortest chain of belongs-to relations leading from `entity` to `owner_table`.
///
/// Empty when the entity holds the owner column itself. Fails with
/// [`QueryError::OwnershipResolution`] when no chain exists, which is a schema defect.
pub fn resolve_owner_chain<G>(graph: &G, entity: &str, owner_table: &str) -> Result<Vec<Relation>>
where
    G: RelationGraph + ?Sized,
{
    if entity == owner_table {
        return Ok(Vec::new());
    }
    let mut visited: HashSet<CompactString> = HashSet::new();
    visited.insert(CompactString::from(entity));
    let mut queue: VecDeque<(CompactString, Vec<Relation>)> = VecDeque::new();
    queue.push_back((CompactString::from(entity), Vec::new()));

    while let Some((table, path)) = queue.pop_front() {
        let parents = graph
            .static_relations(&table)
            .iter()
            .filter(|r| r.kind == RelationKind::BelongsToOne);
        for relation in parents {
            let RelationTarget::Entity(target) = &relation.target else {
                continue;
            };
            let mut next = path.clone();
            next.push(relation.clone());
            if target == owner_table {
                return Ok(next);
            }
            if visited.insert(target.clone()) {
                queue.push_back((target.clone(), next));
            }
        }
    }

    Err(QueryError::OwnershipResolution {
        entity: entity.to_owned(),
        reason: format!("{owner_table} is not reachable through belongs-to relations"),
    })
}

/// Restricts `builder` to rows whose owner column equals `actor_id`.
///
/// Every relation of the owner chain is joined, then `owner_column = :owner_...` is added.
pub fn scope_to_owner<'b, 'g>(
    builder: &'b mut QueryBuilder<'g>,
    owner_column: &ColumnPath,
    actor_id: &Value,
) -> Result<&'b mut QueryBuilder<'g>> {
    let chain = builder
        .graph()
        .owner_chain(builder.entity().name(), &owner_column.table)?;
    for relation in chain.iter() {
        builder.add_relation(relation);
    }
    let name = builder.binds_mut().next_name("owner", &owner_column.column);
    let mut filter = Fragment::new();
    filter
        .push_column(&owner_column.table, &owner_column.column)
        .push_raw(" = ")
        .push_param(name, actor_id.clone());
    Ok(builder.where_(filter))
}

/// Whether the stored record identified by `key` (primary-key values in declaration order)
/// belongs to `actor_id`.
///
/// Fails with [`QueryError::NotFound`] when no such record exists.
pub async fn is_record_owner<E>(
    graph: &dyn RelationGraph,
    executor: &E,
    entity: &str,
    key: &[Value],
    owner_column: &ColumnPath,
    actor_id: &Value,
) -> Result<bool>
where
    E: Executor + ?Sized,
{
    let mut builder = owner_lookup(graph, entity, owner_column)?;
    let primary_key = builder.entity().primary_key().to_vec();
    if primary_key.len() != key.len() {
        return Err(QueryError::validation(
            Loc::from(["path", "id"]),
            format!(
                "{entity} is identified by {} key values, got {}",
                primary_key.len(),
                key.len()
            ),
        ));
    }
    for (column, value) in primary_key.iter().zip(key) {
        let path = ColumnPath::new(entity, column);
        equals(&mut builder, &path, "record", value.clone());
    }
    let statement = builder.build()?;
    let row = executor
        .fetch_optional(&statement)
        .await?
        .ok_or_else(|| QueryError::NotFound {
            loc: Loc::from(["path", "id"]),
        })?;
    Ok(owned_by(&row, actor_id))
}

/// Whether a record about to be created would belong to `actor_id`.
///
/// When the owner column lives on the entity itself the proposed value is compared directly.
/// Otherwise the first parent on the owner chain is looked up through the proposed foreign
/// key and its owner is compared; a missing parent is [`QueryError::NotFound`].
pub async fn is_create_record_owner<E>(
    graph: &dyn RelationGraph,
    executor: &E,
    entity: &str,
    proposed: &Row,
    owner_column: &ColumnPath,
    actor_id: &Value,
) -> Result<bool>
where
    E: Executor + ?Sized,
{
    if owner_column.table == entity {
        return Ok(proposed
            .get(&owner_column.column)
            .is_some_and(|value| same_identity(value, actor_id)));
    }

    let chain = graph.owner_chain(entity, &owner_column.table)?;
    let Some(first) = chain.first() else {
        return Ok(false);
    };
    let parent = first.target_table();
    let mut builder = owner_lookup(graph, parent, owner_column)?;
    for pair in &first.join {
        let value = match &pair.left {
            JoinOperand::Column(column) => match proposed.get(column) {
                Some(value) if !value.is_null() => value.clone(),
                _ => {
                    return Err(QueryError::validation(
                        Loc::from(["body", column.as_str()]),
                        format!("{column} is required to check ownership of a new {entity}"),
                    ));
                }
            },
            JoinOperand::Literal(value) => value.clone(),
        };
        equals(&mut builder, &ColumnPath::new(parent, &pair.right), "parent", value);
    }
    let statement = builder.build()?;
    let row = executor
        .fetch_optional(&statement)
        .await?
        .ok_or_else(|| QueryError::NotFound {
            loc: Loc::from(["body", first.name.as_str()]),
        })?;
    Ok(owned_by(&row, actor_id))
}

/// Builder over `entity` projecting only the owner column through the owner chain.
fn owner_lookup<'g>(
    graph: &'g dyn RelationGraph,
    entity: &str,
    owner_column: &ColumnPath,
) -> Result<QueryBuilder<'g>> {
    let mut builder = QueryBuilder::new(graph, entity)?;
    for relation in graph.owner_chain(entity, &owner_column.table)?.iter() {
        builder.add_relation(relation);
    }
    builder.add_column_as(owner_column.clone(), OWNER_ALIAS);
    Ok(builder)
}

fn equals(builder: &mut QueryBuilder<'_>, column: &ColumnPath, prefix: &str, value: Value) {
    let name = builder.binds_mut().next_name(prefix, &column.column);
    let mut filter = Fragment::new();
    filter
        .push_column(&column.table, &column.column)
        .push_raw(" = ")
        .push_param(name, value);
    builder.where_(filter);
}

fn owned_by(row: &Row, actor_id: &Value) -> bool {
    row.get(OWNER_ALIAS)
        .is_some_and(|owner| same_identity(owner, actor_id))
}

/// Id equality tolerant of representation, e.g. a textual id against a UUID column.
fn same_identity(a: &Value, b: &Value) -> bool {
    if a.is_null() || b.is_null() {
        return false;
    }
    match (a.key_atom(), b.key_atom()) {
        (Some(x), Some(y)) if x == y => true,
        _ => a.to_string() == b.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, EntityDescriptor, Schema};
    use crate::value::ColumnType;

    fn chain_schema() -> Schema {
        let mut schema = Schema::new();
        for (name, fk) in [
            ("user_account", None),
            ("clinic", Some("admin_user_id")),
            ("patient", Some("clinic_id")),
            ("visit", Some("patient_id")),
        ] {
            let mut entity = EntityDescriptor::new(name)
                .with_column(Column::new("id", ColumnType::BigInt))
                .with_primary_key(&["id"]);
            if let Some(fk) = fk {
                entity = entity.with_column(Column::new(fk, ColumnType::BigInt));
            }
            schema.register(entity).unwrap();
        }
        schema
            .relate(Relation::belongs_to("admin", "clinic", "user_account", &[("admin_user_id", "id")]))
            .unwrap()
            .relate(Relation::belongs_to("clinic", "patient", "clinic", &[("clinic_id", "id")]))
            .unwrap()
            .relate(Relation::has_many("patients", "clinic", "patient", &[("id", "clinic_id")]))
            .unwrap()
            .relate(Relation::belongs_to("patient", "visit", "patient", &[("patient_id", "id")]))
            .unwrap();
        schema
    }

    #[test]
    fn shortest_chain_follows_belongs_to_only() {
        let schema = chain_schema();
        let chain = resolve_owner_chain(&schema, "visit", "user_account").unwrap();
        let names: Vec<_> = chain.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["patient", "clinic", "admin"]);
        assert!(resolve_owner_chain(&schema, "clinic", "clinic").unwrap().is_empty());
    }

    #[test]
    fn missing_chain_is_a_configuration_error() {
        let schema = chain_schema();
        let err = resolve_owner_chain(&schema, "user_account", "visit").unwrap_err();
        assert!(matches!(err, QueryError::OwnershipResolution { .. }));
        assert_eq!(err.kind(), crate::error::ErrorKind::Internal);
    }

    #[test]
    fn scope_joins_chain_and_filters_owner() {
        let schema = chain_schema();
        let mut builder = QueryBuilder::new(&schema, "patient").unwrap();
        builder.add_column(ColumnPath::new("patient", "id"));
        scope_to_owner(
            &mut builder,
            &ColumnPath::new("user_account", "id"),
            &Value::Int(7),
        )
        .unwrap();
        let statement = builder.build().unwrap();
        assert_eq!(
            statement.sql(),
            concat!(
                r#"SELECT "patient"."id" FROM "patient""#,
                r#" JOIN "clinic" ON "clinic"."id" = "patient"."clinic_id""#,
                r#" JOIN "user_account" ON "user_account"."id" = "clinic"."admin_user_id""#,
                r#" WHERE ("user_account"."id" = :owner_id_1)"#,
            )
        );
        assert_eq!(statement.param("owner_id_1"), Some(&Value::Int(7)));
    }

    #[test]
    fn identities_compare_across_representations() {
        let id = uuid::Uuid::nil();
        assert!(same_identity(&Value::Uuid(id), &Value::Text(id.to_string())));
        assert!(same_identity(&Value::Int(3), &Value::Int(3)));
        assert!(!same_identity(&Value::Null, &Value::Null));
    }
}
