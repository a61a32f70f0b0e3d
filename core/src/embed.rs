//! Embed expansion.
//!
//! [`EmbedResolver::expand`] attaches related rows to a page of rows. Each requested relation
//! costs exactly one query, whatever the page size: the distinct join keys of the page go into
//! a single `IN` filter and the fetched rows are fanned back out by key. Sibling relations are
//! fetched concurrently, and all of them before any nested level. Nested embeds are expanded
//! on the fetched rows before they are copied onto their parents, so every branch owns the rows
//! it mutates.

use compact_str::{CompactString, format_compact};
use futures_util::future::{BoxFuture, try_join_all};
use hashbrown::{HashMap, HashSet};

use crate::builder::QueryBuilder;
use crate::compile::{Selection, SelectionTree, SortSpec};
use crate::error::{Loc, QueryError, Result};
use crate::executor::Executor;
use crate::grammar::sort::Direction;
use crate::join::{JoinClause, JoinTarget, OnOperand};
use crate::row::Row;
use crate::schema::{
    ColumnPath, ColumnRef, DerivedTable, JoinOperand, LINK_KEY, LinkSurface, Relation,
    RelationContext, RelationGraph, RelationMap, RelationTarget,
};
use crate::sql::{BindCounter, Fragment, Statement};
use crate::value::{KeyAtom, Value};

/// Result-set prefix of the hidden join-key columns.
const KEY_PREFIX: &str = "__key_";
/// Result-set prefix of surfaced link-table columns.
const LINK_PREFIX: &str = "_link_";

type Key = Vec<KeyAtom>;

/// Rows fetched for one relation, keyed for fan-out onto the parents.
struct Batch {
    many: bool,
    parent_keys: Vec<Option<Key>>,
    keys: Vec<Key>,
    related: Vec<Row>,
}

impl Batch {
    /// The value to attach to each parent, in parent order.
    fn into_values(self) -> Vec<Value> {
        let mut by_key: HashMap<Key, Vec<usize>> = HashMap::new();
        for (index, key) in self.keys.into_iter().enumerate() {
            by_key.entry(key).or_default().push(index);
        }

        let related = self.related;
        let many = self.many;
        self.parent_keys
            .iter()
            .map(|key| match key.as_ref().and_then(|key| by_key.get(key)) {
                None if many => Value::Records(Vec::new()),
                None => Value::Null,
                Some(indices) if many => {
                    Value::Records(indices.iter().map(|&i| related[i].clone()).collect())
                }
                Some(indices) => indices
                    .first()
                    .map_or(Value::Null, |&i| Value::Record(related[i].clone())),
            })
            .collect()
    }
}

pub struct EmbedResolver<'a, E: ?Sized> {
    graph: &'a dyn RelationGraph,
    executor: &'a E,
    context: &'a RelationContext,
    sort: Option<&'a SortSpec>,
}

impl<'a, E> EmbedResolver<'a, E>
where
    E: Executor + ?Sized,
{
    pub fn new(graph: &'a dyn RelationGraph, executor: &'a E, context: &'a RelationContext) -> Self {
        Self {
            graph,
            executor,
            context,
            sort: None,
        }
    }

    /// Orders embedded rows by the grouped keys of a `sort_by` such as `visits(visit_ts:desc)`.
    pub fn with_sort(mut self, sort: &'a SortSpec) -> Self {
        self.sort = Some(sort);
        self
    }

    /// Expands every relation of `embed` onto `rows` in place.
    ///
    /// `fields` is the request's field selection: when it is not empty, a relation it does not
    /// name is skipped, and a nested selection narrows the related columns.
    pub async fn expand(
        &self,
        entity: &str,
        rows: &mut [Row],
        embed: &SelectionTree,
        fields: &SelectionTree,
    ) -> Result<()> {
        self.expand_level(entity, rows, embed, fields, Loc::query("embed"), true)
            .await
    }

    fn expand_level<'f>(
        &'f self,
        entity: &'f str,
        rows: &'f mut [Row],
        embed: &'f SelectionTree,
        fields: &'f SelectionTree,
        loc: Loc,
        top: bool,
    ) -> BoxFuture<'f, Result<()>> {
        Box::pin(async move {
            if rows.is_empty() || embed.is_empty() {
                return Ok(());
            }
            let relations = self.graph.relation_map(entity, self.context)?;

            let parents: &[Row] = rows;
            let mut branches = Vec::with_capacity(embed.len());
            let mut descents = Vec::with_capacity(embed.len());
            for (name, selection) in embed.iter() {
                let relation = lookup(&relations, name, &loc)?;
                if parents.iter().any(|row| row.contains(name)) {
                    return Err(QueryError::validation(
                        loc.join(name),
                        format!("The embed {name} has the same name as one of the columns of {entity}"),
                    ));
                }
                let nested = selection.as_nested().filter(|tree| !tree.is_empty());
                descents.push((relation, name, nested));
                branches.push(self.fetch_relation(
                    relation,
                    name,
                    parents,
                    nested.is_some(),
                    fields,
                    loc.join(name),
                    top,
                ));
            }
            let mut batches = try_join_all(branches).await?;

            // Siblings are all fetched before any of them descends a level.
            let empty_fields = SelectionTree::new();
            let nested_levels = batches.iter_mut().zip(&descents).filter_map(
                |(batch, &(relation, name, nested))| {
                    let batch = batch.as_mut()?;
                    let nested = nested?;
                    let nested_fields = fields
                        .get(name)
                        .and_then(Selection::as_nested)
                        .unwrap_or(&empty_fields);
                    Some(self.expand_level(
                        relation.target_table(),
                        &mut batch.related,
                        nested,
                        nested_fields,
                        loc.join(name),
                        false,
                    ))
                },
            );
            try_join_all(nested_levels).await?;

            for (name, batch) in embed.names().zip(batches) {
                let Some(batch) = batch else { continue };
                for (row, value) in rows.iter_mut().zip(batch.into_values()) {
                    row.insert(name, value);
                }
            }
            Ok(())
        })
    }

    /// Fetches one relation for `parents`, or returns `None` when the field selection leaves
    /// the relation out.
    #[allow(clippy::too_many_arguments)]
    async fn fetch_relation(
        &self,
        relation: &Relation,
        name: &str,
        parents: &[Row],
        nested: bool,
        fields: &SelectionTree,
        loc: Loc,
        top: bool,
    ) -> Result<Option<Batch>> {
        let Some(columns) = self.projection(relation, name, fields)? else {
            return Ok(None);
        };
        if nested && relation.is_dynamic() {
            return Err(QueryError::validation(
                loc,
                "Nested embeds not supported for dynamic relations",
            ));
        }

        let sources: Vec<&str> = relation.join.iter().filter_map(|p| p.left_column()).collect();
        let mut parent_keys: Vec<Option<Key>> = Vec::with_capacity(parents.len());
        let mut distinct: HashSet<Key> = HashSet::new();
        let mut key_values: Vec<Vec<Value>> = Vec::new();
        for row in parents {
            let values = key_of(row, &sources, name)?;
            let key = values.as_ref().map(|values| atoms(values));
            if let (Some(values), Some(key)) = (values, key.as_ref()) {
                if distinct.insert(key.clone()) {
                    key_values.push(values);
                }
            }
            parent_keys.push(key);
        }

        let mut batch = Batch {
            many: relation.is_many(),
            parent_keys,
            keys: Vec::new(),
            related: Vec::new(),
        };
        if key_values.is_empty() {
            return Ok(Some(batch));
        }

        let order = self.order(relation, name, &columns, top)?;
        let statement = self.statement(relation, &columns, &key_values, &order)?;
        let fetched = self.executor.fetch_all(&statement).await?;
        crate::crudql_trace_embed!(name, key_values.len(), fetched.len());

        let surface = relation.link.as_ref().map(|link| &link.surface);
        batch.keys.reserve(fetched.len());
        batch.related.reserve(fetched.len());
        for row in fetched {
            let (key, row) = split_hidden(row, sources.len(), surface);
            batch.keys.push(key);
            batch.related.push(row);
        }
        Ok(Some(batch))
    }

    /// Columns to fetch for `relation`, or `None` when `fields` leaves it out.
    fn projection(
        &self,
        relation: &Relation,
        name: &str,
        fields: &SelectionTree,
    ) -> Result<Option<Vec<ColumnRef>>> {
        let all = self.graph.target_columns(relation)?;
        if fields.is_empty() {
            return Ok(Some(all));
        }
        let narrowed = match fields.get(name) {
            None => return Ok(None),
            Some(Selection::Column) => return Ok(Some(all)),
            Some(Selection::Nested(tree)) if tree.is_empty() => return Ok(Some(all)),
            Some(Selection::Nested(tree)) => tree,
        };

        let target_relations = match &relation.target {
            RelationTarget::Entity(target) => Some(self.graph.relation_map(target, self.context)?),
            RelationTarget::Derived(_) => None,
        };
        let mut columns = Vec::with_capacity(narrowed.len());
        for (column, _) in narrowed.iter() {
            if let Some(found) = all.iter().find(|c| c.column == column) {
                columns.push(found.clone());
            } else if !target_relations
                .as_ref()
                .is_some_and(|map| map.names().any(|n| n == column))
            {
                return Err(QueryError::unknown_column(
                    Loc::query("fields").join(name).join(column),
                    column,
                ));
            }
        }
        Ok(Some(columns))
    }

    fn order(
        &self,
        relation: &Relation,
        name: &str,
        columns: &[ColumnRef],
        top: bool,
    ) -> Result<Vec<(ColumnPath, Direction)>> {
        let table = relation.target_table();
        let requested = self.sort.filter(|_| top).and_then(|sort| sort.embedded(name));
        if let Some(keys) = requested {
            let available = self.graph.target_columns(relation)?;
            return keys
                .iter()
                .map(|key| {
                    if available.iter().any(|c| c.column == key.column) {
                        Ok((ColumnPath::new(table, &key.column), key.direction))
                    } else {
                        Err(QueryError::unknown_column(
                            Loc::query("sort_by").join(name).join(&key.column),
                            &key.column,
                        ))
                    }
                })
                .collect();
        }

        let natural: Vec<&str> = match &relation.target {
            RelationTarget::Entity(target) => self
                .graph
                .require_entity(target)?
                .primary_key()
                .iter()
                .map(CompactString::as_str)
                .collect(),
            RelationTarget::Derived(_) => columns
                .iter()
                .take(1)
                .map(|c| c.column.as_str())
                .collect(),
        };
        Ok(natural
            .into_iter()
            .map(|column| (ColumnPath::new(table, column), Direction::Asc))
            .collect())
    }

    fn statement(
        &self,
        relation: &Relation,
        columns: &[ColumnRef],
        keys: &[Vec<Value>],
        order: &[(ColumnPath, Direction)],
    ) -> Result<Statement> {
        let target = relation.target_table();
        // Join keys and constant filters live on the link table when there is one.
        let key_table = relation.link.as_ref().map_or(target, |link| link.table.as_str());
        let mut key_columns = Vec::new();
        let mut constants = Vec::new();
        for pair in &relation.join {
            let path = ColumnPath::new(key_table, &pair.right);
            match &pair.left {
                JoinOperand::Column(_) => key_columns.push(path),
                JoinOperand::Literal(value) => constants.push((path, value.clone())),
            }
        }

        let mut binds = BindCounter::new();
        let mut filters = Vec::with_capacity(constants.len() + 1);
        for (path, value) in constants {
            let name = binds.next_name("embed", &path.column);
            let mut filter = Fragment::new();
            filter
                .push_column(&path.table, &path.column)
                .push_raw(" = ")
                .push_param(name, value);
            filters.push(filter);
        }
        if !key_columns.is_empty() {
            filters.push(key_filter(&key_columns, keys, &mut binds));
        }

        match &relation.target {
            RelationTarget::Entity(entity) => {
                let mut builder = QueryBuilder::new(self.graph, entity)?.with_binds(binds);
                for column in columns {
                    builder.add_column(column.path());
                }
                for (i, path) in key_columns.iter().enumerate() {
                    builder.add_column_as(path.clone(), &format_compact!("{KEY_PREFIX}{i}"));
                }
                if let Some(link) = &relation.link {
                    builder.add_join(JoinClause::new(
                        JoinTarget::Table(link.table.clone()),
                        link.target_pairs
                            .iter()
                            .map(|(_, t)| OnOperand::Column(ColumnPath::new(target, t))),
                        link.target_pairs
                            .iter()
                            .map(|(l, _)| ColumnPath::new(&link.table, l)),
                    ));
                    let surfaced = self.graph.require_entity(&link.table)?.columns();
                    for column in surfaced {
                        let shown = match &link.surface {
                            LinkSurface::Hidden => false,
                            LinkSurface::Nested => true,
                            LinkSurface::Fields(names) => names.contains(&column.name),
                        };
                        if shown {
                            builder.add_column_as(
                                ColumnPath::new(&link.table, &column.name),
                                &format_compact!("{LINK_PREFIX}{}", column.name),
                            );
                        }
                    }
                }
                for filter in filters {
                    builder.where_(filter);
                }
                for (path, direction) in order {
                    builder.order_by(path.clone(), *direction);
                }
                builder.build()
            }
            RelationTarget::Derived(derived) => {
                Ok(derived_statement(derived, columns, &key_columns, filters, order))
            }
        }
    }
}

fn lookup<'m>(relations: &'m RelationMap, name: &str, loc: &Loc) -> Result<&'m Relation> {
    if relations.is_unresolved_dynamic(name) {
        return Err(QueryError::validation(
            loc.join(name),
            format!("Some context information is missing to build the dynamic relation for {name}"),
        ));
    }
    relations
        .get(name)
        .ok_or_else(|| QueryError::unknown_relation(loc.join(name), name))
}

/// Join-key values of a parent row; `None` when any of them is null.
fn key_of(row: &Row, sources: &[&str], embed: &str) -> Result<Option<Vec<Value>>> {
    let mut values = Vec::with_capacity(sources.len());
    for column in sources {
        match row.get(column) {
            Some(Value::Null) => return Ok(None),
            Some(value) => values.push(value.clone()),
            None => {
                return Err(QueryError::validation(
                    Loc::query("fields"),
                    format!("You need to include {column} in fields to embed {embed}"),
                ));
            }
        }
    }
    Ok(Some(values))
}

fn atoms(values: &[Value]) -> Key {
    values
        .iter()
        .map(|value| value.key_atom().unwrap_or(KeyAtom::Null))
        .collect()
}

/// Removes the hidden key columns from a fetched row and places link columns per `surface`.
fn split_hidden(row: Row, key_len: usize, surface: Option<&LinkSurface>) -> (Key, Row) {
    let mut key = vec![KeyAtom::Null; key_len];
    let mut link = Row::new();
    let mut out = Row::with_capacity(row.len());
    for (column, value) in row {
        if let Some(index) = column.strip_prefix(KEY_PREFIX) {
            if let Some(slot) = index.parse::<usize>().ok().and_then(|i| key.get_mut(i)) {
                *slot = value.key_atom().unwrap_or(KeyAtom::Null);
            }
        } else if let Some(name) = column.strip_prefix(LINK_PREFIX) {
            link.insert(name, value);
        } else {
            out.insert(column, value);
        }
    }
    match surface {
        Some(LinkSurface::Nested) => out.insert(LINK_KEY, Value::Record(link)),
        Some(LinkSurface::Fields(_)) => {
            for (column, value) in link {
                out.insert(column, value);
            }
        }
        Some(LinkSurface::Hidden) | None => {}
    }
    (key, out)
}

/// `col IN (...)`, or a row-value `IN` for composite keys.
fn key_filter(columns: &[ColumnPath], keys: &[Vec<Value>], binds: &mut BindCounter) -> Fragment {
    let composite = columns.len() > 1;

    let mut out = Fragment::new();
    if composite {
        out.push_raw("(");
    }
    for (i, column) in columns.iter().enumerate() {
        if i > 0 {
            out.push_raw(", ");
        }
        out.push_column(&column.table, &column.column);
    }
    out.push_raw(if composite { ") IN (" } else { " IN (" });
    for (row, key) in keys.iter().enumerate() {
        if row > 0 {
            out.push_raw(", ");
        }
        if composite {
            out.push_raw("(");
        }
        for (i, (column, value)) in columns.iter().zip(key).enumerate() {
            if i > 0 {
                out.push_raw(", ");
            }
            out.push_param(binds.next_name("embed", &column.column), value.clone());
        }
        if composite {
            out.push_raw(")");
        }
    }
    out.push_raw(")");
    out
}

fn derived_statement(
    derived: &DerivedTable,
    columns: &[ColumnRef],
    key_columns: &[ColumnPath],
    filters: Vec<Fragment>,
    order: &[(ColumnPath, Direction)],
) -> Statement {
    let mut projection: Vec<Fragment> = columns
        .iter()
        .map(|c| {
            let mut out = Fragment::new();
            out.push_column(&c.table, &c.column);
            out
        })
        .collect();
    for (i, path) in key_columns.iter().enumerate() {
        let mut out = Fragment::new();
        out.push_column(&path.table, &path.column)
            .push_raw(" AS ")
            .push_ident(&format_compact!("{KEY_PREFIX}{i}"));
        projection.push(out);
    }

    let mut sql = Fragment::raw("SELECT ");
    sql.append(Fragment::join(projection, ", "))
        .push_raw(" FROM ")
        .append(derived.source.clone())
        .push_raw(" AS ")
        .push_ident(&derived.alias);
    if !filters.is_empty() {
        let filters = filters.into_iter().map(Fragment::parens);
        sql.push_raw(" WHERE ").append(Fragment::join(filters, " AND "));
    }
    if !order.is_empty() {
        let order = order.iter().map(|(path, direction)| {
            let mut out = Fragment::new();
            out.push_column(&path.table, &path.column)
                .push_raw(" ")
                .push_raw(direction.as_sql());
            out
        });
        sql.push_raw(" ORDER BY ").append(Fragment::join(order, ", "));
    }
    Statement::new(sql, None)
}
