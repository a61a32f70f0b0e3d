//! Request-scoped statement builder.
//!
//! A [`QueryBuilder`] accumulates projection columns, joins, predicates, ordering and paging
//! for one entity and renders them as a single [`Statement`]. Predicates that depend on the
//! final join set (such as `q` filters) are registered as pre-build callbacks and run once,
//! in registration order, when [`QueryBuilder::build`] is first called.

use core::fmt;
use core::mem;

use compact_str::CompactString;

use crate::compile::{Predicate, ReachableColumns, SelectionTree, SortKey, SortSpec};
use crate::error::{Loc, QueryError, Result};
use crate::grammar::sort::Direction;
use crate::join::{JoinClause, JoinTarget, OnOperand};
use crate::schema::{
    ColumnPath, ColumnRef, EntityDescriptor, JoinOperand, Relation, RelationGraph, RelationTarget,
};
use crate::sql::{BindCounter, Fragment, Statement};

type PreBuild<'g> = Box<dyn FnOnce(&mut QueryBuilder<'g>) -> Result<()> + Send + 'g>;

/// A projected column, optionally renamed in the result set.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub column: ColumnPath,
    pub alias: Option<CompactString>,
}

impl Projection {
    /// Name of the column in fetched rows.
    pub fn output_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.column.column)
    }
}

/// A computed or joined column ordered before every other sort key, such as a text-search
/// rank from a derived table.
///
/// The column is projected so keyset cursors can seek on it.
#[derive(Debug, Clone, PartialEq)]
pub struct LeadingSort {
    pub column: ColumnPath,
    pub direction: Direction,
    /// Join bringing `column` into scope; `None` when it is already reachable.
    pub join: Option<JoinClause>,
}

impl LeadingSort {
    pub fn new(column: ColumnPath, direction: Direction) -> Self {
        Self {
            column,
            direction,
            join: None,
        }
    }

    pub fn through(mut self, join: JoinClause) -> Self {
        self.join = Some(join);
        self
    }
}

pub struct QueryBuilder<'g> {
    graph: &'g dyn RelationGraph,
    entity: &'g EntityDescriptor,
    columns: Vec<Projection>,
    wheres: Vec<Fragment>,
    order_by: Vec<(ColumnPath, Direction)>,
    limit: Option<u32>,
    offset: Option<u64>,
    joins: Vec<JoinClause>,
    exists: Vec<(Relation, Predicate)>,
    pre_build: Vec<PreBuild<'g>>,
    distinct: bool,
    binds: BindCounter,
    defects: Vec<String>,
}

impl fmt::Debug for QueryBuilder<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryBuilder")
            .field("entity", &self.entity.name())
            .field("columns", &self.columns)
            .field("wheres", &self.wheres)
            .field("order_by", &self.order_by)
            .field("limit", &self.limit)
            .field("offset", &self.offset)
            .field("joins", &self.joins)
            .field("exists", &self.exists.len())
            .field("pre_build", &self.pre_build.len())
            .field("distinct", &self.distinct)
            .finish()
    }
}

impl<'g> QueryBuilder<'g> {
    /// Starts a builder over a registered entity.
    pub fn new(graph: &'g dyn RelationGraph, entity: &str) -> Result<Self> {
        Ok(Self {
            graph,
            entity: graph.require_entity(entity)?,
            columns: Vec::new(),
            wheres: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            joins: Vec::new(),
            exists: Vec::new(),
            pre_build: Vec::new(),
            distinct: false,
            binds: BindCounter::new(),
            defects: Vec::new(),
        })
    }

    /// Continues numbering binds from an existing counter.
    pub fn with_binds(mut self, binds: BindCounter) -> Self {
        self.binds = binds;
        self
    }

    pub fn entity(&self) -> &'g EntityDescriptor {
        self.entity
    }

    pub fn graph(&self) -> &'g dyn RelationGraph {
        self.graph
    }

    /// Counter shared by every predicate compiled for this statement.
    pub fn binds_mut(&mut self) -> &mut BindCounter {
        &mut self.binds
    }

    pub fn add_column(&mut self, column: ColumnPath) -> &mut Self {
        self.add_projection(Projection {
            column,
            alias: None,
        })
    }

    pub fn add_column_as(&mut self, column: ColumnPath, alias: &str) -> &mut Self {
        self.add_projection(Projection {
            column,
            alias: Some(CompactString::from(alias)),
        })
    }

    fn add_projection(&mut self, projection: Projection) -> &mut Self {
        if !self.columns.contains(&projection) {
            self.columns.push(projection);
        }
        self
    }

    /// Projected columns; empty means every column of the entity.
    pub fn columns(&self) -> &[Projection] {
        &self.columns
    }

    /// Whether rows will carry `name`, either explicitly or through the default projection.
    pub fn projects(&self, name: &str) -> bool {
        if self.columns.is_empty() {
            self.entity.has_column(name)
        } else {
            self.columns.iter().any(|p| p.output_name() == name)
        }
    }

    pub fn where_(&mut self, predicate: impl Into<Predicate>) -> &mut Self {
        let fragment = predicate.into().into_fragment();
        if !fragment.is_empty() {
            self.wheres.push(fragment);
        }
        self
    }

    pub fn order_by(&mut self, column: ColumnPath, direction: Direction) -> &mut Self {
        self.order_by.push((column, direction));
        self
    }

    pub fn limit(&mut self, limit: u32) -> &mut Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(&mut self, offset: u64) -> &mut Self {
        self.offset = Some(offset);
        self
    }

    pub fn distinct(&mut self, distinct: bool) -> &mut Self {
        self.distinct = distinct;
        self
    }

    /// Projects the plain columns of a `fields` selection; relation entries are left to the
    /// embed resolver.
    pub fn apply_fields(&mut self, fields: &SelectionTree) -> Result<&mut Self> {
        let loc = Loc::query("fields");
        for name in fields.columns() {
            if !self.entity.has_column(name) {
                return Err(QueryError::unknown_column(loc.join(name), name));
            }
            self.add_column(ColumnPath::new(self.entity.name(), name));
        }
        Ok(self)
    }

    /// Orders by every key of `sort`. Keys without a table must name columns of the entity;
    /// joined keys are checked by [`build`](Self::build).
    pub fn apply_sort(&mut self, sort: &SortSpec) -> Result<&mut Self> {
        let loc = Loc::query("sort_by");
        let entity = self.entity;
        for key in sort.keys() {
            let table = match &key.table {
                Some(table) => table.as_str(),
                None if entity.has_column(&key.column) => entity.name(),
                None => {
                    return Err(QueryError::unknown_column(loc.join(&key.column), &key.column));
                }
            };
            self.order_by(ColumnPath::new(table, &key.column), key.direction);
        }
        Ok(self)
    }

    /// Joins the source of `leading`, projects its column and puts it first in `sort`.
    ///
    /// With the default projection every entity column is projected explicitly, so rows keep
    /// their full shape plus the extra column.
    pub fn apply_leading_sort(&mut self, leading: &LeadingSort, sort: &mut SortSpec) -> &mut Self {
        if let Some(join) = &leading.join {
            self.add_join(join.clone());
        }
        if self.columns.is_empty() {
            let entity = self.entity;
            for column in entity.columns() {
                self.add_column(ColumnPath::new(entity.name(), &column.name));
            }
        }
        self.add_column(leading.column.clone());
        sort.prepend(SortKey::joined(
            &leading.column.table,
            &leading.column.column,
            leading.direction,
        ));
        self
    }

    /// Adds a join. An identical join is ignored; a different join of the same table is
    /// reported by [`build`](Self::build).
    pub fn add_join(&mut self, clause: JoinClause) -> &mut Self {
        let name = clause.target.name();
        if name == self.entity.name() {
            self.defects
                .push(format!("cannot join {name} onto itself without an alias"));
            return self;
        }
        match self.joins.iter().find(|j| j.target.name() == name) {
            Some(existing) if *existing == clause => {}
            Some(_) => self
                .defects
                .push(format!("conflicting joins of {name}")),
            None => self.joins.push(clause),
        }
        self
    }

    /// Joins a relation's target, going through its link table when it has one.
    pub fn add_relation(&mut self, relation: &Relation) -> &mut Self {
        let left = relation.join.iter().map(|pair| match &pair.left {
            JoinOperand::Column(column) => {
                OnOperand::Column(ColumnPath::new(&relation.source, column))
            }
            JoinOperand::Literal(value) => OnOperand::Literal(value.clone()),
        });
        let target = match &relation.target {
            RelationTarget::Entity(name) => JoinTarget::Table(name.clone()),
            RelationTarget::Derived(derived) => JoinTarget::Derived(derived.clone()),
        };
        let target_name = relation.target_table();

        match &relation.link {
            Some(link) => {
                let link_right = relation
                    .join
                    .iter()
                    .map(|pair| ColumnPath::new(&link.table, &pair.right));
                self.add_join(JoinClause::new(
                    JoinTarget::Table(link.table.clone()),
                    left,
                    link_right,
                ));
                let link_left = link
                    .target_pairs
                    .iter()
                    .map(|(l, _)| ColumnPath::new(&link.table, l));
                let target_right = link
                    .target_pairs
                    .iter()
                    .map(|(_, t)| ColumnPath::new(target_name, t));
                self.add_join(JoinClause::new(target, link_left, target_right))
            }
            None => {
                let right = relation
                    .join
                    .iter()
                    .map(|pair| ColumnPath::new(target_name, &pair.right));
                self.add_join(JoinClause::new(target, left, right))
            }
        }
    }

    /// Keeps rows having at least one related row that satisfies `predicate`.
    pub fn add_existence_subquery(&mut self, relation: Relation, predicate: Predicate) -> &mut Self {
        self.exists.push((relation, predicate));
        self
    }

    /// Registers a callback run once by the next [`build`](Self::build), before rendering.
    pub fn add_pre_build<F>(&mut self, callback: F) -> &mut Self
    where
        F: FnOnce(&mut QueryBuilder<'g>) -> Result<()> + Send + 'g,
    {
        self.pre_build.push(Box::new(callback));
        self
    }

    pub fn is_joined(&self, table: &str) -> bool {
        self.joins.iter().any(|j| j.target.name() == table)
    }

    /// Columns of the entity followed by the columns of every joined table.
    pub fn reachable_columns(&self) -> Result<ReachableColumns> {
        let mut columns = ReachableColumns::of_entity(self.entity);
        for join in &self.joins {
            match &join.target {
                JoinTarget::Table(name) => {
                    columns.extend(self.graph.require_entity(name)?.column_refs());
                }
                JoinTarget::Derived(derived) => columns.extend(
                    derived
                        .columns
                        .iter()
                        .map(|c| ColumnRef::of(&derived.alias, c)),
                ),
            }
        }
        Ok(columns)
    }

    /// Renders the statement.
    ///
    /// Pending pre-build callbacks run first. With a limit set, one extra row is requested so
    /// the caller can tell whether the page is the last one.
    pub fn build(&mut self) -> Result<Statement> {
        while !self.pre_build.is_empty() {
            for callback in mem::take(&mut self.pre_build) {
                callback(self)?;
            }
        }
        self.check()?;

        let mut binds = self.binds.clone();
        let mut sql = Fragment::raw("SELECT ");

        let projection: Vec<Fragment> = if self.columns.is_empty() {
            self.entity
                .columns()
                .iter()
                .map(|c| column(&ColumnPath::new(self.entity.name(), &c.name)))
                .collect()
        } else {
            self.columns
                .iter()
                .map(|p| {
                    let mut out = column(&p.column);
                    if let Some(alias) = &p.alias {
                        out.push_raw(" AS ").push_ident(alias);
                    }
                    out
                })
                .collect()
        };
        sql.append(Fragment::join(projection, ", "));
        sql.push_raw(" FROM ").push_ident(self.entity.name());

        for join in &self.joins {
            sql.push_raw(join.join_type.as_sql());
            sql.append(join_target(&join.target));
            sql.push_raw(" ON ");
            sql.append(on_condition(&join.left, &join.right, &mut binds));
        }

        let mut conditions: Vec<Fragment> = self.wheres.iter().cloned().map(Fragment::parens).collect();
        for (relation, predicate) in &self.exists {
            conditions.push(exists(self.graph, relation, predicate, &mut binds)?);
        }
        if !conditions.is_empty() {
            sql.push_raw(" WHERE ").append(Fragment::join(conditions, " AND "));
        }

        if self.distinct {
            let group: Vec<Fragment> = if self.columns.is_empty() {
                self.entity
                    .columns()
                    .iter()
                    .map(|c| column(&ColumnPath::new(self.entity.name(), &c.name)))
                    .collect()
            } else {
                self.columns.iter().map(|p| column(&p.column)).collect()
            };
            sql.push_raw(" GROUP BY ").append(Fragment::join(group, ", "));
        }

        if !self.order_by.is_empty() {
            let order = self.order_by.iter().map(|(path, direction)| {
                let mut out = column(path);
                out.push_raw(" ").push_raw(direction.as_sql());
                out
            });
            sql.push_raw(" ORDER BY ").append(Fragment::join(order, ", "));
        }

        if let Some(limit) = self.limit {
            sql.push_raw(format!(" LIMIT {}", u64::from(limit) + 1));
        }
        if let Some(offset) = self.offset.filter(|o| *o > 0) {
            sql.push_raw(format!(" OFFSET {offset}"));
        }

        Ok(Statement::new(sql, self.limit))
    }

    fn check(&self) -> Result<()> {
        if let Some(defect) = self.defects.first() {
            return Err(QueryError::Build(defect.clone()));
        }
        for join in &self.joins {
            let name = join.target.name();
            if join.left.len() != join.right.len() || join.left.is_empty() {
                return Err(QueryError::Build(format!(
                    "join of {name} pairs {} left operands with {} right columns",
                    join.left.len(),
                    join.right.len()
                )));
            }
            let left_columns = join.left.iter().filter_map(|operand| match operand {
                OnOperand::Column(path) => Some(path),
                OnOperand::Literal(_) => None,
            });
            for path in left_columns.chain(&join.right) {
                self.check_column(path, "join")?;
            }
        }
        for projection in &self.columns {
            self.check_column(&projection.column, "projection")?;
        }
        for (path, _) in &self.order_by {
            self.check_column(path, "order by")?;
        }
        Ok(())
    }

    fn check_column(&self, path: &ColumnPath, construct: &str) -> Result<()> {
        let found = if path.table == self.entity.name() {
            self.entity.has_column(&path.column)
        } else {
            match self.joins.iter().find(|j| j.target.name() == path.table) {
                Some(JoinClause {
                    target: JoinTarget::Table(name),
                    ..
                }) => self
                    .graph
                    .entity(name)
                    .is_some_and(|e| e.has_column(&path.column)),
                Some(JoinClause {
                    target: JoinTarget::Derived(derived),
                    ..
                }) => derived.columns.iter().any(|c| c.name == path.column),
                None => {
                    return Err(QueryError::Build(format!(
                        "{construct} references {path}, but {} is not part of the query",
                        path.table
                    )));
                }
            }
        };
        if found {
            Ok(())
        } else {
            Err(QueryError::Build(format!(
                "{construct} references unknown column {path}"
            )))
        }
    }
}

fn column(path: &ColumnPath) -> Fragment {
    let mut out = Fragment::new();
    out.push_column(&path.table, &path.column);
    out
}

fn join_target(target: &JoinTarget) -> Fragment {
    match target {
        JoinTarget::Table(name) => {
            let mut out = Fragment::new();
            out.push_ident(name);
            out
        }
        JoinTarget::Derived(derived) => {
            let mut out = derived.source.clone();
            out.push_raw(" AS ").push_ident(&derived.alias);
            out
        }
    }
}

fn on_condition(left: &[OnOperand], right: &[ColumnPath], binds: &mut BindCounter) -> Fragment {
    let pairs = left.iter().zip(right).map(|(l, r)| {
        let mut out = column(r);
        out.push_raw(" = ");
        match l {
            OnOperand::Column(path) => {
                out.append(column(path));
            }
            OnOperand::Literal(value) => {
                out.push_param(binds.next_name(&r.table, &r.column), value.clone());
            }
        }
        out
    });
    Fragment::join(pairs.collect::<Vec<_>>(), " AND ")
}

fn exists(
    graph: &dyn RelationGraph,
    relation: &Relation,
    predicate: &Predicate,
    binds: &mut BindCounter,
) -> Result<Fragment> {
    let target = match &relation.target {
        RelationTarget::Entity(name) => {
            graph.require_entity(name)?;
            JoinTarget::Table(name.clone())
        }
        RelationTarget::Derived(derived) => JoinTarget::Derived(derived.clone()),
    };
    let target_name = relation.target_table();
    let left: Vec<OnOperand> = relation
        .join
        .iter()
        .map(|pair| match &pair.left {
            JoinOperand::Column(c) => OnOperand::Column(ColumnPath::new(&relation.source, c)),
            JoinOperand::Literal(value) => OnOperand::Literal(value.clone()),
        })
        .collect();

    let mut out = Fragment::raw("EXISTS (SELECT 1 FROM ");
    let correlation = match &relation.link {
        Some(link) => {
            out.push_ident(&link.table).push_raw(" JOIN ").append(join_target(&target));
            let link_left: Vec<OnOperand> = link
                .target_pairs
                .iter()
                .map(|(l, _)| OnOperand::Column(ColumnPath::new(&link.table, l)))
                .collect();
            let target_right: Vec<ColumnPath> = link
                .target_pairs
                .iter()
                .map(|(_, t)| ColumnPath::new(target_name, t))
                .collect();
            out.push_raw(" ON ")
                .append(on_condition(&link_left, &target_right, binds));
            let link_right: Vec<ColumnPath> = relation
                .join
                .iter()
                .map(|pair| ColumnPath::new(&link.table, &pair.right))
                .collect();
            on_condition(&left, &link_right, binds)
        }
        None => {
            out.append(join_target(&target));
            let right: Vec<ColumnPath> = relation
                .join
                .iter()
                .map(|pair| ColumnPath::new(target_name, &pair.right))
                .collect();
            on_condition(&left, &right, binds)
        }
    };
    out.push_raw(" WHERE ")
        .append(correlation)
        .push_raw(" AND ")
        .append(predicate.fragment().clone().parens())
        .push_raw(")");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, DerivedTable, Schema};
    use crate::value::{ColumnType, Value};

    fn schema() -> Schema {
        let mut schema = Schema::new();
        schema
            .register(
                EntityDescriptor::new("user_account")
                    .with_column(Column::new("id", ColumnType::BigInt))
                    .with_column(Column::new("email", ColumnType::Text))
                    .with_primary_key(&["id"]),
            )
            .unwrap()
            .register(
                EntityDescriptor::new("patient")
                    .with_column(Column::new("id", ColumnType::BigInt))
                    .with_column(Column::new("code", ColumnType::Text))
                    .with_column(Column::new("owner_user_id", ColumnType::BigInt))
                    .with_primary_key(&["id"]),
            )
            .unwrap()
            .register(
                EntityDescriptor::new("tag")
                    .with_column(Column::new("id", ColumnType::BigInt))
                    .with_column(Column::new("label", ColumnType::Text))
                    .with_primary_key(&["id"]),
            )
            .unwrap()
            .register(
                EntityDescriptor::new("patient_tag")
                    .with_column(Column::new("patient_id", ColumnType::BigInt))
                    .with_column(Column::new("tag_id", ColumnType::BigInt))
                    .with_primary_key(&["patient_id", "tag_id"]),
            )
            .unwrap();
        schema
            .relate(Relation::belongs_to(
                "owner",
                "patient",
                "user_account",
                &[("owner_user_id", "id")],
            ))
            .unwrap()
            .relate(Relation::many_to_many(
                "tags",
                "patient",
                "tag",
                "patient_tag",
                &[("id", "patient_id")],
                &[("tag_id", "id")],
            ))
            .unwrap();
        schema
    }

    #[test]
    fn default_projection_and_limit_plus_one() {
        let schema = schema();
        let mut builder = QueryBuilder::new(&schema, "patient").unwrap();
        builder
            .order_by(ColumnPath::new("patient", "id"), Direction::Desc)
            .limit(10)
            .offset(20);
        let statement = builder.build().unwrap();
        assert_eq!(
            statement.sql(),
            r#"SELECT "patient"."id", "patient"."code", "patient"."owner_user_id" FROM "patient" ORDER BY "patient"."id" DESC LIMIT 11 OFFSET 20"#
        );
        assert_eq!(statement.page_size(), Some(10));
    }

    #[test]
    fn relation_join_and_where() {
        let schema = schema();
        let mut builder = QueryBuilder::new(&schema, "patient").unwrap();
        let owner = schema.static_relations("patient")[0].clone();
        builder
            .add_column(ColumnPath::new("patient", "id"))
            .add_column_as(ColumnPath::new("user_account", "email"), "owner_email")
            .add_relation(&owner)
            .add_relation(&owner)
            .where_(Fragment::raw("1 = 1"));
        assert!(builder.is_joined("user_account"));
        assert!(builder.projects("owner_email"));
        assert_eq!(
            builder.build().unwrap().sql(),
            r#"SELECT "patient"."id", "user_account"."email" AS "owner_email" FROM "patient" JOIN "user_account" ON "user_account"."id" = "patient"."owner_user_id" WHERE (1 = 1)"#
        );
    }

    #[test]
    fn link_relation_expands_to_two_joins() {
        let schema = schema();
        let tags = schema.static_relations("patient")[1].clone();
        let mut builder = QueryBuilder::new(&schema, "patient").unwrap();
        builder.add_column(ColumnPath::new("tag", "label")).add_relation(&tags);
        assert_eq!(
            builder.build().unwrap().sql(),
            r#"SELECT "tag"."label" FROM "patient" JOIN "patient_tag" ON "patient_tag"."patient_id" = "patient"."id" JOIN "tag" ON "tag"."id" = "patient_tag"."tag_id""#
        );
        let names: Vec<_> = builder
            .reachable_columns()
            .unwrap()
            .iter()
            .map(|c| format!("{}.{}", c.table, c.column))
            .collect();
        assert!(names.contains(&"tag.label".to_owned()));
        assert!(names.contains(&"patient.id".to_owned()));
        assert!(!names.contains(&"tag.id".to_owned()));
    }

    #[test]
    fn existence_subqueries() {
        let schema = schema();
        let tags = schema.static_relations("patient")[1].clone();
        let owner = schema.static_relations("patient")[0].clone();
        let mut builder = QueryBuilder::new(&schema, "patient").unwrap();
        builder
            .add_column(ColumnPath::new("patient", "id"))
            .add_existence_subquery(tags, Predicate::new(Fragment::raw("x")))
            .add_existence_subquery(owner, Predicate::new(Fragment::raw("y")));
        assert_eq!(
            builder.build().unwrap().sql(),
            concat!(
                r#"SELECT "patient"."id" FROM "patient" WHERE "#,
                r#"EXISTS (SELECT 1 FROM "patient_tag" JOIN "tag" ON "tag"."id" = "patient_tag"."tag_id" WHERE "patient_tag"."patient_id" = "patient"."id" AND (x))"#,
                r#" AND EXISTS (SELECT 1 FROM "user_account" WHERE "user_account"."id" = "patient"."owner_user_id" AND (y))"#,
            )
        );
    }

    #[test]
    fn pre_build_callbacks_run_once_in_order() {
        let schema = schema();
        let mut builder = QueryBuilder::new(&schema, "patient").unwrap();
        builder
            .add_column(ColumnPath::new("patient", "id"))
            .add_pre_build(|b| {
                b.where_(Fragment::raw("a"));
                Ok(())
            })
            .add_pre_build(|b| {
                b.where_(Fragment::raw("b"));
                Ok(())
            });
        let first = builder.build().unwrap();
        let second = builder.build().unwrap();
        assert_eq!(first, second);
        assert!(first.sql().ends_with("WHERE (a) AND (b)"), "{first}");
    }

    #[test]
    fn literal_join_operands_are_bound() {
        let schema = schema();
        let mut builder = QueryBuilder::new(&schema, "patient").unwrap();
        builder.add_column(ColumnPath::new("patient", "id")).add_join(JoinClause::new(
            JoinTarget::Table("tag".into()),
            [OnOperand::Literal(Value::from("vip"))],
            [ColumnPath::new("tag", "label")],
        ));
        let statement = builder.build().unwrap();
        assert!(statement.sql().ends_with(r#"ON "tag"."label" = :tag_label_1"#));
        assert_eq!(statement.param("tag_label_1"), Some(&Value::from("vip")));
        assert_eq!(builder.build().unwrap(), statement);
    }

    #[test]
    fn leading_sort_projects_and_orders_first() {
        let schema = schema();
        let rank = DerivedTable {
            alias: "fts".into(),
            source: Fragment::raw("(SELECT id, similarity(code, 'p1') AS rank FROM patient)"),
            columns: vec![
                Column::new("id", ColumnType::BigInt),
                Column::new("rank", ColumnType::Real).nullable(),
            ],
        };
        let leading = LeadingSort::new(ColumnPath::new("fts", "rank"), Direction::Desc).through(
            JoinClause::new(
                JoinTarget::Derived(rank),
                [ColumnPath::new("patient", "id")],
                [ColumnPath::new("fts", "id")],
            ),
        );
        let mut sort = crate::compile::compile_sort(None, &["id"], &[]).unwrap();

        let mut builder = QueryBuilder::new(&schema, "patient").unwrap();
        builder.apply_leading_sort(&leading, &mut sort);
        sort.mark_nullable(&builder.reachable_columns().unwrap());
        builder.apply_sort(&sort).unwrap();

        assert!(sort.keys()[0].nullable);
        assert!(builder.projects("rank"));
        assert_eq!(
            builder.build().unwrap().sql(),
            concat!(
                r#"SELECT "patient"."id", "patient"."code", "patient"."owner_user_id", "fts"."rank" FROM "patient""#,
                r#" JOIN (SELECT id, similarity(code, 'p1') AS rank FROM patient) AS "fts" ON "fts"."id" = "patient"."id""#,
                r#" ORDER BY "fts"."rank" DESC, "patient"."id" DESC"#,
            )
        );
    }

    #[test]
    fn mismatched_join_arity_fails() {
        let schema = schema();
        let mut builder = QueryBuilder::new(&schema, "patient").unwrap();
        builder.add_join(JoinClause::new(
            JoinTarget::Table("user_account".into()),
            [ColumnPath::new("patient", "owner_user_id"), ColumnPath::new("patient", "id")],
            [ColumnPath::new("user_account", "id")],
        ));
        assert!(matches!(builder.build(), Err(QueryError::Build(_))));
    }

    #[test]
    fn unresolved_references_fail_at_build() {
        let schema = schema();
        let mut builder = QueryBuilder::new(&schema, "patient").unwrap();
        builder.add_column(ColumnPath::new("user_account", "email"));
        let err = builder.build().unwrap_err();
        assert!(err.to_string().contains("user_account"), "{err}");

        let mut builder = QueryBuilder::new(&schema, "patient").unwrap();
        builder.order_by(ColumnPath::new("patient", "nope"), Direction::Asc);
        assert!(matches!(builder.build(), Err(QueryError::Build(_))));
    }

    #[test]
    fn fields_and_sort_report_locations() {
        let schema = schema();
        let mut builder = QueryBuilder::new(&schema, "patient").unwrap();
        let fields = crate::compile::compile_selection(Some("id,weight"), None, ["owner"]).unwrap();
        let err = builder.apply_fields(&fields.fields).unwrap_err();
        assert_eq!(err.loc().unwrap().to_string(), "query.fields.weight");

        let sort = crate::compile::compile_sort(Some("weight:asc"), &["id"], &[]).unwrap();
        let err = builder.apply_sort(&sort).unwrap_err();
        assert_eq!(err.loc().unwrap().to_string(), "query.sort_by.weight");
    }

    #[test]
    fn distinct_groups_by_projection() {
        let schema = schema();
        let mut builder = QueryBuilder::new(&schema, "patient").unwrap();
        builder.add_column(ColumnPath::new("patient", "code")).distinct(true);
        assert!(
            builder
                .build()
                .unwrap()
                .sql()
                .ends_with(r#"GROUP BY "patient"."code""#)
        );
    }
}
