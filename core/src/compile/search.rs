use core::fmt;

use compact_str::CompactString;

use super::param_name;
use crate::error::{Loc, QueryError, Result};
use crate::grammar::search::{
    CompareOp, Conjunction, Literal, Operand, Query, Term, TermValue, parse_search,
};
use crate::schema::{ColumnRef, EntityDescriptor, Relation, RelationGraph, RelationMap};
use crate::sql::{BindCounter, Fragment};
use crate::value::Value;

// =============================================================================
// Reachable columns
// =============================================================================

/// Columns a filter may name, each annotated with its owning table and type.
///
/// When two joined tables share a column name the first one added wins.
#[derive(Debug, Clone, Default)]
pub struct ReachableColumns {
    columns: Vec<ColumnRef>,
}

impl ReachableColumns {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of_entity(entity: &EntityDescriptor) -> Self {
        entity.column_refs().collect()
    }

    pub fn push(&mut self, column: ColumnRef) {
        if !self.contains(&column.column) {
            self.columns.push(column);
        }
    }

    pub fn get(&self, name: &str) -> Option<&ColumnRef> {
        self.columns.iter().find(|c| c.column == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ColumnRef> {
        self.columns.iter()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl Extend<ColumnRef> for ReachableColumns {
    fn extend<I: IntoIterator<Item = ColumnRef>>(&mut self, iter: I) {
        for column in iter {
            self.push(column);
        }
    }
}

impl FromIterator<ColumnRef> for ReachableColumns {
    fn from_iter<I: IntoIterator<Item = ColumnRef>>(iter: I) -> Self {
        let mut columns = ReachableColumns::new();
        columns.extend(iter);
        columns
    }
}

// =============================================================================
// Predicate
// =============================================================================

/// A compiled boolean condition. Literals only ever appear as bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate(Fragment);

impl Predicate {
    pub fn new(fragment: Fragment) -> Self {
        Self(fragment)
    }

    pub fn fragment(&self) -> &Fragment {
        &self.0
    }

    pub fn into_fragment(self) -> Fragment {
        self.0
    }

    pub fn params(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.params()
    }
}

impl From<Fragment> for Predicate {
    fn from(fragment: Fragment) -> Self {
        Self(fragment)
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

// =============================================================================
// Compilation
// =============================================================================

/// Compiles a `q` string against `columns`.
///
/// `loc` names the originating parameter (`["query", "q"]` or `["query", "q.<relation>"]`)
/// and is attached to every error.
pub fn compile_search(
    q: &str,
    columns: &ReachableColumns,
    binds: &mut BindCounter,
    loc: Loc,
) -> Result<Predicate> {
    let query =
        parse_search(q).map_err(|e| e.into_query_error(param_name(&loc), q, loc.clone()))?;
    let mut compiler = Compiler {
        columns,
        binds,
        loc: &loc,
    };
    compiler.query(&query).map(Predicate)
}

/// Compiles `q.<relation>` filters against each relation's target columns.
///
/// The predicates are meant for existence subqueries; see
/// [`QueryBuilder::add_existence_subquery`](crate::QueryBuilder::add_existence_subquery).
pub fn compile_relation_search<'a, G>(
    q_extra: impl IntoIterator<Item = (&'a str, &'a str)>,
    relations: &RelationMap,
    graph: &G,
    binds: &mut BindCounter,
) -> Result<Vec<(Relation, Predicate)>>
where
    G: RelationGraph + ?Sized,
{
    let mut compiled = Vec::new();
    for (name, q) in q_extra {
        let loc = Loc::query(&format!("q.{name}"));
        let relation = relations
            .get(name)
            .ok_or_else(|| QueryError::unknown_relation(loc.clone(), name))?;
        let columns: ReachableColumns = graph.target_columns(relation)?.into_iter().collect();
        let predicate = compile_search(q, &columns, binds, loc)?;
        compiled.push((relation.clone(), predicate));
    }
    Ok(compiled)
}

struct Compiler<'c> {
    columns: &'c ReachableColumns,
    binds: &'c mut BindCounter,
    loc: &'c Loc,
}

impl Compiler<'_> {
    fn query(&mut self, query: &Query) -> Result<Fragment> {
        let mut out = self.operand(&query.first)?;
        for (op, operand) in &query.rest {
            out.push_raw(match (op.conjunction, op.negate) {
                (Conjunction::And, false) => " AND ",
                (Conjunction::And, true) => " AND NOT ",
                (Conjunction::Or, false) => " OR ",
                (Conjunction::Or, true) => " OR NOT ",
            });
            out.append(self.operand(operand)?);
        }
        Ok(out)
    }

    fn operand(&mut self, operand: &Operand) -> Result<Fragment> {
        match operand {
            Operand::Term(term) => self.term(term),
            Operand::Group(query) => Ok(self.query(query)?.parens()),
        }
    }

    fn term(&mut self, term: &Term) -> Result<Fragment> {
        let columns = self.columns;
        let column = columns
            .get(&term.name)
            .ok_or_else(|| QueryError::unknown_column(self.loc.clone(), &term.name))?;

        match &term.value {
            TermValue::Null => self.null_check(column, term.op),
            TermValue::NullWith(literal) => self.null_or_equal(column, term.op, literal),
            TermValue::Literals(literals) if term.op.is_list() => {
                self.membership(column, term.op, literals)
            }
            TermValue::Literals(literals) => {
                let [literal] = literals.as_slice() else {
                    return Err(QueryError::validation(
                        self.loc.clone(),
                        format!(
                            "Operator {} on {} takes a single value",
                            term.op, term.name
                        ),
                    ));
                };
                if term.op.is_like() {
                    self.like(column, term.op, literal)
                } else {
                    self.comparison(column, term.op, literal)
                }
            }
        }
    }

    fn null_check(&self, column: &ColumnRef, op: CompareOp) -> Result<Fragment> {
        let check = match op {
            CompareOp::Eq => " IS NULL",
            CompareOp::Ne => " IS NOT NULL",
            other => return Err(self.tilde_misuse(other)),
        };
        let mut out = Fragment::new();
        out.push_column(&column.table, &column.column).push_raw(check);
        Ok(out)
    }

    /// `~'x'`: null or equal to `x` with `eq`, neither with `ne`.
    fn null_or_equal(
        &mut self,
        column: &ColumnRef,
        op: CompareOp,
        literal: &Literal,
    ) -> Result<Fragment> {
        let (check, joiner, cmp) = match op {
            CompareOp::Eq => (" IS NULL", " OR ", " = "),
            CompareOp::Ne => (" IS NOT NULL", " AND ", " <> "),
            other => return Err(self.tilde_misuse(other)),
        };
        let value = self.cast(column, literal)?;
        let name = self.binds.next_name(&column.table, &column.column);
        let mut out = Fragment::new();
        out.push_column(&column.table, &column.column)
            .push_raw(check)
            .push_raw(joiner)
            .push_column(&column.table, &column.column)
            .push_raw(cmp)
            .push_param(name, value);
        Ok(out.parens())
    }

    fn membership(
        &mut self,
        column: &ColumnRef,
        op: CompareOp,
        literals: &[Literal],
    ) -> Result<Fragment> {
        let mut items = Vec::with_capacity(literals.len());
        for literal in literals {
            let value = self.cast(column, literal)?;
            let name = self.binds.next_name(&column.table, &column.column);
            items.push(Fragment::param(name, value));
        }
        let mut out = Fragment::new();
        out.push_column(&column.table, &column.column)
            .push_raw(if op == CompareOp::Nin { " NOT IN " } else { " IN " })
            .append(Fragment::join(items, ", ").parens());
        Ok(out)
    }

    fn like(&mut self, column: &ColumnRef, op: CompareOp, literal: &Literal) -> Result<Fragment> {
        let escaped = escape_like(&literal.text().to_lowercase());
        let pattern = match op {
            CompareOp::Beg => format!("{escaped}%"),
            CompareOp::End => format!("%{escaped}"),
            _ => format!("%{escaped}%"),
        };
        let name = self.binds.next_name(&column.table, &column.column);
        let mut out = Fragment::raw("lower(");
        if column.ty.is_textual() {
            out.push_column(&column.table, &column.column);
        } else {
            out.push_raw("CAST(")
                .push_column(&column.table, &column.column)
                .push_raw(" AS text)");
        }
        out.push_raw(") LIKE ").push_param(name, Value::Text(pattern));
        Ok(out)
    }

    fn comparison(
        &mut self,
        column: &ColumnRef,
        op: CompareOp,
        literal: &Literal,
    ) -> Result<Fragment> {
        let value = self.cast(column, literal)?;
        let name = self.binds.next_name(&column.table, &column.column);
        let mut out = Fragment::new();
        out.push_column(&column.table, &column.column)
            .push_raw(comparison_sql(op))
            .push_param(name, value);
        Ok(out)
    }

    fn cast(&self, column: &ColumnRef, literal: &Literal) -> Result<Value> {
        column
            .ty
            .parse_literal(literal.text())
            .map_err(|reason| QueryError::validation(self.loc.clone(), reason))
    }

    fn tilde_misuse(&self, op: CompareOp) -> QueryError {
        QueryError::validation(
            self.loc.clone(),
            format!("The value ~ is not supported by operator {op}"),
        )
    }
}

fn comparison_sql(op: CompareOp) -> &'static str {
    match op {
        CompareOp::Gt => " > ",
        CompareOp::Ge => " >= ",
        CompareOp::Lt => " < ",
        CompareOp::Le => " <= ",
        CompareOp::Ne => " <> ",
        _ => " = ",
    }
}

/// Escapes `LIKE` wildcards so user text matches literally.
fn escape_like(text: &str) -> CompactString {
    let mut out = CompactString::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Column;
    use crate::value::ColumnType;
    use chrono::NaiveDate;

    fn patient_columns() -> ReachableColumns {
        let entity = EntityDescriptor::new("patient")
            .with_column(Column::new("id", ColumnType::BigInt))
            .with_column(Column::new("code", ColumnType::Text))
            .with_column(Column::new("age", ColumnType::Integer))
            .with_column(Column::new("create_ts", ColumnType::Timestamp))
            .with_column(Column::new("deleted_ts", ColumnType::Timestamp).nullable())
            .with_primary_key(&["id"]);
        ReachableColumns::of_entity(&entity)
    }

    fn compile(q: &str) -> Result<Predicate> {
        compile_search(q, &patient_columns(), &mut BindCounter::new(), Loc::query("q"))
    }

    #[test]
    fn like_operators_are_case_insensitive() {
        let predicate = compile("code.con:'AB'").unwrap();
        assert_eq!(
            predicate.to_string(),
            r#"lower("patient"."code") LIKE :patient_code_1"#
        );
        assert_eq!(
            predicate.params().collect::<Vec<_>>(),
            [("patient_code_1", &Value::from("%ab%"))]
        );

        let predicate = compile("age.beg:'4'").unwrap();
        assert_eq!(
            predicate.to_string(),
            r#"lower(CAST("patient"."age" AS text)) LIKE :patient_age_1"#
        );
    }

    #[test]
    fn like_wildcards_in_values_are_escaped() {
        let predicate = compile("code.end:'5%_x'").unwrap();
        assert_eq!(
            predicate.params().next().unwrap().1,
            &Value::from("%5\\%\\_x")
        );
    }

    #[test]
    fn values_are_cast_to_column_types() {
        let predicate = compile("create_ts.ge:2024-01-01 and age.in:1,2,3").unwrap();
        assert_eq!(
            predicate.to_string(),
            r#""patient"."create_ts" >= :patient_create_ts_1 AND "patient"."age" IN (:patient_age_2, :patient_age_3, :patient_age_4)"#
        );
        let params: Vec<_> = predicate.params().map(|(_, v)| v.clone()).collect();
        let midnight = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(
            params,
            [
                Value::Timestamp(midnight),
                Value::Int(1),
                Value::Int(2),
                Value::Int(3)
            ]
        );
    }

    #[test]
    fn list_binds_never_shadow_other_columns() {
        let entity = EntityDescriptor::new("t")
            .with_column(Column::new("x", ColumnType::BigInt))
            .with_column(Column::new("x_1", ColumnType::BigInt))
            .with_primary_key(&["x"]);
        let predicate = compile_search(
            "x.in:1,2,3 and x_1.eq:5",
            &ReachableColumns::of_entity(&entity),
            &mut BindCounter::new(),
            Loc::query("q"),
        )
        .unwrap();

        assert_eq!(
            predicate.to_string(),
            r#""t"."x" IN (:t_x_1, :t_x_2, :t_x_3) AND "t"."x_1" = :t_x_1_4"#
        );
        let names: Vec<&str> = predicate.params().map(|(name, _)| name).collect();
        let mut unique = names.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), names.len(), "{names:?}");
    }

    #[test]
    fn null_sentinel() {
        assert_eq!(
            compile("deleted_ts.eq:~").unwrap().to_string(),
            r#""patient"."deleted_ts" IS NULL"#
        );
        assert_eq!(
            compile("deleted_ts.NE:~").unwrap().to_string(),
            r#""patient"."deleted_ts" IS NOT NULL"#
        );
        let err = compile("deleted_ts.gt:~").unwrap_err();
        assert!(matches!(err, QueryError::Validation { .. }));
        assert_eq!(err.loc().unwrap().to_string(), "query.q");
    }

    #[test]
    fn null_with_value() {
        let predicate = compile("age.eq:~3").unwrap();
        assert_eq!(
            predicate.to_string(),
            r#"("patient"."age" IS NULL OR "patient"."age" = :patient_age_1)"#
        );
    }

    #[test]
    fn groups_and_negation() {
        let predicate = compile("(age.gt:1 or age.lt:-1) and not code.eq:'x'").unwrap();
        assert_eq!(
            predicate.to_string(),
            r#"("patient"."age" > :patient_age_1 OR "patient"."age" < :patient_age_2) AND NOT "patient"."code" = :patient_code_3"#
        );
    }

    #[test]
    fn repeated_columns_get_distinct_binds() {
        let predicate = compile("age.ge:1 and age.le:9").unwrap();
        let names: Vec<_> = predicate.params().map(|(n, _)| n).collect();
        assert_eq!(names, ["patient_age_1", "patient_age_2"]);
    }

    #[test]
    fn quotes_never_reach_sql_text() {
        let predicate = compile("code.eq:'x'' OR 1=1 --'").unwrap();
        let sql = predicate.to_string();
        assert!(!sql.contains("OR 1=1"), "{sql}");
        assert_eq!(
            predicate.params().next().unwrap().1,
            &Value::from("x' OR 1=1 --")
        );
    }

    #[test]
    fn errors_point_at_the_parameter() {
        let err = compile_search(
            "weight.gt:1",
            &patient_columns(),
            &mut BindCounter::new(),
            Loc::query("q.visits"),
        )
        .unwrap_err();
        assert!(matches!(err, QueryError::UnknownColumn { .. }));
        assert_eq!(err.loc().unwrap(), &Loc::from(["query", "q.visits"]));

        let err = compile("age.gt:abc").unwrap_err();
        assert!(matches!(err, QueryError::Validation { .. }));

        let err = compile("age.gt:1 age.lt:2").unwrap_err();
        let QueryError::Grammar { param, .. } = &err else {
            panic!("expected grammar error, got {err:?}");
        };
        assert_eq!(param, "q");
    }

    #[test]
    fn single_value_operators_reject_lists() {
        let err = compile("age.eq:1,2").unwrap_err();
        assert!(matches!(err, QueryError::Validation { .. }));
    }

    #[test]
    fn first_reachable_column_wins() {
        let mut columns = patient_columns();
        columns.push(ColumnRef::of("visit", &Column::new("id", ColumnType::BigInt)));
        assert_eq!(columns.get("id").unwrap().table, "patient");
        assert_eq!(columns.len(), 5);
    }
}
