//! Keyset walks over an in-memory table.
//!
//! Cursor expressions are parsed with the search grammar and evaluated row by row, with SQL
//! semantics for NULL (comparisons against NULL are false, NULL sorts after every value).

use std::cmp::Ordering;

use crudql::grammar::search::{
    CompareOp, Conjunction, Operand, Query, Term, TermValue, parse_search,
};
use crudql::{
    Column, ColumnType, Direction, EntityDescriptor, PageDirection, ReachableColumns, Row,
    SortSpec, Value, compile_sort, row, seek_expression,
};
use proptest::prelude::*;

fn sort(sort_by: &str) -> SortSpec {
    let entity = EntityDescriptor::new("t")
        .with_column(Column::new("id", ColumnType::BigInt))
        .with_column(Column::new("a", ColumnType::BigInt).nullable())
        .with_column(Column::new("b", ColumnType::BigInt))
        .with_primary_key(&["id"]);
    let mut spec = compile_sort(Some(sort_by), entity.primary_key(), &[]).unwrap();
    spec.mark_nullable(&ReachableColumns::of_entity(&entity));
    spec
}

fn table(cells: &[(Option<i64>, i64)]) -> Vec<Row> {
    cells
        .iter()
        .enumerate()
        .map(|(i, (a, b))| {
            let a = a.map_or(Value::Null, Value::Int);
            row! { "id" => i as i64 + 1, "a" => a, "b" => *b }
        })
        .collect()
}

// =============================================================================
// Evaluation
// =============================================================================

fn cmp_cells(x: &Value, y: &Value) -> Ordering {
    match (x, y) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        (x, y) => x.as_i64().cmp(&y.as_i64()),
    }
}

fn cmp_rows(spec: &SortSpec, x: &Row, y: &Row) -> Ordering {
    for key in spec.keys() {
        let ord = cmp_cells(
            x.get(&key.column).unwrap_or(&Value::Null),
            y.get(&key.column).unwrap_or(&Value::Null),
        );
        let ord = match key.direction {
            Direction::Asc => ord,
            Direction::Desc => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn eval_term(term: &Term, row: &Row) -> bool {
    let cell = row.get(&term.name).unwrap_or(&Value::Null);
    match (&term.value, term.op) {
        (TermValue::Null, CompareOp::Eq) => cell.is_null(),
        (TermValue::Null, CompareOp::Ne) => !cell.is_null(),
        (TermValue::Literals(literals), op) if literals.len() == 1 => {
            let Some(cell) = cell.as_i64() else {
                return false;
            };
            let literal: i64 = literals[0].text().parse().unwrap();
            match op {
                CompareOp::Eq => cell == literal,
                CompareOp::Ne => cell != literal,
                CompareOp::Gt => cell > literal,
                CompareOp::Ge => cell >= literal,
                CompareOp::Lt => cell < literal,
                CompareOp::Le => cell <= literal,
                other => panic!("unexpected operator {other}"),
            }
        }
        (value, op) => panic!("unexpected term {op} {value:?}"),
    }
}

fn eval_operand(operand: &Operand, row: &Row) -> bool {
    match operand {
        Operand::Term(term) => eval_term(term, row),
        Operand::Group(query) => eval(query, row),
    }
}

/// `AND` binds tighter than `OR`, as in the rendered SQL.
fn eval(query: &Query, row: &Row) -> bool {
    let mut any = false;
    let mut all = eval_operand(&query.first, row);
    for (op, operand) in &query.rest {
        let value = eval_operand(operand, row) != op.negate;
        match op.conjunction {
            Conjunction::And => all = all && value,
            Conjunction::Or => {
                any = any || all;
                all = value;
            }
        }
    }
    any || all
}

fn ids(rows: &[Row]) -> Vec<Value> {
    rows.iter().map(|r| r.get("id").cloned().unwrap()).collect()
}

/// Rows matching `cursor` in `spec` order, at most `limit + 1` of them.
fn fetch(rows: &[Row], spec: &SortSpec, cursor: Option<&str>, limit: usize) -> Vec<Row> {
    let query = cursor.map(|c| parse_search(c).unwrap());
    let mut matched: Vec<Row> = rows
        .iter()
        .filter(|row| query.as_ref().is_none_or(|q| eval(q, row)))
        .cloned()
        .collect();
    matched.sort_by(|x, y| cmp_rows(spec, x, y));
    matched.truncate(limit + 1);
    matched
}

/// Follows next cursors from the first page to the end.
fn walk_forward(rows: &[Row], spec: &SortSpec, page_size: usize) -> Vec<Vec<Row>> {
    let mut pages = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let mut page = fetch(rows, spec, cursor.as_deref(), page_size);
        let is_last = page.len() <= page_size;
        page.truncate(page_size);
        let next = page
            .last()
            .and_then(|last| seek_expression(spec, last, PageDirection::Forward));
        if !page.is_empty() {
            pages.push(page);
        }
        match next {
            Some(next) if !is_last => cursor = Some(next),
            _ => return pages,
        }
    }
}

// =============================================================================
// Properties
// =============================================================================

static SORTS: [&str; 7] = [
    "",
    "a:asc",
    "a:desc",
    "b:asc,a:desc",
    "a:asc,b:asc",
    "a:desc,b:desc",
    "b:desc,id:asc",
];

fn arb_cells() -> impl Strategy<Value = Vec<(Option<i64>, i64)>> {
    prop::collection::vec((prop::option::of(0i64..4), 0i64..3), 0..24)
}

proptest! {
    #[test]
    fn seek_selects_exactly_the_rows_after_and_before(
        cells in arb_cells(),
        sort_by in prop::sample::select(&SORTS[..]),
    ) {
        let spec = sort(sort_by);
        let rows = table(&cells);
        let mut sorted = rows.clone();
        sorted.sort_by(|x, y| cmp_rows(&spec, x, y));

        for (i, row) in sorted.iter().enumerate() {
            let after = seek_expression(&spec, row, PageDirection::Forward)
                .map(|q| fetch(&rows, &spec, Some(&q), rows.len()))
                .unwrap_or_default();
            prop_assert_eq!(ids(&after), ids(&sorted[i + 1..]));

            let reversed = spec.reversed();
            let mut before = seek_expression(&spec, row, PageDirection::Backward)
                .map(|q| fetch(&rows, &reversed, Some(&q), rows.len()))
                .unwrap_or_default();
            before.reverse();
            prop_assert_eq!(ids(&before), ids(&sorted[..i]));
        }
    }

    #[test]
    fn forward_pages_cover_every_row_once(
        cells in arb_cells(),
        sort_by in prop::sample::select(&SORTS[..]),
        page_size in 1usize..6,
    ) {
        let spec = sort(sort_by);
        let rows = table(&cells);
        let mut sorted = rows.clone();
        sorted.sort_by(|x, y| cmp_rows(&spec, x, y));

        let pages = walk_forward(&rows, &spec, page_size);
        let walked: Vec<Row> = pages.iter().flatten().cloned().collect();
        prop_assert_eq!(ids(&walked), ids(&sorted));
        prop_assert!(pages.iter().all(|p| p.len() <= page_size));
    }

    #[test]
    fn previous_cursor_returns_the_preceding_page(
        cells in arb_cells(),
        sort_by in prop::sample::select(&SORTS[..]),
        page_size in 1usize..6,
    ) {
        let spec = sort(sort_by);
        let rows = table(&cells);
        let pages = walk_forward(&rows, &spec, page_size);
        let reversed = spec.reversed();

        for pair in pages.windows(2) {
            let cursor = seek_expression(&spec, &pair[1][0], PageDirection::Backward).unwrap();
            let mut previous = fetch(&rows, &reversed, Some(&cursor), page_size);
            previous.truncate(page_size);
            previous.reverse();
            prop_assert_eq!(ids(&previous), ids(&pair[0]));
        }
    }
}

// =============================================================================
// Examples
// =============================================================================

#[test]
fn nulls_sort_last_and_are_reachable_both_ways() {
    let spec = sort("a:asc");
    let rows = table(&[(Some(1), 0), (None, 0), (Some(2), 0), (None, 0)]);

    let pages = walk_forward(&rows, &spec, 1);
    let order: Vec<Value> = pages.iter().map(|p| p[0].get("a").cloned().unwrap()).collect();
    assert_eq!(order, [Value::Int(1), Value::Int(2), Value::Null, Value::Null]);

    let last = pages.last().unwrap();
    assert_eq!(
        seek_expression(&spec, &last[0], PageDirection::Backward).unwrap(),
        "a.ne:~ or (a.eq:~ and id.gt:2)"
    );
    // Only NULL rows with a smaller id can follow.
    assert_eq!(
        seek_expression(&spec, &last[0], PageDirection::Forward).unwrap(),
        "(a.eq:~ and id.lt:2)"
    );
}

#[test]
fn duplicate_keys_fall_back_to_the_primary_key() {
    let spec = sort("b:asc");
    let rows = table(&[(None, 1), (None, 1), (None, 1), (None, 0)]);

    let pages = walk_forward(&rows, &spec, 2);
    let walked: Vec<Row> = pages.into_iter().flatten().collect();
    assert_eq!(
        ids(&walked),
        [Value::Int(4), Value::Int(3), Value::Int(2), Value::Int(1)]
    );
}
