//! Keyset pagination links.
//!
//! A cursor is a search expression over the sort columns, carried in the `pq` query parameter
//! and compiled like `q`. For sort keys `(a asc, b desc)` and a boundary row `(1, 'x')` the
//! next page is
//!
//! ```text
//! a.gt:1 or (a.eq:1 and b.lt:'x')
//! ```
//!
//! NULL compares greater than every value, matching PostgreSQL's defaults: NULLs come last in
//! ascending order and first in descending order. Nullable keys add `IS NULL` alternatives
//! where needed.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

use crate::compile::{SortKey, SortSpec};
use crate::grammar::search::CompareOp;
use crate::grammar::sort::Direction;
use crate::row::Row;
use crate::value::Value;

/// Query parameter carrying the cursor.
pub const CURSOR_PARAM: &str = "pq";
/// Query parameter marking a backward page.
pub const FROM_PREV_PARAM: &str = "from_prev";

/// Unreserved characters of RFC 3986 stay as they are.
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PageDirection {
    #[default]
    Forward,
    /// Walking towards the start; set by `from_prev=true`
    Backward,
}

impl PageDirection {
    pub const fn from_prev(from_prev: bool) -> Self {
        if from_prev {
            PageDirection::Backward
        } else {
            PageDirection::Forward
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize)]
pub struct PageLinks {
    pub first: String,
    pub next: Option<String>,
    pub previous: Option<String>,
}

// =============================================================================
// Seek expressions
// =============================================================================

/// Cursor expression selecting the rows strictly after `row` when walking `direction`.
///
/// Returns `None` when nothing can follow `row`, which only happens when every key is NULL
/// and sorted towards its end.
pub fn seek_expression(sort: &SortSpec, row: &Row, direction: PageDirection) -> Option<String> {
    seek(sort.keys(), row, direction)
}

fn seek(keys: &[SortKey], row: &Row, direction: PageDirection) -> Option<String> {
    let (key, rest) = keys.split_first()?;
    let value = row.get(&key.column).unwrap_or(&Value::Null);
    // Forward ascending seeks greater values; each reversal flips it.
    let greater = (key.direction == Direction::Asc) == (direction == PageDirection::Forward);
    let literal = value.dsl_literal()?;
    let column = key.column.as_str();

    let mut alternatives = Vec::with_capacity(3);
    match (value.is_null(), greater) {
        (false, true) => {
            alternatives.push(term(column, CompareOp::Gt, &literal));
            if key.nullable {
                alternatives.push(term(column, CompareOp::Eq, "~"));
            }
        }
        (false, false) => alternatives.push(term(column, CompareOp::Lt, &literal)),
        (true, true) => {}
        (true, false) => alternatives.push(term(column, CompareOp::Ne, "~")),
    }
    if let Some(tail) = seek(rest, row, direction) {
        alternatives.push(format!(
            "({} and {})",
            term(column, CompareOp::Eq, &literal),
            parenthesize(&tail)
        ));
    }

    match alternatives.len() {
        0 => None,
        _ => Some(alternatives.join(" or ")),
    }
}

fn term(column: &str, op: CompareOp, literal: &str) -> String {
    format!("{column}.{op}:{literal}")
}

fn parenthesize(expression: &str) -> String {
    if expression.contains(" or ") {
        format!("({expression})")
    } else {
        expression.to_owned()
    }
}

// =============================================================================
// Links
// =============================================================================

/// Absolute base of pagination links: scheme, host, path and the request parameters other
/// than the cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkBase {
    url: String,
    params: Vec<(String, String)>,
}

impl LinkBase {
    pub fn new(scheme: &str, host: &str, path: &str) -> Self {
        Self {
            url: format!("{scheme}://{host}{path}"),
            params: Vec::new(),
        }
    }

    /// Base of a proxied request; `x-forwarded-proto` and `x-forwarded-host` win over the
    /// connection's scheme and host.
    pub fn from_request<'h>(
        scheme: &str,
        host: &str,
        path: &str,
        headers: impl IntoIterator<Item = (&'h str, &'h str)>,
    ) -> Self {
        let mut scheme = scheme;
        let mut host = host;
        for (name, value) in headers {
            if name.eq_ignore_ascii_case("x-forwarded-proto") {
                scheme = value;
            } else if name.eq_ignore_ascii_case("x-forwarded-host") {
                host = value;
            }
        }
        Self::new(scheme, host, path)
    }

    /// Request parameters carried by every link; the cursor parameters are dropped.
    pub fn with_params<'p>(mut self, params: impl IntoIterator<Item = (&'p str, &'p str)>) -> Self {
        self.params.extend(
            params
                .into_iter()
                .filter(|(name, _)| *name != CURSOR_PARAM && *name != FROM_PREV_PARAM)
                .map(|(name, value)| (name.to_owned(), value.to_owned())),
        );
        self
    }

    /// Link to the first page.
    pub fn first(&self) -> String {
        self.link(&[])
    }

    fn link(&self, leading: &[(&str, &str)]) -> String {
        let mut url = self.url.clone();
        let params = leading
            .iter()
            .copied()
            .chain(self.params.iter().map(|(n, v)| (n.as_str(), v.as_str())));
        for (i, (name, value)) in params.enumerate() {
            url.push(if i == 0 { '?' } else { '&' });
            url.extend(utf8_percent_encode(name, QUERY_VALUE));
            url.push('=');
            url.extend(utf8_percent_encode(value, QUERY_VALUE));
        }
        url
    }
}

/// Links around a fetched page.
///
/// `first_row` and `last_row` are the page's boundary rows in logical order. Pass `None` for
/// `first_row` when the request carried no cursor, since nothing precedes the first page.
/// The end reached by the request (`is_last_page`) gets no link.
pub fn pagination_links(
    base: &LinkBase,
    sort: &SortSpec,
    first_row: Option<&Row>,
    last_row: Option<&Row>,
    is_last_page: bool,
    direction: PageDirection,
) -> PageLinks {
    let (first_row, last_row) = match (is_last_page, direction) {
        (true, PageDirection::Backward) => (None, last_row),
        (true, PageDirection::Forward) => (first_row, None),
        (false, _) => (first_row, last_row),
    };

    let next = last_row
        .and_then(|row| seek_expression(sort, row, PageDirection::Forward))
        .map(|cursor| base.link(&[(CURSOR_PARAM, &cursor)]));
    let previous = first_row
        .and_then(|row| seek_expression(sort, row, PageDirection::Backward))
        .map(|cursor| base.link(&[(CURSOR_PARAM, &cursor), (FROM_PREV_PARAM, "true")]));

    PageLinks {
        first: base.first(),
        next,
        previous,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::compile_sort;
    use crate::row;

    fn spec(sort_by: &str) -> SortSpec {
        compile_sort(Some(sort_by), &["id"], &[]).unwrap()
    }

    #[test]
    fn single_key() {
        let row = row! { "id" => 7 };
        let sort = spec("id:asc");
        assert_eq!(
            seek_expression(&sort, &row, PageDirection::Forward).unwrap(),
            "id.gt:7"
        );
        assert_eq!(
            seek_expression(&sort, &row, PageDirection::Backward).unwrap(),
            "id.lt:7"
        );
    }

    #[test]
    fn ties_recurse_into_later_keys() {
        let row = row! { "code" => "b'c", "rank" => 2, "id" => 9 };
        let sort = spec("code:asc,rank:desc");
        assert_eq!(
            seek_expression(&sort, &row, PageDirection::Forward).unwrap(),
            "code.gt:'b''c' or (code.eq:'b''c' and (rank.lt:2 or (rank.eq:2 and id.lt:9)))"
        );
        assert_eq!(
            seek_expression(&sort, &row, PageDirection::Backward).unwrap(),
            "code.lt:'b''c' or (code.eq:'b''c' and (rank.gt:2 or (rank.eq:2 and id.gt:9)))"
        );
    }

    #[test]
    fn nullable_keys_sort_nulls_last() {
        let mut sort = spec("seen_ts:asc");
        let columns = crate::compile::ReachableColumns::from_iter([
            crate::schema::ColumnRef::of(
                "t",
                &crate::schema::Column::new("seen_ts", crate::value::ColumnType::Timestamp)
                    .nullable(),
            ),
        ]);
        sort.mark_nullable(&columns);

        let row = row! { "seen_ts" => Value::Null, "id" => 3 };
        assert_eq!(
            seek_expression(&sort, &row, PageDirection::Forward).unwrap(),
            "(seen_ts.eq:~ and id.lt:3)"
        );
        assert_eq!(
            seek_expression(&sort, &row, PageDirection::Backward).unwrap(),
            "seen_ts.ne:~ or (seen_ts.eq:~ and id.gt:3)"
        );

        let row = row! { "seen_ts" => "2024-01-01T00:00:00", "id" => 3 };
        assert_eq!(
            seek_expression(&sort, &row, PageDirection::Forward).unwrap(),
            "seen_ts.gt:'2024-01-01T00:00:00' or seen_ts.eq:~ or (seen_ts.eq:'2024-01-01T00:00:00' and id.lt:3)"
        );
    }

    #[test]
    fn nullable_keys_sort_nulls_first_when_descending() {
        let mut sort = spec("seen_ts:desc");
        let columns = crate::compile::ReachableColumns::from_iter([
            crate::schema::ColumnRef::of(
                "t",
                &crate::schema::Column::new("seen_ts", crate::value::ColumnType::Timestamp)
                    .nullable(),
            ),
        ]);
        sort.mark_nullable(&columns);

        let row = row! { "seen_ts" => "2024-01-01T00:00:00", "id" => 3 };
        assert_eq!(
            seek_expression(&sort, &row, PageDirection::Forward).unwrap(),
            "seen_ts.lt:'2024-01-01T00:00:00' or (seen_ts.eq:'2024-01-01T00:00:00' and id.lt:3)"
        );
        assert_eq!(
            seek_expression(&sort, &row, PageDirection::Backward).unwrap(),
            "seen_ts.gt:'2024-01-01T00:00:00' or seen_ts.eq:~ or (seen_ts.eq:'2024-01-01T00:00:00' and id.gt:3)"
        );

        let row = row! { "seen_ts" => Value::Null, "id" => 3 };
        assert_eq!(
            seek_expression(&sort, &row, PageDirection::Forward).unwrap(),
            "seen_ts.ne:~ or (seen_ts.eq:~ and id.lt:3)"
        );
    }

    #[test]
    fn links_carry_params_and_skip_the_reached_end() {
        let base = LinkBase::from_request(
            "http",
            "internal:8000",
            "/patients",
            [("X-Forwarded-Proto", "https"), ("x-forwarded-host", "api.example.org")],
        )
        .with_params([("limit", "2"), ("pq", "old"), ("q", "code.con:'a b'")]);
        let sort = spec("id:asc");
        let first = row! { "id" => 1 };
        let last = row! { "id" => 2 };

        let links = pagination_links(
            &base,
            &sort,
            Some(&first),
            Some(&last),
            false,
            PageDirection::Forward,
        );
        assert_eq!(
            links.first,
            "https://api.example.org/patients?limit=2&q=code.con%3A%27a%20b%27"
        );
        assert_eq!(
            links.next.as_deref(),
            Some("https://api.example.org/patients?pq=id.gt%3A2&limit=2&q=code.con%3A%27a%20b%27")
        );
        assert_eq!(
            links.previous.as_deref(),
            Some("https://api.example.org/patients?pq=id.lt%3A1&from_prev=true&limit=2&q=code.con%3A%27a%20b%27")
        );

        let links = pagination_links(&base, &sort, None, Some(&last), true, PageDirection::Forward);
        assert!(links.next.is_none());
        assert!(links.previous.is_none());

        let links = pagination_links(
            &base,
            &sort,
            Some(&first),
            Some(&last),
            true,
            PageDirection::Backward,
        );
        assert!(links.previous.is_none());
        assert!(links.next.is_some());
    }
}
