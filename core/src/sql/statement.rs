use std::fmt;

use smallvec::SmallVec;

use super::Fragment;
use crate::value::Value;

/// Placeholder syntax used when rendering a [`Statement`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Placeholders {
    /// `:name`, the canonical form used for logging and assertions
    #[default]
    Named,
    /// `$1`, `$2`, ... for PostgreSQL drivers
    Numbered,
}

/// SQL text plus parameters in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedSql<'a> {
    pub sql: String,
    pub params: SmallVec<[(&'a str, &'a Value); 8]>,
}

impl RenderedSql<'_> {
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.params.iter().map(|(_, value)| *value)
    }
}

/// A complete, executable statement produced by [`QueryBuilder::build`](crate::QueryBuilder::build).
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    fragment: Fragment,
    page_size: Option<u32>,
}

impl Statement {
    pub(crate) fn new(fragment: Fragment, page_size: Option<u32>) -> Self {
        Self {
            fragment,
            page_size,
        }
    }

    pub fn render(&self, style: Placeholders) -> RenderedSql<'_> {
        let mut sql = String::with_capacity(256);
        let mut params = SmallVec::new();
        self.fragment.write_to(&mut sql, style, &mut params);
        crate::crudql_trace_query!(&sql, params.len());
        RenderedSql { sql, params }
    }

    /// SQL text with `:name` placeholders.
    pub fn sql(&self) -> String {
        self.render(Placeholders::Named).sql
    }

    pub fn params(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fragment.params()
    }

    /// Looks up a bound value by placeholder name.
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    /// The page size requested through `limit`; the statement itself fetches one extra row.
    pub fn page_size(&self) -> Option<u32> {
        self.page_size
    }

    pub fn fragment(&self) -> &Fragment {
        &self.fragment
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.fragment, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbered_placeholders_follow_param_order() {
        let mut fragment = Fragment::raw("SELECT 1 WHERE a = ");
        fragment
            .push_param("t_a_1", Value::Int(1))
            .push_raw(" AND b = ")
            .push_param("t_b_2", Value::Int(2));
        let statement = Statement::new(fragment, None);

        let rendered = statement.render(Placeholders::Numbered);
        assert_eq!(rendered.sql, "SELECT 1 WHERE a = $1 AND b = $2");
        assert_eq!(
            rendered.values().cloned().collect::<Vec<_>>(),
            [Value::Int(1), Value::Int(2)]
        );
        assert_eq!(statement.sql(), "SELECT 1 WHERE a = :t_a_1 AND b = :t_b_2");
        assert_eq!(statement.param("t_b_2"), Some(&Value::Int(2)));
    }
}
