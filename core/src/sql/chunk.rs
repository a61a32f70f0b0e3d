use std::borrow::Cow;
use std::fmt;

use compact_str::CompactString;
use smallvec::SmallVec;

use super::{Placeholders, write_ident, write_placeholder};
use crate::value::Value;

/// One piece of SQL text.
///
/// - `Raw` - keywords, operators and punctuation, written as-is
/// - `Ident` - a quoted identifier (`"name"`)
/// - `Column` - a qualified column (`"table"."column"`)
/// - `Param` - a placeholder and the value bound to it
#[derive(Debug, Clone, PartialEq)]
pub enum Chunk {
    Raw(Cow<'static, str>),
    Ident(CompactString),
    Column {
        table: CompactString,
        column: CompactString,
    },
    Param {
        name: CompactString,
        value: Value,
    },
}

/// A sequence of [`Chunk`]s forming a valid piece of SQL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fragment {
    chunks: SmallVec<[Chunk; 8]>,
}

impl Fragment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a fragment holding raw SQL text.
    pub fn raw(text: impl Into<Cow<'static, str>>) -> Self {
        let mut fragment = Self::new();
        fragment.push_raw(text);
        fragment
    }

    /// Creates a fragment holding one bound parameter.
    pub fn param(name: impl Into<CompactString>, value: Value) -> Self {
        let mut fragment = Self::new();
        fragment.push_param(name, value);
        fragment
    }

    pub fn push_raw(&mut self, text: impl Into<Cow<'static, str>>) -> &mut Self {
        self.chunks.push(Chunk::Raw(text.into()));
        self
    }

    pub fn push_ident(&mut self, name: &str) -> &mut Self {
        self.chunks.push(Chunk::Ident(CompactString::from(name)));
        self
    }

    pub fn push_column(&mut self, table: &str, column: &str) -> &mut Self {
        self.chunks.push(Chunk::Column {
            table: CompactString::from(table),
            column: CompactString::from(column),
        });
        self
    }

    pub fn push_param(&mut self, name: impl Into<CompactString>, value: Value) -> &mut Self {
        self.chunks.push(Chunk::Param {
            name: name.into(),
            value,
        });
        self
    }

    pub fn append(&mut self, other: Fragment) -> &mut Self {
        self.chunks.extend(other.chunks);
        self
    }

    /// Wraps the fragment in parentheses.
    pub fn parens(self) -> Self {
        let mut out = Fragment::raw("(");
        out.append(self);
        out.push_raw(")");
        out
    }

    /// Joins fragments with a separator such as `" AND "` or `", "`.
    pub fn join<I>(fragments: I, separator: &'static str) -> Self
    where
        I: IntoIterator<Item = Fragment>,
    {
        let mut out = Fragment::new();
        for (i, fragment) in fragments.into_iter().enumerate() {
            if i > 0 {
                out.push_raw(separator);
            }
            out.append(fragment);
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Bound parameters in placeholder order.
    pub fn params(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.chunks.iter().filter_map(|chunk| match chunk {
            Chunk::Param { name, value } => Some((name.as_str(), value)),
            _ => None,
        })
    }

    /// Writes the SQL text to `buf`, collecting bound values in placeholder order.
    pub(crate) fn write_to<'a>(
        &'a self,
        buf: &mut String,
        style: Placeholders,
        params: &mut SmallVec<[(&'a str, &'a Value); 8]>,
    ) {
        for chunk in &self.chunks {
            match chunk {
                Chunk::Raw(text) => buf.push_str(text),
                Chunk::Ident(name) => write_ident(buf, name),
                Chunk::Column { table, column } => {
                    write_ident(buf, table);
                    buf.push('.');
                    write_ident(buf, column);
                }
                Chunk::Param { name, value } => {
                    params.push((name.as_str(), value));
                    write_placeholder(buf, style, name, params.len());
                }
            }
        }
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut buf = String::new();
        let mut params = SmallVec::new();
        self.write_to(&mut buf, Placeholders::Named, &mut params);
        f.write_str(&buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_identifiers_and_params() {
        let mut fragment = Fragment::new();
        fragment
            .push_column("patient", "code")
            .push_raw(" = ")
            .push_param("patient_code_1", Value::from("x"));
        assert_eq!(fragment.to_string(), r#""patient"."code" = :patient_code_1"#);
        assert_eq!(fragment.params().count(), 1);
    }

    #[test]
    fn identifiers_are_escaped() {
        let mut fragment = Fragment::new();
        fragment.push_ident(r#"we"ird"#);
        assert_eq!(fragment.to_string(), r#""we""ird""#);
    }

    #[test]
    fn join_and_parens() {
        let joined = Fragment::join([Fragment::raw("a"), Fragment::raw("b")], " AND ").parens();
        assert_eq!(joined.to_string(), "(a AND b)");
        assert!(Fragment::join(Vec::new(), ", ").is_empty());
    }
}
