//! SQL text assembly: fragments with inline bound values, bind naming and final statements.
//!
//! Values never enter the SQL text. A [`Fragment`] keeps each parameter next to its
//! placeholder so predicates can be moved between builders without losing their binds.

mod bind;
mod chunk;
mod statement;

pub use bind::BindCounter;
pub use chunk::{Chunk, Fragment};
pub use statement::{Placeholders, RenderedSql, Statement};

use core::fmt::Write;

/// Writes `name` as a double-quoted identifier, doubling embedded quotes.
pub(crate) fn write_ident(buf: &mut String, name: &str) {
    buf.push('"');
    for c in name.chars() {
        if c == '"' {
            buf.push('"');
        }
        buf.push(c);
    }
    buf.push('"');
}

pub(crate) fn write_placeholder(buf: &mut String, style: Placeholders, name: &str, index: usize) {
    let _ = match style {
        Placeholders::Named => write!(buf, ":{name}"),
        Placeholders::Numbered => write!(buf, "${index}"),
    };
}
