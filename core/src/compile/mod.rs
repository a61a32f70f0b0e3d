//! Compilers turning parsed request DSLs into schema-checked selections, predicates and sort
//! specifications.

mod search;
mod selection;
mod sort;

pub use search::{Predicate, ReachableColumns, compile_relation_search, compile_search};
pub use selection::{CompiledSelection, Selection, SelectionTree, compile_selection};
pub use sort::{SortKey, SortSpec, compile_sort};

use crate::error::Loc;

/// Name of the request parameter a loc points at, e.g. `q.user` for `["query", "q.user"]`.
fn param_name(loc: &Loc) -> &str {
    loc.segments().nth(1).unwrap_or_default()
}
