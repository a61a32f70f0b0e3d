//! Hand-written tokenizer and recursive-descent parsers for the three request DSLs:
//! field/embed selection, search filters and sort specifications.
//!
//! Parsers produce plain syntax trees; name resolution and typing happen in [`crate::compile`].

mod lexer;

pub mod fields;
pub mod search;
pub mod sort;

use thiserror::Error;

use crate::error::{Loc, QueryError};

/// A grammar violation at a byte offset of the input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at position {position}")]
pub struct SyntaxError {
    pub position: usize,
    pub message: String,
}

impl SyntaxError {
    pub(crate) fn new(position: usize, message: impl Into<String>) -> Self {
        Self {
            position,
            message: message.into(),
        }
    }

    /// Attaches the originating parameter and the offending fragment of `input`.
    pub fn into_query_error(self, param: &str, input: &str, loc: Loc) -> QueryError {
        QueryError::Grammar {
            loc,
            param: param.into(),
            fragment: fragment_at(input, self.position),
            position: self.position,
            message: self.message,
        }
    }
}

const FRAGMENT_CHARS: usize = 24;

fn fragment_at(input: &str, position: usize) -> String {
    let start = (0..=position.min(input.len()))
        .rev()
        .find(|i| input.is_char_boundary(*i))
        .unwrap_or(0);
    input[start..].chars().take(FRAGMENT_CHARS).collect()
}
