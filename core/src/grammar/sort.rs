//! Sort specification grammar.
//!
//! ```text
//! SortBy   := SortItem (',' SortItem)*
//! SortItem := Key | Relation '(' Key (',' Key)* ')'
//! Key      := Field ':' ('asc' | 'desc')
//! ```
//!
//! The grouped form orders the rows of an embedded relation.

use core::fmt;

use compact_str::CompactString;

use super::SyntaxError;
use super::lexer::{Cursor, TokenKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub const fn reversed(self) -> Self {
        match self {
            Direction::Asc => Direction::Desc,
            Direction::Desc => Direction::Asc,
        }
    }

    pub const fn as_sql(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }

    fn parse(word: &str) -> Option<Self> {
        if word.eq_ignore_ascii_case("asc") {
            Some(Direction::Asc)
        } else if word.eq_ignore_ascii_case("desc") {
            Some(Direction::Desc)
        } else {
            None
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Asc => "asc",
            Direction::Desc => "desc",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKeyNode {
    pub field: CompactString,
    pub direction: Direction,
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortItem {
    Key(SortKeyNode),
    Group {
        relation: CompactString,
        keys: Vec<SortKeyNode>,
        position: usize,
    },
}

pub fn parse_sort(input: &str) -> Result<Vec<SortItem>, SyntaxError> {
    let mut cursor = Cursor::new(input)?;
    let mut items = vec![sort_item(&mut cursor)?];
    while cursor.eat(&TokenKind::Comma) {
        items.push(sort_item(&mut cursor)?);
    }
    cursor.expect_end()?;
    Ok(items)
}

fn sort_item(cursor: &mut Cursor<'_>) -> Result<SortItem, SyntaxError> {
    let (field, position) = cursor.expect_word("a sort field")?;
    if cursor.eat(&TokenKind::LParen) {
        let mut keys = vec![sort_key(cursor)?];
        while cursor.eat(&TokenKind::Comma) {
            keys.push(sort_key(cursor)?);
        }
        cursor.expect(&TokenKind::RParen, "`)`")?;
        return Ok(SortItem::Group {
            relation: CompactString::from(field),
            keys,
            position,
        });
    }
    let direction = direction(cursor)?;
    Ok(SortItem::Key(SortKeyNode {
        field: CompactString::from(field),
        direction,
        position,
    }))
}

fn sort_key(cursor: &mut Cursor<'_>) -> Result<SortKeyNode, SyntaxError> {
    let (field, position) = cursor.expect_word("a sort field")?;
    let direction = direction(cursor)?;
    Ok(SortKeyNode {
        field: CompactString::from(field),
        direction,
        position,
    })
}

fn direction(cursor: &mut Cursor<'_>) -> Result<Direction, SyntaxError> {
    cursor.expect(&TokenKind::Colon, "`:` after the sort field")?;
    let position = cursor.position();
    let (word, _) = cursor.expect_word("`asc` or `desc`")?;
    Direction::parse(word)
        .ok_or_else(|| SyntaxError::new(position, format!("unknown sort direction `{word}`")))
}
