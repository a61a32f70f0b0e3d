//! Field/embed selection grammar.
//!
//! ```text
//! Fields         := ['!'] Expr
//! Expr           := FieldSet | '(' FieldSet ')'
//! FieldSet       := QualifiedField (',' QualifiedField)*
//! QualifiedField := Field ['(' FieldSet ')']
//! ```

use compact_str::CompactString;

use super::SyntaxError;
use super::lexer::{Cursor, TokenKind};

/// Parsed `fields` or `embed` string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldList {
    /// Leading `!`. Parsed but not interpreted by the selection compiler.
    pub negated: bool,
    pub fields: Vec<FieldNode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldNode {
    pub name: CompactString,
    /// Parenthesised sub-selection following the field name
    pub nested: Option<Vec<FieldNode>>,
    pub position: usize,
}

pub fn parse_fields(input: &str) -> Result<FieldList, SyntaxError> {
    let mut cursor = Cursor::new(input)?;
    let negated = cursor.eat(&TokenKind::Bang);
    let fields = if cursor.eat(&TokenKind::LParen) {
        let fields = field_set(&mut cursor)?;
        cursor.expect(&TokenKind::RParen, "`)`")?;
        fields
    } else {
        field_set(&mut cursor)?
    };
    cursor.expect_end()?;
    Ok(FieldList { negated, fields })
}

fn field_set(cursor: &mut Cursor<'_>) -> Result<Vec<FieldNode>, SyntaxError> {
    let mut fields = vec![qualified_field(cursor)?];
    while cursor.eat(&TokenKind::Comma) {
        fields.push(qualified_field(cursor)?);
    }
    Ok(fields)
}

fn qualified_field(cursor: &mut Cursor<'_>) -> Result<FieldNode, SyntaxError> {
    let (name, position) = cursor.expect_word("a field name")?;
    let nested = if cursor.eat(&TokenKind::LParen) {
        let nested = field_set(cursor)?;
        cursor.expect(&TokenKind::RParen, "`)`")?;
        Some(nested)
    } else {
        None
    };
    Ok(FieldNode {
        name: CompactString::from(name),
        nested,
        position,
    })
}
