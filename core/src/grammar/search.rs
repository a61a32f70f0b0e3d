//! Search filter grammar.
//!
//! ```text
//! Query  := Terms (LogOp Terms)*
//! Terms  := Term | '(' Query ')'
//! Term   := Name '.' ComparisonOp ':' Value
//! LogOp  := ('and' | 'or') ['not']
//! Value  := '~' [Literal] | Literal (',' Literal)*
//! ```
//!
//! Keywords and operators are case-insensitive. An explicit `and`/`or` is required between
//! terms. A bare literal is a run of adjacent tokens up to whitespace, `,`, `(` or `)`, which
//! lets numbers, dates and timestamps appear unquoted.

use core::fmt;

use compact_str::CompactString;

use super::SyntaxError;
use super::lexer::{Cursor, TokenKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Gt,
    Ge,
    Lt,
    Le,
    Ne,
    In,
    Nin,
    Beg,
    Con,
    End,
}

impl CompareOp {
    pub fn parse(word: &str) -> Option<Self> {
        const OPS: [(&str, CompareOp); 11] = [
            ("eq", CompareOp::Eq),
            ("gt", CompareOp::Gt),
            ("ge", CompareOp::Ge),
            ("lt", CompareOp::Lt),
            ("le", CompareOp::Le),
            ("ne", CompareOp::Ne),
            ("in", CompareOp::In),
            ("nin", CompareOp::Nin),
            ("beg", CompareOp::Beg),
            ("con", CompareOp::Con),
            ("end", CompareOp::End),
        ];
        OPS.iter()
            .find(|(name, _)| word.eq_ignore_ascii_case(name))
            .map(|(_, op)| *op)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            CompareOp::Eq => "eq",
            CompareOp::Gt => "gt",
            CompareOp::Ge => "ge",
            CompareOp::Lt => "lt",
            CompareOp::Le => "le",
            CompareOp::Ne => "ne",
            CompareOp::In => "in",
            CompareOp::Nin => "nin",
            CompareOp::Beg => "beg",
            CompareOp::Con => "con",
            CompareOp::End => "end",
        }
    }

    /// Takes a comma-separated value list.
    pub const fn is_list(self) -> bool {
        matches!(self, CompareOp::In | CompareOp::Nin)
    }

    /// Compiles to a case-insensitive `LIKE`.
    pub const fn is_like(self) -> bool {
        matches!(self, CompareOp::Beg | CompareOp::Con | CompareOp::End)
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conjunction {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogOp {
    pub conjunction: Conjunction,
    pub negate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    Quoted(String),
    Bare(String),
}

impl Literal {
    /// Literal text with quotes removed.
    pub fn text(&self) -> &str {
        match self {
            Literal::Quoted(text) | Literal::Bare(text) => text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TermValue {
    /// `~`
    Null,
    /// `~` immediately followed by a literal
    NullWith(Literal),
    Literals(Vec<Literal>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Term {
    pub name: CompactString,
    pub op: CompareOp,
    pub value: TermValue,
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Term(Term),
    Group(Query),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub first: Box<Operand>,
    pub rest: Vec<(LogOp, Operand)>,
}

impl Query {
    /// Every term in source order.
    pub fn terms(&self) -> Vec<&Term> {
        let mut out = Vec::new();
        collect_terms(self, &mut out);
        out
    }
}

fn collect_terms<'q>(query: &'q Query, out: &mut Vec<&'q Term>) {
    let operands = core::iter::once(query.first.as_ref()).chain(query.rest.iter().map(|(_, o)| o));
    for operand in operands {
        match operand {
            Operand::Term(term) => out.push(term),
            Operand::Group(group) => collect_terms(group, out),
        }
    }
}

pub fn parse_search(input: &str) -> Result<Query, SyntaxError> {
    let mut cursor = Cursor::new(input)?;
    let query = query(&mut cursor)?;
    cursor.expect_end()?;
    Ok(query)
}

fn query(cursor: &mut Cursor<'_>) -> Result<Query, SyntaxError> {
    let first = Box::new(operand(cursor)?);
    let mut rest = Vec::new();
    loop {
        match cursor.peek_kind() {
            None | Some(TokenKind::RParen) => break,
            Some(TokenKind::Word) => {}
            Some(_) => return Err(cursor.error("expected `and` or `or`")),
        }
        let op = log_op(cursor)?;
        rest.push((op, operand(cursor)?));
    }
    Ok(Query { first, rest })
}

fn log_op(cursor: &mut Cursor<'_>) -> Result<LogOp, SyntaxError> {
    let position = cursor.position();
    let (word, _) = cursor.expect_word("`and` or `or`")?;
    let conjunction = if word.eq_ignore_ascii_case("and") {
        Conjunction::And
    } else if word.eq_ignore_ascii_case("or") {
        Conjunction::Or
    } else {
        return Err(SyntaxError::new(
            position,
            format!("expected `and` or `or` between terms, found `{word}`"),
        ));
    };
    let negate = cursor.peek().is_some_and(|token| {
        token.kind == TokenKind::Word
            && cursor.slice(token.start, token.end).eq_ignore_ascii_case("not")
    });
    if negate {
        cursor.advance();
    }
    Ok(LogOp {
        conjunction,
        negate,
    })
}

fn operand(cursor: &mut Cursor<'_>) -> Result<Operand, SyntaxError> {
    if cursor.eat(&TokenKind::LParen) {
        let group = query(cursor)?;
        cursor.expect(&TokenKind::RParen, "`)`")?;
        return Ok(Operand::Group(group));
    }
    term(cursor).map(Operand::Term)
}

fn term(cursor: &mut Cursor<'_>) -> Result<Term, SyntaxError> {
    let (name, position) = cursor.expect_word("a column name")?;
    cursor.expect(&TokenKind::Dot, "`.` after the column name")?;
    let op_position = cursor.position();
    let (op_word, _) = cursor.expect_word("a comparison operator")?;
    let op = CompareOp::parse(op_word).ok_or_else(|| {
        SyntaxError::new(op_position, format!("unknown comparison operator `{op_word}`"))
    })?;
    cursor.expect(&TokenKind::Colon, "`:` after the operator")?;
    let value = value(cursor)?;
    Ok(Term {
        name: CompactString::from(name),
        op,
        value,
        position,
    })
}

fn value(cursor: &mut Cursor<'_>) -> Result<TermValue, SyntaxError> {
    if cursor.eat(&TokenKind::Tilde) {
        if cursor.next_is_adjacent() && starts_literal(cursor.peek_kind()) {
            return Ok(TermValue::NullWith(literal(cursor)?));
        }
        return Ok(TermValue::Null);
    }
    let mut literals = vec![literal(cursor)?];
    while cursor.eat(&TokenKind::Comma) {
        literals.push(literal(cursor)?);
    }
    Ok(TermValue::Literals(literals))
}

fn starts_literal(kind: Option<&TokenKind>) -> bool {
    !matches!(
        kind,
        None | Some(TokenKind::Comma | TokenKind::LParen | TokenKind::RParen | TokenKind::Tilde)
    )
}

fn literal(cursor: &mut Cursor<'_>) -> Result<Literal, SyntaxError> {
    if let Some(TokenKind::Quoted(text)) = cursor.peek_kind() {
        let text = text.clone();
        cursor.advance();
        return Ok(Literal::Quoted(text));
    }
    if !starts_literal(cursor.peek_kind()) {
        return Err(cursor.error("expected a value"));
    }
    let start = cursor.position();
    let mut end = start;
    while let Some(token) = cursor.advance() {
        end = token.end;
        let continues = cursor.next_is_adjacent()
            && starts_literal(cursor.peek_kind())
            && !matches!(cursor.peek_kind(), Some(TokenKind::Quoted(_)));
        if !continues {
            break;
        }
    }
    Ok(Literal::Bare(cursor.slice(start, end).to_owned()))
}
