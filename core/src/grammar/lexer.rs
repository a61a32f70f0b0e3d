//! Tokenizer shared by the request DSLs.

use super::SyntaxError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TokenKind {
    /// `[A-Za-z0-9_]+`
    Word,
    /// `'...'` with `''` as an escaped quote; holds the unescaped text
    Quoted(String),
    Dot,
    Colon,
    Comma,
    LParen,
    RParen,
    Tilde,
    Bang,
    /// Any other non-whitespace character
    Symbol(char),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
}

pub(crate) fn tokenize(input: &str) -> Result<Vec<Token>, SyntaxError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some((start, c)) = chars.next() {
        let kind = match c {
            c if c.is_whitespace() => continue,
            '.' => TokenKind::Dot,
            ':' => TokenKind::Colon,
            ',' => TokenKind::Comma,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '~' => TokenKind::Tilde,
            '!' => TokenKind::Bang,
            '\'' => {
                let mut text = String::new();
                let mut closed = false;
                while let Some((_, c)) = chars.next() {
                    if c == '\'' {
                        if chars.peek().is_some_and(|(_, next)| *next == '\'') {
                            chars.next();
                            text.push('\'');
                        } else {
                            closed = true;
                            break;
                        }
                    } else {
                        text.push(c);
                    }
                }
                if !closed {
                    return Err(SyntaxError::new(start, "unterminated string literal"));
                }
                TokenKind::Quoted(text)
            }
            c if is_word_char(c) => {
                while chars.peek().is_some_and(|(_, c)| is_word_char(*c)) {
                    chars.next();
                }
                TokenKind::Word
            }
            other => TokenKind::Symbol(other),
        };
        let end = chars.peek().map_or(input.len(), |(i, _)| *i);
        tokens.push(Token { kind, start, end });
    }

    Ok(tokens)
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Token stream with one-token lookahead.
pub(crate) struct Cursor<'s> {
    input: &'s str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'s> Cursor<'s> {
    pub fn new(input: &'s str) -> Result<Self, SyntaxError> {
        Ok(Self {
            input,
            tokens: tokenize(input)?,
            pos: 0,
        })
    }

    pub fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    pub fn peek_kind(&self) -> Option<&TokenKind> {
        self.peek().map(|t| &t.kind)
    }

    pub fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Consumes the next token if it has the given kind.
    pub fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek_kind() == Some(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    pub fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<Token, SyntaxError> {
        match self.peek() {
            Some(token) if &token.kind == kind => {
                let token = token.clone();
                self.pos += 1;
                Ok(token)
            }
            _ => Err(self.error(format!("expected {what}"))),
        }
    }

    /// Consumes a word and returns its text.
    pub fn expect_word(&mut self, what: &str) -> Result<(&'s str, usize), SyntaxError> {
        match self.peek() {
            Some(Token {
                kind: TokenKind::Word,
                start,
                end,
            }) => {
                let (start, end) = (*start, *end);
                self.pos += 1;
                Ok((&self.input[start..end], start))
            }
            _ => Err(self.error(format!("expected {what}"))),
        }
    }

    /// Whether the next token starts exactly where the previous one ended.
    pub fn next_is_adjacent(&self) -> bool {
        match (self.pos.checked_sub(1).and_then(|i| self.tokens.get(i)), self.peek()) {
            (Some(prev), Some(next)) => prev.end == next.start,
            _ => false,
        }
    }

    pub fn slice(&self, start: usize, end: usize) -> &'s str {
        &self.input[start..end]
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    /// Byte offset of the next token, or the input length at the end.
    pub fn position(&self) -> usize {
        self.peek().map_or(self.input.len(), |t| t.start)
    }

    pub fn error(&self, message: impl Into<String>) -> SyntaxError {
        let message = message.into();
        match self.peek() {
            Some(token) => SyntaxError::new(
                token.start,
                format!("{message}, found `{}`", &self.input[token.start..token.end]),
            ),
            None => SyntaxError::new(self.input.len(), format!("{message}, found end of input")),
        }
    }

    pub fn expect_end(&self) -> Result<(), SyntaxError> {
        if self.at_end() {
            Ok(())
        } else {
            Err(self.error("unexpected trailing input"))
        }
    }
}
