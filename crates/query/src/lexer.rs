//! Lexer: tokenizes query strings
//!
//! Keywords (`and`, `or`, `has`, `contains`) are case-insensitive and only
//! recognized when unquoted. Bare words run until whitespace, a
//! parenthesis, a quote or a comparison character, so values such as
//! `aa:bb`, `2011/11/18` and `C\.1.*` need no quoting.

use crate::error::{QueryError, QueryResult};

/// A token produced by the lexer
#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    /// Character offset in the query (0-based)
    pub position: usize,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, position: usize) -> Self {
        Self {
            kind,
            text: text.into(),
            position,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    // Keywords
    And,
    Or,
    Has,
    Contains,

    // Comparison operators
    Eq,
    Lt,
    Gt,
    Le,
    Ge,

    // Operands
    Word,
    StringLiteral,

    OpenParen,
    CloseParen,

    Eof,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::And => write!(f, "'and'"),
            Self::Or => write!(f, "'or'"),
            Self::Has => write!(f, "'has'"),
            Self::Contains => write!(f, "'contains'"),
            Self::Eq => write!(f, "'='"),
            Self::Lt => write!(f, "'<'"),
            Self::Gt => write!(f, "'>'"),
            Self::Le => write!(f, "'<='"),
            Self::Ge => write!(f, "'>='"),
            Self::Word => write!(f, "word"),
            Self::StringLiteral => write!(f, "string literal"),
            Self::OpenParen => write!(f, "'('"),
            Self::CloseParen => write!(f, "')'"),
            Self::Eof => write!(f, "end of query"),
        }
    }
}

pub struct Lexer {
    input: Vec<char>,
    pos: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            pos: 0,
        }
    }

    pub fn tokenize(&mut self) -> QueryResult<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            while self.peek().is_some_and(char::is_whitespace) {
                self.pos += 1;
            }
            let Some(ch) = self.peek() else {
                tokens.push(Token::new(TokenKind::Eof, "", self.pos));
                break;
            };
            tokens.push(self.next_token(ch)?);
        }
        Ok(tokens)
    }

    fn next_token(&mut self, ch: char) -> QueryResult<Token> {
        let start = self.pos;
        match ch {
            '(' => {
                self.pos += 1;
                Ok(Token::new(TokenKind::OpenParen, "(", start))
            }
            ')' => {
                self.pos += 1;
                Ok(Token::new(TokenKind::CloseParen, ")", start))
            }
            '=' => {
                self.pos += 1;
                if self.peek() == Some('=') {
                    self.pos += 1;
                    return Ok(Token::new(TokenKind::Eq, "==", start));
                }
                Ok(Token::new(TokenKind::Eq, "=", start))
            }
            '<' | '>' => {
                self.pos += 1;
                let or_equal = self.peek() == Some('=');
                if or_equal {
                    self.pos += 1;
                }
                let (kind, text) = match (ch, or_equal) {
                    ('<', false) => (TokenKind::Lt, "<"),
                    ('<', true) => (TokenKind::Le, "<="),
                    (_, false) => (TokenKind::Gt, ">"),
                    (_, true) => (TokenKind::Ge, ">="),
                };
                Ok(Token::new(kind, text, start))
            }
            '\'' | '"' => self.read_string_literal(ch),
            _ => Ok(self.read_word()),
        }
    }

    fn read_string_literal(&mut self, quote: char) -> QueryResult<Token> {
        let start = self.pos;
        self.pos += 1;

        let mut text = String::new();
        loop {
            match self.peek() {
                None => return Err(QueryError::invalid(start, "unterminated string literal")),
                Some('\\') if self.peek_at(1) == Some(quote) => {
                    text.push(quote);
                    self.pos += 2;
                }
                Some(c) if c == quote => {
                    self.pos += 1;
                    break;
                }
                Some(c) => {
                    text.push(c);
                    self.pos += 1;
                }
            }
        }
        Ok(Token::new(TokenKind::StringLiteral, text, start))
    }

    fn read_word(&mut self) -> Token {
        let start = self.pos;
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_whitespace() || matches!(c, '(' | ')' | '\'' | '"' | '<' | '>' | '=') {
                break;
            }
            text.push(c);
            self.pos += 1;
        }

        let kind = match text.to_ascii_lowercase().as_str() {
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "has" => TokenKind::Has,
            "contains" => TokenKind::Contains,
            _ => TokenKind::Word,
        };
        Token::new(kind, text, start)
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.input.get(self.pos + offset).copied()
    }
}
