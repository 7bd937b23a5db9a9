//! Parser: recursive descent over lexer tokens
//!
//! ```text
//! query      := or_expr EOF
//! or_expr    := and_expr ("or" and_expr)*
//! and_expr   := term ("and" term)*
//! term       := "(" or_expr ")" | "has" NAME | NAME op VALUE
//! op         := "contains" | "=" | "==" | "<" | ">" | "<=" | ">="
//! ```

use crate::error::{QueryError, QueryResult};
use crate::filter::{
    AndFilter, CompareOp, Filter, HasPredicateFilter, IdentityFilter, OrFilter,
    PredicateCompareFilter, PredicateContainsFilter, SubjectContainsFilter,
};
use crate::lexer::{Lexer, Token, TokenKind};
use warden_store::attrs;

/// Parsed query, before filters are built.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Has(String),
    Contains { attribute: String, pattern: String },
    Compare { attribute: String, op: CompareOp, value: String },
}

impl Expr {
    /// Build the filter tree. Regexes are compiled here, so a bad pattern
    /// surfaces before any subject is read.
    pub fn compile(&self) -> QueryResult<Box<dyn Filter>> {
        Ok(match self {
            Self::And(parts) => Box::new(AndFilter::new(
                parts.iter().map(Expr::compile).collect::<QueryResult<_>>()?,
            )),
            Self::Or(parts) => Box::new(OrFilter::new(
                parts.iter().map(Expr::compile).collect::<QueryResult<_>>()?,
            )),
            Self::Has(attribute) => Box::new(HasPredicateFilter::new(attribute)),
            Self::Contains { attribute, pattern } if attribute == attrs::SUBJECT => {
                Box::new(SubjectContainsFilter::new(pattern)?)
            }
            Self::Contains { attribute, pattern } => {
                Box::new(PredicateContainsFilter::new(attribute, pattern)?)
            }
            Self::Compare {
                attribute,
                op,
                value,
            } => Box::new(PredicateCompareFilter::new(attribute, *op, value)),
        })
    }
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    /// Parse a query string. Blank input parses to `None`.
    pub fn parse(input: &str) -> QueryResult<Option<Expr>> {
        let tokens = Lexer::new(input).tokenize()?;
        let mut parser = Self { tokens, pos: 0 };
        if parser.check(TokenKind::Eof) {
            return Ok(None);
        }
        let expr = parser.parse_or()?;
        parser.expect(TokenKind::Eof)?;
        Ok(Some(expr))
    }

    fn parse_or(&mut self) -> QueryResult<Expr> {
        let mut parts = vec![self.parse_and()?];
        while self.check(TokenKind::Or) {
            self.advance();
            parts.push(self.parse_and()?);
        }
        Ok(if parts.len() == 1 {
            parts.remove(0)
        } else {
            Expr::Or(parts)
        })
    }

    fn parse_and(&mut self) -> QueryResult<Expr> {
        let mut parts = vec![self.parse_term()?];
        while self.check(TokenKind::And) {
            self.advance();
            parts.push(self.parse_term()?);
        }
        Ok(if parts.len() == 1 {
            parts.remove(0)
        } else {
            Expr::And(parts)
        })
    }

    fn parse_term(&mut self) -> QueryResult<Expr> {
        match self.peek().kind {
            TokenKind::OpenParen => {
                self.advance();
                let inner = self.parse_or()?;
                self.expect(TokenKind::CloseParen)?;
                Ok(inner)
            }
            TokenKind::Has => {
                self.advance();
                let attribute = self.expect(TokenKind::Word)?.text;
                Ok(Expr::Has(attribute))
            }
            TokenKind::Word => {
                let attribute = self.advance().text;
                let op = self.advance();
                let op = match op.kind {
                    TokenKind::Contains => None,
                    TokenKind::Eq => Some(CompareOp::Eq),
                    TokenKind::Lt => Some(CompareOp::Lt),
                    TokenKind::Gt => Some(CompareOp::Gt),
                    TokenKind::Le => Some(CompareOp::Le),
                    TokenKind::Ge => Some(CompareOp::Ge),
                    other => {
                        return Err(QueryError::invalid(
                            op.position,
                            format!("expected an operator after '{}', found {}", attribute, other),
                        ))
                    }
                };
                let value = self.expect_value()?;
                Ok(match op {
                    Some(op) => compare(attribute, op, value),
                    None => Expr::Contains {
                        attribute,
                        pattern: value,
                    },
                })
            }
            other => Err(QueryError::invalid(
                self.peek().position,
                format!("expected an attribute, 'has' or '(', found {}", other),
            )),
        }
    }

    fn expect_value(&mut self) -> QueryResult<String> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Word | TokenKind::StringLiteral => {
                self.advance();
                Ok(token.text)
            }
            other => Err(QueryError::invalid(
                token.position,
                format!("expected a value, found {}", other),
            )),
        }
    }

    fn expect(&mut self, kind: TokenKind) -> QueryResult<Token> {
        let token = self.peek().clone();
        if token.kind != kind {
            return Err(QueryError::invalid(
                token.position,
                format!("expected {}, found {}", kind, token.kind),
            ));
        }
        self.advance();
        Ok(token)
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn peek(&self) -> &Token {
        // The lexer always ends the stream with Eof, and `advance` never
        // moves past it.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }
}

fn compare(attribute: String, op: CompareOp, value: String) -> Expr {
    Expr::Compare {
        attribute,
        op,
        value,
    }
}

/// Compile a query string into a filter. Blank queries pass everything.
pub fn compile(query: &str) -> QueryResult<Box<dyn Filter>> {
    match Parser::parse(query)? {
        Some(expr) => expr.compile(),
        None => Ok(Box::new(IdentityFilter)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence_and_binds_tighter() {
        let expr = Parser::parse("a = 1 or b = 2 and has c").unwrap().unwrap();
        assert_eq!(
            expr,
            Expr::Or(vec![
                compare("a".into(), CompareOp::Eq, "1".into()),
                Expr::And(vec![
                    compare("b".into(), CompareOp::Eq, "2".into()),
                    Expr::Has("c".into()),
                ]),
            ])
        );
    }

    #[test]
    fn test_parenthesized_rewrite_form() {
        let expr = Parser::parse("( subject contains 'C.1' and type = Client )")
            .unwrap()
            .unwrap();
        assert_eq!(
            expr,
            Expr::And(vec![
                Expr::Contains {
                    attribute: "subject".into(),
                    pattern: "C.1".into(),
                },
                compare("type".into(), CompareOp::Eq, "Client".into()),
            ])
        );
    }

    #[test]
    fn test_blank_query() {
        assert_eq!(Parser::parse("   ").unwrap(), None);
    }

    #[test]
    fn test_errors_carry_position() {
        match Parser::parse("Host contains") {
            Err(QueryError::InvalidQuery { position, .. }) => assert_eq!(position, 13),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(matches!(
            Parser::parse("(Host = a"),
            Err(QueryError::InvalidQuery { position: 9, .. })
        ));
        assert!(matches!(
            Parser::parse("Host foo"),
            Err(QueryError::InvalidQuery { position: 5, .. })
        ));
        assert!(matches!(
            Parser::parse("Host = a b"),
            Err(QueryError::InvalidQuery { position: 9, .. })
        ));
    }

    #[test]
    fn test_compile_rejects_bad_regex_up_front() {
        assert!(matches!(
            compile("Host contains '[z-a]'"),
            Err(QueryError::InvalidPattern { .. })
        ));
    }
}
