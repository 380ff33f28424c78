//! Parser for the domain-filter language.
//!
//! Grammar (AND-only composition):
//!
//! ```text
//! expr   := clause (AND clause)*
//! clause := column op literal
//!         | column IN '(' literal (',' literal)* ')'
//!         | column BETWEEN literal AND literal
//!         | column IS [NOT] NULL
//! op     := == | = | != | <> | < | <= | > | >=
//! ```
//!
//! A malformed expression fails with a `Validation` error naming the
//! offending clause, before any table is scanned.

use crate::error::{EstimatorError, Result};
use crate::filter::expr::{CmpOp, DomainExpr, Literal};

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Num(String),
    Str(String),
    Op(String),
    LParen,
    RParen,
    Comma,
}

struct Token {
    tok: Tok,
    /// Byte offset of the token in the source, for error snippets.
    offset: usize,
}

/// Parse a domain-filter string into an expression.
pub fn parse_domain(input: &str) -> Result<DomainExpr> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(EstimatorError::validation("empty domain expression"));
    }
    let tokens = lex(trimmed)?;
    let mut parser = Parser {
        source: trimmed,
        tokens,
        pos: 0,
    };
    let expr = parser.parse_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(parser.error_here("unexpected trailing input"));
    }
    Ok(expr)
}

fn lex(source: &str) -> Result<Vec<Token>> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        let start = i;
        match c {
            '(' => {
                tokens.push(Token {
                    tok: Tok::LParen,
                    offset: start,
                });
                i += 1;
            }
            ')' => {
                tokens.push(Token {
                    tok: Tok::RParen,
                    offset: start,
                });
                i += 1;
            }
            ',' => {
                tokens.push(Token {
                    tok: Tok::Comma,
                    offset: start,
                });
                i += 1;
            }
            '\'' | '"' => {
                let quote = c;
                i += 1;
                let lit_start = i;
                while i < bytes.len() && bytes[i] as char != quote {
                    i += 1;
                }
                if i >= bytes.len() {
                    return Err(EstimatorError::validation(format!(
                        "unterminated string literal in domain expression: '{}'",
                        &source[start..]
                    )));
                }
                tokens.push(Token {
                    tok: Tok::Str(source[lit_start..i].to_string()),
                    offset: start,
                });
                i += 1;
            }
            '<' | '>' | '=' | '!' => {
                // Collect the whole operator run so "DIA >>= 5" surfaces the
                // bogus operator instead of silently splitting it.
                while i < bytes.len() && matches!(bytes[i] as char, '<' | '>' | '=' | '!') {
                    i += 1;
                }
                tokens.push(Token {
                    tok: Tok::Op(source[start..i].to_string()),
                    offset: start,
                });
            }
            _ if c.is_ascii_digit() || c == '-' || c == '.' => {
                i += 1;
                while i < bytes.len()
                    && ((bytes[i] as char).is_ascii_digit()
                        || bytes[i] as char == '.'
                        || bytes[i] as char == 'e'
                        || bytes[i] as char == 'E'
                        || ((bytes[i] as char == '-' || bytes[i] as char == '+')
                            && matches!(bytes[i - 1] as char, 'e' | 'E')))
                {
                    i += 1;
                }
                tokens.push(Token {
                    tok: Tok::Num(source[start..i].to_string()),
                    offset: start,
                });
            }
            _ if c.is_ascii_alphabetic() || c == '_' => {
                i += 1;
                while i < bytes.len()
                    && ((bytes[i] as char).is_ascii_alphanumeric()
                        || bytes[i] as char == '_'
                        || bytes[i] as char == '.')
                {
                    i += 1;
                }
                tokens.push(Token {
                    tok: Tok::Ident(source[start..i].to_string()),
                    offset: start,
                });
            }
            _ => {
                return Err(EstimatorError::validation(format!(
                    "unexpected character '{c}' in domain expression: '{}'",
                    snippet(source, start)
                )));
            }
        }
    }
    Ok(tokens)
}

/// A short window of the source starting at `offset`, for error messages.
fn snippet(source: &str, offset: usize) -> &str {
    let end = (offset + 32).min(source.len());
    source[offset..end].trim_end()
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser<'_> {
    fn parse_expr(&mut self) -> Result<DomainExpr> {
        let mut expr = self.parse_clause()?;
        while let Some(word) = self.peek_keyword() {
            match word.as_str() {
                "AND" => {
                    self.pos += 1;
                    let rhs = self.parse_clause()?;
                    expr = expr.and(rhs);
                }
                "OR" | "NOT" => {
                    return Err(self.error_here(
                        "OR/NOT composition is not supported; domain filters are AND-only",
                    ));
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_clause(&mut self) -> Result<DomainExpr> {
        let clause_offset = self.current_offset();
        let column = match self.next_tok() {
            Some(Tok::Ident(name)) => {
                let upper = name.to_ascii_uppercase();
                if upper == "OR" || upper == "NOT" {
                    return Err(self.error_at(
                        clause_offset,
                        "OR/NOT composition is not supported; domain filters are AND-only",
                    ));
                }
                name
            }
            _ => {
                return Err(self.error_at(clause_offset, "expected a column name"));
            }
        };

        match self.next_tok() {
            Some(Tok::Op(op)) => {
                let op = parse_op(&op)
                    .ok_or_else(|| self.error_at(clause_offset, &format!("unknown operator '{op}'")))?;
                let value = self.parse_literal(clause_offset)?;
                Ok(DomainExpr::Cmp { column, op, value })
            }
            Some(Tok::Ident(word)) => match word.to_ascii_uppercase().as_str() {
                "IN" => self.parse_in_list(column, clause_offset),
                "BETWEEN" => self.parse_between(column, clause_offset),
                "IS" => self.parse_is_null(column, clause_offset),
                other => Err(self.error_at(
                    clause_offset,
                    &format!("expected an operator, IN, BETWEEN or IS, found '{other}'"),
                )),
            },
            _ => Err(self.error_at(clause_offset, "incomplete clause")),
        }
    }

    fn parse_in_list(&mut self, column: String, clause_offset: usize) -> Result<DomainExpr> {
        if self.next_tok() != Some(Tok::LParen) {
            return Err(self.error_at(clause_offset, "expected '(' after IN"));
        }
        let mut values = Vec::new();
        loop {
            values.push(self.parse_literal(clause_offset)?);
            match self.next_tok() {
                Some(Tok::Comma) => {}
                Some(Tok::RParen) => break,
                _ => {
                    return Err(self.error_at(clause_offset, "expected ',' or ')' in IN list"));
                }
            }
        }
        Ok(DomainExpr::In { column, values })
    }

    fn parse_between(&mut self, column: String, clause_offset: usize) -> Result<DomainExpr> {
        let low = self.parse_literal(clause_offset)?;
        match self.peek_keyword() {
            Some(word) if word == "AND" => self.pos += 1,
            _ => {
                return Err(self.error_at(clause_offset, "expected AND between BETWEEN bounds"));
            }
        }
        let high = self.parse_literal(clause_offset)?;
        Ok(DomainExpr::Between { column, low, high })
    }

    fn parse_is_null(&mut self, column: String, clause_offset: usize) -> Result<DomainExpr> {
        let mut negated = false;
        let mut word = self.next_keyword(clause_offset)?;
        if word == "NOT" {
            negated = true;
            word = self.next_keyword(clause_offset)?;
        }
        if word != "NULL" {
            return Err(self.error_at(clause_offset, "expected NULL after IS"));
        }
        Ok(DomainExpr::IsNull { column, negated })
    }

    fn parse_literal(&mut self, clause_offset: usize) -> Result<Literal> {
        match self.next_tok() {
            Some(Tok::Num(text)) => {
                if !text.contains('.') && !text.contains('e') && !text.contains('E') {
                    if let Ok(v) = text.parse::<i64>() {
                        return Ok(Literal::Int(v));
                    }
                }
                text.parse::<f64>().map(Literal::Float).map_err(|_| {
                    self.error_at(clause_offset, &format!("invalid numeric literal '{text}'"))
                })
            }
            Some(Tok::Str(s)) => Ok(Literal::Str(s)),
            _ => Err(self.error_at(clause_offset, "expected a literal value")),
        }
    }

    fn next_tok(&mut self) -> Option<Tok> {
        let t = self.tokens.get(self.pos).map(|t| t.tok.clone());
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn next_keyword(&mut self, clause_offset: usize) -> Result<String> {
        match self.next_tok() {
            Some(Tok::Ident(word)) => Ok(word.to_ascii_uppercase()),
            _ => Err(self.error_at(clause_offset, "expected a keyword")),
        }
    }

    fn peek_keyword(&self) -> Option<String> {
        match self.tokens.get(self.pos).map(|t| &t.tok) {
            Some(Tok::Ident(word)) => Some(word.to_ascii_uppercase()),
            _ => None,
        }
    }

    fn current_offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map_or(self.source.len(), |t| t.offset)
    }

    fn error_here(&self, message: &str) -> EstimatorError {
        self.error_at(self.current_offset(), message)
    }

    fn error_at(&self, offset: usize, message: &str) -> EstimatorError {
        EstimatorError::validation(format!(
            "malformed domain expression near '{}': {message}",
            snippet(self.source, offset)
        ))
    }
}

fn parse_op(op: &str) -> Option<CmpOp> {
    match op {
        "==" | "=" => Some(CmpOp::Eq),
        "!=" | "<>" => Some(CmpOp::Neq),
        "<" => Some(CmpOp::Lt),
        "<=" => Some(CmpOp::Lte),
        ">" => Some(CmpOp::Gt),
        ">=" => Some(CmpOp::Gte),
        _ => None,
    }
}
