// src/core/bool_expr.rs

//! # Boolean Predicates
//!
//! Parses expressions such as `a && (b || !c)` over named boolean variables.
//! `&&` and `||` share one precedence level and associate left to right, so
//! `a || b && c` reads as `(a || b) && c`. `!` binds tighter than both.
//! Unbound variables evaluate to `false`.

use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BoolExprError {
    #[error("Empty expression.")]
    Empty,
    #[error("Illegal character '{ch}' at position {pos}.")]
    IllegalChar { ch: char, pos: usize },
    #[error("Operator mismatch at position {pos}: expected '{expected}', found '{found}'.")]
    OperatorMismatch {
        pos: usize,
        expected: char,
        found: String,
    },
    #[error("Unbalanced parenthesis at position {pos}.")]
    Unbalanced { pos: usize },
    #[error("Unexpected '{token}' at position {pos}.")]
    Unexpected { token: String, pos: usize },
    #[error("Unexpected end of expression at position {pos}.")]
    UnexpectedEnd { pos: usize },
}

/// A parsed predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoolExpr {
    Var(String),
    Not(Box<BoolExpr>),
    And(Box<BoolExpr>, Box<BoolExpr>),
    Or(Box<BoolExpr>, Box<BoolExpr>),
}

impl BoolExpr {
    /// Parses `input` into an expression tree.
    pub fn parse(input: &str) -> Result<Self, BoolExprError> {
        let tokens = tokenize(input)?;
        if tokens.is_empty() {
            return Err(BoolExprError::Empty);
        }
        let mut parser = Parser {
            tokens,
            index: 0,
            end: input.chars().count(),
        };
        let expr = parser.expression()?;
        match parser.peek() {
            None => Ok(expr),
            Some((Token::RParen, pos)) => Err(BoolExprError::Unbalanced { pos: *pos }),
            Some((token, pos)) => Err(BoolExprError::Unexpected {
                token: token.to_string(),
                pos: *pos,
            }),
        }
    }

    /// Evaluates the expression against a variable map.
    pub fn eval(&self, vars: &HashMap<String, bool>) -> bool {
        self.eval_with(&|name| vars.get(name).copied().unwrap_or(false))
    }

    /// Evaluates the expression with an arbitrary lookup. Evaluation short-circuits,
    /// so the lookup is only called for variables that decide the result.
    pub fn eval_with(&self, lookup: &dyn Fn(&str) -> bool) -> bool {
        match self {
            Self::Var(name) => lookup(name),
            Self::Not(inner) => !inner.eval_with(lookup),
            Self::And(lhs, rhs) => lhs.eval_with(lookup) && rhs.eval_with(lookup),
            Self::Or(lhs, rhs) => lhs.eval_with(lookup) || rhs.eval_with(lookup),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    And,
    Or,
    Not,
    LParen,
    RParen,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ident(name) => f.write_str(name),
            Self::And => f.write_str("&&"),
            Self::Or => f.write_str("||"),
            Self::Not => f.write_str("!"),
            Self::LParen => f.write_str("("),
            Self::RParen => f.write_str(")"),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<(Token, usize)>, BoolExprError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while let Some(&ch) = chars.get(pos) {
        match ch {
            c if c.is_whitespace() => pos += 1,
            '(' => {
                tokens.push((Token::LParen, pos));
                pos += 1;
            }
            ')' => {
                tokens.push((Token::RParen, pos));
                pos += 1;
            }
            '!' => {
                tokens.push((Token::Not, pos));
                pos += 1;
            }
            '&' | '|' => {
                let token = if ch == '&' { Token::And } else { Token::Or };
                match chars.get(pos + 1) {
                    Some(&next) if next == ch => {
                        tokens.push((token, pos));
                        pos += 2;
                    }
                    Some(&next) => {
                        return Err(BoolExprError::OperatorMismatch {
                            pos: pos + 1,
                            expected: ch,
                            found: next.to_string(),
                        });
                    }
                    None => return Err(BoolExprError::UnexpectedEnd { pos: pos + 1 }),
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = pos;
                let mut name = String::new();
                while let Some(&c) = chars.get(pos) {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        name.push(c);
                        pos += 1;
                    } else {
                        break;
                    }
                }
                tokens.push((Token::Ident(name), start));
            }
            other => return Err(BoolExprError::IllegalChar { ch: other, pos }),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    index: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&(Token, usize)> {
        self.tokens.get(self.index)
    }

    fn next(&mut self) -> Option<(Token, usize)> {
        let token = self.tokens.get(self.index).cloned();
        if token.is_some() {
            self.index += 1;
        }
        token
    }

    fn expression(&mut self) -> Result<BoolExpr, BoolExprError> {
        let mut lhs = self.unary()?;
        loop {
            match self.peek() {
                Some((Token::And, _)) => {
                    self.index += 1;
                    let rhs = self.unary()?;
                    lhs = BoolExpr::And(Box::new(lhs), Box::new(rhs));
                }
                Some((Token::Or, _)) => {
                    self.index += 1;
                    let rhs = self.unary()?;
                    lhs = BoolExpr::Or(Box::new(lhs), Box::new(rhs));
                }
                _ => return Ok(lhs),
            }
        }
    }

    fn unary(&mut self) -> Result<BoolExpr, BoolExprError> {
        match self.next() {
            Some((Token::Not, _)) => Ok(BoolExpr::Not(Box::new(self.unary()?))),
            Some((Token::Ident(name), _)) => Ok(BoolExpr::Var(name)),
            Some((Token::LParen, open_pos)) => {
                let inner = self.expression()?;
                match self.next() {
                    Some((Token::RParen, _)) => Ok(inner),
                    None => Err(BoolExprError::Unbalanced { pos: open_pos }),
                    Some((token, pos)) => Err(BoolExprError::Unexpected {
                        token: token.to_string(),
                        pos,
                    }),
                }
            }
            Some((Token::RParen, pos)) => Err(BoolExprError::Unbalanced { pos }),
            Some((token, pos)) => Err(BoolExprError::Unexpected {
                token: token.to_string(),
                pos,
            }),
            None => Err(BoolExprError::UnexpectedEnd { pos: self.end }),
        }
    }
}
