use serde_json::Value;

use crate::error::{AppError, Result};

/// Restricted, total boolean expression language for policy rule conditions.
///
/// Conditions are parsed once at policy load into an [`Expr`] tree and then
/// evaluated against a nested context map. Evaluation is side-effect-free:
/// missing context paths resolve to `null` and never raise; only malformed
/// source or non-boolean results produce a RuleEval error.
///
/// Supported syntax:
/// - paths: `ensemble.risk_score`
/// - literals: integers, floats, single/double-quoted strings, `true`,
///   `false`, `null`
/// - comparisons: `== != > < >= <=`
/// - boolean: `and` / `or` (case-insensitive), parentheses, short-circuit
/// - functions: `<list>.contains(<value>)`, `<list>.empty()`, `len(<list>)`
/// - `*` as the entire condition (always true)
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Wildcard,
    Literal(Value),
    Path(Vec<String>),
    Compare {
        op: CompareOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Contains {
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Empty(Box<Expr>),
    Len(Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

/// Parse a condition string into an expression tree
pub fn parse(condition: &str) -> Result<Expr> {
    let trimmed = condition.trim();
    if trimmed == "*" {
        return Ok(Expr::Wildcard);
    }

    let tokens = tokenize(trimmed)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_or()?;

    if parser.pos != parser.tokens.len() {
        return Err(AppError::RuleEval(format!(
            "unexpected trailing input in condition '{trimmed}'"
        )));
    }

    Ok(expr)
}

/// Evaluate a parsed condition against the context; the result must be boolean
pub fn evaluate(expr: &Expr, context: &Value) -> Result<bool> {
    match eval(expr, context)? {
        Value::Bool(b) => Ok(b),
        other => Err(AppError::RuleEval(format!(
            "condition evaluated to non-boolean value: {other}"
        ))),
    }
}

fn eval(expr: &Expr, context: &Value) -> Result<Value> {
    match expr {
        Expr::Wildcard => Ok(Value::Bool(true)),
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Path(segments) => Ok(resolve_path(context, segments)),
        Expr::Compare { op, lhs, rhs } => {
            let left = eval(lhs, context)?;
            let right = eval(rhs, context)?;
            Ok(Value::Bool(compare(*op, &left, &right)))
        }
        Expr::And(lhs, rhs) => {
            // Short-circuit
            if !evaluate(lhs, context)? {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(evaluate(rhs, context)?))
        }
        Expr::Or(lhs, rhs) => {
            if evaluate(lhs, context)? {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(evaluate(rhs, context)?))
        }
        Expr::Contains { target, value } => {
            let haystack = eval(target, context)?;
            let needle = eval(value, context)?;
            let found = haystack
                .as_array()
                .map(|items| items.iter().any(|item| values_equal(item, &needle)))
                .unwrap_or(false);
            Ok(Value::Bool(found))
        }
        Expr::Empty(target) => {
            let value = eval(target, context)?;
            let empty = value.as_array().map(|items| items.is_empty()).unwrap_or(false);
            Ok(Value::Bool(empty))
        }
        Expr::Len(target) => {
            let value = eval(target, context)?;
            let len = match &value {
                Value::Array(items) => items.len(),
                Value::String(s) => s.chars().count(),
                _ => 0,
            };
            Ok(Value::from(len as u64))
        }
    }
}

/// Resolve a path against the context; any missing segment yields null
fn resolve_path(context: &Value, segments: &[String]) -> Value {
    let mut current = context;
    for segment in segments {
        match current.as_object().and_then(|map| map.get(segment)) {
            Some(next) => current = next,
            None => return Value::Null,
        }
    }
    current.clone()
}

fn compare(op: CompareOp, left: &Value, right: &Value) -> bool {
    match op {
        CompareOp::Eq => values_equal(left, right),
        CompareOp::Ne => !values_equal(left, right),
        CompareOp::Gt => values_ordering(left, right)
            .map(|o| o == std::cmp::Ordering::Greater)
            .unwrap_or(false),
        CompareOp::Lt => values_ordering(left, right)
            .map(|o| o == std::cmp::Ordering::Less)
            .unwrap_or(false),
        CompareOp::Ge => values_ordering(left, right)
            .map(|o| o != std::cmp::Ordering::Less)
            .unwrap_or(false),
        CompareOp::Le => values_ordering(left, right)
            .map(|o| o != std::cmp::Ordering::Greater)
            .unwrap_or(false),
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        // Numbers compare numerically so 20 == 20.0
        (Some(l), Some(r)) => l == r,
        _ => left == right,
    }
}

/// Ordering is defined for number pairs and string pairs only; anything else
/// (including null from a missing path) compares as unordered, so ordered
/// comparisons on it are false rather than an error
fn values_ordering(left: &Value, right: &Value) -> Option<std::cmp::Ordering> {
    if let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) {
        return l.partial_cmp(&r);
    }
    if let (Value::String(l), Value::String(r)) = (left, right) {
        return Some(l.cmp(r));
    }
    None
}

// ============================================================================
// Tokenizer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    True,
    False,
    Null,
    And,
    Or,
    Op(CompareOp),
    Dot,
    LParen,
    RParen,
    Comma,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '\'' | '"' => {
                let quote = c;
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && chars[end] != quote {
                    end += 1;
                }
                if end >= chars.len() {
                    return Err(AppError::RuleEval(format!(
                        "unterminated string literal in '{input}'"
                    )));
                }
                tokens.push(Token::Str(chars[start..end].iter().collect()));
                i = end + 1;
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(CompareOp::Eq));
                    i += 2;
                } else {
                    return Err(AppError::RuleEval(format!(
                        "single '=' is not an operator in '{input}'"
                    )));
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(CompareOp::Ne));
                    i += 2;
                } else {
                    return Err(AppError::RuleEval(format!("unexpected '!' in '{input}'")));
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(CompareOp::Ge));
                    i += 2;
                } else {
                    tokens.push(Token::Op(CompareOp::Gt));
                    i += 1;
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(CompareOp::Le));
                    i += 2;
                } else {
                    tokens.push(Token::Op(CompareOp::Lt));
                    i += 1;
                }
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    // A digit-dot-identifier boundary belongs to the number
                    // only while digits follow the dot
                    if chars[i] == '.' && !chars.get(i + 1).is_some_and(|n| n.is_ascii_digit()) {
                        break;
                    }
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let number = text.parse::<f64>().map_err(|_| {
                    AppError::RuleEval(format!("invalid number '{text}' in '{input}'"))
                })?;
                tokens.push(Token::Number(number));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.to_ascii_lowercase().as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    _ => Token::Ident(word),
                });
            }
            other => {
                return Err(AppError::RuleEval(format!(
                    "unexpected character '{other}' in '{input}'"
                )));
            }
        }
    }

    Ok(tokens)
}

// ============================================================================
// Parser
// ============================================================================

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        match self.advance() {
            Some(token) if token == expected => Ok(()),
            other => Err(AppError::RuleEval(format!(
                "expected {expected:?}, found {other:?}"
            ))),
        }
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut expr = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.advance();
            let rhs = self.parse_and()?;
            expr = Expr::Or(Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut expr = self.parse_comparison()?;
        while self.peek() == Some(&Token::And) {
            self.advance();
            let rhs = self.parse_comparison()?;
            expr = Expr::And(Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let lhs = self.parse_primary()?;
        if let Some(Token::Op(op)) = self.peek().cloned() {
            self.advance();
            let rhs = self.parse_primary()?;
            return Ok(Expr::Compare {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            });
        }
        Ok(lhs)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.advance() {
            Some(Token::LParen) => {
                let expr = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(expr)
            }
            Some(Token::Number(n)) => Ok(Expr::Literal(number_value(n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::True) => Ok(Expr::Literal(Value::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(Value::Bool(false))),
            Some(Token::Null) => Ok(Expr::Literal(Value::Null)),
            Some(Token::Ident(first)) if first == "len" && self.peek() == Some(&Token::LParen) => {
                self.advance();
                let inner = self.parse_primary()?;
                self.expect(Token::RParen)?;
                Ok(Expr::Len(Box::new(inner)))
            }
            Some(Token::Ident(first)) => self.parse_path_or_call(first),
            other => Err(AppError::RuleEval(format!(
                "unexpected token {other:?} in condition"
            ))),
        }
    }

    /// A path, possibly terminated by a `.contains(...)` / `.empty()` call
    fn parse_path_or_call(&mut self, first: String) -> Result<Expr> {
        let mut segments = vec![first];

        while self.peek() == Some(&Token::Dot) {
            self.advance();
            match self.advance() {
                Some(Token::Ident(segment)) => {
                    if self.peek() == Some(&Token::LParen) {
                        let target = Box::new(Expr::Path(segments));
                        return self.parse_call(&segment, target);
                    }
                    segments.push(segment);
                }
                other => {
                    return Err(AppError::RuleEval(format!(
                        "expected identifier after '.', found {other:?}"
                    )));
                }
            }
        }

        Ok(Expr::Path(segments))
    }

    fn parse_call(&mut self, name: &str, target: Box<Expr>) -> Result<Expr> {
        self.expect(Token::LParen)?;
        match name {
            "contains" => {
                let value = self.parse_primary()?;
                self.expect(Token::RParen)?;
                Ok(Expr::Contains {
                    target,
                    value: Box::new(value),
                })
            }
            "empty" => {
                self.expect(Token::RParen)?;
                Ok(Expr::Empty(target))
            }
            other => Err(AppError::RuleEval(format!(
                "unknown function '.{other}()' in condition"
            ))),
        }
    }
}

fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        Value::from(n)
    }
}
