//! Declarative condition and template evaluation for profile rules.
//!
//! Conditions are restricted boolean expressions over state paths
//! (`v['state.flags.x']`), literals, comparisons and `and`/`or`/`not`.
//! Absent paths resolve to a falsey sentinel; only malformed syntax is an
//! error. Both entry points are pure functions of their inputs.

use crate::error::{QuorumError, QuorumResult};
use crate::state::resolve_path;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Evaluates a condition string against a state snapshot.
pub fn eval_condition(expr: &str, snapshot: &Value) -> QuorumResult<bool> {
    let tokens = tokenize(expr)?;
    let mut parser = Parser { tokens, pos: 0 };
    let ast = parser.parse_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(QuorumError::Evaluator(format!(
            "trailing input in condition: {expr:?}"
        )));
    }
    Ok(truthy(&ast.eval(snapshot)))
}

/// Renders `{{ path.to.value }}` placeholders against a state snapshot.
/// Absent paths render as the empty string.
pub fn render_template(text: &str, snapshot: &Value) -> String {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    let re = PLACEHOLDER
        .get_or_init(|| Regex::new(r"\{\{\s*([\w\.\-]+)\s*\}\}").expect("static pattern"));
    re.replace_all(text, |caps: &regex::Captures<'_>| {
        resolve_path(snapshot, &caps[1])
            .map(value_to_text)
            .unwrap_or_default()
    })
    .into_owned()
}

/// String form of a value for prompt injection: strings unquoted,
/// everything else compact JSON.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Python-flavored truthiness, matching the rule language the profiles use:
/// null, false, zero, and empty strings/arrays/objects are falsey.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

// --- Tokenizer ---

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    And,
    Or,
    Not,
    Eq,
    Ne,
    Le,
    Ge,
    Lt,
    Gt,
    Number(f64),
    Str(String),
    Bool(bool),
    None,
    Path(String),
}

fn tokenize(input: &str) -> QuorumResult<Vec<Token>> {
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
            '=' | '!' | '<' | '>' => {
                let two: String = chars[i..(i + 2).min(chars.len())].iter().collect();
                let token = match two.as_str() {
                    "==" => Some((Token::Eq, 2)),
                    "!=" => Some((Token::Ne, 2)),
                    "<=" => Some((Token::Le, 2)),
                    ">=" => Some((Token::Ge, 2)),
                    _ => match c {
                        '<' => Some((Token::Lt, 1)),
                        '>' => Some((Token::Gt, 1)),
                        _ => None,
                    },
                };
                match token {
                    Some((t, len)) => {
                        tokens.push(t);
                        i += len;
                    }
                    None => {
                        return Err(QuorumError::Evaluator(format!(
                            "unexpected operator at byte {i} in {input:?}"
                        )))
                    }
                }
            }
            '\'' | '"' => {
                let quote = c;
                let start = i + 1;
                let mut j = start;
                while j < chars.len() && chars[j] != quote {
                    j += 1;
                }
                if j >= chars.len() {
                    return Err(QuorumError::Evaluator(format!(
                        "unterminated string literal in {input:?}"
                    )));
                }
                tokens.push(Token::Str(chars[start..j].iter().collect()));
                i = j + 1;
            }
            c if c.is_ascii_digit() || c == '-' => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let number = text.parse::<f64>().map_err(|_| {
                    QuorumError::Evaluator(format!("bad number {text:?} in {input:?}"))
                })?;
                tokens.push(Token::Number(number));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                match word.as_str() {
                    "and" => tokens.push(Token::And),
                    "or" => tokens.push(Token::Or),
                    "not" => tokens.push(Token::Not),
                    "True" | "true" => tokens.push(Token::Bool(true)),
                    "False" | "false" => tokens.push(Token::Bool(false)),
                    "None" | "null" => tokens.push(Token::None),
                    "v" => {
                        // v['dotted.path'] or v["dotted.path"]
                        let rest: String = chars[i..].iter().collect();
                        let (path, consumed) = parse_path_accessor(&rest).ok_or_else(|| {
                            QuorumError::Evaluator(format!(
                                "expected v['path'] accessor at byte {i} in {input:?}"
                            ))
                        })?;
                        tokens.push(Token::Path(path));
                        i += consumed;
                    }
                    other => {
                        return Err(QuorumError::Evaluator(format!(
                            "unknown identifier {other:?} in {input:?}"
                        )))
                    }
                }
            }
            other => {
                return Err(QuorumError::Evaluator(format!(
                    "unexpected character {other:?} in {input:?}"
                )))
            }
        }
    }
    Ok(tokens)
}

fn parse_path_accessor(rest: &str) -> Option<(String, usize)> {
    let mut chars = rest.char_indices();
    let (_, open) = chars.next()?;
    if open != '[' {
        return None;
    }
    let (_, quote) = chars.next()?;
    if quote != '\'' && quote != '"' {
        return None;
    }
    let mut path = String::new();
    for (idx, c) in chars {
        if c == quote {
            let close = rest[idx + 1..].chars().next()?;
            if close != ']' {
                return None;
            }
            return Some((path, idx + 2));
        }
        path.push(c);
    }
    None
}

// --- Parser & AST ---

#[derive(Debug, Clone)]
enum Expr {
    Literal(Value),
    Path(String),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Cmp(Box<Expr>, CmpOp, Box<Expr>),
}

#[derive(Debug, Clone, Copy)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

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

    fn parse_expr(&mut self) -> QuorumResult<Expr> {
        let mut left = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> QuorumResult<Expr> {
        let mut left = self.parse_unary()?;
        while matches!(self.peek(), Some(Token::And)) {
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> QuorumResult<Expr> {
        if matches!(self.peek(), Some(Token::Not)) {
            self.advance();
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_cmp()
    }

    fn parse_cmp(&mut self) -> QuorumResult<Expr> {
        let left = self.parse_primary()?;
        let op = match self.peek() {
            Some(Token::Eq) => Some(CmpOp::Eq),
            Some(Token::Ne) => Some(CmpOp::Ne),
            Some(Token::Lt) => Some(CmpOp::Lt),
            Some(Token::Le) => Some(CmpOp::Le),
            Some(Token::Gt) => Some(CmpOp::Gt),
            Some(Token::Ge) => Some(CmpOp::Ge),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let right = self.parse_primary()?;
            return Ok(Expr::Cmp(Box::new(left), op, Box::new(right)));
        }
        Ok(left)
    }

    fn parse_primary(&mut self) -> QuorumResult<Expr> {
        match self.advance() {
            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(QuorumError::Evaluator("unclosed parenthesis".into())),
                }
            }
            Some(Token::Number(n)) => Ok(Expr::Literal(number_value(n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Bool(b)) => Ok(Expr::Literal(Value::Bool(b))),
            Some(Token::None) => Ok(Expr::Literal(Value::Null)),
            Some(Token::Path(p)) => Ok(Expr::Path(p)),
            other => Err(QuorumError::Evaluator(format!(
                "expected a value, found {other:?}"
            ))),
        }
    }
}

fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

impl Expr {
    fn eval(&self, snapshot: &Value) -> Value {
        match self {
            Expr::Literal(v) => v.clone(),
            Expr::Path(p) => resolve_path(snapshot, p).cloned().unwrap_or(Value::Null),
            Expr::Not(inner) => Value::Bool(!truthy(&inner.eval(snapshot))),
            Expr::And(a, b) => {
                let left = a.eval(snapshot);
                if truthy(&left) {
                    b.eval(snapshot)
                } else {
                    left
                }
            }
            Expr::Or(a, b) => {
                let left = a.eval(snapshot);
                if truthy(&left) {
                    left
                } else {
                    b.eval(snapshot)
                }
            }
            Expr::Cmp(a, op, b) => Value::Bool(compare(&a.eval(snapshot), *op, &b.eval(snapshot))),
        }
    }
}

/// Comparisons between mismatched types evaluate to false rather than
/// erroring; equality falls back to structural equality.
fn compare(left: &Value, op: CmpOp, right: &Value) -> bool {
    match op {
        CmpOp::Eq => left == right,
        CmpOp::Ne => left != right,
        CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => {
            let ordering = match (left, right) {
                (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
                    (Some(a), Some(b)) => a.partial_cmp(&b),
                    _ => None,
                },
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => None,
            };
            match (ordering, op) {
                (Some(ord), CmpOp::Lt) => ord.is_lt(),
                (Some(ord), CmpOp::Le) => ord.is_le(),
                (Some(ord), CmpOp::Gt) => ord.is_gt(),
                (Some(ord), CmpOp::Ge) => ord.is_ge(),
                _ => false,
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snap() -> Value {
        json!({
            "state": {
                "flags": { "count": 3, "name": "principal", "empty": "" },
                "last_turn": { "had_tool_call": false }
            },
            "team": { "work_modules": { "wm_1": { "status": "pending" } } }
        })
    }

    #[test]
    fn test_literal_true_condition() {
        assert!(eval_condition("True", &snap()).unwrap());
        assert!(!eval_condition("False", &snap()).unwrap());
    }

    #[test]
    fn test_path_truthiness() {
        assert!(eval_condition("v['team.work_modules']", &snap()).unwrap());
        assert!(!eval_condition("v['state.flags.empty']", &snap()).unwrap());
        assert!(!eval_condition("v['state.flags.missing']", &snap()).unwrap());
    }

    #[test]
    fn test_comparisons() {
        assert!(eval_condition("v['state.flags.count'] >= 3", &snap()).unwrap());
        assert!(!eval_condition("v['state.flags.count'] > 3", &snap()).unwrap());
        assert!(eval_condition("v['state.flags.name'] == 'principal'", &snap()).unwrap());
        assert!(eval_condition("v['state.flags.missing'] == None", &snap()).unwrap());
    }

    #[test]
    fn test_boolean_connectives() {
        assert!(eval_condition(
            "v['state.flags.count'] >= 2 and not v['state.last_turn.had_tool_call']",
            &snap()
        )
        .unwrap());
        assert!(eval_condition(
            "v['state.flags.missing'] or v['state.flags.count'] == 3",
            &snap()
        )
        .unwrap());
    }

    #[test]
    fn test_parentheses() {
        assert!(eval_condition(
            "not (v['state.flags.count'] < 2 or v['state.flags.empty'])",
            &snap()
        )
        .unwrap());
    }

    #[test]
    fn test_mismatched_type_comparison_is_false() {
        assert!(!eval_condition("v['state.flags.name'] > 3", &snap()).unwrap());
    }

    #[test]
    fn test_malformed_condition_is_an_error() {
        assert!(eval_condition("v['unterminated", &snap()).is_err());
        assert!(eval_condition("and and", &snap()).is_err());
        assert!(eval_condition("v['x'] == == 3", &snap()).is_err());
        assert!(eval_condition("frobnicate", &snap()).is_err());
    }

    #[test]
    fn test_evaluator_is_pure() {
        let s = snap();
        let first = eval_condition("v['state.flags.count'] == 3", &s).unwrap();
        let second = eval_condition("v['state.flags.count'] == 3", &s).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_template_rendering() {
        let out = render_template(
            "agent {{ state.flags.name }} has {{ state.flags.count }} and [{{ state.flags.missing }}]",
            &snap(),
        );
        assert_eq!(out, "agent principal has 3 and []");
    }

    #[test]
    fn test_template_without_placeholders_is_identity() {
        assert_eq!(render_template("plain text", &snap()), "plain text");
    }
}
