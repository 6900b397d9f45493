// elspeth-core/src/core/gate.rs
// ============================================================================
// Module: Elspeth Gate Expressions
// Description: A sandboxed expression language for gate-node routing conditions.
// Purpose: Let pipeline authors write row-conditioned routing without embedding Python.
// Dependencies: elspeth_gate_expr::{Requirement, TriState, LogicMode, KleeneLogic, BochvarLogic}
// ============================================================================

//! ## Overview
//! A gate condition compiles once, at graph-construction time, into a
//! [`Requirement<GateAtom>`] tree: boolean `and`/`or`/`not` become
//! `Requirement::And`/`Or`/`Not`, and every other subexpression (a
//! comparison, a membership test, a ternary, a bare `row[...]` lookup) is a
//! leaf [`GateAtom`]. Evaluation then runs through
//! `Requirement::eval_tristate`, reusing the tri-state algebra rather than
//! hand-rolling boolean combination here. No reference crate ships an
//! expression parser, so the recursive-descent parser below is new; it
//! implements exactly the grammar in the allowed/forbidden construct list
//! and rejects everything else at parse time.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use elspeth_gate_expr::KleeneLogic;
use elspeth_gate_expr::Requirement;
use elspeth_gate_expr::Row as PredicateRow;
use elspeth_gate_expr::TriState;
use elspeth_gate_expr::TriStatePredicateEval;
use serde_json::Value;
use thiserror::Error;

use crate::core::contract::PipelineRow;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while parsing or evaluating a gate expression.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GateExpressionError {
    /// The tokenizer found a character it does not recognize.
    #[error("unexpected character '{0}' at position {1}")]
    UnexpectedCharacter(char, usize),
    /// A string literal was never closed.
    #[error("unterminated string literal starting at position {0}")]
    UnterminatedString(usize),
    /// The parser expected a token that was not present.
    #[error("unexpected token near position {0}: expected {1}")]
    UnexpectedToken(usize, String),
    /// The expression ended mid-construct.
    #[error("unexpected end of expression: expected {0}")]
    UnexpectedEnd(String),
    /// A construct on the forbidden list was encountered at parse time.
    #[error("forbidden construct: {0}")]
    ForbiddenConstruct(String),
    /// A call used a name outside the safe-builtin whitelist.
    #[error("unknown function: {0}")]
    UnknownBuiltin(String),
    /// A numeric literal could not be parsed.
    #[error("invalid numeric literal: {0}")]
    InvalidNumber(String),
    /// Trailing input remained after a complete expression was parsed.
    #[error("unexpected trailing input at position {0}")]
    TrailingInput(usize),
    /// A runtime evaluation failure (e.g. `int("x")`, division by zero).
    #[error("evaluation error: {0}")]
    Evaluation(String),
}

// ============================================================================
// SECTION: Tokenizer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(f64, bool),
    Str(String),
    Ident(String),
    Symbol(&'static str),
    Eof,
}

#[derive(Debug, Clone)]
struct Spanned {
    tok: Tok,
    pos: usize,
}

const FORBIDDEN_KEYWORDS: &[&str] =
    &["import", "lambda", "def", "yield", "class", "global", "nonlocal", "del", "async", "await", "with", "for", "while", "try", "except", "raise"];

fn tokenize(source: &str) -> Result<Vec<Spanned>, GateExpressionError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0usize;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c == '#' {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }

        let start = i;

        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) {
            let mut text = String::new();
            let mut is_float = false;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.' || chars[i] == 'e' || chars[i] == 'E') {
                if chars[i] == '.' || chars[i] == 'e' || chars[i] == 'E' {
                    is_float = true;
                }
                text.push(chars[i]);
                i += 1;
            }
            let value: f64 = text.parse().map_err(|_| GateExpressionError::InvalidNumber(text.clone()))?;
            tokens.push(Spanned {
                tok: Tok::Num(value, !is_float),
                pos: start,
            });
            continue;
        }

        if c == '"' || c == '\'' {
            let quote = c;
            i += 1;
            let mut text = String::new();
            let mut closed = false;
            while i < chars.len() {
                if chars[i] == quote {
                    closed = true;
                    i += 1;
                    break;
                }
                if chars[i] == '\\' && i + 1 < chars.len() {
                    let escaped = chars[i + 1];
                    text.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        '\\' => '\\',
                        '\'' => '\'',
                        '"' => '"',
                        other => other,
                    });
                    i += 2;
                    continue;
                }
                text.push(chars[i]);
                i += 1;
            }
            if !closed {
                return Err(GateExpressionError::UnterminatedString(start));
            }
            tokens.push(Spanned {
                tok: Tok::Str(text),
                pos: start,
            });
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            if (c == 'f' || c == 'F') && matches!(chars.get(i + 1), Some('"') | Some('\'')) {
                return Err(GateExpressionError::ForbiddenConstruct("f-string literal".to_string()));
            }
            let mut text = String::new();
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                text.push(chars[i]);
                i += 1;
            }
            if FORBIDDEN_KEYWORDS.contains(&text.as_str()) {
                return Err(GateExpressionError::ForbiddenConstruct(format!("`{text}`")));
            }
            tokens.push(Spanned {
                tok: Tok::Ident(text),
                pos: start,
            });
            continue;
        }

        let two: String = chars[i ..= (i + 1).min(chars.len() - 1)].iter().collect();
        let symbol: Option<&'static str> = if i + 1 < chars.len() {
            match two.as_str() {
                "//" => Some("//"),
                "==" => Some("=="),
                "!=" => Some("!="),
                "<=" => Some("<="),
                ">=" => Some(">="),
                ":=" => Some(":="),
                _ => None,
            }
        } else {
            None
        };

        if let Some(sym) = symbol {
            if sym == ":=" {
                return Err(GateExpressionError::ForbiddenConstruct("assignment expression `:=`".to_string()));
            }
            tokens.push(Spanned {
                tok: Tok::Symbol(sym),
                pos: start,
            });
            i += 2;
            continue;
        }

        let single = match c {
            '+' => "+",
            '-' => "-",
            '*' if chars.get(i + 1) == Some(&'*') => {
                return Err(GateExpressionError::ForbiddenConstruct("`**` dict-spread/power".to_string()));
            }
            '*' => "*",
            '/' => "/",
            '%' => "%",
            '(' => "(",
            ')' => ")",
            '[' => "[",
            ']' => "]",
            ',' => ",",
            '<' => "<",
            '>' => ">",
            ':' => return Err(GateExpressionError::ForbiddenConstruct("bare `:` (dict/slice/annotation)".to_string())),
            '{' => return Err(GateExpressionError::ForbiddenConstruct("`{}` literal or comprehension".to_string())),
            '.' => ".",
            '=' => return Err(GateExpressionError::ForbiddenConstruct("assignment `=`".to_string())),
            other => return Err(GateExpressionError::UnexpectedCharacter(other, start)),
        };
        tokens.push(Spanned {
            tok: Tok::Symbol(single),
            pos: start,
        });
        i += 1;
    }

    tokens.push(Spanned {
        tok: Tok::Eof,
        pos: chars.len(),
    });
    Ok(tokens)
}

// ============================================================================
// SECTION: AST
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    None,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Builtin {
    Len,
    Str,
    Int,
    Float,
    Bool,
    Abs,
}

/// Parsed expression tree for a single leaf subexpression (anything that is
/// not a top-level boolean `and`/`or`/`not` combinator).
#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Literal),
    RowIndex(Box<Expr>),
    RowGet(Box<Expr>, Option<Box<Expr>>),
    Neg(Box<Expr>),
    Arith(ArithOp, Box<Expr>, Box<Expr>),
    Compare(Box<Expr>, Vec<(CompareOp, Expr)>),
    Membership {
        needle: Box<Expr>,
        haystack: Box<Expr>,
        negate: bool,
    },
    IsNone(Box<Expr>, bool),
    Ternary {
        condition: Box<Expr>,
        if_true: Box<Expr>,
        if_false: Box<Expr>,
    },
    Call(Builtin, Box<Expr>),
}

/// A full boolean gate expression, where `and`/`or`/`not` are threaded
/// directly into a [`Requirement`] tree and everything else is a leaf.
#[derive(Debug, Clone, PartialEq)]
enum BoolExpr {
    And(Box<BoolExpr>, Box<BoolExpr>),
    Or(Box<BoolExpr>, Box<BoolExpr>),
    Not(Box<BoolExpr>),
    Leaf(Expr),
}

// ============================================================================
// SECTION: Parser
// ============================================================================

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Spanned>) -> Self {
        Self {
            tokens,
            pos: 0,
        }
    }

    fn peek(&self) -> &Tok {
        &self.tokens[self.pos].tok
    }

    fn peek_pos(&self) -> usize {
        self.tokens[self.pos].pos
    }

    fn advance(&mut self) -> Spanned {
        let tok = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn expect_symbol(&mut self, symbol: &str) -> Result<(), GateExpressionError> {
        match self.peek() {
            Tok::Symbol(sym) if *sym == symbol => {
                self.advance();
                Ok(())
            }
            Tok::Eof => Err(GateExpressionError::UnexpectedEnd(format!("`{symbol}`"))),
            _ => Err(GateExpressionError::UnexpectedToken(self.peek_pos(), format!("`{symbol}`"))),
        }
    }

    fn is_ident(&self, name: &str) -> bool {
        matches!(self.peek(), Tok::Ident(ident) if ident == name)
    }

    fn eat_ident(&mut self, name: &str) -> bool {
        if self.is_ident(name) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn parse_bool_expr(&mut self) -> Result<BoolExpr, GateExpressionError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<BoolExpr, GateExpressionError> {
        let mut left = self.parse_and()?;
        while self.eat_ident("or") {
            let right = self.parse_and()?;
            left = BoolExpr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<BoolExpr, GateExpressionError> {
        let mut left = self.parse_not()?;
        while self.eat_ident("and") {
            let right = self.parse_not()?;
            left = BoolExpr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<BoolExpr, GateExpressionError> {
        if self.eat_ident("not") {
            return Ok(BoolExpr::Not(Box::new(self.parse_not()?)));
        }
        self.parse_ternary_leaf()
    }

    fn parse_ternary_leaf(&mut self) -> Result<BoolExpr, GateExpressionError> {
        let expr = self.parse_ternary()?;
        Ok(BoolExpr::Leaf(expr))
    }

    fn parse_ternary(&mut self) -> Result<Expr, GateExpressionError> {
        let body = self.parse_membership()?;
        if self.eat_ident("if") {
            let condition = self.parse_or_as_expr()?;
            if !self.eat_ident("else") {
                return Err(GateExpressionError::UnexpectedEnd("`else` in ternary expression".to_string()));
            }
            let if_false = self.parse_ternary()?;
            return Ok(Expr::Ternary {
                condition: Box::new(condition),
                if_true: Box::new(body),
                if_false: Box::new(if_false),
            });
        }
        Ok(body)
    }

    /// Parses a boolean sub-expression used inside a ternary's condition and
    /// flattens it back to a plain [`Expr`] for embedding, since `Expr` (not
    /// `BoolExpr`) is what a ternary branch carries.
    fn parse_or_as_expr(&mut self) -> Result<Expr, GateExpressionError> {
        let bool_expr = self.parse_or()?;
        Ok(bool_expr_to_expr(bool_expr))
    }

    fn parse_membership(&mut self) -> Result<Expr, GateExpressionError> {
        let left = self.parse_compare()?;
        if self.eat_ident("in") {
            let right = self.parse_compare()?;
            return Ok(Expr::Membership {
                needle: Box::new(left),
                haystack: Box::new(right),
                negate: false,
            });
        }
        if self.is_ident("not") {
            let save = self.pos;
            self.advance();
            if self.eat_ident("in") {
                let right = self.parse_compare()?;
                return Ok(Expr::Membership {
                    needle: Box::new(left),
                    haystack: Box::new(right),
                    negate: true,
                });
            }
            self.pos = save;
        }
        Ok(left)
    }

    fn parse_compare(&mut self) -> Result<Expr, GateExpressionError> {
        let first = self.parse_arith()?;
        let mut chain = Vec::new();
        loop {
            let op = match self.peek() {
                Tok::Symbol("<") => Some(CompareOp::Lt),
                Tok::Symbol("<=") => Some(CompareOp::Le),
                Tok::Symbol(">") => Some(CompareOp::Gt),
                Tok::Symbol(">=") => Some(CompareOp::Ge),
                Tok::Symbol("==") => Some(CompareOp::Eq),
                Tok::Symbol("!=") => Some(CompareOp::Ne),
                _ => None,
            };
            if let Some(op) = op {
                self.advance();
                chain.push((op, self.parse_arith()?));
                continue;
            }
            if self.is_ident("is") {
                self.advance();
                let negate = self.eat_ident("not");
                if !self.eat_ident("None") {
                    return Err(GateExpressionError::UnexpectedEnd("`None` after `is`".to_string()));
                }
                return Ok(Expr::IsNone(Box::new(chain_to_expr(first, chain)), negate));
            }
            break;
        }
        Ok(chain_to_expr(first, chain))
    }

    fn parse_arith(&mut self) -> Result<Expr, GateExpressionError> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Tok::Symbol("+") => ArithOp::Add,
                Tok::Symbol("-") => ArithOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_term()?;
            left = Expr::Arith(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr, GateExpressionError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Tok::Symbol("*") => ArithOp::Mul,
                Tok::Symbol("/") => ArithOp::Div,
                Tok::Symbol("//") => ArithOp::FloorDiv,
                Tok::Symbol("%") => ArithOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::Arith(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, GateExpressionError> {
        if matches!(self.peek(), Tok::Symbol("-")) {
            self.advance();
            return Ok(Expr::Neg(Box::new(self.parse_unary()?)));
        }
        if matches!(self.peek(), Tok::Symbol("*")) {
            return Err(GateExpressionError::ForbiddenConstruct("starred expression `*expr`".to_string()));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, GateExpressionError> {
        match self.peek().clone() {
            Tok::Num(value, is_int) => {
                self.advance();
                #[allow(
                    clippy::cast_possible_truncation,
                    reason = "integer literals in gate expressions are small by construction"
                )]
                Ok(Expr::Literal(if is_int { Literal::Int(value as i64) } else { Literal::Float(value) }))
            }
            Tok::Str(text) => {
                self.advance();
                Ok(Expr::Literal(Literal::Str(text)))
            }
            Tok::Ident(name) => self.parse_ident_primary(&name),
            Tok::Symbol("(") => {
                self.advance();
                let inner = self.parse_or_as_expr()?;
                self.expect_symbol(")")?;
                Ok(inner)
            }
            Tok::Symbol("[") => Err(GateExpressionError::ForbiddenConstruct("list literal or comprehension".to_string())),
            Tok::Eof => Err(GateExpressionError::UnexpectedEnd("an expression".to_string())),
            _ => Err(GateExpressionError::UnexpectedToken(self.peek_pos(), "an expression".to_string())),
        }
    }

    fn parse_ident_primary(&mut self, name: &str) -> Result<Expr, GateExpressionError> {
        match name {
            "True" => {
                self.advance();
                Ok(Expr::Literal(Literal::Bool(true)))
            }
            "False" => {
                self.advance();
                Ok(Expr::Literal(Literal::Bool(false)))
            }
            "None" => {
                self.advance();
                Ok(Expr::Literal(Literal::None))
            }
            "row" => self.parse_row_access(),
            "len" | "str" | "int" | "float" | "bool" | "abs" => self.parse_builtin_call(name),
            other => Err(GateExpressionError::ForbiddenConstruct(format!("arbitrary name `{other}`"))),
        }
    }

    fn parse_row_access(&mut self) -> Result<Expr, GateExpressionError> {
        self.advance();
        match self.peek() {
            Tok::Symbol("[") => {
                self.advance();
                let key = self.parse_or_as_expr()?;
                self.expect_symbol("]")?;
                Ok(Expr::RowIndex(Box::new(key)))
            }
            Tok::Symbol(".") => {
                self.advance();
                if !self.eat_ident("get") {
                    return Err(GateExpressionError::ForbiddenConstruct(
                        "attribute access on `row` other than `.get`".to_string(),
                    ));
                }
                self.expect_symbol("(")?;
                let key = self.parse_or_as_expr()?;
                let default = if matches!(self.peek(), Tok::Symbol(",")) {
                    self.advance();
                    Some(Box::new(self.parse_or_as_expr()?))
                } else {
                    None
                };
                self.expect_symbol(")")?;
                Ok(Expr::RowGet(Box::new(key), default))
            }
            Tok::Eof => Err(GateExpressionError::UnexpectedEnd("`[` or `.get(` after `row`".to_string())),
            _ => Err(GateExpressionError::UnexpectedToken(self.peek_pos(), "`[` or `.get(` after `row`".to_string())),
        }
    }

    fn parse_builtin_call(&mut self, name: &str) -> Result<Expr, GateExpressionError> {
        let builtin = match name {
            "len" => Builtin::Len,
            "str" => Builtin::Str,
            "int" => Builtin::Int,
            "float" => Builtin::Float,
            "bool" => Builtin::Bool,
            "abs" => Builtin::Abs,
            other => return Err(GateExpressionError::UnknownBuiltin(other.to_string())),
        };
        self.advance();
        self.expect_symbol("(")?;
        let arg = self.parse_or_as_expr()?;
        self.expect_symbol(")")?;
        Ok(Expr::Call(builtin, Box::new(arg)))
    }
}

fn chain_to_expr(first: Expr, chain: Vec<(CompareOp, Expr)>) -> Expr {
    if chain.is_empty() { first } else { Expr::Compare(Box::new(first), chain) }
}

fn bool_expr_to_expr(expr: BoolExpr) -> Expr {
    match expr {
        BoolExpr::Leaf(inner) => inner,
        BoolExpr::Not(inner) => Expr::Call(Builtin::Bool, Box::new(Expr::Neg(Box::new(bool_expr_to_expr(*inner))))),
        BoolExpr::And(left, right) => Expr::Ternary {
            condition: Box::new(bool_expr_to_expr(*left)),
            if_true: Box::new(bool_expr_to_expr(*right)),
            if_false: Box::new(Expr::Literal(Literal::Bool(false))),
        },
        BoolExpr::Or(left, right) => Expr::Ternary {
            condition: Box::new(bool_expr_to_expr(*left)),
            if_true: Box::new(Expr::Literal(Literal::Bool(true))),
            if_false: Box::new(bool_expr_to_expr(*right)),
        },
    }
}

// ============================================================================
// SECTION: Runtime Values
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum RuntimeValue {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    None,
}

impl fmt::Display for RuntimeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Str(value) => write!(f, "{value}"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::None => write!(f, "None"),
        }
    }
}

impl RuntimeValue {
    fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::None,
            Value::Bool(flag) => Self::Bool(*flag),
            Value::Number(number) => {
                if let Some(as_int) = number.as_i64() {
                    Self::Int(as_int)
                } else {
                    Self::Float(number.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::String(text) => Self::Str(text.clone()),
            Value::Array(_) | Value::Object(_) => Self::Str(value.to_string()),
        }
    }

    fn truthy(&self) -> bool {
        match self {
            Self::Int(value) => *value != 0,
            Self::Float(value) => *value != 0.0,
            Self::Str(value) => !value.is_empty(),
            Self::Bool(value) => *value,
            Self::None => false,
        }
    }

    fn as_f64(&self) -> Result<f64, GateExpressionError> {
        match self {
            Self::Int(value) => Ok(*value as f64),
            Self::Float(value) => Ok(*value),
            Self::Bool(value) => Ok(if *value { 1.0 } else { 0.0 }),
            other => Err(GateExpressionError::Evaluation(format!("cannot use {other} as a number"))),
        }
    }

    fn is_int_like(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Bool(_))
    }
}

fn evaluate(expr: &Expr, row: &PipelineRow) -> Result<RuntimeValue, GateExpressionError> {
    match expr {
        Expr::Literal(Literal::Int(value)) => Ok(RuntimeValue::Int(*value)),
        Expr::Literal(Literal::Float(value)) => Ok(RuntimeValue::Float(*value)),
        Expr::Literal(Literal::Str(value)) => Ok(RuntimeValue::Str(value.clone())),
        Expr::Literal(Literal::Bool(value)) => Ok(RuntimeValue::Bool(*value)),
        Expr::Literal(Literal::None) => Ok(RuntimeValue::None),
        Expr::RowIndex(key) => {
            let key = expect_string_key(key, row)?;
            row.get(&key)
                .map(RuntimeValue::from_json)
                .ok_or_else(|| GateExpressionError::Evaluation(format!("row has no key `{key}`")))
        }
        Expr::RowGet(key, default) => {
            let key = expect_string_key(key, row)?;
            match row.get(&key) {
                Some(value) => Ok(RuntimeValue::from_json(value)),
                None => match default {
                    Some(default_expr) => evaluate(default_expr, row),
                    None => Ok(RuntimeValue::None),
                },
            }
        }
        Expr::Neg(inner) => {
            let value = evaluate(inner, row)?;
            match value {
                RuntimeValue::Int(value) => Ok(RuntimeValue::Int(-value)),
                other => Ok(RuntimeValue::Float(-other.as_f64()?)),
            }
        }
        Expr::Arith(op, left, right) => evaluate_arith(*op, evaluate(left, row)?, evaluate(right, row)?),
        Expr::Compare(first, chain) => evaluate_compare_chain(first, chain, row),
        Expr::Membership {
            needle,
            haystack,
            negate,
        } => {
            let needle = evaluate(needle, row)?;
            let haystack = evaluate(haystack, row)?;
            let found = match (&needle, &haystack) {
                (RuntimeValue::Str(needle_text), RuntimeValue::Str(haystack_text)) => haystack_text.contains(needle_text.as_str()),
                _ => return Err(GateExpressionError::Evaluation("membership is only supported between strings".to_string())),
            };
            Ok(RuntimeValue::Bool(found ^ negate))
        }
        Expr::IsNone(inner, negate) => {
            let value = evaluate(inner, row)?;
            let is_none = matches!(value, RuntimeValue::None);
            Ok(RuntimeValue::Bool(is_none ^ negate))
        }
        Expr::Ternary {
            condition,
            if_true,
            if_false,
        } => {
            if evaluate(condition, row)?.truthy() { evaluate(if_true, row) } else { evaluate(if_false, row) }
        }
        Expr::Call(builtin, arg) => evaluate_builtin(*builtin, evaluate(arg, row)?),
    }
}

fn expect_string_key(expr: &Expr, row: &PipelineRow) -> Result<String, GateExpressionError> {
    match evaluate(expr, row)? {
        RuntimeValue::Str(text) => Ok(text),
        other => Err(GateExpressionError::Evaluation(format!("row key must be a string, got {other}"))),
    }
}

fn evaluate_arith(op: ArithOp, left: RuntimeValue, right: RuntimeValue) -> Result<RuntimeValue, GateExpressionError> {
    if op == ArithOp::Add {
        if let (RuntimeValue::Str(left_text), RuntimeValue::Str(right_text)) = (&left, &right) {
            return Ok(RuntimeValue::Str(format!("{left_text}{right_text}")));
        }
    }
    let both_int = left.is_int_like() && right.is_int_like();
    let left_f = left.as_f64()?;
    let right_f = right.as_f64()?;
    let result = match op {
        ArithOp::Add => left_f + right_f,
        ArithOp::Sub => left_f - right_f,
        ArithOp::Mul => left_f * right_f,
        ArithOp::Div => {
            if right_f == 0.0 {
                return Err(GateExpressionError::Evaluation("division by zero".to_string()));
            }
            left_f / right_f
        }
        ArithOp::FloorDiv => {
            if right_f == 0.0 {
                return Err(GateExpressionError::Evaluation("floor division by zero".to_string()));
            }
            (left_f / right_f).floor()
        }
        ArithOp::Mod => {
            if right_f == 0.0 {
                return Err(GateExpressionError::Evaluation("modulo by zero".to_string()));
            }
            left_f.rem_euclid(right_f)
        }
    };
    #[allow(clippy::cast_possible_truncation, reason = "gate arithmetic stays within i64-representable ranges")]
    if both_int && matches!(op, ArithOp::Add | ArithOp::Sub | ArithOp::Mul | ArithOp::FloorDiv | ArithOp::Mod) {
        Ok(RuntimeValue::Int(result as i64))
    } else {
        Ok(RuntimeValue::Float(result))
    }
}

fn evaluate_compare_chain(first: &Expr, chain: &[(CompareOp, Expr)], row: &PipelineRow) -> Result<RuntimeValue, GateExpressionError> {
    let mut left = evaluate(first, row)?;
    for (op, next_expr) in chain {
        let right = evaluate(next_expr, row)?;
        if !compare_pair(*op, &left, &right)? {
            return Ok(RuntimeValue::Bool(false));
        }
        left = right;
    }
    Ok(RuntimeValue::Bool(true))
}

fn compare_pair(op: CompareOp, left: &RuntimeValue, right: &RuntimeValue) -> Result<bool, GateExpressionError> {
    if let (RuntimeValue::Str(left_text), RuntimeValue::Str(right_text)) = (left, right) {
        return Ok(match op {
            CompareOp::Lt => left_text < right_text,
            CompareOp::Le => left_text <= right_text,
            CompareOp::Gt => left_text > right_text,
            CompareOp::Ge => left_text >= right_text,
            CompareOp::Eq => left_text == right_text,
            CompareOp::Ne => left_text != right_text,
        });
    }
    if op == CompareOp::Eq || op == CompareOp::Ne {
        if matches!(left, RuntimeValue::None) || matches!(right, RuntimeValue::None) {
            let equal = matches!((left, right), (RuntimeValue::None, RuntimeValue::None));
            return Ok(if op == CompareOp::Eq { equal } else { !equal });
        }
    }
    let left_f = left.as_f64()?;
    let right_f = right.as_f64()?;
    Ok(match op {
        CompareOp::Lt => left_f < right_f,
        CompareOp::Le => left_f <= right_f,
        CompareOp::Gt => left_f > right_f,
        CompareOp::Ge => left_f >= right_f,
        CompareOp::Eq => (left_f - right_f).abs() < f64::EPSILON,
        CompareOp::Ne => (left_f - right_f).abs() >= f64::EPSILON,
    })
}

fn evaluate_builtin(builtin: Builtin, value: RuntimeValue) -> Result<RuntimeValue, GateExpressionError> {
    match builtin {
        Builtin::Len => match value {
            RuntimeValue::Str(text) => Ok(RuntimeValue::Int(i64::try_from(text.chars().count()).unwrap_or(i64::MAX))),
            other => Err(GateExpressionError::Evaluation(format!("len() is only supported on strings, got {other}"))),
        },
        Builtin::Str => Ok(RuntimeValue::Str(value.to_string())),
        Builtin::Int => match &value {
            RuntimeValue::Str(text) => text
                .trim()
                .parse::<i64>()
                .map(RuntimeValue::Int)
                .map_err(|_| GateExpressionError::Evaluation(format!("invalid literal for int(): '{text}'"))),
            _ => {
                #[allow(clippy::cast_possible_truncation, reason = "gate arithmetic stays within i64-representable ranges")]
                let truncated = value.as_f64()? as i64;
                Ok(RuntimeValue::Int(truncated))
            }
        },
        Builtin::Float => Ok(RuntimeValue::Float(value.as_f64()?)),
        Builtin::Bool => Ok(RuntimeValue::Bool(value.truthy())),
        Builtin::Abs => match value {
            RuntimeValue::Int(value) => Ok(RuntimeValue::Int(value.abs())),
            other => Ok(RuntimeValue::Float(other.as_f64()?.abs())),
        },
    }
}

// ============================================================================
// SECTION: GateAtom
// ============================================================================

/// A leaf comparison/expression node in a compiled gate condition.
#[derive(Debug, Clone, PartialEq)]
pub struct GateAtom(Expr);

impl TriStatePredicateEval for GateAtom {
    type Reader<'a> = PipelineRow;

    fn eval_row_tristate(&self, reader: &Self::Reader<'_>, _row: PredicateRow) -> TriState {
        match evaluate(&self.0, reader) {
            Ok(value) => TriState::from(value.truthy()),
            Err(_) => TriState::Unknown,
        }
    }
}

// ============================================================================
// SECTION: GateCondition
// ============================================================================

/// A compiled, ready-to-evaluate gate routing condition.
#[derive(Debug, Clone)]
pub struct GateCondition {
    source: String,
    requirement: Requirement<GateAtom>,
}

impl PartialEq for GateCondition {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl GateCondition {
    /// Parses `source` into a compiled gate condition.
    ///
    /// # Errors
    ///
    /// Returns [`GateExpressionError`] for any syntax error or forbidden
    /// construct; these are surfaced at configuration-load time.
    pub fn parse(source: &str) -> Result<Self, GateExpressionError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser::new(tokens);
        let bool_expr = parser.parse_bool_expr()?;
        if !matches!(parser.peek(), Tok::Eof) {
            return Err(GateExpressionError::TrailingInput(parser.peek_pos()));
        }
        Ok(Self {
            source: source.to_string(),
            requirement: compile_requirement(bool_expr),
        })
    }

    /// Returns the original source text this condition was parsed from.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluates this condition against `row`.
    ///
    /// A runtime evaluation failure (missing key, bad `int()` parse, etc.)
    /// fails only this evaluation, surfaced as
    /// [`GateExpressionError::Evaluation`], per the allowed failure mode: it
    /// does not invalidate the compiled condition itself.
    ///
    /// # Errors
    ///
    /// Returns [`GateExpressionError::Evaluation`] if the tri-state result
    /// is `Unknown`.
    pub fn evaluate(&self, row: &PipelineRow) -> Result<bool, GateExpressionError> {
        match self.requirement.eval_tristate(row, 0, &KleeneLogic) {
            TriState::True => Ok(true),
            TriState::False => Ok(false),
            TriState::Unknown => Err(GateExpressionError::Evaluation(format!(
                "gate expression `{}` could not be evaluated against this row",
                self.source
            ))),
        }
    }
}

fn compile_requirement(expr: BoolExpr) -> Requirement<GateAtom> {
    match expr {
        BoolExpr::Leaf(inner) => Requirement::Predicate(GateAtom(inner)),
        BoolExpr::Not(inner) => Requirement::negate(compile_requirement(*inner)),
        BoolExpr::And(left, right) => Requirement::and(vec![compile_requirement(*left), compile_requirement(*right)]),
        BoolExpr::Or(left, right) => Requirement::or(vec![compile_requirement(*left), compile_requirement(*right)]),
    }
}
