//! Strategy expression AST, parser, and evaluator.
//!
//! Strategy text is parsed into a constrained AST: numeric literals, the
//! current `price`, arithmetic, comparisons, boolean connectives, and a
//! whitelisted set of indicator calls. Evaluation is bounded and
//! side-effect-free; there is no general code execution surface. Indicator
//! state lives in rolling accumulators fed one price per simulation step.

use crate::strategy::indicators::{ExtremumKind, RollingExtremum, RollingMean};
use crate::strategy::lexer::{tokenize, Token, TokenKind};
use crate::strategy::{Strategy, StrategyError};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Parser recursion limit.
const MAX_DEPTH: usize = 64;

/// Largest accepted indicator window.
const MAX_WINDOW: u32 = 10_000;

/// Whitelisted indicator functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndicatorFn {
    /// Simple moving average of close prices
    Sma,
    /// Highest close over the window
    Highest,
    /// Lowest close over the window
    Lowest,
}

impl IndicatorFn {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "sma" | "ma" => Some(Self::Sma),
            "highest" => Some(Self::Highest),
            "lowest" => Some(Self::Lowest),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
    Ne,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// Strategy expression AST.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(Decimal),
    Price,
    Indicator { func: IndicatorFn, window: u32 },
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr> },
}

/// Expression value domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ty {
    Num,
    Bool,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn advance(&mut self) -> TokenKind {
        let kind = self.tokens[self.pos].kind.clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        kind
    }

    fn expect(&mut self, expected: TokenKind) -> Result<(), StrategyError> {
        let actual = self.advance();
        if actual == expected {
            Ok(())
        } else {
            Err(StrategyError::UnexpectedToken(format!("{actual:?}")))
        }
    }

    fn parse(mut self) -> Result<Expr, StrategyError> {
        if matches!(self.peek(), TokenKind::Eof) {
            return Err(StrategyError::EmptyExpression);
        }
        let expr = self.parse_or()?;
        match self.peek() {
            TokenKind::Eof => Ok(expr),
            other => Err(StrategyError::UnexpectedToken(format!("{other:?}"))),
        }
    }

    fn enter(&mut self) -> Result<(), StrategyError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(StrategyError::TooDeep(MAX_DEPTH));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn parse_or(&mut self) -> Result<Expr, StrategyError> {
        self.enter()?;
        let mut lhs = self.parse_and()?;
        while matches!(self.peek(), TokenKind::Or) {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::Binary {
                op: BinOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        self.leave();
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, StrategyError> {
        let mut lhs = self.parse_not()?;
        while matches!(self.peek(), TokenKind::And) {
            self.advance();
            let rhs = self.parse_not()?;
            lhs = Expr::Binary {
                op: BinOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr, StrategyError> {
        if matches!(self.peek(), TokenKind::Not) {
            self.enter()?;
            self.advance();
            let operand = self.parse_not()?;
            self.leave();
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, StrategyError> {
        let lhs = self.parse_arith()?;
        let op = match self.peek() {
            TokenKind::Gt => BinOp::Gt,
            TokenKind::Lt => BinOp::Lt,
            TokenKind::Ge => BinOp::Ge,
            TokenKind::Le => BinOp::Le,
            TokenKind::EqEq => BinOp::Eq,
            TokenKind::NotEq => BinOp::Ne,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.parse_arith()?;
        Ok(Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    fn parse_arith(&mut self) -> Result<Expr, StrategyError> {
        let mut lhs = self.parse_term()?;
        loop {
            let op = match self.peek() {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_term()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_term(&mut self) -> Result<Expr, StrategyError> {
        let mut lhs = self.parse_factor()?;
        loop {
            let op = match self.peek() {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_factor()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_factor(&mut self) -> Result<Expr, StrategyError> {
        if matches!(self.peek(), TokenKind::Minus) {
            self.enter()?;
            self.advance();
            let operand = self.parse_factor()?;
            self.leave();
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
            });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, StrategyError> {
        self.enter()?;
        let expr = match self.advance() {
            TokenKind::Number(n) => Expr::Number(n),
            TokenKind::LParen => {
                let inner = self.parse_or()?;
                match self.advance() {
                    TokenKind::RParen => inner,
                    TokenKind::Eof => return Err(StrategyError::UnclosedParen),
                    other => return Err(StrategyError::UnexpectedToken(format!("{other:?}"))),
                }
            }
            TokenKind::Ident(name) if name == "price" => Expr::Price,
            TokenKind::Ident(name) => self.parse_indicator_call(&name)?,
            other => return Err(StrategyError::UnexpectedToken(format!("{other:?}"))),
        };
        self.leave();
        Ok(expr)
    }

    fn parse_indicator_call(&mut self, name: &str) -> Result<Expr, StrategyError> {
        let func = IndicatorFn::from_name(name)
            .ok_or_else(|| StrategyError::UnknownFunction(name.to_string()))?;

        self.expect(TokenKind::LParen)?;
        let window = match self.advance() {
            TokenKind::Number(n) => window_from_literal(name, n)?,
            other => return Err(StrategyError::UnexpectedToken(format!("{other:?}"))),
        };
        self.expect(TokenKind::RParen)?;

        Ok(Expr::Indicator { func, window })
    }
}

/// An indicator window must be a positive integer literal within bounds.
fn window_from_literal(name: &str, literal: Decimal) -> Result<u32, StrategyError> {
    if literal.fract() != Decimal::ZERO || literal < Decimal::ONE {
        return Err(StrategyError::InvalidWindow {
            function: name.to_string(),
            value: literal.to_string(),
        });
    }
    let window: u32 = literal.to_u32().ok_or_else(|| StrategyError::InvalidWindow {
        function: name.to_string(),
        value: literal.to_string(),
    })?;
    if window > MAX_WINDOW {
        return Err(StrategyError::InvalidWindow {
            function: name.to_string(),
            value: literal.to_string(),
        });
    }
    Ok(window)
}

/// Static type check; the root of a strategy must be boolean.
fn type_check(expr: &Expr) -> Result<Ty, StrategyError> {
    match expr {
        Expr::Number(_) | Expr::Price | Expr::Indicator { .. } => Ok(Ty::Num),
        Expr::Unary { op, operand } => {
            let ty = type_check(operand)?;
            let (expected, result) = match op {
                UnaryOp::Neg => (Ty::Num, Ty::Num),
                UnaryOp::Not => (Ty::Bool, Ty::Bool),
            };
            if ty != expected {
                return Err(type_mismatch(expected, ty));
            }
            Ok(result)
        }
        Expr::Binary { op, lhs, rhs } => {
            let lt = type_check(lhs)?;
            let rt = type_check(rhs)?;
            let (expected, result) = match op {
                BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div => (Ty::Num, Ty::Num),
                BinOp::Gt | BinOp::Lt | BinOp::Ge | BinOp::Le | BinOp::Eq | BinOp::Ne => {
                    (Ty::Num, Ty::Bool)
                }
                BinOp::And | BinOp::Or => (Ty::Bool, Ty::Bool),
            };
            if lt != expected {
                return Err(type_mismatch(expected, lt));
            }
            if rt != expected {
                return Err(type_mismatch(expected, rt));
            }
            Ok(result)
        }
    }
}

fn type_mismatch(expected: Ty, found: Ty) -> StrategyError {
    let name = |t: Ty| match t {
        Ty::Num => "number",
        Ty::Bool => "boolean",
    };
    StrategyError::TypeMismatch {
        expected: name(expected),
        found: name(found),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Value {
    Num(Decimal),
    Bool(bool),
}

/// A compiled, sandboxed strategy: the validated AST plus one rolling
/// accumulator per distinct indicator reference.
pub struct DslStrategy {
    expr: Expr,
    means: HashMap<u32, RollingMean>,
    extremes: HashMap<(IndicatorFn, u32), RollingExtremum>,
}

impl DslStrategy {
    /// Compile strategy text into an executable predicate.
    pub fn compile(source: &str) -> Result<Self, StrategyError> {
        let tokens = tokenize(source)?;
        let expr = Parser::new(tokens).parse()?;

        if type_check(&expr)? != Ty::Bool {
            return Err(StrategyError::NotBoolean);
        }

        let mut means = HashMap::new();
        let mut extremes = HashMap::new();
        collect_indicators(&expr, &mut means, &mut extremes);

        Ok(Self {
            expr,
            means,
            extremes,
        })
    }

    /// Evaluate the expression against the current step. `None` while any
    /// referenced indicator window is still filling.
    fn eval(&self, expr: &Expr, price: Decimal) -> Option<Value> {
        match expr {
            Expr::Number(n) => Some(Value::Num(*n)),
            Expr::Price => Some(Value::Num(price)),
            Expr::Indicator { func, window } => {
                let value = match func {
                    IndicatorFn::Sma => self.means.get(window)?.value()?,
                    IndicatorFn::Highest | IndicatorFn::Lowest => {
                        self.extremes.get(&(*func, *window))?.value()?
                    }
                };
                Some(Value::Num(value))
            }
            Expr::Unary { op, operand } => match (op, self.eval(operand, price)?) {
                (UnaryOp::Neg, Value::Num(n)) => Some(Value::Num(-n)),
                (UnaryOp::Not, Value::Bool(b)) => Some(Value::Bool(!b)),
                _ => None,
            },
            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.eval(lhs, price)?;
                let rhs = self.eval(rhs, price)?;
                match (op, lhs, rhs) {
                    (BinOp::Add, Value::Num(a), Value::Num(b)) => Some(Value::Num(a + b)),
                    (BinOp::Sub, Value::Num(a), Value::Num(b)) => Some(Value::Num(a - b)),
                    (BinOp::Mul, Value::Num(a), Value::Num(b)) => Some(Value::Num(a * b)),
                    (BinOp::Div, Value::Num(a), Value::Num(b)) => {
                        if b == Decimal::ZERO {
                            None
                        } else {
                            Some(Value::Num(a / b))
                        }
                    }
                    (BinOp::Gt, Value::Num(a), Value::Num(b)) => Some(Value::Bool(a > b)),
                    (BinOp::Lt, Value::Num(a), Value::Num(b)) => Some(Value::Bool(a < b)),
                    (BinOp::Ge, Value::Num(a), Value::Num(b)) => Some(Value::Bool(a >= b)),
                    (BinOp::Le, Value::Num(a), Value::Num(b)) => Some(Value::Bool(a <= b)),
                    (BinOp::Eq, Value::Num(a), Value::Num(b)) => Some(Value::Bool(a == b)),
                    (BinOp::Ne, Value::Num(a), Value::Num(b)) => Some(Value::Bool(a != b)),
                    (BinOp::And, Value::Bool(a), Value::Bool(b)) => Some(Value::Bool(a && b)),
                    (BinOp::Or, Value::Bool(a), Value::Bool(b)) => Some(Value::Bool(a || b)),
                    _ => None,
                }
            }
        }
    }
}

impl Strategy for DslStrategy {
    fn should_enter(&mut self, price: Decimal, _timestamp: DateTime<Utc>) -> bool {
        for mean in self.means.values_mut() {
            mean.push(price);
        }
        for extremum in self.extremes.values_mut() {
            extremum.push(price);
        }

        matches!(self.eval(&self.expr, price), Some(Value::Bool(true)))
    }
}

/// Allocate one accumulator per distinct (function, window) pair; repeated
/// references share state.
fn collect_indicators(
    expr: &Expr,
    means: &mut HashMap<u32, RollingMean>,
    extremes: &mut HashMap<(IndicatorFn, u32), RollingExtremum>,
) {
    match expr {
        Expr::Indicator { func, window } => match func {
            IndicatorFn::Sma => {
                means
                    .entry(*window)
                    .or_insert_with(|| RollingMean::new(*window as usize));
            }
            IndicatorFn::Highest => {
                extremes.entry((*func, *window)).or_insert_with(|| {
                    RollingExtremum::new(ExtremumKind::Highest, *window as usize)
                });
            }
            IndicatorFn::Lowest => {
                extremes.entry((*func, *window)).or_insert_with(|| {
                    RollingExtremum::new(ExtremumKind::Lowest, *window as usize)
                });
            }
        },
        Expr::Unary { operand, .. } => collect_indicators(operand, means, extremes),
        Expr::Binary { lhs, rhs, .. } => {
            collect_indicators(lhs, means, extremes);
            collect_indicators(rhs, means, extremes);
        }
        Expr::Number(_) | Expr::Price => {}
    }
}
