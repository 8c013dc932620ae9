//! Strategy evaluation boundary.
//!
//! The backtest engine only ever sees a [`Strategy`]: a predicate evaluated
//! once per candle, oldest first, against (close price, timestamp). The
//! built-in implementation is [`DslStrategy`], a sandboxed expression
//! evaluator; embedders and tests can also wrap a plain closure in
//! [`FnStrategy`].

mod expr;
pub mod indicators;
mod lexer;

pub use expr::{BinOp, DslStrategy, Expr, IndicatorFn, UnaryOp};
pub use lexer::{Token, TokenKind};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

/// Entry predicate evaluated once per simulation step.
///
/// `true` means "be in the market": the engine opens a position when flat
/// and holds while the signal stays true. Implementations may keep internal
/// rolling state but must be deterministic for a fixed input sequence.
pub trait Strategy {
    fn should_enter(&mut self, price: Decimal, timestamp: DateTime<Utc>) -> bool;
}

/// Adapter turning a plain closure into a [`Strategy`].
pub struct FnStrategy<F>(pub F);

impl<F> Strategy for FnStrategy<F>
where
    F: FnMut(Decimal, DateTime<Utc>) -> bool,
{
    fn should_enter(&mut self, price: Decimal, timestamp: DateTime<Utc>) -> bool {
        (self.0)(price, timestamp)
    }
}

/// Errors from compiling strategy text.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StrategyError {
    #[error("unexpected character '{0}' at position {1}")]
    UnexpectedChar(char, usize),

    #[error("invalid number '{0}' at position {1}")]
    InvalidNumber(String, usize),

    #[error("unexpected token: {0}")]
    UnexpectedToken(String),

    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("invalid window for {function}: {value}")]
    InvalidWindow { function: String, value: String },

    #[error("unclosed parenthesis")]
    UnclosedParen,

    #[error("empty strategy expression")]
    EmptyExpression,

    #[error("expression too deep (max depth: {0})")]
    TooDeep(usize),

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("strategy expression must evaluate to a boolean")]
    NotBoolean,
}
