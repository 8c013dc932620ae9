//! Backtesting over historical candle series.
//!
//! The engine consumes the canonical candle series produced by the exchange
//! pipeline together with a strategy predicate and produces a deterministic
//! performance report: closed positions, equity curve, and drawdown.
//!
//! # Example
//!
//! ```rust,ignore
//! use candle_backtester::backtest::{BacktestEngine, BacktestMetrics};
//! use candle_backtester::config::BacktestConfig;
//!
//! let engine = BacktestEngine::new(BacktestConfig::default());
//! let result = engine.run(&candles, &mut strategy);
//! println!("{}", BacktestMetrics::calculate(&result).summary());
//! ```

mod engine;
mod metrics;

pub use engine::{BacktestEngine, BacktestResult, Position, PositionKind};
pub use metrics::BacktestMetrics;
