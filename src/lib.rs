//! # Candle Backtester
//!
//! Acquires historical price candles from a rate-limited exchange API and
//! replays a trading-strategy predicate over the series to produce a
//! deterministic performance report.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `exchange`: Chunk planning, retrying HTTP fetcher, and candle
//!   normalization
//! - `strategy`: The strategy predicate boundary, rolling indicators, and
//!   the sandboxed strategy expression language
//! - `backtest`: Single-position simulation engine and summary metrics

pub mod backtest;
pub mod config;
pub mod exchange;
pub mod strategy;

pub use config::Config;
