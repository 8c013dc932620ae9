//! Backtesting simulation engine.
//!
//! Replays a historical candle series through a strategy predicate, tracking
//! a single flat/long position, the equity curve, and drawdown. The engine is
//! a pure synchronous pass over in-memory data: no I/O, no suspension points,
//! deterministic for fixed inputs.

use crate::config::BacktestConfig;
use crate::exchange::Candle;
use crate::strategy::Strategy;
use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Direction of a simulated position.
///
/// The evaluation path only ever opens `Long` positions; `Short` is reserved
/// for the data model and is never produced by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionKind {
    Long,
    Short,
}

/// A simulated holding. `exit_price`/`exit_time` are set exactly once, when
/// the position closes; a position without them is still open and is not
/// part of the completed-positions output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub kind: PositionKind,
    pub entry_price: Decimal,
    pub entry_time: DateTime<Utc>,
    pub exit_price: Option<Decimal>,
    pub exit_time: Option<DateTime<Utc>>,
    pub size: Decimal,
}

impl Position {
    /// Realized pnl for a closed position, `None` while open.
    pub fn realized_pnl(&self) -> Option<Decimal> {
        self.exit_price.map(|exit| self.size * (exit - self.entry_price))
    }
}

/// Complete result of a backtest run.
///
/// `equity`, `drawdown` and `timestamps` are index-aligned with the input
/// candle series (one entry per candle, in chronological order). `positions`
/// holds closed trades only, in close order, with `pnl` carrying the realized
/// pnl of each in the same order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub positions: Vec<Position>,
    pub pnl: Vec<Decimal>,
    pub timestamps: Vec<DateTime<Utc>>,
    pub equity: Vec<Decimal>,
    pub drawdown: Vec<Decimal>,
}

impl BacktestResult {
    /// Export the equity curve to CSV.
    pub fn equity_to_csv(&self, path: &str) -> Result<()> {
        use std::io::Write;
        let mut file = std::fs::File::create(path)?;
        writeln!(file, "timestamp,equity,drawdown")?;

        for i in 0..self.timestamps.len() {
            writeln!(
                file,
                "{},{},{}",
                self.timestamps[i].to_rfc3339(),
                self.equity[i],
                self.drawdown[i],
            )?;
        }

        Ok(())
    }
}

/// The backtesting simulation engine.
///
/// Accepts the canonical candle series as produced by the normalizer
/// (most-recent-first) and walks it in reverse so the simulation advances
/// chronologically. That un-reversal is this engine's responsibility; callers
/// hand over the series exactly as fetched.
pub struct BacktestEngine {
    config: BacktestConfig,
}

impl BacktestEngine {
    /// Create an engine with explicit configuration. Engines share no state;
    /// concurrent simulations each get their own.
    pub fn new(config: BacktestConfig) -> Self {
        Self { config }
    }

    /// Run the simulation. The strategy predicate is evaluated once per
    /// candle against (close price, timestamp), oldest candle first.
    ///
    /// A position still open after the final candle stays out of the
    /// positions list; only closed trades are reported.
    pub fn run(&self, candles: &[Candle], strategy: &mut dyn Strategy) -> BacktestResult {
        let mut result = BacktestResult {
            positions: Vec::new(),
            pnl: Vec::new(),
            timestamps: Vec::with_capacity(candles.len()),
            equity: Vec::with_capacity(candles.len()),
            drawdown: Vec::with_capacity(candles.len()),
        };

        let mut equity = self.config.initial_capital;
        let mut high_water_mark = equity;
        let mut open_position: Option<Position> = None;

        // Canonical order is most-recent-first; simulate oldest-first.
        for candle in candles.iter().rev() {
            let price = candle.close;
            let signal = strategy.should_enter(price, candle.timestamp);

            if signal && open_position.is_none() {
                // Full capital deployed, no leverage, no transaction cost.
                if price > Decimal::ZERO {
                    open_position = Some(Position {
                        kind: PositionKind::Long,
                        entry_price: price,
                        entry_time: candle.timestamp,
                        exit_price: None,
                        exit_time: None,
                        size: equity / price,
                    });
                    debug!(%price, timestamp = %candle.timestamp, "Opened long position");
                }
            } else if !signal {
                if let Some(mut position) = open_position.take() {
                    position.exit_price = Some(price);
                    position.exit_time = Some(candle.timestamp);

                    let pnl = position.size * (price - position.entry_price);
                    equity += pnl;

                    debug!(%price, %pnl, %equity, "Closed position");
                    result.pnl.push(pnl);
                    result.positions.push(position);
                }
            }

            if equity > high_water_mark {
                high_water_mark = equity;
            }

            let drawdown = if high_water_mark > Decimal::ZERO {
                (high_water_mark - equity) / high_water_mark * dec!(100)
            } else {
                Decimal::ZERO
            };

            result.timestamps.push(candle.timestamp);
            result.equity.push(equity);
            result.drawdown.push(drawdown);
        }

        result
    }
}
