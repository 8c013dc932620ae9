//! Summary statistics for a finished backtest.

use crate::backtest::engine::BacktestResult;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Aggregate performance metrics computed from a [`BacktestResult`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestMetrics {
    pub initial_equity: Decimal,
    pub final_equity: Decimal,
    pub total_pnl: Decimal,
    pub total_return_pct: Decimal,
    pub max_drawdown_pct: Decimal,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub win_rate_pct: Decimal,
}

impl BacktestMetrics {
    /// Compute metrics over the equity curve and closed trades.
    pub fn calculate(result: &BacktestResult) -> Self {
        let initial_equity = result.equity.first().copied().unwrap_or(Decimal::ZERO);
        let final_equity = result.equity.last().copied().unwrap_or(Decimal::ZERO);
        let total_pnl = final_equity - initial_equity;

        let total_return_pct = if initial_equity > Decimal::ZERO {
            total_pnl / initial_equity * dec!(100)
        } else {
            Decimal::ZERO
        };

        let max_drawdown_pct = result
            .drawdown
            .iter()
            .copied()
            .max()
            .unwrap_or(Decimal::ZERO);

        let total_trades = result.positions.len();
        let winning_trades = result
            .positions
            .iter()
            .filter(|p| matches!(p.exit_price, Some(exit) if exit > p.entry_price))
            .count();

        let win_rate_pct = if total_trades > 0 {
            Decimal::from(winning_trades as u64) / Decimal::from(total_trades as u64) * dec!(100)
        } else {
            Decimal::ZERO
        };

        Self {
            initial_equity,
            final_equity,
            total_pnl,
            total_return_pct,
            max_drawdown_pct,
            total_trades,
            winning_trades,
            win_rate_pct,
        }
    }

    /// Get a human-readable summary.
    pub fn summary(&self) -> String {
        format!(
            "Total P&L: ${:.2}\nTotal Return: {:.2}%\nWin Rate: {:.1}%\nMax Drawdown: {:.1}%\nTotal Trades: {}",
            self.total_pnl,
            self.total_return_pct,
            self.win_rate_pct,
            self.max_drawdown_pct,
            self.total_trades,
        )
    }
}
