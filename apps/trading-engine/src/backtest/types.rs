//! Backtest configuration and result types.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{ExitReason, PortfolioSettings};

/// Configuration for one backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    /// Cash at the start of the run.
    pub starting_capital: Decimal,
    /// Adverse fill assumption in basis points, applied to entries and
    /// end-of-day exits.
    pub slippage_bps: Decimal,
    /// Per-share commission charged on both sides.
    pub commission_per_share: Decimal,
    /// Portfolio risk settings replayed through the live sizing path.
    pub settings: PortfolioSettings,
}

impl BacktestConfig {
    /// Config with the standard cost model.
    #[must_use]
    pub fn new(starting_capital: Decimal, settings: PortfolioSettings) -> Self {
        Self {
            starting_capital,
            slippage_bps: Decimal::new(5, 0),
            commission_per_share: Decimal::new(35, 4), // 0.0035
            settings,
        }
    }

    /// Slippage as a price fraction.
    #[must_use]
    pub fn slippage_fraction(&self) -> Decimal {
        self.slippage_bps / Decimal::new(10_000, 0)
    }
}

/// One completed simulated trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Session date.
    pub date: NaiveDate,
    /// Symbol traded.
    pub symbol: String,
    /// Recommendation rank the trade came from.
    pub rank: u32,
    /// Shares bought and sold.
    pub shares: Decimal,
    /// Entry fill price (open plus slippage).
    pub entry_price: Decimal,
    /// Exit fill price.
    pub exit_price: Decimal,
    /// How the trade exited.
    pub exit_reason: ExitReason,
    /// Commission paid across both sides.
    pub commission: Decimal,
    /// Net profit and loss including costs.
    pub pnl: Decimal,
}

/// One point on the equity curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquityPoint {
    /// Session date.
    pub date: NaiveDate,
    /// Account value at the close.
    pub total_value: Decimal,
}

/// Summary metrics over a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BacktestSummary {
    /// Fractional return over the run.
    pub total_return: Decimal,
    /// `(1 + total_return)^(252 / days) - 1`.
    pub annualized_return: Decimal,
    /// Largest peak-to-trough decline of the equity curve.
    pub max_drawdown: Decimal,
    /// `mean(daily_return) / stdev(daily_return) * sqrt(252)`.
    pub sharpe: Decimal,
    /// Winning trades over total trades.
    pub win_rate: Decimal,
    /// Completed trades.
    pub trade_count: u64,
}

/// Immutable output of one backtest invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestRun {
    /// First session date replayed.
    pub start_date: NaiveDate,
    /// Last session date replayed.
    pub end_date: NaiveDate,
    /// Cash at the start.
    pub starting_capital: Decimal,
    /// Cash at the end.
    pub ending_capital: Decimal,
    /// Per-day trade log.
    pub trades: Vec<TradeRecord>,
    /// Ordered equity curve, one point per session.
    pub equity_curve: Vec<EquityPoint>,
    /// Summary metrics.
    pub summary: BacktestSummary,
}
