//! Backtest simulator.
//!
//! A replay harness, not a re-implementation: each historical day runs
//! through the same `build_recommendations` sizing/stop/target code path
//! the live scheduler uses, so behavior parity with live trading is
//! structural. Exits are resolved from the day's bar with worst-case
//! ordering (a bar that touches both boundaries exits at the stop).

mod engine;
mod metrics;
mod types;

pub use engine::{BacktestRunner, load_bars};
pub use metrics::{max_drawdown, mean, sqrt_decimal, std_dev, summarize};
pub use types::{BacktestConfig, BacktestRun, BacktestSummary, EquityPoint, TradeRecord};
