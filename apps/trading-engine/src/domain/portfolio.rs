//! Portfolio, per-portfolio settings, and holdings.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;

/// How a portfolio's orders are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionMode {
    /// Fills are applied synchronously with modeled slippage.
    #[default]
    Simulated,
    /// Orders go through a broker gateway; fills arrive asynchronously.
    Broker,
}

/// Connection parameters for a broker-executed portfolio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Gateway host.
    pub host: String,
    /// Gateway port.
    pub port: u16,
    /// Broker account identifier.
    pub account: String,
    /// Client id for the gateway session.
    pub client_id: u32,
    /// Whether this is a paper-trading account.
    pub paper: bool,
}

/// Risk and execution settings for one portfolio.
///
/// Passed explicitly into every phase handler; there is no process-wide
/// settings state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSettings {
    /// Largest fraction of portfolio value a single position may consume.
    pub max_position_fraction: Decimal,
    /// Fraction of cash risked (entry to stop) per trade.
    pub per_trade_risk_fraction: Decimal,
    /// Maximum simultaneously open positions.
    pub max_open_positions: u32,
    /// Whether fractional shares are allowed.
    pub allow_fractional_shares: bool,
    /// Execution mode for this portfolio.
    pub execution_mode: ExecutionMode,
    /// Broker connection, required when `execution_mode` is `Broker`.
    pub broker: Option<BrokerConfig>,
    /// Exchange code used for market-hours checks.
    pub exchange: String,
    /// Symbols this portfolio trades.
    pub watchlist: Vec<String>,
}

impl Default for PortfolioSettings {
    fn default() -> Self {
        Self {
            max_position_fraction: Decimal::new(25, 2), // 0.25
            per_trade_risk_fraction: Decimal::new(2, 2), // 0.02
            max_open_positions: 5,
            allow_fractional_shares: false,
            execution_mode: ExecutionMode::Simulated,
            broker: None,
            exchange: "NYSE".to_string(),
            watchlist: Vec::new(),
        }
    }
}

impl PortfolioSettings {
    /// Validate settings at startup.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Validation` for out-of-range fractions, a zero
    /// position budget, or broker mode without broker connection details.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.max_position_fraction <= Decimal::ZERO || self.max_position_fraction > Decimal::ONE
        {
            return Err(EngineError::Validation {
                message: format!(
                    "max_position_fraction must be in (0, 1], got {}",
                    self.max_position_fraction
                ),
            });
        }
        if self.per_trade_risk_fraction <= Decimal::ZERO
            || self.per_trade_risk_fraction > Decimal::ONE
        {
            return Err(EngineError::Validation {
                message: format!(
                    "per_trade_risk_fraction must be in (0, 1], got {}",
                    self.per_trade_risk_fraction
                ),
            });
        }
        if self.max_open_positions == 0 {
            return Err(EngineError::Validation {
                message: "max_open_positions must be at least 1".to_string(),
            });
        }
        if self.execution_mode == ExecutionMode::Broker && self.broker.is_none() {
            return Err(EngineError::Validation {
                message: "broker execution mode requires broker connection config".to_string(),
            });
        }
        Ok(())
    }
}

/// A trading account.
///
/// `cash_balance` is the single source of truth for spendable capital and is
/// mutated only through the ledger; the value held here is a cached copy
/// refreshed after every committed transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    /// Unique id.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Spendable cash. Never negative.
    pub cash_balance: Decimal,
    /// Risk and execution settings.
    pub settings: PortfolioSettings,
}

impl Portfolio {
    /// Create a portfolio with the given starting cash.
    #[must_use]
    pub fn new(name: impl Into<String>, cash_balance: Decimal, settings: PortfolioSettings) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            cash_balance,
            settings,
        }
    }
}

/// Shares held in one symbol by one portfolio.
///
/// Never created or deleted directly; always derived from filled
/// transactions by the ledger. Deleted when quantity reaches zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holding {
    /// Owning portfolio.
    pub portfolio_id: Uuid,
    /// Symbol held.
    pub symbol: String,
    /// Share count, never negative.
    pub quantity: Decimal,
    /// Volume-weighted average cost per share, never negative.
    pub average_cost: Decimal,
}

impl Holding {
    /// Market value of the holding at the given price.
    #[must_use]
    pub fn market_value(&self, price: Decimal) -> Decimal {
        self.quantity * price
    }
}
