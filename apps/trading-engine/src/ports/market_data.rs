//! Market data port (driven port).
//!
//! Live quotes, historical daily bars, and the market-hours calendar. The
//! engine never computes trading hours from the wall clock itself; every
//! phase gates on `is_market_open` so stale or closed-market quotes cannot
//! trigger state changes.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A point-in-time price for one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    /// Symbol quoted.
    pub symbol: String,
    /// Last trade price.
    pub price: Decimal,
    /// When the price was observed.
    pub timestamp: DateTime<Utc>,
}

impl Quote {
    /// True when the quote is older than `max_age` relative to `now`.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        now - self.timestamp > max_age
    }
}

/// One daily OHLCV bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bar {
    /// Session date.
    pub date: NaiveDate,
    /// Opening price.
    pub open: Decimal,
    /// Session high.
    pub high: Decimal,
    /// Session low.
    pub low: Decimal,
    /// Closing price.
    pub close: Decimal,
    /// Shares traded.
    pub volume: u64,
}

/// Market data port error.
#[derive(Debug, Clone, Error)]
pub enum MarketDataError {
    /// Provider unreachable or errored.
    #[error("market data unavailable: {message}")]
    Unavailable {
        /// Error details.
        message: String,
    },

    /// Symbol unknown to the provider.
    #[error("unknown symbol: {symbol}")]
    UnknownSymbol {
        /// The symbol that was not found.
        symbol: String,
    },

    /// Per-call timeout elapsed. Retryable.
    #[error("market data request timed out")]
    Timeout,
}

/// Port for market data providers.
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Most recent price for a symbol.
    async fn latest_price(&self, symbol: &str) -> Result<Quote, MarketDataError>;

    /// Daily bars for a symbol over an inclusive date range.
    async fn historical_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, MarketDataError>;

    /// Whether the exchange is open for regular trading at `at`.
    async fn is_market_open(
        &self,
        exchange: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, MarketDataError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn quote_staleness() {
        let now = Utc::now();
        let quote = Quote {
            symbol: "AAPL".to_string(),
            price: dec!(187.20),
            timestamp: now - chrono::Duration::seconds(90),
        };
        assert!(quote.is_stale(now, chrono::Duration::seconds(60)));
        assert!(!quote.is_stale(now, chrono::Duration::seconds(120)));
    }
}
