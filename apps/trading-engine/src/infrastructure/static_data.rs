//! Static market data and predictor adapters.
//!
//! Serve preloaded quotes, bars, and predictions. Used by tests and by
//! the daemon when running a simulated deployment without live
//! providers.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

use crate::domain::PredictionInput;
use crate::ports::market_data::{Bar, MarketData, MarketDataError, Quote};
use crate::ports::predictor::{Predictor, PredictorError};

/// Market data adapter backed by preloaded prices and bars.
#[derive(Debug, Default)]
pub struct StaticMarketData {
    quotes: Mutex<HashMap<String, Quote>>,
    bars: Mutex<HashMap<String, Vec<Bar>>>,
    market_open: Mutex<bool>,
}

impl StaticMarketData {
    /// Adapter with no data and the market closed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the latest price for a symbol, stamped now.
    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.set_quote(symbol, price, Utc::now());
    }

    /// Set the latest price with an explicit observation time.
    pub fn set_quote(&self, symbol: &str, price: Decimal, timestamp: DateTime<Utc>) {
        let mut quotes = self.quotes.lock().unwrap_or_else(|e| e.into_inner());
        quotes.insert(
            symbol.to_string(),
            Quote {
                symbol: symbol.to_string(),
                price,
                timestamp,
            },
        );
    }

    /// Load historical bars for a symbol.
    pub fn set_bars(&self, symbol: &str, bars: Vec<Bar>) {
        let mut all = self.bars.lock().unwrap_or_else(|e| e.into_inner());
        all.insert(symbol.to_string(), bars);
    }

    /// Toggle the market-hours gate.
    pub fn set_market_open(&self, open: bool) {
        let mut flag = self.market_open.lock().unwrap_or_else(|e| e.into_inner());
        *flag = open;
    }
}

#[async_trait]
impl MarketData for StaticMarketData {
    async fn latest_price(&self, symbol: &str) -> Result<Quote, MarketDataError> {
        let quotes = self.quotes.lock().unwrap_or_else(|e| e.into_inner());
        quotes
            .get(symbol)
            .cloned()
            .ok_or_else(|| MarketDataError::UnknownSymbol {
                symbol: symbol.to_string(),
            })
    }

    async fn historical_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, MarketDataError> {
        let all = self.bars.lock().unwrap_or_else(|e| e.into_inner());
        Ok(all
            .get(symbol)
            .map(|bars| {
                bars.iter()
                    .filter(|b| b.date >= start && b.date <= end)
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn is_market_open(
        &self,
        _exchange: &str,
        _at: DateTime<Utc>,
    ) -> Result<bool, MarketDataError> {
        let flag = self.market_open.lock().unwrap_or_else(|e| e.into_inner());
        Ok(*flag)
    }
}

/// Predictor adapter backed by preloaded predictions per date.
#[derive(Debug, Default)]
pub struct StaticPredictor {
    predictions: Mutex<HashMap<(String, NaiveDate), PredictionInput>>,
}

impl StaticPredictor {
    /// Adapter with no predictions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a prediction for a symbol-day.
    pub fn set_prediction(&self, date: NaiveDate, prediction: PredictionInput) {
        let mut predictions = self.predictions.lock().unwrap_or_else(|e| e.into_inner());
        predictions.insert((prediction.symbol.clone(), date), prediction);
    }
}

#[async_trait]
impl Predictor for StaticPredictor {
    async fn predict(
        &self,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<Option<PredictionInput>, PredictorError> {
        let predictions = self.predictions.lock().unwrap_or_else(|e| e.into_inner());
        Ok(predictions.get(&(symbol.to_string(), date)).cloned())
    }
}
