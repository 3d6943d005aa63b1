//! Raw per-symbol model output consumed by the sizing engine.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One symbol-day prediction from the external predictor.
///
/// Fields other than `symbol` and `predicted_return` are optional; the
/// sizing engine substitutes documented defaults when they are missing.
/// A prediction with no usable entry price is dropped with a warning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionInput {
    /// Symbol the prediction is for.
    pub symbol: String,
    /// Predicted intraday return (fraction, e.g. 0.012 = +1.2%).
    pub predicted_return: f64,
    /// Recent return volatility, if the model produced one.
    pub volatility: Option<f64>,
    /// Average true range in price units, if available.
    pub atr: Option<Decimal>,
    /// Reference entry price (usually the previous close).
    pub entry_price: Option<Decimal>,
}

impl PredictionInput {
    /// True when the prediction carries everything sizing needs.
    ///
    /// A malformed prediction is skipped by the sizing engine, never an
    /// error: missing/non-positive entry price or a non-finite return.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        if !self.predicted_return.is_finite() {
            return false;
        }
        if self.volatility.is_some_and(|v| !v.is_finite()) {
            return false;
        }
        matches!(self.entry_price, Some(p) if p > Decimal::ZERO)
    }
}
