//! Predictor port (driven port).
//!
//! The statistical model behind this interface is opaque to the engine:
//! feature computation, training, and symbol eligibility all live on the
//! far side. The engine only consumes its per-symbol-day output and must
//! tolerate partial or missing fields.

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use crate::domain::PredictionInput;

/// Predictor port error.
#[derive(Debug, Clone, Error)]
pub enum PredictorError {
    /// The model or its artifacts are unavailable.
    #[error("predictor unavailable: {message}")]
    Unavailable {
        /// Error details.
        message: String,
    },
}

/// Port for the external prediction model.
#[async_trait]
pub trait Predictor: Send + Sync {
    /// Predict the return profile for one symbol on one trade date.
    ///
    /// Returns `Ok(None)` when the model has no prediction for the
    /// symbol-day ("no prediction" sentinel); fields inside a returned
    /// prediction may still be partially missing.
    async fn predict(
        &self,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<Option<PredictionInput>, PredictorError>;
}
