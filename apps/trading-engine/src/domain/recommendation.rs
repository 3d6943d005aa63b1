//! Risk-bounded trade candidates produced by the sizing engine.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Minimum reward:risk ratio enforced at construction.
pub const MIN_REWARD_RISK_RATIO: Decimal = Decimal::from_parts(15, 0, 0, false, 1); // 1.5

/// A sized, ranked candidate for one trading session.
///
/// Ephemeral: produced fresh each session, never mutated after
/// construction, only consumed to open a position. Construction validates
/// the reward:risk floor and a positive share count, so any
/// `Recommendation` in existence is executable as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    /// Symbol to trade.
    pub symbol: String,
    /// Reference entry price used for sizing.
    pub entry_price: Decimal,
    /// Model's predicted return.
    pub predicted_return: f64,
    /// Confidence score in [0, 100]; 50 is neutral.
    pub confidence: f64,
    /// Protective stop price, below entry.
    pub stop_price: Decimal,
    /// Profit target price, above entry.
    pub target_price: Decimal,
    /// Shares to buy. Whole unless the portfolio allows fractional.
    pub shares: Decimal,
    /// 1-based rank in the session's execution order.
    pub rank: u32,
}

impl Recommendation {
    /// Build a recommendation, enforcing construction invariants.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Validation` if `shares <= 0` or if the
    /// target distance is below `MIN_REWARD_RISK_RATIO` times the stop
    /// distance.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: impl Into<String>,
        entry_price: Decimal,
        predicted_return: f64,
        confidence: f64,
        stop_price: Decimal,
        target_price: Decimal,
        shares: Decimal,
        rank: u32,
    ) -> Result<Self, EngineError> {
        let symbol = symbol.into();
        if shares <= Decimal::ZERO {
            return Err(EngineError::Validation {
                message: format!("{symbol}: share count must be positive, got {shares}"),
            });
        }
        let stop_distance = entry_price - stop_price;
        let target_distance = target_price - entry_price;
        if stop_distance <= Decimal::ZERO {
            return Err(EngineError::Validation {
                message: format!("{symbol}: stop {stop_price} is not below entry {entry_price}"),
            });
        }
        if target_distance < stop_distance * MIN_REWARD_RISK_RATIO {
            return Err(EngineError::Validation {
                message: format!(
                    "{symbol}: reward:risk below {MIN_REWARD_RISK_RATIO} (stop {stop_distance}, target {target_distance})"
                ),
            });
        }
        Ok(Self {
            symbol,
            entry_price,
            predicted_return,
            confidence,
            stop_price,
            target_price,
            shares,
            rank,
        })
    }

    /// Notional value of the candidate at its reference entry price.
    #[must_use]
    pub fn notional(&self) -> Decimal {
        self.shares * self.entry_price
    }
}
