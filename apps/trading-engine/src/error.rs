//! Error taxonomy for the trading engine.
//!
//! Errors are classified by how the enclosing phase must react to them:
//!
//! | Variant | Reaction |
//! |---------|----------|
//! | `Validation` | Skip the item, continue the batch |
//! | `InsufficientFunds` | Skip the candidate, continue ranking remainder |
//! | `BrokerTransient` | Retry next reconciliation tick, no state change |
//! | `BrokerRejected` | Terminal: cancel the position, release reserved cash |
//! | `StaleOrder` | Explicit cancel after the staleness timeout |
//! | `InvariantViolation` | Fatal for the single operation, logged loudly |
//! | `Ledger` | Halts the phase for that portfolio only |

use rust_decimal::Decimal;
use thiserror::Error;

use crate::ports::ledger::LedgerError;
use crate::ports::market_data::MarketDataError;

/// Engine-wide error type.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad or missing prediction/config data. Skip the item, continue.
    #[error("validation failed: {message}")]
    Validation {
        /// What was wrong with the input.
        message: String,
    },

    /// The candidate cannot be afforded. Skip it, continue ranking.
    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds {
        /// Cash the operation needed.
        required: Decimal,
        /// Cash actually available.
        available: Decimal,
    },

    /// Timeout or connection failure talking to the broker. Retryable.
    #[error("transient broker failure: {message}")]
    BrokerTransient {
        /// Transport-level details.
        message: String,
    },

    /// The broker rejected the order. Terminal for the position.
    #[error("order rejected by broker: {reason}")]
    BrokerRejected {
        /// Broker-supplied rejection reason.
        reason: String,
    },

    /// An order exceeded the staleness timeout without a terminal status.
    #[error("order {client_order_id} stale after {age_secs}s")]
    StaleOrder {
        /// Idempotency key of the stale order.
        client_order_id: String,
        /// Age of the order in seconds.
        age_secs: i64,
    },

    /// A state-machine or bookkeeping invariant was violated.
    #[error("invariant violation: {message}")]
    InvariantViolation {
        /// Description of the violated invariant.
        message: String,
    },

    /// Ledger/transactional failure. State may be ambiguous.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Market data failure.
    #[error(transparent)]
    MarketData(#[from] MarketDataError),
}

impl EngineError {
    /// True if the enclosing batch should simply skip this item and continue.
    #[must_use]
    pub const fn is_skippable(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. }
                | Self::InsufficientFunds { .. }
                | Self::BrokerTransient { .. }
        )
    }

    /// True if the error leaves portfolio state potentially ambiguous and
    /// must halt the enclosing phase for that portfolio.
    #[must_use]
    pub const fn halts_phase(&self) -> bool {
        matches!(self, Self::Ledger(_))
    }
}

impl From<crate::ports::broker::BrokerGatewayError> for EngineError {
    fn from(err: crate::ports::broker::BrokerGatewayError) -> Self {
        use crate::ports::broker::BrokerGatewayError;
        match err {
            BrokerGatewayError::Rejected { reason } => Self::BrokerRejected { reason },
            BrokerGatewayError::Transient { message } => Self::BrokerTransient { message },
            BrokerGatewayError::OrderNotFound { client_order_id } => Self::BrokerTransient {
                message: format!("order {client_order_id} not known to gateway"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn skippable_classification() {
        let validation = EngineError::Validation {
            message: "missing entry price".to_string(),
        };
        assert!(validation.is_skippable());

        let funds = EngineError::InsufficientFunds {
            required: dec!(1000),
            available: dec!(500),
        };
        assert!(funds.is_skippable());

        let rejected = EngineError::BrokerRejected {
            reason: "no shortable shares".to_string(),
        };
        assert!(!rejected.is_skippable());
    }

    #[test]
    fn ledger_errors_halt_the_phase() {
        let err = EngineError::Ledger(LedgerError::Storage {
            message: "write failed".to_string(),
        });
        assert!(err.halts_phase());

        let invariant = EngineError::InvariantViolation {
            message: "duplicate open position".to_string(),
        };
        assert!(!invariant.halts_phase());
    }

    #[test]
    fn gateway_errors_map_to_taxonomy() {
        use crate::ports::broker::BrokerGatewayError;

        let err: EngineError = BrokerGatewayError::Rejected {
            reason: "margin".to_string(),
        }
        .into();
        assert!(matches!(err, EngineError::BrokerRejected { .. }));

        let err: EngineError = BrokerGatewayError::OrderNotFound {
            client_order_id: "abc".to_string(),
        }
        .into();
        assert!(matches!(err, EngineError::BrokerTransient { .. }));
    }
}
