//! Broker gateway port (driven port).
//!
//! The network client behind this interface is out of scope; the engine
//! only needs submit/status/cancel keyed by the client order id. The
//! error split matters: transient transport failures are retried on the
//! next reconciliation tick with no state change, while rejections are
//! terminal for the order.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::OrderAction;

/// Broker-side view of an order's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayOrderStatus {
    /// Working, nothing filled.
    Submitted,
    /// Working, some quantity filled.
    PartiallyFilled,
    /// Fully filled.
    Filled,
    /// Cancelled at the broker.
    Cancelled,
    /// Rejected by the broker.
    Rejected,
}

/// Status snapshot for one order, looked up by client order id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatusReport {
    /// Idempotency key the snapshot belongs to.
    pub client_order_id: String,
    /// Broker-side status.
    pub status: GatewayOrderStatus,
    /// Cumulative filled quantity.
    pub filled_quantity: Decimal,
    /// Volume-weighted average fill price, if anything filled.
    pub avg_fill_price: Option<Decimal>,
    /// Cumulative commission charged.
    pub commission: Decimal,
    /// Broker-supplied message (rejection reason etc.).
    pub message: Option<String>,
}

/// Broker gateway port error.
#[derive(Debug, Clone, Error)]
pub enum BrokerGatewayError {
    /// Timeout, connection reset, rate limit. Retryable next tick.
    #[error("broker gateway transient failure: {message}")]
    Transient {
        /// Transport-level details.
        message: String,
    },

    /// The broker rejected the order. Terminal.
    #[error("broker rejected order: {reason}")]
    Rejected {
        /// Rejection reason.
        reason: String,
    },

    /// The gateway does not know the client order id.
    #[error("order not found at gateway: {client_order_id}")]
    OrderNotFound {
        /// The unknown idempotency key.
        client_order_id: String,
    },
}

impl BrokerGatewayError {
    /// True if the call should be retried on a later tick.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Port for broker interactions.
#[async_trait]
pub trait BrokerGateway: Send + Sync {
    /// Submit a market order. The `client_order_id` is the idempotency
    /// key; a retried submission with the same key must not create a
    /// duplicate order.
    async fn submit_market_order(
        &self,
        client_order_id: &str,
        symbol: &str,
        action: OrderAction,
        quantity: Decimal,
    ) -> Result<(), BrokerGatewayError>;

    /// Look up order progress by client order id. Idempotent.
    async fn order_status(
        &self,
        client_order_id: &str,
    ) -> Result<OrderStatusReport, BrokerGatewayError>;

    /// Cancel a working order by client order id.
    async fn cancel_order(&self, client_order_id: &str) -> Result<(), BrokerGatewayError>;
}
