//! Scriptable mock broker gateway.
//!
//! Behavior is scripted per symbol before submission, so tests can drive
//! fills, partial fills, rejections, cancellations, silence (for the
//! staleness path), and transport failures deterministically.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::domain::OrderAction;
use crate::ports::broker::{
    BrokerGateway, BrokerGatewayError, GatewayOrderStatus, OrderStatusReport,
};

/// Scripted behavior for orders in one symbol.
#[derive(Debug, Clone)]
pub enum FillScript {
    /// Report a full fill on the next status poll.
    FillAt {
        /// Fill price.
        price: Decimal,
        /// Total commission.
        commission: Decimal,
    },
    /// Report a partial fill on the first poll, then a full fill.
    FillInTwo {
        /// Quantity filled on the first poll.
        first_quantity: Decimal,
        /// Fill price for both polls.
        price: Decimal,
        /// Total commission at completion.
        commission: Decimal,
    },
    /// Reject the submission itself.
    RejectOnSubmit {
        /// Rejection reason.
        reason: String,
    },
    /// Accept the submission, then report rejected on poll.
    RejectOnPoll {
        /// Rejection reason.
        reason: String,
    },
    /// Accept the submission, then report cancelled on poll.
    CancelOnPoll,
    /// Accept the submission and stay silently submitted forever
    /// (exercises the staleness cutoff).
    Silent,
}

#[derive(Debug)]
struct GatewayOrder {
    symbol: String,
    quantity: Decimal,
    polls: u32,
    cancelled: bool,
}

#[derive(Debug, Default)]
struct MockState {
    scripts: HashMap<String, FillScript>,
    orders: HashMap<String, GatewayOrder>,
    submitted: Vec<(String, String, OrderAction, Decimal)>,
    cancelled: Vec<String>,
    transport_down: bool,
}

/// In-memory implementation of the broker gateway port.
#[derive(Debug, Default)]
pub struct MockBrokerGateway {
    state: Mutex<MockState>,
}

impl MockBrokerGateway {
    /// Gateway with default behavior (orders sit silently submitted).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script behavior for all future orders in a symbol.
    pub fn script(&self, symbol: &str, script: FillScript) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.scripts.insert(symbol.to_string(), script);
    }

    /// Simulate the transport going down (every call returns transient).
    pub fn set_transport_down(&self, down: bool) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.transport_down = down;
    }

    /// Submissions seen so far: (client order id, symbol, action, qty).
    #[must_use]
    pub fn submitted(&self) -> Vec<(String, String, OrderAction, Decimal)> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.submitted.clone()
    }

    /// Client order ids cancelled so far.
    #[must_use]
    pub fn cancelled(&self) -> Vec<String> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.cancelled.clone()
    }
}

#[async_trait]
impl BrokerGateway for MockBrokerGateway {
    async fn submit_market_order(
        &self,
        client_order_id: &str,
        symbol: &str,
        action: OrderAction,
        quantity: Decimal,
    ) -> Result<(), BrokerGatewayError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.transport_down {
            return Err(BrokerGatewayError::Transient {
                message: "connection refused".to_string(),
            });
        }
        // Idempotency: a resubmission with a known key is a no-op.
        if state.orders.contains_key(client_order_id) {
            return Ok(());
        }
        if let Some(FillScript::RejectOnSubmit { reason }) = state.scripts.get(symbol) {
            return Err(BrokerGatewayError::Rejected {
                reason: reason.clone(),
            });
        }
        state.orders.insert(
            client_order_id.to_string(),
            GatewayOrder {
                symbol: symbol.to_string(),
                quantity,
                polls: 0,
                cancelled: false,
            },
        );
        state
            .submitted
            .push((client_order_id.to_string(), symbol.to_string(), action, quantity));
        Ok(())
    }

    async fn order_status(
        &self,
        client_order_id: &str,
    ) -> Result<OrderStatusReport, BrokerGatewayError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.transport_down {
            return Err(BrokerGatewayError::Transient {
                message: "connection refused".to_string(),
            });
        }
        let Some(order) = state.orders.get_mut(client_order_id) else {
            return Err(BrokerGatewayError::OrderNotFound {
                client_order_id: client_order_id.to_string(),
            });
        };
        order.polls += 1;
        let polls = order.polls;
        let symbol = order.symbol.clone();
        let quantity = order.quantity;
        let was_cancelled = order.cancelled;

        let mut report = OrderStatusReport {
            client_order_id: client_order_id.to_string(),
            status: GatewayOrderStatus::Submitted,
            filled_quantity: Decimal::ZERO,
            avg_fill_price: None,
            commission: Decimal::ZERO,
            message: None,
        };
        if was_cancelled {
            report.status = GatewayOrderStatus::Cancelled;
            return Ok(report);
        }

        match state.scripts.get(&symbol) {
            Some(FillScript::FillAt { price, commission }) => {
                report.status = GatewayOrderStatus::Filled;
                report.filled_quantity = quantity;
                report.avg_fill_price = Some(*price);
                report.commission = *commission;
            }
            Some(FillScript::FillInTwo {
                first_quantity,
                price,
                commission,
            }) => {
                if polls == 1 {
                    report.status = GatewayOrderStatus::PartiallyFilled;
                    report.filled_quantity = *first_quantity;
                    report.avg_fill_price = Some(*price);
                } else {
                    report.status = GatewayOrderStatus::Filled;
                    report.filled_quantity = quantity;
                    report.avg_fill_price = Some(*price);
                    report.commission = *commission;
                }
            }
            Some(FillScript::RejectOnPoll { reason }) => {
                report.status = GatewayOrderStatus::Rejected;
                report.message = Some(reason.clone());
            }
            Some(FillScript::CancelOnPoll) => {
                report.status = GatewayOrderStatus::Cancelled;
            }
            Some(FillScript::Silent | FillScript::RejectOnSubmit { .. }) | None => {}
        }
        Ok(report)
    }

    async fn cancel_order(&self, client_order_id: &str) -> Result<(), BrokerGatewayError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.transport_down {
            return Err(BrokerGatewayError::Transient {
                message: "connection refused".to_string(),
            });
        }
        let Some(order) = state.orders.get_mut(client_order_id) else {
            return Err(BrokerGatewayError::OrderNotFound {
                client_order_id: client_order_id.to_string(),
            });
        };
        order.cancelled = true;
        state.cancelled.push(client_order_id.to_string());
        Ok(())
    }
}
