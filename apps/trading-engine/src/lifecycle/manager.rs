//! Lifecycle manager: opens, monitors, and closes positions through either
//! the simulated or the broker execution path.
//!
//! Cash is reserved through the ledger before any submission and settled
//! or released atomically with the position status change. Every
//! transition to `Open` or `Closed` commits exactly one ledger
//! transaction and logs before/after cash for auditability.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::book::PositionBook;
use super::commission::CommissionSchedule;
use crate::domain::{
    BrokerOrder, ExecutionMode, ExitReason, OrderAction, OrderStateMachine, OrderStatus,
    Portfolio, Position, PositionStatus, Recommendation,
};
use crate::error::EngineError;
use crate::ports::broker::{BrokerGateway, BrokerGatewayError, GatewayOrderStatus, OrderStatusReport};
use crate::ports::ledger::{Ledger, LedgerError, TransactionKind};

/// What the monitor decided for one open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorAction {
    /// Neither boundary touched.
    None,
    /// Price at or below the stop; close now.
    CloseStop,
    /// Price at or above the target; close now.
    CloseTarget,
}

/// How a reconciliation snapshot changed an order/position pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOutcome {
    /// Nothing changed (idempotent re-poll).
    NoChange,
    /// Fill quantity advanced but the order is still working.
    Partial,
    /// Entry completed; the position is now open.
    Opened,
    /// Exit completed; the position is now closed.
    Closed,
    /// The order was cancelled.
    Cancelled,
    /// The broker rejected the order.
    Rejected,
}

/// Outcome of an end-of-session sweep.
#[derive(Debug, Clone, Default)]
pub struct CloseAllReport {
    /// Open positions the sweep attempted to exit.
    pub attempted: usize,
    /// Exits initiated successfully (complete synchronously in simulated
    /// mode; broker-mode exits complete at reconciliation).
    pub initiated: usize,
    /// Per-symbol failures, isolated from each other.
    pub failures: Vec<(String, String)>,
}

/// Position lifecycle manager for a single portfolio.
///
/// Serialized access is the caller's responsibility: the scheduler keeps
/// one manager per portfolio behind a mutex so open/monitor/close/
/// reconcile never interleave within a portfolio.
pub struct LifecycleManager<L, B> {
    ledger: Arc<L>,
    gateway: Option<Arc<B>>,
    mode: ExecutionMode,
    slippage: Decimal,
    commission: CommissionSchedule,
    call_timeout: Duration,
    book: PositionBook,
}

impl<L, B> LifecycleManager<L, B>
where
    L: Ledger,
    B: BrokerGateway,
{
    /// Create a manager.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Validation` if broker mode is requested
    /// without a gateway.
    pub fn new(
        ledger: Arc<L>,
        gateway: Option<Arc<B>>,
        mode: ExecutionMode,
        slippage_fraction: Decimal,
        commission: CommissionSchedule,
        call_timeout: Duration,
    ) -> Result<Self, EngineError> {
        if mode == ExecutionMode::Broker && gateway.is_none() {
            return Err(EngineError::Validation {
                message: "broker execution mode requires a gateway".to_string(),
            });
        }
        Ok(Self {
            ledger,
            gateway,
            mode,
            slippage: slippage_fraction,
            commission,
            call_timeout,
            book: PositionBook::new(),
        })
    }

    /// The position/order book.
    #[must_use]
    pub const fn book(&self) -> &PositionBook {
        &self.book
    }

    /// Execution mode this manager runs in.
    #[must_use]
    pub const fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Estimated cash needed to enter a candidate: slipped notional plus
    /// estimated commission. This is the amount reserved before
    /// submission.
    #[must_use]
    pub fn estimated_entry_cost(&self, recommendation: &Recommendation) -> Decimal {
        recommendation.notional() * (Decimal::ONE + self.slippage)
            + self.commission.for_shares(recommendation.shares)
    }

    /// Open a position from an accepted recommendation.
    ///
    /// Reserves cash first, then either commits the fill synchronously
    /// (simulated) or submits a market order and leaves the position
    /// pending (broker).
    ///
    /// # Errors
    ///
    /// - `EngineError::InvariantViolation` if the symbol already has an
    ///   active position for the trade date
    /// - `EngineError::InsufficientFunds` if the reservation fails
    /// - `EngineError::BrokerRejected` if the gateway rejects submission
    pub async fn open(
        &mut self,
        portfolio: &mut Portfolio,
        recommendation: &Recommendation,
        trade_date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Uuid, EngineError> {
        if self
            .book
            .has_active_position(&recommendation.symbol, trade_date)
        {
            return Err(EngineError::InvariantViolation {
                message: format!(
                    "{} already has an active position for {trade_date}",
                    recommendation.symbol
                ),
            });
        }

        let reserve_amount = self.estimated_entry_cost(recommendation);
        let reservation_id = self
            .ledger
            .reserve_cash(portfolio.id, reserve_amount)
            .await
            .map_err(map_reserve_error)?;

        let position = Position::new_pending(
            portfolio.id,
            recommendation.symbol.clone(),
            trade_date,
            recommendation.entry_price,
            recommendation.shares,
            recommendation.stop_price,
            recommendation.target_price,
        );
        let position_id = position.id;
        self.book.insert_position(position);
        self.book.set_reservation(position_id, reservation_id);

        match self.mode {
            ExecutionMode::Simulated => {
                self.fill_entry_simulated(portfolio, position_id, now).await?;
            }
            ExecutionMode::Broker => {
                self.submit_entry_order(portfolio, position_id, now).await?;
            }
        }
        Ok(position_id)
    }

    /// Simulated executor: slip the price against us and commit the fill
    /// in the same call, collapsing `Pending -> Open`.
    async fn fill_entry_simulated(
        &mut self,
        portfolio: &mut Portfolio,
        position_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let (symbol, shares, entry_price) = {
            let position = self.require_position(position_id)?;
            (position.symbol.clone(), position.shares, position.entry_price)
        };
        let fill_price = entry_price * (Decimal::ONE + self.slippage);
        let commission = self.commission.for_shares(shares);
        let reservation = self.book.take_reservation(position_id);
        let cash_before = portfolio.cash_balance;

        if let Err(err) = self
            .ledger
            .commit_transaction(
                portfolio.id,
                TransactionKind::Buy,
                &symbol,
                shares,
                fill_price,
                commission,
                reservation,
            )
            .await
        {
            // The fill never happened; unwind the pending position.
            if let Some(position) = self.book.position_mut(position_id) {
                let _ = position.mark_cancelled(now);
            }
            return Err(map_reserve_error(err));
        }

        self.require_position_mut(position_id)?
            .mark_open(fill_price, shares, now)?;
        self.refresh_cash(portfolio).await?;

        info!(
            position_id = %position_id,
            symbol = %symbol,
            shares = %shares,
            fill_price = %fill_price,
            commission = %commission,
            cash_before = %cash_before,
            cash_after = %portfolio.cash_balance,
            "position opened (simulated fill)"
        );
        Ok(())
    }

    /// Broker executor: submit a market order and leave the position
    /// pending until reconciliation confirms the fill.
    async fn submit_entry_order(
        &mut self,
        portfolio: &mut Portfolio,
        position_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let (symbol, shares) = {
            let position = self.require_position(position_id)?;
            (position.symbol.clone(), position.shares)
        };
        let order = BrokerOrder::new(position_id, OrderAction::Buy, shares, now);
        let order_id = order.id;
        let client_order_id = order.client_order_id.clone();
        self.book.insert_order(order);

        match self
            .gateway_call_submit(&client_order_id, &symbol, OrderAction::Buy, shares)
            .await
        {
            Ok(()) => {
                self.transition_order(order_id, OrderStatus::Submitted)?;
                info!(
                    position_id = %position_id,
                    symbol = %symbol,
                    client_order_id = %client_order_id,
                    shares = %shares,
                    "entry order submitted, awaiting fill"
                );
                Ok(())
            }
            Err(BrokerGatewayError::Rejected { reason }) => {
                self.transition_order(order_id, OrderStatus::Rejected)?;
                if let Some(order) = self.book.order_mut(order_id) {
                    order.error_message = Some(reason.clone());
                }
                self.release_entry_reservation(position_id).await?;
                self.require_position_mut(position_id)?.mark_cancelled(now)?;
                error!(
                    position_id = %position_id,
                    symbol = %symbol,
                    reason = %reason,
                    "entry order rejected at submission"
                );
                Err(EngineError::BrokerRejected { reason })
            }
            Err(err) => {
                // Ack uncertain: keep the order pending. The status poll
                // will find it if the broker accepted it; otherwise the
                // staleness cutoff cancels it.
                warn!(
                    position_id = %position_id,
                    symbol = %symbol,
                    error = %err,
                    "entry submission unacknowledged, leaving order pending"
                );
                Ok(())
            }
        }
    }

    /// Evaluate an open position against a price.
    ///
    /// The stop check takes priority over the target check when both are
    /// touched in the same evaluation. Only `Open` positions produce an
    /// action; callers gate on market hours before evaluating.
    #[must_use]
    pub fn evaluate(&self, position: &Position, price: Decimal) -> MonitorAction {
        if position.status != PositionStatus::Open {
            return MonitorAction::None;
        }
        if price <= position.stop_price {
            MonitorAction::CloseStop
        } else if price >= position.target_price {
            MonitorAction::CloseTarget
        } else {
            MonitorAction::None
        }
    }

    /// Close an open position through the executor path.
    ///
    /// # Errors
    ///
    /// - `EngineError::InvariantViolation` if the position is not open
    /// - `EngineError::BrokerRejected` if the exit submission is rejected
    ///   (the position reverts to open for retry)
    pub async fn close(
        &mut self,
        portfolio: &mut Portfolio,
        position_id: Uuid,
        reason: ExitReason,
        market_price: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        self.require_position_mut(position_id)?.mark_closing(reason)?;

        match self.mode {
            ExecutionMode::Simulated => {
                self.fill_exit_simulated(portfolio, position_id, market_price, now)
                    .await
            }
            ExecutionMode::Broker => self.submit_exit_order(portfolio, position_id, now).await,
        }
    }

    async fn fill_exit_simulated(
        &mut self,
        portfolio: &mut Portfolio,
        position_id: Uuid,
        market_price: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let (symbol, shares, reason) = {
            let position = self.require_position(position_id)?;
            (position.symbol.clone(), position.shares, position.exit_reason)
        };
        let exit_price = market_price * (Decimal::ONE - self.slippage);
        let commission = self.commission.for_shares(shares);
        let cash_before = portfolio.cash_balance;

        self.ledger
            .commit_transaction(
                portfolio.id,
                TransactionKind::Sell,
                &symbol,
                shares,
                exit_price,
                commission,
                None,
            )
            .await?;

        self.require_position_mut(position_id)?
            .mark_closed(exit_price, now)?;
        self.refresh_cash(portfolio).await?;

        info!(
            position_id = %position_id,
            symbol = %symbol,
            shares = %shares,
            exit_price = %exit_price,
            reason = ?reason,
            commission = %commission,
            cash_before = %cash_before,
            cash_after = %portfolio.cash_balance,
            "position closed (simulated fill)"
        );
        Ok(())
    }

    async fn submit_exit_order(
        &mut self,
        _portfolio: &mut Portfolio,
        position_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let (symbol, shares) = {
            let position = self.require_position(position_id)?;
            (position.symbol.clone(), position.shares)
        };
        let order = BrokerOrder::new(position_id, OrderAction::Sell, shares, now);
        let order_id = order.id;
        let client_order_id = order.client_order_id.clone();
        self.book.insert_order(order);

        match self
            .gateway_call_submit(&client_order_id, &symbol, OrderAction::Sell, shares)
            .await
        {
            Ok(()) => {
                self.transition_order(order_id, OrderStatus::Submitted)?;
                info!(
                    position_id = %position_id,
                    symbol = %symbol,
                    client_order_id = %client_order_id,
                    "exit order submitted, awaiting fill"
                );
                Ok(())
            }
            Err(BrokerGatewayError::Rejected { reason }) => {
                self.transition_order(order_id, OrderStatus::Rejected)?;
                self.require_position_mut(position_id)?.revert_to_open()?;
                error!(
                    position_id = %position_id,
                    symbol = %symbol,
                    reason = %reason,
                    "exit order rejected, position reverted to open"
                );
                Err(EngineError::BrokerRejected { reason })
            }
            Err(err) => {
                warn!(
                    position_id = %position_id,
                    symbol = %symbol,
                    error = %err,
                    "exit submission unacknowledged, leaving order pending"
                );
                Ok(())
            }
        }
    }

    /// End-of-session sweep: exit every remaining open position through
    /// the normal path. Per-position failures are isolated.
    pub async fn close_all(
        &mut self,
        portfolio: &mut Portfolio,
        prices: &HashMap<String, Decimal>,
        now: DateTime<Utc>,
    ) -> CloseAllReport {
        let mut report = CloseAllReport::default();

        for position_id in self.book.open_position_ids() {
            let Some(position) = self.book.position(position_id) else {
                continue;
            };
            let symbol = position.symbol.clone();
            let price = prices.get(&symbol).copied().unwrap_or_else(|| {
                warn!(symbol = %symbol, "no price for forced exit, using entry price");
                position.entry_price
            });

            report.attempted += 1;
            match self
                .close(portfolio, position_id, ExitReason::EndOfDay, price, now)
                .await
            {
                Ok(()) => report.initiated += 1,
                Err(err) => {
                    error!(symbol = %symbol, error = %err, "forced exit failed");
                    report.failures.push((symbol, err.to_string()));
                }
            }
        }
        report
    }

    /// Apply a broker status snapshot to an order and its position.
    ///
    /// Idempotent: re-applying the same snapshot produces `NoChange` and
    /// no ledger mutation. A completed entry settles the cash reservation
    /// and opens the position; a completed exit closes it.
    pub async fn apply_fill_report(
        &mut self,
        portfolio: &mut Portfolio,
        order_id: Uuid,
        report: &OrderStatusReport,
        now: DateTime<Utc>,
    ) -> Result<FillOutcome, EngineError> {
        let (order_status, action, position_id, recorded_fill) = {
            let order = self.require_order(order_id)?;
            (
                order.status,
                order.action,
                order.position_id,
                order.filled_quantity,
            )
        };
        if order_status.is_terminal() {
            return Ok(FillOutcome::NoChange);
        }

        match report.status {
            GatewayOrderStatus::Submitted => {
                if order_status == OrderStatus::Pending {
                    self.transition_order(order_id, OrderStatus::Submitted)?;
                }
                Ok(FillOutcome::NoChange)
            }
            GatewayOrderStatus::PartiallyFilled => {
                if report.filled_quantity == recorded_fill {
                    return Ok(FillOutcome::NoChange);
                }
                if order_status == OrderStatus::Pending {
                    self.transition_order(order_id, OrderStatus::Submitted)?;
                }
                let avg = report.avg_fill_price.unwrap_or(Decimal::ZERO);
                self.require_order_mut(order_id)?.apply_fill(
                    report.filled_quantity,
                    avg,
                    report.commission,
                )?;
                info!(
                    order_id = %order_id,
                    filled = %report.filled_quantity,
                    "partial fill recorded"
                );
                Ok(FillOutcome::Partial)
            }
            GatewayOrderStatus::Filled => {
                if order_status == OrderStatus::Pending {
                    self.transition_order(order_id, OrderStatus::Submitted)?;
                }
                let avg = report
                    .avg_fill_price
                    .ok_or_else(|| EngineError::InvariantViolation {
                        message: format!("order {order_id} filled without a fill price"),
                    })?;
                self.require_order_mut(order_id)?.apply_fill(
                    report.filled_quantity,
                    avg,
                    report.commission,
                )?;
                self.settle_completed_order(portfolio, order_id, action, position_id, now)
                    .await
            }
            GatewayOrderStatus::Cancelled => {
                self.terminate_order(
                    portfolio,
                    order_id,
                    OrderStatus::Cancelled,
                    report.message.clone(),
                    now,
                )
                .await?;
                Ok(FillOutcome::Cancelled)
            }
            GatewayOrderStatus::Rejected => {
                self.terminate_order(
                    portfolio,
                    order_id,
                    OrderStatus::Rejected,
                    report.message.clone(),
                    now,
                )
                .await?;
                Ok(FillOutcome::Rejected)
            }
        }
    }

    /// Cancel an order that exceeded the staleness cutoff, marking its
    /// position accordingly.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::BrokerTransient` if the gateway cancel
    /// itself failed and should be retried next tick.
    pub async fn cancel_stale_order(
        &mut self,
        portfolio: &mut Portfolio,
        order_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let (client_order_id, age_secs) = {
            let order = self.require_order(order_id)?;
            (order.client_order_id.clone(), order.age(now).num_seconds())
        };

        match self.gateway_call_cancel(&client_order_id).await {
            // Unknown at the gateway means the submission never landed;
            // safe to cancel locally.
            Ok(()) | Err(BrokerGatewayError::OrderNotFound { .. }) => {}
            Err(err) => return Err(err.into()),
        }

        warn!(
            order_id = %order_id,
            client_order_id = %client_order_id,
            age_secs,
            "cancelled stale order"
        );
        self.terminate_order(
            portfolio,
            order_id,
            OrderStatus::Cancelled,
            Some(format!("stale after {age_secs}s")),
            now,
        )
        .await
    }

    /// Settle a fully filled order: one ledger transaction, position
    /// advance, cash refresh.
    async fn settle_completed_order(
        &mut self,
        portfolio: &mut Portfolio,
        order_id: Uuid,
        action: OrderAction,
        position_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<FillOutcome, EngineError> {
        let (symbol, filled_quantity, avg_price, commission) = {
            let order = self.require_order(order_id)?;
            let position = self.require_position(position_id)?;
            (
                position.symbol.clone(),
                order.filled_quantity,
                order.filled_price.unwrap_or(position.entry_price),
                order.commission,
            )
        };
        let cash_before = portfolio.cash_balance;

        match action {
            OrderAction::Buy => {
                let reservation = self.book.take_reservation(position_id);
                self.ledger
                    .commit_transaction(
                        portfolio.id,
                        TransactionKind::Buy,
                        &symbol,
                        filled_quantity,
                        avg_price,
                        commission,
                        reservation,
                    )
                    .await?;
                self.require_position_mut(position_id)?
                    .mark_open(avg_price, filled_quantity, now)?;
                self.refresh_cash(portfolio).await?;
                info!(
                    position_id = %position_id,
                    symbol = %symbol,
                    shares = %filled_quantity,
                    fill_price = %avg_price,
                    commission = %commission,
                    cash_before = %cash_before,
                    cash_after = %portfolio.cash_balance,
                    "position opened (broker fill)"
                );
                Ok(FillOutcome::Opened)
            }
            OrderAction::Sell => {
                self.ledger
                    .commit_transaction(
                        portfolio.id,
                        TransactionKind::Sell,
                        &symbol,
                        filled_quantity,
                        avg_price,
                        commission,
                        None,
                    )
                    .await?;
                self.require_position_mut(position_id)?
                    .mark_closed(avg_price, now)?;
                self.refresh_cash(portfolio).await?;
                info!(
                    position_id = %position_id,
                    symbol = %symbol,
                    shares = %filled_quantity,
                    exit_price = %avg_price,
                    commission = %commission,
                    cash_before = %cash_before,
                    cash_after = %portfolio.cash_balance,
                    "position closed (broker fill)"
                );
                Ok(FillOutcome::Closed)
            }
        }
    }

    /// Drive an order to a terminal cancelled/rejected state and put its
    /// position back in a consistent place. Partial fills that already
    /// happened are settled for the filled quantity so the ledger matches
    /// economic reality.
    async fn terminate_order(
        &mut self,
        portfolio: &mut Portfolio,
        order_id: Uuid,
        terminal: OrderStatus,
        message: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let (action, position_id, filled_quantity, avg_price, commission, symbol) = {
            let order = self.require_order(order_id)?;
            let position = self.require_position(order.position_id)?;
            (
                order.action,
                order.position_id,
                order.filled_quantity,
                order.filled_price.unwrap_or(position.entry_price),
                order.commission,
                position.symbol.clone(),
            )
        };

        self.transition_order(order_id, terminal)?;
        if let Some(order) = self.book.order_mut(order_id) {
            order.error_message = message;
        }

        match (action, filled_quantity > Decimal::ZERO) {
            // Entry died with nothing filled: cancel the position and
            // release the reservation.
            (OrderAction::Buy, false) => {
                self.release_entry_reservation(position_id).await?;
                self.require_position_mut(position_id)?.mark_cancelled(now)?;
                info!(position_id = %position_id, symbol = %symbol, "pending entry cancelled");
            }
            // Entry died with partial fills: the shares are real. Settle
            // the filled portion and open the reduced position.
            (OrderAction::Buy, true) => {
                let reservation = self.book.take_reservation(position_id);
                self.ledger
                    .commit_transaction(
                        portfolio.id,
                        TransactionKind::Buy,
                        &symbol,
                        filled_quantity,
                        avg_price,
                        commission,
                        reservation,
                    )
                    .await?;
                self.require_position_mut(position_id)?
                    .mark_open(avg_price, filled_quantity, now)?;
                self.refresh_cash(portfolio).await?;
                warn!(
                    position_id = %position_id,
                    symbol = %symbol,
                    filled = %filled_quantity,
                    "entry cancelled after partial fill, opened reduced position"
                );
            }
            // Exit died with nothing filled: revert to open for retry.
            (OrderAction::Sell, false) => {
                self.require_position_mut(position_id)?.revert_to_open()?;
                warn!(position_id = %position_id, symbol = %symbol, "exit cancelled, position reverted to open");
            }
            // Exit died with partial fills: settle what sold, keep the
            // remainder open.
            (OrderAction::Sell, true) => {
                self.ledger
                    .commit_transaction(
                        portfolio.id,
                        TransactionKind::Sell,
                        &symbol,
                        filled_quantity,
                        avg_price,
                        commission,
                        None,
                    )
                    .await?;
                let position = self.require_position_mut(position_id)?;
                position.shares -= filled_quantity;
                position.revert_to_open()?;
                self.refresh_cash(portfolio).await?;
                warn!(
                    position_id = %position_id,
                    symbol = %symbol,
                    sold = %filled_quantity,
                    "exit cancelled after partial fill, remainder stays open"
                );
            }
        }
        Ok(())
    }

    async fn release_entry_reservation(&mut self, position_id: Uuid) -> Result<(), EngineError> {
        if let Some(reservation_id) = self.book.take_reservation(position_id) {
            match self.ledger.release_reservation(reservation_id).await {
                Ok(()) | Err(LedgerError::ReservationNotFound { .. }) => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    async fn refresh_cash(&self, portfolio: &mut Portfolio) -> Result<(), EngineError> {
        portfolio.cash_balance = self.ledger.cash_balance(portfolio.id).await?;
        Ok(())
    }

    fn transition_order(&mut self, order_id: Uuid, to: OrderStatus) -> Result<(), EngineError> {
        let order = self.require_order_mut(order_id)?;
        OrderStateMachine::validate_transition(order.status, to)?;
        order.status = to;
        Ok(())
    }

    async fn gateway_call_submit(
        &self,
        client_order_id: &str,
        symbol: &str,
        action: OrderAction,
        quantity: Decimal,
    ) -> Result<(), BrokerGatewayError> {
        let gateway = self.require_gateway()?;
        match tokio::time::timeout(
            self.call_timeout,
            gateway.submit_market_order(client_order_id, symbol, action, quantity),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(BrokerGatewayError::Transient {
                message: "order submission timed out".to_string(),
            }),
        }
    }

    async fn gateway_call_cancel(&self, client_order_id: &str) -> Result<(), BrokerGatewayError> {
        let gateway = self.require_gateway()?;
        match tokio::time::timeout(self.call_timeout, gateway.cancel_order(client_order_id)).await
        {
            Ok(result) => result,
            Err(_) => Err(BrokerGatewayError::Transient {
                message: "order cancel timed out".to_string(),
            }),
        }
    }

    /// Look up order progress at the gateway with the per-call timeout.
    pub async fn gateway_order_status(
        &self,
        client_order_id: &str,
    ) -> Result<OrderStatusReport, BrokerGatewayError> {
        let gateway = self.require_gateway()?;
        match tokio::time::timeout(self.call_timeout, gateway.order_status(client_order_id)).await
        {
            Ok(result) => result,
            Err(_) => Err(BrokerGatewayError::Transient {
                message: "order status lookup timed out".to_string(),
            }),
        }
    }

    fn require_gateway(&self) -> Result<&Arc<B>, BrokerGatewayError> {
        self.gateway
            .as_ref()
            .ok_or_else(|| BrokerGatewayError::Transient {
                message: "no gateway configured".to_string(),
            })
    }

    fn require_position(&self, id: Uuid) -> Result<&Position, EngineError> {
        self.book
            .position(id)
            .ok_or_else(|| EngineError::InvariantViolation {
                message: format!("position {id} not in book"),
            })
    }

    fn require_position_mut(&mut self, id: Uuid) -> Result<&mut Position, EngineError> {
        self.book
            .position_mut(id)
            .ok_or_else(|| EngineError::InvariantViolation {
                message: format!("position {id} not in book"),
            })
    }

    fn require_order(&self, id: Uuid) -> Result<&BrokerOrder, EngineError> {
        self.book
            .order(id)
            .ok_or_else(|| EngineError::InvariantViolation {
                message: format!("order {id} not in book"),
            })
    }

    fn require_order_mut(&mut self, id: Uuid) -> Result<&mut BrokerOrder, EngineError> {
        self.book
            .order_mut(id)
            .ok_or_else(|| EngineError::InvariantViolation {
                message: format!("order {id} not in book"),
            })
    }
}

fn map_reserve_error(err: LedgerError) -> EngineError {
    match err {
        LedgerError::InsufficientFunds {
            requested,
            available,
        } => EngineError::InsufficientFunds {
            required: requested,
            available,
        },
        other => EngineError::Ledger(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    use crate::infrastructure::{FillScript, InMemoryLedger, MockBrokerGateway};

    const SLIPPAGE: Decimal = Decimal::from_parts(5, 0, 0, false, 4); // 0.0005

    fn trade_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()
    }

    fn recommendation(symbol: &str, shares: Decimal) -> Recommendation {
        Recommendation::new(symbol, dec!(100), 0.01, 60.0, dec!(97), dec!(105), shares, 1)
            .expect("valid recommendation")
    }

    fn simulated_setup(cash: Decimal) -> (
        Portfolio,
        LifecycleManager<InMemoryLedger, MockBrokerGateway>,
        Arc<InMemoryLedger>,
    ) {
        let ledger = Arc::new(InMemoryLedger::new());
        let portfolio = Portfolio::new("test", cash, crate::domain::PortfolioSettings::default());
        ledger.open_account(portfolio.id, cash);
        let manager = LifecycleManager::new(
            Arc::clone(&ledger),
            None,
            ExecutionMode::Simulated,
            SLIPPAGE,
            CommissionSchedule::default(),
            Duration::from_secs(5),
        )
        .expect("manager");
        (portfolio, manager, ledger)
    }

    fn broker_setup(cash: Decimal) -> (
        Portfolio,
        LifecycleManager<InMemoryLedger, MockBrokerGateway>,
        Arc<InMemoryLedger>,
        Arc<MockBrokerGateway>,
    ) {
        let ledger = Arc::new(InMemoryLedger::new());
        let gateway = Arc::new(MockBrokerGateway::new());
        let portfolio = Portfolio::new("test", cash, crate::domain::PortfolioSettings::default());
        ledger.open_account(portfolio.id, cash);
        let manager = LifecycleManager::new(
            Arc::clone(&ledger),
            Some(Arc::clone(&gateway)),
            ExecutionMode::Broker,
            SLIPPAGE,
            CommissionSchedule::default(),
            Duration::from_secs(5),
        )
        .expect("manager");
        (portfolio, manager, ledger, gateway)
    }

    #[tokio::test]
    async fn simulated_open_fills_synchronously_with_slippage() {
        let (mut portfolio, mut manager, ledger) = simulated_setup(dec!(10000));
        let rec = recommendation("AAPL", dec!(10));

        let position_id = manager
            .open(&mut portfolio, &rec, trade_date(), Utc::now())
            .await
            .expect("open should succeed");

        let position = manager.book().position(position_id).expect("in book");
        assert_eq!(position.status, PositionStatus::Open);
        assert_eq!(position.entry_price, dec!(100.05)); // +5 bps

        // cash = 10000 - 10 * 100.05 - 10 * 0.0035
        assert_eq!(portfolio.cash_balance, dec!(8999.465));
        assert_eq!(ledger.transaction_count(portfolio.id), 1);
        assert_eq!(manager.book().outstanding_reservation_count(), 0);
    }

    #[tokio::test]
    async fn simulated_round_trip_conserves_cash() {
        let (mut portfolio, mut manager, ledger) = simulated_setup(dec!(10000));
        let rec = recommendation("AAPL", dec!(10));
        let now = Utc::now();

        let position_id = manager
            .open(&mut portfolio, &rec, trade_date(), now)
            .await
            .expect("open");
        manager
            .close(&mut portfolio, position_id, ExitReason::Target, dec!(105), now)
            .await
            .expect("close");

        let position = manager.book().position(position_id).expect("in book");
        assert_eq!(position.status, PositionStatus::Closed);
        assert_eq!(position.exit_reason, Some(ExitReason::Target));
        // exit at 105 * (1 - 0.0005) = 104.9475
        assert_eq!(position.exit_price, Some(dec!(104.9475)));

        // cash = 10000 - (10*100.05 + 0.035) + (10*104.9475 - 0.035)
        assert_eq!(portfolio.cash_balance, dec!(10048.905));
        assert_eq!(ledger.transaction_count(portfolio.id), 2);
        assert!(ledger.holdings_for(portfolio.id).is_empty());
    }

    #[tokio::test]
    async fn duplicate_open_same_symbol_same_day_is_invariant_violation() {
        let (mut portfolio, mut manager, _ledger) = simulated_setup(dec!(100000));
        let rec = recommendation("AAPL", dec!(10));
        let now = Utc::now();

        manager
            .open(&mut portfolio, &rec, trade_date(), now)
            .await
            .expect("first open");
        let err = manager.open(&mut portfolio, &rec, trade_date(), now).await;
        assert!(matches!(err, Err(EngineError::InvariantViolation { .. })));
    }

    #[tokio::test]
    async fn insufficient_funds_is_skippable_and_leaves_no_state() {
        let (mut portfolio, mut manager, ledger) = simulated_setup(dec!(500));
        let rec = recommendation("AAPL", dec!(10)); // needs ~$1000

        let err = manager
            .open(&mut portfolio, &rec, trade_date(), Utc::now())
            .await
            .expect_err("should fail");
        assert!(matches!(err, EngineError::InsufficientFunds { .. }));
        assert!(err.is_skippable());
        assert_eq!(ledger.transaction_count(portfolio.id), 0);
        assert_eq!(ledger.reserved_total(portfolio.id), Decimal::ZERO);
    }

    #[tokio::test]
    async fn evaluate_prioritizes_stop_over_target() {
        let (mut portfolio, mut manager, _) = simulated_setup(dec!(10000));
        let rec = recommendation("AAPL", dec!(10));
        let position_id = manager
            .open(&mut portfolio, &rec, trade_date(), Utc::now())
            .await
            .expect("open");
        let position = manager.book().position(position_id).expect("in book").clone();

        assert_eq!(manager.evaluate(&position, dec!(100)), MonitorAction::None);
        assert_eq!(manager.evaluate(&position, dec!(96)), MonitorAction::CloseStop);
        assert_eq!(
            manager.evaluate(&position, dec!(106)),
            MonitorAction::CloseTarget
        );
        // Exactly at the stop closes.
        assert_eq!(manager.evaluate(&position, dec!(97)), MonitorAction::CloseStop);
    }

    #[tokio::test]
    async fn evaluate_ignores_non_open_positions() {
        let (_, manager, _) = simulated_setup(dec!(10000));
        let position = Position::new_pending(
            Uuid::new_v4(),
            "AAPL",
            trade_date(),
            dec!(100),
            dec!(10),
            dec!(97),
            dec!(105),
        );
        assert_eq!(manager.evaluate(&position, dec!(90)), MonitorAction::None);
    }

    #[tokio::test]
    async fn broker_open_leaves_position_pending() {
        let (mut portfolio, mut manager, ledger, gateway) = broker_setup(dec!(10000));
        let rec = recommendation("AAPL", dec!(10));

        let position_id = manager
            .open(&mut portfolio, &rec, trade_date(), Utc::now())
            .await
            .expect("open");

        let position = manager.book().position(position_id).expect("in book");
        assert_eq!(position.status, PositionStatus::Pending);
        assert_eq!(gateway.submitted().len(), 1);
        // Cash is reserved but no transaction yet.
        assert_eq!(ledger.transaction_count(portfolio.id), 0);
        assert!(ledger.reserved_total(portfolio.id) > Decimal::ZERO);
    }

    #[tokio::test]
    async fn broker_rejection_at_submit_cancels_and_releases() {
        let (mut portfolio, mut manager, ledger, gateway) = broker_setup(dec!(10000));
        gateway.script("AAPL", FillScript::RejectOnSubmit {
            reason: "not shortable".to_string(),
        });
        let rec = recommendation("AAPL", dec!(10));

        let err = manager
            .open(&mut portfolio, &rec, trade_date(), Utc::now())
            .await
            .expect_err("should reject");
        assert!(matches!(err, EngineError::BrokerRejected { .. }));

        let position = manager
            .book()
            .positions()
            .next()
            .expect("position retained for audit");
        assert_eq!(position.status, PositionStatus::Cancelled);
        assert_eq!(ledger.reserved_total(portfolio.id), Decimal::ZERO);
    }

    #[tokio::test]
    async fn broker_fill_report_opens_position_and_settles_cash() {
        let (mut portfolio, mut manager, ledger, _gateway) = broker_setup(dec!(10000));
        let rec = recommendation("AAPL", dec!(10));
        let now = Utc::now();
        let position_id = manager
            .open(&mut portfolio, &rec, trade_date(), now)
            .await
            .expect("open");

        let order_id = manager.book().active_order_ids()[0];
        let client_order_id = manager
            .book()
            .order(order_id)
            .expect("order")
            .client_order_id
            .clone();

        let report = OrderStatusReport {
            client_order_id,
            status: GatewayOrderStatus::Filled,
            filled_quantity: dec!(10),
            avg_fill_price: Some(dec!(100.10)),
            commission: dec!(0.05),
            message: None,
        };
        let outcome = manager
            .apply_fill_report(&mut portfolio, order_id, &report, now)
            .await
            .expect("apply");
        assert_eq!(outcome, FillOutcome::Opened);

        let position = manager.book().position(position_id).expect("in book");
        assert_eq!(position.status, PositionStatus::Open);
        assert_eq!(position.entry_price, dec!(100.10));
        assert_eq!(ledger.transaction_count(portfolio.id), 1);
        assert_eq!(ledger.reserved_total(portfolio.id), Decimal::ZERO);
        // 10000 - 10*100.10 - 0.05
        assert_eq!(portfolio.cash_balance, dec!(8998.95));

        // Idempotence: same report again changes nothing.
        let report = OrderStatusReport {
            client_order_id: String::new(),
            status: GatewayOrderStatus::Filled,
            filled_quantity: dec!(10),
            avg_fill_price: Some(dec!(100.10)),
            commission: dec!(0.05),
            message: None,
        };
        let outcome = manager
            .apply_fill_report(&mut portfolio, order_id, &report, now)
            .await
            .expect("re-apply");
        assert_eq!(outcome, FillOutcome::NoChange);
        assert_eq!(ledger.transaction_count(portfolio.id), 1);
    }

    #[tokio::test]
    async fn partial_fills_accumulate_without_ledger_mutation() {
        let (mut portfolio, mut manager, ledger, _gateway) = broker_setup(dec!(10000));
        let rec = recommendation("AAPL", dec!(10));
        let now = Utc::now();
        manager
            .open(&mut portfolio, &rec, trade_date(), now)
            .await
            .expect("open");
        let order_id = manager.book().active_order_ids()[0];

        let report = OrderStatusReport {
            client_order_id: String::new(),
            status: GatewayOrderStatus::PartiallyFilled,
            filled_quantity: dec!(4),
            avg_fill_price: Some(dec!(100.00)),
            commission: dec!(0.02),
            message: None,
        };
        let outcome = manager
            .apply_fill_report(&mut portfolio, order_id, &report, now)
            .await
            .expect("apply");
        assert_eq!(outcome, FillOutcome::Partial);
        assert_eq!(ledger.transaction_count(portfolio.id), 0);

        let order = manager.book().order(order_id).expect("order");
        assert_eq!(order.status, OrderStatus::PartiallyFilled);
        assert_eq!(order.filled_quantity, dec!(4));
    }

    #[tokio::test]
    async fn cancelled_entry_with_partial_fill_opens_reduced_position() {
        let (mut portfolio, mut manager, ledger, _gateway) = broker_setup(dec!(10000));
        let rec = recommendation("AAPL", dec!(10));
        let now = Utc::now();
        let position_id = manager
            .open(&mut portfolio, &rec, trade_date(), now)
            .await
            .expect("open");
        let order_id = manager.book().active_order_ids()[0];

        let partial = OrderStatusReport {
            client_order_id: String::new(),
            status: GatewayOrderStatus::PartiallyFilled,
            filled_quantity: dec!(4),
            avg_fill_price: Some(dec!(100.00)),
            commission: dec!(0.02),
            message: None,
        };
        manager
            .apply_fill_report(&mut portfolio, order_id, &partial, now)
            .await
            .expect("partial");

        let cancelled = OrderStatusReport {
            client_order_id: String::new(),
            status: GatewayOrderStatus::Cancelled,
            filled_quantity: dec!(4),
            avg_fill_price: Some(dec!(100.00)),
            commission: dec!(0.02),
            message: Some("day order expired".to_string()),
        };
        let outcome = manager
            .apply_fill_report(&mut portfolio, order_id, &cancelled, now)
            .await
            .expect("cancel");
        assert_eq!(outcome, FillOutcome::Cancelled);

        let position = manager.book().position(position_id).expect("in book");
        assert_eq!(position.status, PositionStatus::Open);
        assert_eq!(position.shares, dec!(4));
        assert_eq!(ledger.transaction_count(portfolio.id), 1);
    }

    #[tokio::test]
    async fn rejected_exit_reverts_position_to_open() {
        let (mut portfolio, mut manager, _ledger, gateway) = broker_setup(dec!(10000));
        let rec = recommendation("AAPL", dec!(10));
        let now = Utc::now();
        let position_id = manager
            .open(&mut portfolio, &rec, trade_date(), now)
            .await
            .expect("open");

        // Fill the entry.
        let order_id = manager.book().active_order_ids()[0];
        let fill = OrderStatusReport {
            client_order_id: String::new(),
            status: GatewayOrderStatus::Filled,
            filled_quantity: dec!(10),
            avg_fill_price: Some(dec!(100)),
            commission: dec!(0.035),
            message: None,
        };
        manager
            .apply_fill_report(&mut portfolio, order_id, &fill, now)
            .await
            .expect("fill");

        // Exit submission rejected.
        gateway.script("AAPL", FillScript::RejectOnSubmit {
            reason: "halted".to_string(),
        });
        let err = manager
            .close(&mut portfolio, position_id, ExitReason::Stop, dec!(96), now)
            .await
            .expect_err("rejected");
        assert!(matches!(err, EngineError::BrokerRejected { .. }));

        let position = manager.book().position(position_id).expect("in book");
        assert_eq!(position.status, PositionStatus::Open);
    }

    #[tokio::test]
    async fn stale_entry_order_is_cancelled_and_reservation_released() {
        let (mut portfolio, mut manager, ledger, gateway) = broker_setup(dec!(10000));
        let rec = recommendation("AAPL", dec!(10));
        let now = Utc::now();
        let position_id = manager
            .open(&mut portfolio, &rec, trade_date(), now)
            .await
            .expect("open");
        let order_id = manager.book().active_order_ids()[0];

        manager
            .cancel_stale_order(&mut portfolio, order_id, now)
            .await
            .expect("cancel");

        let position = manager.book().position(position_id).expect("in book");
        assert_eq!(position.status, PositionStatus::Cancelled);
        assert_eq!(ledger.reserved_total(portfolio.id), Decimal::ZERO);
        assert_eq!(gateway.cancelled().len(), 1);
        assert!(manager.book().active_order_ids().is_empty());
    }

    #[tokio::test]
    async fn close_all_sweeps_open_positions() {
        let (mut portfolio, mut manager, _ledger) = simulated_setup(dec!(100000));
        let now = Utc::now();
        for symbol in ["AAPL", "MSFT"] {
            let rec = recommendation(symbol, dec!(10));
            manager
                .open(&mut portfolio, &rec, trade_date(), now)
                .await
                .expect("open");
        }

        let mut prices = HashMap::new();
        prices.insert("AAPL".to_string(), dec!(101));
        // MSFT price missing: falls back to entry price.

        let report = manager.close_all(&mut portfolio, &prices, now).await;
        assert_eq!(report.attempted, 2);
        assert_eq!(report.initiated, 2);
        assert!(report.failures.is_empty());

        for position in manager.book().positions() {
            assert_eq!(position.status, PositionStatus::Closed);
            assert_eq!(position.exit_reason, Some(ExitReason::EndOfDay));
        }
    }
}
