//! Broker reconciliation loop.
//!
//! Polls every active order by its client order id (the idempotency key;
//! orders are never resubmitted), applies fills to the ledger and
//! position atomically through the lifecycle manager, and cancels orders
//! that exceed the staleness cutoff. Gateway transport failures mutate
//! nothing and are retried next tick, so running the pass twice with no
//! new broker events produces no ledger mutation.

mod report;
mod retry;

pub use report::ReconcileReport;
pub use retry::{BackoffCalculator, RetryPolicy};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::domain::Portfolio;
use crate::error::EngineError;
use crate::lifecycle::{FillOutcome, LifecycleManager};
use crate::ports::broker::{BrokerGateway, BrokerGatewayError, OrderStatusReport};
use crate::ports::ledger::Ledger;

/// Reconciliation pass runner for broker-mode portfolios.
#[derive(Debug)]
pub struct Reconciler {
    stale_cutoff: chrono::Duration,
    retry: RetryPolicy,
}

impl Reconciler {
    /// Build from engine config with the default retry policy.
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            stale_cutoff: config.stale_order_cutoff(),
            retry: RetryPolicy::default(),
        }
    }

    /// Build with a custom retry policy.
    #[must_use]
    pub fn with_retry(config: &EngineConfig, retry: RetryPolicy) -> Self {
        Self {
            stale_cutoff: config.stale_order_cutoff(),
            retry,
        }
    }

    /// Run one reconciliation pass over a portfolio's active orders.
    pub async fn reconcile<L, B>(
        &self,
        portfolio: &mut Portfolio,
        manager: &mut LifecycleManager<L, B>,
        now: DateTime<Utc>,
    ) -> ReconcileReport
    where
        L: Ledger,
        B: BrokerGateway,
    {
        let mut report = ReconcileReport::new(portfolio.id);

        for order_id in manager.book().active_order_ids() {
            let Some(order) = manager.book().order(order_id) else {
                continue;
            };
            let client_order_id = order.client_order_id.clone();
            let stale = order.is_stale(now, self.stale_cutoff);
            report.checked += 1;

            if stale {
                match manager.cancel_stale_order(portfolio, order_id, now).await {
                    Ok(()) => report.cancelled += 1,
                    Err(err) => {
                        warn!(
                            client_order_id = %client_order_id,
                            error = %err,
                            "stale cancel failed, will retry next tick"
                        );
                        report.errors.push(format!("{client_order_id}: {err}"));
                    }
                }
                continue;
            }

            let snapshot = match self.lookup_with_retry(manager, &client_order_id).await {
                Ok(snapshot) => snapshot,
                Err(BrokerGatewayError::OrderNotFound { .. }) => {
                    // Submission may not have landed yet; the staleness
                    // cutoff bounds how long we wait for it to appear.
                    debug!(
                        client_order_id = %client_order_id,
                        "order not yet visible at gateway"
                    );
                    continue;
                }
                Err(err) => {
                    warn!(
                        client_order_id = %client_order_id,
                        error = %err,
                        "status lookup failed, no state change"
                    );
                    report.errors.push(format!("{client_order_id}: {err}"));
                    continue;
                }
            };

            match manager
                .apply_fill_report(portfolio, order_id, &snapshot, now)
                .await
            {
                Ok(FillOutcome::Opened | FillOutcome::Closed) => report.filled += 1,
                Ok(FillOutcome::Partial) => report.partially_filled += 1,
                Ok(FillOutcome::Cancelled) => report.cancelled += 1,
                Ok(FillOutcome::Rejected) => report.rejected += 1,
                Ok(FillOutcome::NoChange) => {}
                Err(err) => {
                    if matches!(err, EngineError::InvariantViolation { .. }) {
                        tracing::error!(
                            client_order_id = %client_order_id,
                            error = %err,
                            "invariant violation while applying fill"
                        );
                    }
                    report.errors.push(format!("{client_order_id}: {err}"));
                }
            }
        }

        report
    }

    /// Status lookup with bounded retries on transient failures.
    async fn lookup_with_retry<L, B>(
        &self,
        manager: &LifecycleManager<L, B>,
        client_order_id: &str,
    ) -> Result<OrderStatusReport, BrokerGatewayError>
    where
        L: Ledger,
        B: BrokerGateway,
    {
        let mut backoff = BackoffCalculator::new(&self.retry);
        loop {
            match manager.gateway_order_status(client_order_id).await {
                Ok(snapshot) => return Ok(snapshot),
                Err(err) if err.is_transient() => match backoff.next_backoff() {
                    Some(delay) => tokio::time::sleep(delay).await,
                    None => return Err(err),
                },
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use crate::domain::{
        ExecutionMode, ExitReason, PortfolioSettings, PositionStatus, Recommendation,
    };
    use crate::infrastructure::{FillScript, InMemoryLedger, MockBrokerGateway};
    use crate::lifecycle::CommissionSchedule;

    fn engine_config() -> EngineConfig {
        EngineConfig::default()
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            backoff_multiplier: 1.0,
            jitter_factor: 0.0,
        }
    }

    struct Fixture {
        portfolio: Portfolio,
        manager: LifecycleManager<InMemoryLedger, MockBrokerGateway>,
        ledger: Arc<InMemoryLedger>,
        gateway: Arc<MockBrokerGateway>,
        reconciler: Reconciler,
    }

    fn fixture(cash: Decimal) -> Fixture {
        let ledger = Arc::new(InMemoryLedger::new());
        let gateway = Arc::new(MockBrokerGateway::new());
        let portfolio = Portfolio::new("test", cash, PortfolioSettings::default());
        ledger.open_account(portfolio.id, cash);
        let manager = LifecycleManager::new(
            Arc::clone(&ledger),
            Some(Arc::clone(&gateway)),
            ExecutionMode::Broker,
            dec!(0.0005),
            CommissionSchedule::default(),
            Duration::from_secs(5),
        )
        .expect("manager");
        let reconciler = Reconciler::with_retry(&engine_config(), fast_retry());
        Fixture {
            portfolio,
            manager,
            ledger,
            gateway,
            reconciler,
        }
    }

    fn recommendation(symbol: &str) -> Recommendation {
        Recommendation::new(symbol, dec!(100), 0.01, 60.0, dec!(97), dec!(105), dec!(10), 1)
            .expect("valid recommendation")
    }

    #[tokio::test]
    async fn fill_advances_position_and_settles_once() {
        let mut fx = fixture(dec!(10000));
        fx.gateway.script(
            "AAPL",
            FillScript::FillAt {
                price: dec!(100.10),
                commission: dec!(0.04),
            },
        );
        let now = Utc::now();
        let position_id = fx
            .manager
            .open(&mut fx.portfolio, &recommendation("AAPL"), now.date_naive(), now)
            .await
            .expect("open");

        let report = fx
            .reconciler
            .reconcile(&mut fx.portfolio, &mut fx.manager, now)
            .await;
        assert_eq!(report.checked, 1);
        assert_eq!(report.filled, 1);
        assert!(report.is_clean());

        let position = fx.manager.book().position(position_id).expect("position");
        assert_eq!(position.status, PositionStatus::Open);
        assert_eq!(fx.ledger.transaction_count(fx.portfolio.id), 1);

        // Idempotence: nothing new at the broker, second pass mutates
        // nothing.
        let report = fx
            .reconciler
            .reconcile(&mut fx.portfolio, &mut fx.manager, now)
            .await;
        assert_eq!(report.checked, 0);
        assert_eq!(fx.ledger.transaction_count(fx.portfolio.id), 1);
    }

    #[tokio::test]
    async fn partial_fill_keeps_order_working() {
        let mut fx = fixture(dec!(10000));
        fx.gateway.script(
            "AAPL",
            FillScript::FillInTwo {
                first_quantity: dec!(4),
                price: dec!(100),
                commission: dec!(0.035),
            },
        );
        let now = Utc::now();
        let position_id = fx
            .manager
            .open(&mut fx.portfolio, &recommendation("AAPL"), now.date_naive(), now)
            .await
            .expect("open");

        let first = fx
            .reconciler
            .reconcile(&mut fx.portfolio, &mut fx.manager, now)
            .await;
        assert_eq!(first.partially_filled, 1);
        assert_eq!(fx.ledger.transaction_count(fx.portfolio.id), 0);
        assert_eq!(
            fx.manager.book().position(position_id).expect("position").status,
            PositionStatus::Pending
        );

        let second = fx
            .reconciler
            .reconcile(&mut fx.portfolio, &mut fx.manager, now)
            .await;
        assert_eq!(second.filled, 1);
        assert_eq!(fx.ledger.transaction_count(fx.portfolio.id), 1);
        assert_eq!(
            fx.manager.book().position(position_id).expect("position").status,
            PositionStatus::Open
        );
    }

    #[tokio::test]
    async fn transport_failure_changes_nothing() {
        let mut fx = fixture(dec!(10000));
        let now = Utc::now();
        fx.manager
            .open(&mut fx.portfolio, &recommendation("AAPL"), now.date_naive(), now)
            .await
            .expect("open");

        fx.gateway.set_transport_down(true);
        let report = fx
            .reconciler
            .reconcile(&mut fx.portfolio, &mut fx.manager, now)
            .await;
        assert_eq!(report.errors.len(), 1);
        assert_eq!(fx.ledger.transaction_count(fx.portfolio.id), 0);
        assert!(fx.ledger.reserved_total(fx.portfolio.id) > Decimal::ZERO);

        // Gateway recovers: next tick completes normally.
        fx.gateway.set_transport_down(false);
        fx.gateway.script(
            "AAPL",
            FillScript::FillAt {
                price: dec!(100),
                commission: dec!(0.035),
            },
        );
        let report = fx
            .reconciler
            .reconcile(&mut fx.portfolio, &mut fx.manager, now)
            .await;
        assert_eq!(report.filled, 1);
    }

    #[tokio::test]
    async fn rejection_cancels_position_and_releases_cash() {
        let mut fx = fixture(dec!(10000));
        fx.gateway.script(
            "AAPL",
            FillScript::RejectOnPoll {
                reason: "insufficient margin".to_string(),
            },
        );
        let now = Utc::now();
        let position_id = fx
            .manager
            .open(&mut fx.portfolio, &recommendation("AAPL"), now.date_naive(), now)
            .await
            .expect("open");

        let report = fx
            .reconciler
            .reconcile(&mut fx.portfolio, &mut fx.manager, now)
            .await;
        assert_eq!(report.rejected, 1);

        let position = fx.manager.book().position(position_id).expect("position");
        assert_eq!(position.status, PositionStatus::Cancelled);
        assert_eq!(fx.ledger.reserved_total(fx.portfolio.id), Decimal::ZERO);
    }

    #[tokio::test]
    async fn stale_order_is_cancelled_after_timeout() {
        let mut fx = fixture(dec!(10000));
        let now = Utc::now();
        let position_id = fx
            .manager
            .open(&mut fx.portfolio, &recommendation("AAPL"), now.date_naive(), now)
            .await
            .expect("open");

        // Eleven minutes later with no fill, the order is stale.
        let later = now + chrono::Duration::minutes(11);
        let report = fx
            .reconciler
            .reconcile(&mut fx.portfolio, &mut fx.manager, later)
            .await;
        assert_eq!(report.cancelled, 1);

        let position = fx.manager.book().position(position_id).expect("position");
        assert_eq!(position.status, PositionStatus::Cancelled);
        assert_eq!(fx.gateway.cancelled().len(), 1);
        assert_eq!(fx.ledger.reserved_total(fx.portfolio.id), Decimal::ZERO);
    }

    #[tokio::test]
    async fn exit_fill_closes_position() {
        let mut fx = fixture(dec!(10000));
        fx.gateway.script(
            "AAPL",
            FillScript::FillAt {
                price: dec!(100),
                commission: dec!(0.035),
            },
        );
        let now = Utc::now();
        let position_id = fx
            .manager
            .open(&mut fx.portfolio, &recommendation("AAPL"), now.date_naive(), now)
            .await
            .expect("open");
        fx.reconciler
            .reconcile(&mut fx.portfolio, &mut fx.manager, now)
            .await;

        // Trigger the exit; the sell order fills on the next pass.
        fx.gateway.script(
            "AAPL",
            FillScript::FillAt {
                price: dec!(105),
                commission: dec!(0.035),
            },
        );
        fx.manager
            .close(&mut fx.portfolio, position_id, ExitReason::Target, dec!(105), now)
            .await
            .expect("close");
        assert_eq!(
            fx.manager.book().position(position_id).expect("position").status,
            PositionStatus::Closing
        );

        let report = fx
            .reconciler
            .reconcile(&mut fx.portfolio, &mut fx.manager, now)
            .await;
        assert_eq!(report.filled, 1);

        let position = fx.manager.book().position(position_id).expect("position");
        assert_eq!(position.status, PositionStatus::Closed);
        assert_eq!(position.exit_price, Some(dec!(105)));
        assert_eq!(position.exit_reason, Some(ExitReason::Target));
        assert_eq!(fx.ledger.transaction_count(fx.portfolio.id), 2);
    }
}
