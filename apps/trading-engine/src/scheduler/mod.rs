//! Session scheduler.
//!
//! Fires the three daily phases (open/monitor/close) and the broker
//! reconciliation poll on fixed cadences, independently per portfolio.
//! Portfolios run in their own tasks and never share mutable state;
//! within a portfolio, phases serialize on the runtime mutex because
//! they all mutate cash and position status. All phases are no-ops
//! while the market is closed.

mod report;

pub use report::{PhaseKind, PhaseReport, SymbolOutcome};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::EngineConfig;
use crate::domain::{ExecutionMode, ExitReason, Portfolio, PredictionInput, Recommendation};
use crate::error::EngineError;
use crate::lifecycle::{LifecycleManager, MonitorAction};
use crate::ports::broker::BrokerGateway;
use crate::ports::ledger::Ledger;
use crate::ports::market_data::MarketData;
use crate::ports::predictor::Predictor;
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::report::{health_check, session_summary};
use crate::sizing::build_recommendations;

/// One trading day's decision state for a portfolio.
#[derive(Debug)]
struct SessionState {
    trade_date: NaiveDate,
    /// The morning's ranked list, reused for intraday capital recycling.
    recommendations: Vec<Recommendation>,
    /// Indices of recommendations already turned into positions.
    consumed: HashSet<usize>,
    closed: bool,
}

/// A portfolio with its lifecycle manager and session state.
pub struct PortfolioRuntime<L, B> {
    /// The account being traded.
    pub portfolio: Portfolio,
    /// Lifecycle manager owning this portfolio's book.
    pub manager: LifecycleManager<L, B>,
    session: Option<SessionState>,
}

impl<L, B> PortfolioRuntime<L, B>
where
    L: Ledger,
    B: BrokerGateway,
{
    /// Bundle a portfolio with its manager, validating settings.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Validation` for invalid portfolio settings.
    pub fn new(
        portfolio: Portfolio,
        manager: LifecycleManager<L, B>,
    ) -> Result<Self, EngineError> {
        portfolio.settings.validate()?;
        Ok(Self {
            portfolio,
            manager,
            session: None,
        })
    }
}

/// Coordinates phase execution across portfolios.
pub struct SessionScheduler<P, M, L, B> {
    predictor: Arc<P>,
    market: Arc<M>,
    config: EngineConfig,
    reconciler: Reconciler,
    runtimes: Vec<Arc<Mutex<PortfolioRuntime<L, B>>>>,
}

impl<P, M, L, B> SessionScheduler<P, M, L, B>
where
    P: Predictor + 'static,
    M: MarketData + 'static,
    L: Ledger + 'static,
    B: BrokerGateway + 'static,
{
    /// Create a scheduler with no portfolios.
    #[must_use]
    pub fn new(predictor: Arc<P>, market: Arc<M>, config: EngineConfig) -> Self {
        let reconciler = Reconciler::new(&config);
        Self {
            predictor,
            market,
            config,
            reconciler,
            runtimes: Vec::new(),
        }
    }

    /// Register a portfolio runtime.
    pub fn add_portfolio(&mut self, runtime: PortfolioRuntime<L, B>) {
        self.runtimes.push(Arc::new(Mutex::new(runtime)));
    }

    /// Morning entry phase: build recommendations and open them in rank
    /// order until the position budget or cash runs out. Candidates that
    /// fail affordability are skipped, not fatal.
    pub async fn run_open_phase(
        &self,
        runtime: &mut PortfolioRuntime<L, B>,
        trade_date: NaiveDate,
        now: DateTime<Utc>,
    ) -> PhaseReport {
        let PortfolioRuntime {
            portfolio,
            manager,
            session,
        } = runtime;
        let mut report = PhaseReport::new(PhaseKind::Open, portfolio.id);

        match self.market_is_open(&portfolio.settings.exchange, now).await {
            Ok(true) => {}
            Ok(false) => {
                report.skip("portfolio", "market closed");
                return report;
            }
            Err(err) => {
                report.errors.push(err.to_string());
                return report;
            }
        }

        if manager.book().has_positions_for(trade_date) {
            report.skip("portfolio", "already executed today");
            // Re-arm the session so the close phase still fires after a
            // mid-day restart.
            if session.as_ref().is_none_or(|s| s.trade_date != trade_date) {
                *session = Some(SessionState {
                    trade_date,
                    recommendations: Vec::new(),
                    consumed: HashSet::new(),
                    closed: false,
                });
            }
            return report;
        }
        if portfolio.cash_balance <= rust_decimal::Decimal::ZERO {
            report.skip("portfolio", "no spendable cash");
            return report;
        }

        let predictions = self
            .gather_predictions(&portfolio.settings.watchlist, trade_date, &mut report)
            .await;
        let held = manager.book().held_symbols(trade_date);
        let recommendations = build_recommendations(portfolio, &held, &predictions);
        info!(
            portfolio_id = %portfolio.id,
            candidates = recommendations.len(),
            "open phase built recommendations"
        );

        let mut consumed = HashSet::new();
        let max_open = portfolio.settings.max_open_positions as usize;
        for (idx, recommendation) in recommendations.iter().enumerate() {
            if manager.book().active_position_count() >= max_open {
                break;
            }
            match manager.open(portfolio, recommendation, trade_date, now).await {
                Ok(position_id) => {
                    consumed.insert(idx);
                    report.executed += 1;
                    let outcome = match manager.book().position(position_id) {
                        Some(p) if p.status == crate::domain::PositionStatus::Open => "opened",
                        _ => "pending",
                    };
                    report.outcome(&recommendation.symbol, outcome);
                }
                Err(err) if err.is_skippable() => {
                    report.skip(&recommendation.symbol, err.to_string());
                }
                Err(err) if err.halts_phase() => {
                    error!(
                        portfolio_id = %portfolio.id,
                        error = %err,
                        "open phase halted by ledger failure"
                    );
                    report.errors.push(err.to_string());
                    report.halted = true;
                    break;
                }
                Err(err) => {
                    error!(symbol = %recommendation.symbol, error = %err, "open failed");
                    report.errors.push(format!("{}: {err}", recommendation.symbol));
                }
            }
        }

        *session = Some(SessionState {
            trade_date,
            recommendations,
            consumed,
            closed: false,
        });
        report
    }

    /// Intraday phase: evaluate every open position against a fresh
    /// quote, exit on stop/target, then recycle freed capital into the
    /// morning's remaining candidates.
    pub async fn run_monitor_phase(
        &self,
        runtime: &mut PortfolioRuntime<L, B>,
        now: DateTime<Utc>,
    ) -> PhaseReport {
        let PortfolioRuntime {
            portfolio,
            manager,
            session,
        } = runtime;
        let mut report = PhaseReport::new(PhaseKind::Monitor, portfolio.id);

        match self.market_is_open(&portfolio.settings.exchange, now).await {
            Ok(true) => {}
            Ok(false) => {
                report.skip("portfolio", "market closed");
                return report;
            }
            Err(err) => {
                report.errors.push(err.to_string());
                return report;
            }
        }

        for position_id in manager.book().open_position_ids() {
            let Some(position) = manager.book().position(position_id) else {
                continue;
            };
            let symbol = position.symbol.clone();

            let quote = match self.latest_price(&symbol).await {
                Ok(quote) => quote,
                Err(err) => {
                    warn!(symbol = %symbol, error = %err, "monitor price fetch failed");
                    report.errors.push(format!("{symbol}: {err}"));
                    continue;
                }
            };
            if quote.is_stale(now, self.config.quote_age_cutoff()) {
                report.skip(&symbol, "stale quote");
                continue;
            }

            let action = manager.evaluate(position, quote.price);
            let reason = match action {
                MonitorAction::None => {
                    report.outcome(&symbol, "held");
                    continue;
                }
                MonitorAction::CloseStop => ExitReason::Stop,
                MonitorAction::CloseTarget => ExitReason::Target,
            };

            match manager
                .close(portfolio, position_id, reason, quote.price, now)
                .await
            {
                Ok(()) => {
                    report.executed += 1;
                    report.outcome(&symbol, reason.to_string().to_lowercase());
                }
                Err(err) if err.halts_phase() => {
                    report.errors.push(format!("{symbol}: {err}"));
                    report.halted = true;
                    return report;
                }
                Err(err) => {
                    report.errors.push(format!("{symbol}: {err}"));
                }
            }
        }

        if let Some(session) = session.as_mut()
            && !session.closed
        {
            Self::recycle_candidates(portfolio, manager, session, &mut report, now).await;
        }
        report
    }

    /// Open the next unconsumed ranked candidates while freed capital
    /// and the position budget allow. Reuses the morning's list; no
    /// re-ranking against fresh predictions.
    async fn recycle_candidates(
        portfolio: &mut Portfolio,
        manager: &mut LifecycleManager<L, B>,
        session: &mut SessionState,
        report: &mut PhaseReport,
        now: DateTime<Utc>,
    ) {
        let max_open = portfolio.settings.max_open_positions as usize;

        for idx in 0..session.recommendations.len() {
            if session.consumed.contains(&idx) {
                continue;
            }
            if manager.book().active_position_count() >= max_open {
                break;
            }
            let recommendation = session.recommendations[idx].clone();
            if manager
                .book()
                .has_active_position(&recommendation.symbol, session.trade_date)
            {
                session.consumed.insert(idx);
                continue;
            }

            match manager
                .open(portfolio, &recommendation, session.trade_date, now)
                .await
            {
                Ok(_) => {
                    session.consumed.insert(idx);
                    report.executed += 1;
                    report.outcome(&recommendation.symbol, "recycled");
                    info!(
                        symbol = %recommendation.symbol,
                        rank = recommendation.rank,
                        "recycled freed capital into ranked candidate"
                    );
                }
                // Still unaffordable; retry on a later tick.
                Err(err) if err.is_skippable() => {}
                Err(err) => {
                    report.errors.push(format!("{}: {err}", recommendation.symbol));
                    if err.halts_phase() {
                        report.halted = true;
                        return;
                    }
                }
            }
        }
    }

    /// End-of-session phase: force-exit everything still open, then
    /// compute the session summary and run the health sweep.
    pub async fn run_close_phase(
        &self,
        runtime: &mut PortfolioRuntime<L, B>,
        now: DateTime<Utc>,
    ) -> PhaseReport {
        let PortfolioRuntime {
            portfolio,
            manager,
            session,
        } = runtime;
        let mut report = PhaseReport::new(PhaseKind::Close, portfolio.id);
        let trade_date = session
            .as_ref()
            .map_or_else(|| now.date_naive(), |s| s.trade_date);

        match self.market_is_open(&portfolio.settings.exchange, now).await {
            Ok(true) => {}
            Ok(false) => {
                report.skip("portfolio", "market closed");
                return report;
            }
            Err(err) => {
                report.errors.push(err.to_string());
                return report;
            }
        }

        let mut prices = HashMap::new();
        for position_id in manager.book().open_position_ids() {
            let Some(position) = manager.book().position(position_id) else {
                continue;
            };
            let symbol = position.symbol.clone();
            if prices.contains_key(&symbol) {
                continue;
            }
            match self.latest_price(&symbol).await {
                Ok(quote) => {
                    prices.insert(symbol, quote.price);
                }
                Err(err) => {
                    warn!(symbol = %symbol, error = %err, "close price fetch failed");
                    report.errors.push(format!("{symbol}: {err}"));
                }
            }
        }

        let sweep = manager.close_all(portfolio, &prices, now).await;
        report.executed = sweep.initiated;
        for (symbol, failure) in sweep.failures {
            report.errors.push(format!("{symbol}: {failure}"));
        }

        if let Some(session) = session.as_mut() {
            session.closed = true;
        }

        let summary = session_summary(portfolio, manager.book(), trade_date);
        info!(
            portfolio_id = %portfolio.id,
            trade_date = %trade_date,
            closed = summary.closed_positions,
            realized_pnl = %summary.realized_pnl,
            win_rate = %summary.win_rate,
            cash = %summary.cash_balance,
            "session closed"
        );
        // Nothing should remain open once the sweep has run.
        let health = health_check(manager.book(), false);
        if health.status == crate::report::HealthStatus::Warning {
            warn!(
                portfolio_id = %portfolio.id,
                findings = health.warnings.len(),
                "session health check raised warnings"
            );
        }
        report.summary = Some(summary);
        report
    }

    /// Broker reconciliation poll for one portfolio. A no-op for
    /// simulated portfolios.
    pub async fn run_reconciliation(
        &self,
        runtime: &mut PortfolioRuntime<L, B>,
        now: DateTime<Utc>,
    ) -> ReconcileReport {
        let PortfolioRuntime {
            portfolio, manager, ..
        } = runtime;
        if manager.mode() != ExecutionMode::Broker {
            return ReconcileReport::new(portfolio.id);
        }
        self.reconciler.reconcile(portfolio, manager, now).await
    }

    /// Run the scheduling loop until cancelled. Each portfolio gets its
    /// own task; one portfolio's failure never blocks another's.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut handles = Vec::new();
        for runtime in &self.runtimes {
            let scheduler = Arc::clone(&self);
            let runtime = Arc::clone(runtime);
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                scheduler.portfolio_loop(&runtime, shutdown).await;
            }));
        }
        for handle in handles {
            if let Err(err) = handle.await {
                error!(error = %err, "portfolio task panicked");
            }
        }
    }

    async fn portfolio_loop(
        &self,
        runtime: &Arc<Mutex<PortfolioRuntime<L, B>>>,
        shutdown: CancellationToken,
    ) {
        let mut session_tick = tokio::time::interval(Duration::from_secs(60));
        let mut monitor_tick = tokio::time::interval(self.config.monitor_interval);
        let mut reconcile_tick = tokio::time::interval(self.config.reconcile_interval);
        for tick in [&mut session_tick, &mut monitor_tick, &mut reconcile_tick] {
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        }

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!("portfolio loop shutting down");
                    break;
                }
                _ = session_tick.tick() => {
                    let now = Utc::now();
                    let trade_date = now.date_naive();
                    let mut rt = runtime.lock().await;

                    let needs_open = rt
                        .session
                        .as_ref()
                        .is_none_or(|s| s.trade_date != trade_date);
                    if needs_open && now.time() < self.config.close_phase_utc {
                        let report = self.run_open_phase(&mut rt, trade_date, now).await;
                        log_phase(&report);
                    }

                    let needs_close = rt
                        .session
                        .as_ref()
                        .is_some_and(|s| s.trade_date == trade_date && !s.closed);
                    if needs_close && now.time() >= self.config.close_phase_utc {
                        let report = self.run_close_phase(&mut rt, now).await;
                        log_phase(&report);
                    }
                }
                _ = monitor_tick.tick() => {
                    let mut rt = runtime.lock().await;
                    let report = self.run_monitor_phase(&mut rt, Utc::now()).await;
                    log_phase(&report);
                }
                _ = reconcile_tick.tick() => {
                    let mut rt = runtime.lock().await;
                    let report = self.run_reconciliation(&mut rt, Utc::now()).await;
                    if report.checked > 0 || !report.is_clean() {
                        info!(
                            portfolio_id = %report.portfolio_id,
                            checked = report.checked,
                            filled = report.filled,
                            cancelled = report.cancelled,
                            errors = report.errors.len(),
                            "reconciliation tick"
                        );
                    }
                }
            }
        }
    }

    async fn gather_predictions(
        &self,
        watchlist: &[String],
        trade_date: NaiveDate,
        report: &mut PhaseReport,
    ) -> Vec<PredictionInput> {
        let mut predictions = Vec::new();
        for symbol in watchlist {
            match tokio::time::timeout(
                self.config.call_timeout,
                self.predictor.predict(symbol, trade_date),
            )
            .await
            {
                Ok(Ok(Some(prediction))) => predictions.push(prediction),
                Ok(Ok(None)) => report.skip(symbol, "no prediction"),
                Ok(Err(err)) => {
                    warn!(symbol = %symbol, error = %err, "predictor failed");
                    report.errors.push(format!("{symbol}: {err}"));
                }
                Err(_) => {
                    warn!(symbol = %symbol, "predictor timed out");
                    report.errors.push(format!("{symbol}: predictor timed out"));
                }
            }
        }
        predictions
    }

    async fn market_is_open(
        &self,
        exchange: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, EngineError> {
        match tokio::time::timeout(
            self.config.call_timeout,
            self.market.is_market_open(exchange, now),
        )
        .await
        {
            Ok(result) => result.map_err(EngineError::from),
            Err(_) => Err(EngineError::MarketData(
                crate::ports::market_data::MarketDataError::Timeout,
            )),
        }
    }

    async fn latest_price(
        &self,
        symbol: &str,
    ) -> Result<crate::ports::market_data::Quote, EngineError> {
        match tokio::time::timeout(self.config.call_timeout, self.market.latest_price(symbol))
            .await
        {
            Ok(result) => result.map_err(EngineError::from),
            Err(_) => Err(EngineError::MarketData(
                crate::ports::market_data::MarketDataError::Timeout,
            )),
        }
    }
}

fn log_phase(report: &PhaseReport) {
    info!(
        portfolio_id = %report.portfolio_id,
        phase = ?report.phase,
        executed = report.executed,
        skipped = report.skipped.len(),
        errors = report.errors.len(),
        halted = report.halted,
        "phase complete"
    );
}
