//! Day-by-day replay engine.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::debug;

use super::metrics::summarize;
use super::types::{BacktestConfig, BacktestRun, EquityPoint, TradeRecord};
use crate::domain::{ExitReason, Portfolio, PredictionInput, Recommendation};
use crate::ports::market_data::Bar;
use crate::sizing::build_recommendations;

/// Fetch daily bars for a set of symbols through the market data port,
/// keyed the way `BacktestRunner::run` expects them.
///
/// # Errors
///
/// Returns the first `MarketDataError` encountered; a backtest over
/// partial data is worse than no backtest.
pub async fn load_bars<M: crate::ports::market_data::MarketData>(
    market: &M,
    symbols: &[String],
    start_date: NaiveDate,
    end_date: NaiveDate,
) -> Result<HashMap<String, BTreeMap<NaiveDate, Bar>>, crate::ports::market_data::MarketDataError> {
    let mut bars = HashMap::new();
    for symbol in symbols {
        let series = market.historical_bars(symbol, start_date, end_date).await?;
        bars.insert(
            symbol.clone(),
            series.into_iter().map(|bar| (bar.date, bar)).collect(),
        );
    }
    Ok(bars)
}

/// Replays the live sizing and exit logic against historical bars.
#[derive(Debug)]
pub struct BacktestRunner {
    config: BacktestConfig,
}

impl BacktestRunner {
    /// Create a runner.
    #[must_use]
    pub const fn new(config: BacktestConfig) -> Self {
        Self { config }
    }

    /// Run the backtest over an inclusive date range.
    ///
    /// `predictions` maps each session date to that day's raw model
    /// output; `bars` maps symbol to its daily bars. Days outside the
    /// range are ignored. Deterministic: identical inputs produce an
    /// identical `BacktestRun`.
    #[must_use]
    pub fn run(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
        predictions: &BTreeMap<NaiveDate, Vec<PredictionInput>>,
        bars: &HashMap<String, BTreeMap<NaiveDate, Bar>>,
    ) -> BacktestRun {
        let mut cash = self.config.starting_capital;
        let mut trades: Vec<TradeRecord> = Vec::new();
        let mut equity_curve: Vec<EquityPoint> = Vec::new();

        for (date, day_predictions) in predictions.range(start_date..=end_date) {
            // Same sizing path as the live open phase. Positions never
            // survive the day, so nothing is held coming in.
            let portfolio = Portfolio::new("backtest", cash, self.config.settings.clone());
            let recommendations =
                build_recommendations(&portfolio, &BTreeSet::new(), day_predictions);

            for recommendation in &recommendations {
                let Some(bar) = bars
                    .get(&recommendation.symbol)
                    .and_then(|series| series.get(date))
                else {
                    debug!(
                        symbol = %recommendation.symbol,
                        date = %date,
                        "no bar for recommendation, skipping trade"
                    );
                    continue;
                };

                if let Some(trade) = self.simulate_trade(*date, recommendation, bar, cash) {
                    cash += trade.pnl;
                    trades.push(trade);
                }
            }

            equity_curve.push(EquityPoint {
                date: *date,
                total_value: cash,
            });
        }

        let summary = summarize(self.config.starting_capital, cash, &equity_curve, &trades);
        BacktestRun {
            start_date,
            end_date,
            starting_capital: self.config.starting_capital,
            ending_capital: cash,
            trades,
            equity_curve,
            summary,
        }
    }

    /// Simulate one trade: enter at the open plus slippage, exit from
    /// the day's bar with worst-case ordering.
    fn simulate_trade(
        &self,
        date: NaiveDate,
        recommendation: &Recommendation,
        bar: &Bar,
        cash: Decimal,
    ) -> Option<TradeRecord> {
        let slippage = self.config.slippage_fraction();
        let entry_price = bar.open * (Decimal::ONE + slippage);
        let entry_commission = self.config.commission_per_share * recommendation.shares;
        let entry_cost = entry_price * recommendation.shares + entry_commission;

        if entry_cost > cash {
            debug!(
                symbol = %recommendation.symbol,
                date = %date,
                "cannot afford entry at the open, skipping trade"
            );
            return None;
        }

        // Worst-case ordering: if the bar touched the stop, assume the
        // stop filled first even when the target was also touched.
        let (exit_price, exit_reason) = if bar.low <= recommendation.stop_price {
            (recommendation.stop_price, ExitReason::Stop)
        } else if bar.high >= recommendation.target_price {
            (recommendation.target_price, ExitReason::Target)
        } else {
            (bar.close * (Decimal::ONE - slippage), ExitReason::EndOfDay)
        };

        let exit_commission = self.config.commission_per_share * recommendation.shares;
        let commission = entry_commission + exit_commission;
        let pnl = (exit_price - entry_price) * recommendation.shares - commission;

        Some(TradeRecord {
            date,
            symbol: recommendation.symbol.clone(),
            rank: recommendation.rank,
            shares: recommendation.shares,
            entry_price,
            exit_price,
            exit_reason,
            commission,
            pnl,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PortfolioSettings;
    use rust_decimal_macros::dec;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, day).unwrap()
    }

    fn settings() -> PortfolioSettings {
        PortfolioSettings {
            max_position_fraction: Decimal::ONE,
            per_trade_risk_fraction: dec!(0.02),
            max_open_positions: 5,
            ..PortfolioSettings::default()
        }
    }

    fn prediction(symbol: &str, ret: f64) -> PredictionInput {
        PredictionInput {
            symbol: symbol.to_string(),
            predicted_return: ret,
            volatility: Some(0.02),
            atr: Some(dec!(1.5)),
            entry_price: Some(dec!(100)),
        }
    }

    fn bar(day: u32, open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Bar {
        Bar {
            date: date(day),
            open,
            high,
            low,
            close,
            volume: 1_000_000,
        }
    }

    fn runner() -> BacktestRunner {
        BacktestRunner::new(BacktestConfig::new(dec!(10000), settings()))
    }

    fn inputs(
        days: &[(u32, Vec<PredictionInput>)],
        bar_data: &[(&str, Vec<Bar>)],
    ) -> (
        BTreeMap<NaiveDate, Vec<PredictionInput>>,
        HashMap<String, BTreeMap<NaiveDate, Bar>>,
    ) {
        let predictions = days
            .iter()
            .map(|(d, preds)| (date(*d), preds.clone()))
            .collect();
        let bars = bar_data
            .iter()
            .map(|(symbol, series)| {
                (
                    (*symbol).to_string(),
                    series.iter().map(|b| (b.date, *b)).collect(),
                )
            })
            .collect();
        (predictions, bars)
    }

    #[test]
    fn stop_wins_when_bar_touches_both_boundaries() {
        // Sizing: stop $97, target >= $104.50. The bar's low (95) is
        // below the stop and the high (106) above the target; worst-case
        // ordering exits at the stop.
        let (predictions, bars) = inputs(
            &[(2, vec![prediction("SYM", 0.01)])],
            &[("SYM", vec![bar(2, dec!(100), dec!(106), dec!(95), dec!(103))])],
        );

        let run = runner().run(date(2), date(2), &predictions, &bars);
        assert_eq!(run.trades.len(), 1);
        let trade = &run.trades[0];
        assert_eq!(trade.exit_reason, ExitReason::Stop);
        assert_eq!(trade.exit_price, dec!(97.00));
    }

    #[test]
    fn target_exit_when_stop_untouched() {
        let (predictions, bars) = inputs(
            &[(2, vec![prediction("SYM", 0.01)])],
            &[("SYM", vec![bar(2, dec!(100), dec!(106), dec!(99), dec!(103))])],
        );

        let run = runner().run(date(2), date(2), &predictions, &bars);
        assert_eq!(run.trades[0].exit_reason, ExitReason::Target);
        assert!(run.trades[0].pnl > Decimal::ZERO);
    }

    #[test]
    fn end_of_day_exit_when_neither_touched() {
        let (predictions, bars) = inputs(
            &[(2, vec![prediction("SYM", 0.01)])],
            &[("SYM", vec![bar(2, dec!(100), dec!(102), dec!(99), dec!(101))])],
        );

        let run = runner().run(date(2), date(2), &predictions, &bars);
        let trade = &run.trades[0];
        assert_eq!(trade.exit_reason, ExitReason::EndOfDay);
        // Exit at close minus slippage.
        assert_eq!(trade.exit_price, dec!(101) * dec!(0.9995));
    }

    #[test]
    fn equity_curve_has_one_point_per_day() {
        let (predictions, bars) = inputs(
            &[
                (2, vec![prediction("SYM", 0.01)]),
                (3, vec![prediction("SYM", 0.01)]),
                (4, vec![]),
            ],
            &[(
                "SYM",
                vec![
                    bar(2, dec!(100), dec!(102), dec!(99), dec!(101)),
                    bar(3, dec!(101), dec!(103), dec!(100), dec!(102)),
                ],
            )],
        );

        let run = runner().run(date(2), date(4), &predictions, &bars);
        assert_eq!(run.equity_curve.len(), 3);
        // Day with no predictions carries equity forward unchanged.
        assert_eq!(
            run.equity_curve[2].total_value,
            run.equity_curve[1].total_value
        );
    }

    #[test]
    fn missing_bar_skips_the_trade() {
        let (predictions, bars) = inputs(&[(2, vec![prediction("SYM", 0.01)])], &[]);

        let run = runner().run(date(2), date(2), &predictions, &bars);
        assert!(run.trades.is_empty());
        assert_eq!(run.ending_capital, dec!(10000));
    }

    #[test]
    fn dates_outside_range_are_ignored() {
        let (predictions, bars) = inputs(
            &[
                (2, vec![prediction("SYM", 0.01)]),
                (9, vec![prediction("SYM", 0.01)]),
            ],
            &[(
                "SYM",
                vec![
                    bar(2, dec!(100), dec!(102), dec!(99), dec!(101)),
                    bar(9, dec!(100), dec!(102), dec!(99), dec!(101)),
                ],
            )],
        );

        let run = runner().run(date(1), date(5), &predictions, &bars);
        assert_eq!(run.trades.len(), 1);
        assert_eq!(run.equity_curve.len(), 1);
    }

    #[test]
    fn run_is_deterministic_byte_for_byte() {
        let (predictions, bars) = inputs(
            &[
                (2, vec![prediction("AAA", 0.012), prediction("BBB", 0.008)]),
                (3, vec![prediction("AAA", 0.015)]),
            ],
            &[
                (
                    "AAA",
                    vec![
                        bar(2, dec!(100), dec!(105), dec!(98), dec!(103)),
                        bar(3, dec!(103), dec!(104), dec!(96), dec!(97)),
                    ],
                ),
                ("BBB", vec![bar(2, dec!(100), dec!(101), dec!(99), dec!(100.5))]),
            ],
        );

        let runner = runner();
        let first = runner.run(date(2), date(3), &predictions, &bars);
        let second = runner.run(date(2), date(3), &predictions, &bars);

        let first_json = serde_json::to_string(&first).expect("serialize");
        let second_json = serde_json::to_string(&second).expect("serialize");
        assert_eq!(first_json, second_json);
    }

    #[tokio::test]
    async fn load_bars_keys_series_by_date() {
        use crate::infrastructure::StaticMarketData;

        let market = StaticMarketData::new();
        market.set_bars(
            "SYM",
            vec![
                bar(2, dec!(100), dec!(102), dec!(99), dec!(101)),
                bar(3, dec!(101), dec!(103), dec!(100), dec!(102)),
            ],
        );

        let bars = load_bars(&market, &["SYM".to_string()], date(2), date(3))
            .await
            .expect("load");
        assert_eq!(bars["SYM"].len(), 2);
        assert!(bars["SYM"].contains_key(&date(3)));
    }

    #[test]
    fn losses_reduce_capital_and_drawdown_is_recorded() {
        // Gap down through the stop: exit at the stop for a loss.
        let (predictions, bars) = inputs(
            &[(2, vec![prediction("SYM", 0.01)])],
            &[("SYM", vec![bar(2, dec!(100), dec!(100), dec!(90), dec!(91))])],
        );

        let run = runner().run(date(2), date(2), &predictions, &bars);
        assert!(run.ending_capital < dec!(10000));
        assert_eq!(run.summary.win_rate, Decimal::ZERO);
        assert!(run.summary.max_drawdown > Decimal::ZERO);
        assert_eq!(run.summary.trade_count, 1);
    }
}
