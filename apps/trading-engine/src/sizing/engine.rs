//! Core recommendation building: stops, targets, confidence, and sizing.

use std::collections::BTreeSet;

use rust_decimal::{Decimal, RoundingStrategy};
use tracing::warn;

use crate::domain::{Portfolio, PredictionInput, Recommendation};

/// Stop distance floor: never place a stop closer than 1% to entry.
const MIN_STOP_FRACTION: Decimal = Decimal::from_parts(1, 0, 0, false, 2); // 0.01

/// Stops sit two ATRs below entry.
const ATR_STOP_MULTIPLIER: Decimal = Decimal::from_parts(2, 0, 0, false, 0);

/// Default ATR when the predictor supplies none: 1.5% of entry.
const DEFAULT_ATR_FRACTION: Decimal = Decimal::from_parts(15, 0, 0, false, 3); // 0.015

/// Minimum reward:risk multiple enforced on the target.
const MIN_RR_MULTIPLE: Decimal = Decimal::from_parts(15, 0, 0, false, 1); // 1.5

/// Targets stretch to 120% of the predicted move when that beats the floor.
const PREDICTION_TARGET_MULTIPLIER: Decimal = Decimal::from_parts(12, 0, 0, false, 1); // 1.2

/// Sigmoid sensitivity for the confidence score.
const SIGMOID_SENSITIVITY: f64 = 5.0;

/// Volatility floor avoiding division blowups.
const MIN_VOLATILITY: f64 = 1e-6;

/// Linear fallback scale when volatility is unknown.
const FALLBACK_CONFIDENCE_SCALE: f64 = 5000.0;

/// Decimal places kept for fractional share counts.
const FRACTIONAL_SHARE_DP: u32 = 4;

/// Compute stop and target prices for an entry.
///
/// Stop distance is `max(1%, 2 * ATR / entry)` with a 1.5%-of-entry
/// default ATR; target distance is `max(1.5 * stop_distance,
/// 1.2 * |predicted_return|)`, which enforces a minimum 1.5:1
/// reward:risk ratio by construction.
#[must_use]
pub fn stop_target_prices(
    entry_price: Decimal,
    atr: Option<Decimal>,
    predicted_return: Decimal,
) -> (Decimal, Decimal, Decimal) {
    let atr = atr
        .filter(|a| *a > Decimal::ZERO)
        .unwrap_or(entry_price * DEFAULT_ATR_FRACTION);

    let stop_distance = (ATR_STOP_MULTIPLIER * atr / entry_price).max(MIN_STOP_FRACTION);
    let target_distance = (stop_distance * MIN_RR_MULTIPLE)
        .max(predicted_return.abs() * PREDICTION_TARGET_MULTIPLIER);

    let stop_price = entry_price * (Decimal::ONE - stop_distance);
    let target_price = entry_price * (Decimal::ONE + target_distance);

    (stop_price, target_price, stop_distance)
}

/// Confidence score in [0, 100] from a Sharpe-like ratio with sigmoid
/// scaling; 50 is neutral. Falls back to a bounded linear score centered
/// at 50 when volatility is unknown.
#[must_use]
pub fn confidence_score(predicted_return: f64, volatility: Option<f64>) -> f64 {
    match volatility {
        Some(vol) if vol.is_finite() && vol != 0.0 => {
            let sharpe_like = predicted_return / vol.max(MIN_VOLATILITY);
            100.0 / (1.0 + (-SIGMOID_SENSITIVITY * sharpe_like).exp())
        }
        _ => (50.0 + predicted_return * FALLBACK_CONFIDENCE_SCALE).clamp(0.0, 100.0),
    }
}

/// Build the session's ranked recommendations from raw predictions.
///
/// Pure and deterministic: no I/O, and ties are broken by predicted
/// return then symbol lexical order so the ranking is a total order.
/// The output order is the execution order.
///
/// `held_symbols` carries the symbols that already have an open or
/// pending position for the trade date; candidates for those symbols are
/// filtered out. Malformed predictions are dropped with a warning, never
/// an error.
#[must_use]
pub fn build_recommendations(
    portfolio: &Portfolio,
    held_symbols: &BTreeSet<String>,
    predictions: &[PredictionInput],
) -> Vec<Recommendation> {
    let cash = portfolio.cash_balance;
    let settings = &portfolio.settings;
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    let mut candidates: Vec<Recommendation> = Vec::new();

    for prediction in predictions {
        if !prediction.is_well_formed() {
            warn!(
                symbol = %prediction.symbol,
                "dropping malformed prediction (missing entry price or non-finite fields)"
            );
            continue;
        }
        if held_symbols.contains(&prediction.symbol) {
            continue;
        }
        if !seen.insert(prediction.symbol.as_str()) {
            continue;
        }

        // is_well_formed guarantees a positive entry price and finite return
        let Some(entry_price) = prediction.entry_price else {
            continue;
        };
        let Ok(predicted_return) = Decimal::try_from(prediction.predicted_return) else {
            warn!(
                symbol = %prediction.symbol,
                "dropping prediction with unrepresentable return"
            );
            continue;
        };

        let (stop_price, target_price, stop_distance) =
            stop_target_prices(entry_price, prediction.atr, predicted_return);

        let shares = size_position(cash, entry_price, stop_distance, settings);
        if shares <= Decimal::ZERO {
            continue;
        }

        let confidence = confidence_score(prediction.predicted_return, prediction.volatility);

        // rank is assigned after sorting
        match Recommendation::new(
            prediction.symbol.clone(),
            entry_price,
            prediction.predicted_return,
            confidence,
            stop_price,
            target_price,
            shares,
            0,
        ) {
            Ok(rec) => candidates.push(rec),
            Err(err) => {
                warn!(symbol = %prediction.symbol, error = %err, "dropping candidate");
            }
        }
    }

    candidates.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then(b.predicted_return.total_cmp(&a.predicted_return))
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
    candidates.truncate(settings.max_open_positions as usize);

    for (idx, rec) in candidates.iter_mut().enumerate() {
        rec.rank = idx as u32 + 1;
    }
    candidates
}

/// Risk-budget sizing with position-fraction and cash caps.
fn size_position(
    cash: Decimal,
    entry_price: Decimal,
    stop_distance: Decimal,
    settings: &crate::domain::PortfolioSettings,
) -> Decimal {
    if cash <= Decimal::ZERO || stop_distance <= Decimal::ZERO {
        return Decimal::ZERO;
    }

    let risk_budget = cash * settings.per_trade_risk_fraction;
    let raw_shares = risk_budget / (entry_price * stop_distance);

    let fraction_cap = settings.max_position_fraction * cash / entry_price;
    let cash_cap = cash / entry_price;
    let shares = raw_shares.min(fraction_cap).min(cash_cap);

    if settings.allow_fractional_shares {
        shares.round_dp_with_strategy(FRACTIONAL_SHARE_DP, RoundingStrategy::ToZero)
    } else {
        shares.floor()
    }
}
