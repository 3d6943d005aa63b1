//! Performance metric calculations over equity curves and trade logs.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use super::types::{BacktestSummary, EquityPoint, TradeRecord};

/// Trading days per year, for annualization.
const TRADING_DAYS: u32 = 252;

/// Convergence tolerance for the decimal square root.
const TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 12);

const TWO: Decimal = Decimal::from_parts(2, 0, 0, false, 0);

/// Mean of a slice of decimals.
#[must_use]
pub fn mean(values: &[Decimal]) -> Option<Decimal> {
    if values.is_empty() {
        return None;
    }
    let sum: Decimal = values.iter().sum();
    Some(sum / Decimal::from(values.len() as u64))
}

/// Sample standard deviation of a slice of decimals.
#[must_use]
pub fn std_dev(values: &[Decimal]) -> Option<Decimal> {
    if values.len() < 2 {
        return None;
    }
    let avg = mean(values)?;
    let variance_sum: Decimal = values.iter().map(|v| (*v - avg) * (*v - avg)).sum();
    let variance = variance_sum / Decimal::from((values.len() - 1) as u64);
    sqrt_decimal(variance)
}

/// Approximate square root using Newton's method.
#[must_use]
pub fn sqrt_decimal(value: Decimal) -> Option<Decimal> {
    if value < Decimal::ZERO {
        return None;
    }
    if value == Decimal::ZERO {
        return Some(Decimal::ZERO);
    }

    let mut guess = value / TWO;
    if guess == Decimal::ZERO {
        guess = value;
    }
    for _ in 0..50 {
        let next = (guess + value / guess) / TWO;
        if (next - guess).abs() < TOLERANCE {
            return Some(next);
        }
        guess = next;
    }
    Some(guess)
}

/// Largest peak-to-trough decline of an equity curve, as a fraction of
/// the peak. `initial_equity` seeds the first peak so a decline on the
/// very first session still registers.
#[must_use]
pub fn max_drawdown(initial_equity: Decimal, curve: &[EquityPoint]) -> Decimal {
    let mut peak = initial_equity.max(Decimal::ZERO);
    let mut worst = Decimal::ZERO;
    for point in curve {
        if point.total_value > peak {
            peak = point.total_value;
        }
        if peak > Decimal::ZERO {
            let drawdown = (peak - point.total_value) / peak;
            if drawdown > worst {
                worst = drawdown;
            }
        }
    }
    worst
}

/// Compute summary metrics for a completed run.
#[must_use]
pub fn summarize(
    starting_capital: Decimal,
    ending_capital: Decimal,
    curve: &[EquityPoint],
    trades: &[TradeRecord],
) -> BacktestSummary {
    let total_return = if starting_capital > Decimal::ZERO {
        (ending_capital - starting_capital) / starting_capital
    } else {
        Decimal::ZERO
    };

    let annualized_return = annualize(total_return, curve.len());

    let daily_returns: Vec<Decimal> = curve
        .windows(2)
        .filter(|w| w[0].total_value > Decimal::ZERO)
        .map(|w| (w[1].total_value - w[0].total_value) / w[0].total_value)
        .collect();

    let sharpe = match (mean(&daily_returns), std_dev(&daily_returns)) {
        (Some(avg), Some(sd)) if sd > Decimal::ZERO => {
            let annualization =
                sqrt_decimal(Decimal::from(TRADING_DAYS)).unwrap_or(Decimal::ZERO);
            avg / sd * annualization
        }
        _ => Decimal::ZERO,
    };

    let wins = trades.iter().filter(|t| t.pnl > Decimal::ZERO).count();
    let win_rate = if trades.is_empty() {
        Decimal::ZERO
    } else {
        Decimal::from(wins as u64) / Decimal::from(trades.len() as u64)
    };

    BacktestSummary {
        total_return,
        annualized_return,
        max_drawdown: max_drawdown(starting_capital, curve),
        sharpe,
        win_rate,
        trade_count: trades.len() as u64,
    }
}

/// `(1 + total_return)^(252 / days) - 1`, computed through f64 since the
/// exponent is fractional.
fn annualize(total_return: Decimal, days: usize) -> Decimal {
    if days == 0 {
        return Decimal::ZERO;
    }
    let growth = match (Decimal::ONE + total_return).to_f64() {
        Some(value) if value > 0.0 => value,
        _ => return Decimal::ZERO,
    };
    let exponent = f64::from(TRADING_DAYS) / days as f64;
    let annualized = growth.powf(exponent) - 1.0;
    Decimal::from_f64_retain(annualized).unwrap_or(Decimal::ZERO)
}
