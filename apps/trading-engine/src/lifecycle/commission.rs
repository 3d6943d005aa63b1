//! Tiered per-share commission model.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Per-share commission schedule tiered by rolling monthly volume.
///
/// | Monthly volume (shares) | USD per share |
/// |-------------------------|---------------|
/// | <= 300,000              | 0.0035        |
/// | <= 3,000,000            | 0.0020        |
/// | <= 20,000,000           | 0.0015        |
/// | <= 100,000,000          | 0.0010        |
/// | above                   | 0.0005        |
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CommissionSchedule {
    /// Rolling monthly share volume used for tier selection.
    monthly_volume: u64,
}

impl CommissionSchedule {
    /// Schedule at a given monthly volume tier.
    #[must_use]
    pub const fn with_monthly_volume(monthly_volume: u64) -> Self {
        Self { monthly_volume }
    }

    /// Commission per share at the current tier.
    #[must_use]
    pub const fn per_share(&self) -> Decimal {
        match self.monthly_volume {
            0..=300_000 => Decimal::from_parts(35, 0, 0, false, 4), // 0.0035
            300_001..=3_000_000 => Decimal::from_parts(20, 0, 0, false, 4), // 0.0020
            3_000_001..=20_000_000 => Decimal::from_parts(15, 0, 0, false, 4), // 0.0015
            20_000_001..=100_000_000 => Decimal::from_parts(10, 0, 0, false, 4), // 0.0010
            _ => Decimal::from_parts(5, 0, 0, false, 4),            // 0.0005
        }
    }

    /// Commission for a share count.
    #[must_use]
    pub fn for_shares(&self, shares: Decimal) -> Decimal {
        shares * self.per_share()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use test_case::test_case;

    #[test_case(0, dec!(0.0035); "tier one floor")]
    #[test_case(300_000, dec!(0.0035); "tier one ceiling")]
    #[test_case(300_001, dec!(0.0020); "tier two")]
    #[test_case(20_000_000, dec!(0.0015); "tier three ceiling")]
    #[test_case(100_000_000, dec!(0.0010); "tier four ceiling")]
    #[test_case(100_000_001, dec!(0.0005); "top tier")]
    fn per_share_tiers(volume: u64, expected: Decimal) {
        let schedule = CommissionSchedule::with_monthly_volume(volume);
        assert_eq!(schedule.per_share(), expected);
    }

    #[test]
    fn commission_for_shares() {
        let schedule = CommissionSchedule::default();
        assert_eq!(schedule.for_shares(dec!(100)), dec!(0.35));
    }
}
