//! Engine-level configuration.
//!
//! Per-portfolio risk settings live on `PortfolioSettings` and are passed
//! explicitly into each phase handler. What lives here is the deployment
//! surface of the engine itself: cadences, timeouts, and cost model
//! defaults, loaded from environment variables with documented fallbacks.
//!
//! # Environment Variables
//!
//! - `MONITOR_INTERVAL_SECS`: monitor phase cadence (default: 600)
//! - `RECONCILE_INTERVAL_SECS`: reconciliation cadence (default: 30)
//! - `STALE_ORDER_TIMEOUT_SECS`: order staleness cutoff (default: 600)
//! - `CALL_TIMEOUT_SECS`: per network call timeout (default: 10)
//! - `MAX_QUOTE_AGE_SECS`: quote staleness cutoff (default: 120)
//! - `SLIPPAGE_BPS`: simulated slippage in basis points (default: 5)
//! - `CLOSE_PHASE_UTC`: HH:MM close phase trigger time (default: 19:45)

use std::time::Duration;

use chrono::NaiveTime;
use rust_decimal::Decimal;

use crate::error::EngineError;

/// Deployment configuration for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Cadence of the monitor phase during market hours.
    pub monitor_interval: Duration,
    /// Cadence of the broker reconciliation poll.
    pub reconcile_interval: Duration,
    /// Age past which an unfilled order is cancelled.
    pub stale_order_timeout: Duration,
    /// Timeout applied to every external network call.
    pub call_timeout: Duration,
    /// Age past which a quote is considered stale and ignored.
    pub max_quote_age: Duration,
    /// Assumed adverse price movement on simulated fills, in basis points.
    pub slippage_bps: Decimal,
    /// Wall-clock UTC time at which the close phase fires.
    pub close_phase_utc: NaiveTime,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            monitor_interval: Duration::from_secs(600),
            reconcile_interval: Duration::from_secs(30),
            stale_order_timeout: Duration::from_secs(600),
            call_timeout: Duration::from_secs(10),
            max_quote_age: Duration::from_secs(120),
            slippage_bps: Decimal::new(5, 0),
            close_phase_utc: NaiveTime::from_hms_opt(19, 45, 0).unwrap_or_default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Validation` if a variable is set but
    /// unparseable, or if the resulting config fails validation.
    pub fn from_env() -> Result<Self, EngineError> {
        let mut config = Self::default();

        if let Some(secs) = read_u64("MONITOR_INTERVAL_SECS")? {
            config.monitor_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = read_u64("RECONCILE_INTERVAL_SECS")? {
            config.reconcile_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = read_u64("STALE_ORDER_TIMEOUT_SECS")? {
            config.stale_order_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = read_u64("CALL_TIMEOUT_SECS")? {
            config.call_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = read_u64("MAX_QUOTE_AGE_SECS")? {
            config.max_quote_age = Duration::from_secs(secs);
        }
        if let Ok(raw) = std::env::var("SLIPPAGE_BPS") {
            config.slippage_bps = raw.parse().map_err(|_| EngineError::Validation {
                message: format!("SLIPPAGE_BPS is not a decimal: {raw}"),
            })?;
        }
        if let Ok(raw) = std::env::var("CLOSE_PHASE_UTC") {
            config.close_phase_utc = NaiveTime::parse_from_str(&raw, "%H:%M").map_err(|_| {
                EngineError::Validation {
                    message: format!("CLOSE_PHASE_UTC is not HH:MM: {raw}"),
                }
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Validation` for zero cadences or negative
    /// slippage.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.monitor_interval.is_zero() || self.reconcile_interval.is_zero() {
            return Err(EngineError::Validation {
                message: "intervals must be non-zero".to_string(),
            });
        }
        if self.call_timeout.is_zero() {
            return Err(EngineError::Validation {
                message: "call timeout must be non-zero".to_string(),
            });
        }
        if self.slippage_bps < Decimal::ZERO {
            return Err(EngineError::Validation {
                message: format!("slippage must be non-negative, got {} bps", self.slippage_bps),
            });
        }
        Ok(())
    }

    /// Slippage as a price fraction (bps / 10_000).
    #[must_use]
    pub fn slippage_fraction(&self) -> Decimal {
        self.slippage_bps / Decimal::new(10_000, 0)
    }

    /// Staleness cutoff as a chrono duration for timestamp math.
    #[must_use]
    pub fn stale_order_cutoff(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_order_timeout.as_secs() as i64)
    }

    /// Quote-age cutoff as a chrono duration for timestamp math.
    #[must_use]
    pub fn quote_age_cutoff(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.max_quote_age.as_secs() as i64)
    }
}

fn read_u64(name: &str) -> Result<Option<u64>, EngineError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| EngineError::Validation {
                message: format!("{name} is not an integer: {raw}"),
            }),
        Err(_) => Ok(None),
    }
}
