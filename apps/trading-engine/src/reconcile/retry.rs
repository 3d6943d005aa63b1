//! Retry policy with exponential backoff for gateway calls.
//!
//! Only transient failures are retried; rejections and unknown-order
//! responses pass straight through. Jitter keeps a fleet of portfolios
//! from hammering the gateway in lockstep.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Retry configuration for gateway calls within one reconciliation tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum attempts per call (default: 3).
    pub max_attempts: u32,
    /// Initial backoff duration (default: 100ms).
    pub initial_backoff: Duration,
    /// Maximum backoff duration (default: 2s).
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential growth (default: 2.0).
    pub backoff_multiplier: f64,
    /// Jitter factor for randomization (default: 0.2 = +/-20%).
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            backoff_multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

/// Calculator for exponential backoff with jitter.
#[derive(Debug)]
pub struct BackoffCalculator {
    current_attempt: u32,
    max_attempts: u32,
    initial_backoff_ms: u64,
    max_backoff_ms: u64,
    backoff_multiplier: f64,
    jitter_factor: f64,
}

impl BackoffCalculator {
    /// Create a calculator from a policy.
    #[must_use]
    pub const fn new(policy: &RetryPolicy) -> Self {
        Self {
            current_attempt: 0,
            max_attempts: policy.max_attempts,
            initial_backoff_ms: policy.initial_backoff.as_millis() as u64,
            max_backoff_ms: policy.max_backoff.as_millis() as u64,
            backoff_multiplier: policy.backoff_multiplier,
            jitter_factor: policy.jitter_factor,
        }
    }

    /// Next backoff duration with jitter, or `None` once attempts are
    /// exhausted.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if self.current_attempt + 1 >= self.max_attempts {
            return None;
        }

        let base_ms = (self.initial_backoff_ms as f64
            * self.backoff_multiplier.powi(self.current_attempt as i32))
        .round() as u64;
        let jittered_ms = self.apply_jitter(base_ms);
        let capped_ms = jittered_ms.min(self.max_backoff_ms);

        self.current_attempt += 1;
        Some(Duration::from_millis(capped_ms))
    }

    fn apply_jitter(&self, base_ms: u64) -> u64 {
        if self.jitter_factor <= 0.0 {
            return base_ms;
        }
        let mut rng = rand::rng();
        let factor = rng.random_range(-self.jitter_factor..=self.jitter_factor);
        ((base_ms as f64) * (1.0 + factor)).max(0.0).round() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_exhausts() {
        let policy = RetryPolicy {
            jitter_factor: 0.0,
            ..RetryPolicy::default()
        };
        let mut backoff = BackoffCalculator::new(&policy);

        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(100)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(200)));
        // Third attempt is the last; no further backoff.
        assert_eq!(backoff.next_backoff(), None);
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_millis(800),
            backoff_multiplier: 4.0,
            jitter_factor: 0.0,
        };
        let mut backoff = BackoffCalculator::new(&policy);

        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(500)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(800)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(800)));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            max_attempts: 100,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(60),
            backoff_multiplier: 1.0,
            jitter_factor: 0.2,
        };
        let mut backoff = BackoffCalculator::new(&policy);

        for _ in 0..50 {
            let delay = backoff.next_backoff().expect("attempts remain");
            let ms = delay.as_millis() as u64;
            assert!((80..=120).contains(&ms), "jittered backoff {ms}ms out of bounds");
        }
    }
}
