//! Sizing & filter engine.
//!
//! Turns raw predictions into risk-bounded, diversification-filtered
//! recommendations. `build_recommendations` is a pure function of its
//! inputs with a total ranking order, which is what lets the backtest
//! replay the identical decision path the live scheduler runs.

mod engine;

pub use engine::{build_recommendations, confidence_score, stop_target_prices};
