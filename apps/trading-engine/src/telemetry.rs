//! Tracing Setup
//!
//! Console tracing with env-filter control.
//!
//! # Configuration
//!
//! - `RUST_LOG`: filter directives (default: `info`)
//! - `NODE_ENV`: `development` enables ANSI colors and hides targets
//!
//! # Usage
//!
//! ```rust,ignore
//! use trading_engine::telemetry::init_telemetry;
//!
//! #[tokio::main]
//! async fn main() {
//!     init_telemetry();
//!     // ... application code
//! }
//! ```

use tracing_subscriber::EnvFilter;

/// Initialize console tracing.
///
/// Safe to call once per process; subsequent calls are ignored so tests
/// can initialize freely.
pub fn init_telemetry() {
    let is_development = std::env::var("NODE_ENV")
        .map(|v| v == "development")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(!is_development)
        .with_ansi(is_development)
        .try_init();
}
