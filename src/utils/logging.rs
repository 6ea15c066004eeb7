//! Logging setup.
//!
//! Levels come from `RUST_LOG` and fall back to `info`:
//! - `RUST_LOG=debug` shows queued bootstrap messages and stale discards
//! - `RUST_LOG=binance_client::exchanges=trace` narrows output to the caches
//!
//! ```bash
//! RUST_LOG=debug cargo run --bin depth_monitor -- BTCUSDT
//! ```

use std::env;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "info";

/// Installs the global fmt subscriber. Safe to call more than once; later calls are no-ops.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(level = %get_log_level(), "logging initialised");
    }
}

/// Current filter directive, as the subscriber would read it.
pub fn get_log_level() -> String {
    env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_FILTER.to_string())
}
