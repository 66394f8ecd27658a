//! Tracing subscriber setup.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "pathwise=info";

fn filter() -> EnvFilter {
    let directives = std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_FILTER.to_string());
    EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Installs the global fmt subscriber. Returns `false` if one was already
/// installed.
pub fn try_init_tracing() -> bool {
    tracing_subscriber::registry()
        .with(filter())
        .with(fmt::layer().with_target(true))
        .try_init()
        .is_ok()
}

/// Installs the global fmt subscriber, ignoring an existing one.
pub fn init_tracing() {
    if !try_init_tracing() {
        tracing::debug!("tracing subscriber already installed");
    }
}
