//! Logging and tracing utilities

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "info";

fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Initialize tracing subscriber with default configuration
///
/// The filter is read from `RUST_LOG` and falls back to `info`.
pub fn init_tracing() {
    init_tracing_with_default(DEFAULT_FILTER);
}

/// Initialize tracing with a custom fallback filter (used when `RUST_LOG` is unset)
pub fn init_tracing_with_default(default_filter: &str) {
    // try_init so tests and embedders that already installed a subscriber don't panic
    let _ = tracing_subscriber::registry()
        .with(env_filter(default_filter))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

/// Initialize tracing with JSON-formatted output
pub fn init_tracing_json() {
    let _ = tracing_subscriber::registry()
        .with(env_filter(DEFAULT_FILTER))
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .try_init();
}
