//! Structured logging setup shared by both binaries.

use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_FILTER: &str = "relation_optimizer=info";

/// Set to any value for JSON log lines.
pub const JSON_ENV: &str = "OPTIMIZER_LOG_JSON";

/// Install the global subscriber. `RUST_LOG` overrides the default filter.
/// A second call is a no-op.
pub fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let json_logging = std::env::var(JSON_ENV).is_ok();

    let result = if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .try_init()
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .try_init()
    };

    // Already installed (tests, or a binary calling twice).
    let _ = result;
}
