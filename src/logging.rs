use std::sync::Once;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// Ensure initialization happens only once
static INIT: Once = Once::new();

/// Initialize the logging system with sensible defaults.
///
/// Log level can be set using the RUST_LOG environment variable.
/// Example: RUST_LOG=debug,quota_guard=trace
///
/// Set QUOTA_GUARD_LOG_FORMAT=json for one JSON object per line.
pub fn init() {
    INIT.call_once(|| {
        // Default to 'info' level if RUST_LOG is not specified
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let json = std::env::var("QUOTA_GUARD_LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let registry = tracing_subscriber::registry().with(filter);
        let installed = if json {
            registry
                .with(fmt::layer().json().with_current_span(false))
                .try_init()
        } else {
            registry
                .with(
                    fmt::layer()
                        .with_target(true) // Include module path in logs
                        .with_thread_ids(true) // Useful for debugging concurrency issues
                        .with_line_number(true),
                )
                .try_init()
        };

        // Embedding applications may have installed their own subscriber
        if installed.is_ok() {
            tracing::info!(json, "Logging initialized");
        }
    });
}

/// Macro for logging one rate limiting decision
#[macro_export]
macro_rules! rate_limit_event {
    ($algorithm:expr, $key:expr, $allowed:expr, $limit:expr, $window_ms:expr) => {
        tracing::debug!(
            algorithm = $algorithm,
            key = $key,
            allowed = $allowed,
            limit = $limit,
            window_ms = $window_ms,
            "Rate limit check"
        )
    };
}

/// Macro for logging storage operations with timing
#[macro_export]
macro_rules! storage_op {
    ($operation:expr, $key:expr, $result:expr, $elapsed_ms:expr) => {
        tracing::trace!(
            operation = $operation,
            key = $key,
            success = $result.is_ok(),
            elapsed_ms = $elapsed_ms,
            "Storage operation"
        )
    };
}
