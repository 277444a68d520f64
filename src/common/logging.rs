//! Logging and tracing configuration
//!
//! Log output goes to stderr so the child's inherited stdout stays readable.
//! `RUST_LOG` takes precedence over the configured level.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use super::config::LogLevel;

/// Filter used when `RUST_LOG` is not set
pub fn default_filter(level: LogLevel) -> EnvFilter {
    EnvFilter::new(level.as_directive())
}

/// Initialize tracing with the given default verbosity
///
/// Safe to call more than once; later calls, or calls after the host program
/// installed its own subscriber, are no-ops.
pub fn init(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .try_init();
}
