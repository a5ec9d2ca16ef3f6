//! Logging configuration for the harness
//!
//! Plain tracing-based logging to stderr. Suites share one process, so the
//! subscriber is installed once and later calls are ignored.
//!
//! # Example
//!
//! ```no_run
//! use operator_harness::telemetry::init_logging;
//!
//! init_logging();
//! ```

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is not set. The kube client is chatty at info.
const DEFAULT_FILTER: &str = "info,kube=warn";

/// Initialize logging with tracing-subscriber
///
/// Uses the RUST_LOG env var for filtering (default: `info,kube=warn`).
pub fn init_logging() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging();
        init_logging();
    }
}
