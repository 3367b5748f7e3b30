//! Offline helpers for ad repositories: swap plain targeting lists for
//! cuckoo filters, and verify a filtered repository against its source.

pub mod repository;

pub use repository::{
    check_filters, check_rate, make_filters, read_repository, FilterReport, ToolError,
    DEFAULT_TARGET_FP_RATE, MAX_CHECK_FP_RATE, MIN_CHECK_FP_RATE,
};

/// Logs go to stderr so the repository printed on stdout stays clean.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .try_init();
}
