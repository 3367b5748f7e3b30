use std::{env, net::SocketAddr, sync::Arc};

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::hydrate_env_file;

const DEFAULT_LOG_FILTER: &str = "info";

static SUBSCRIBER_INSTALLED: OnceCell<()> = OnceCell::new();
static METRICS_HANDLE: OnceCell<Arc<PrometheusHandle>> = OnceCell::new();

/// Logging and metrics options for one binary, read from
/// `<PREFIX>_LOG_FILTER` and `<PREFIX>_METRICS_ADDRESS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    log_filter: String,
    metrics_address: Option<String>,
}

impl TelemetryConfig {
    pub fn from_env(prefix: &str) -> Self {
        let _ = hydrate_env_file();
        let prefix = prefix.trim().to_ascii_uppercase();
        let read = |suffix: &str| {
            env::var(format!("{prefix}_{suffix}"))
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        Self {
            log_filter: read("LOG_FILTER").unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
            metrics_address: read("METRICS_ADDRESS"),
        }
    }

    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Standalone Prometheus listener, independent of the API's `/metrics`.
    pub fn metrics_address(&self) -> Option<&str> {
        self.metrics_address.as_deref()
    }
}

/// Handle to the process-wide Prometheus recorder.
#[derive(Clone)]
pub struct TelemetryGuard {
    metrics: Arc<PrometheusHandle>,
}

impl TelemetryGuard {
    pub fn render_metrics(&self) -> String {
        self.metrics.render()
    }
}

/// Installs the tracing subscriber and the metrics recorder. Later calls in
/// the same process reuse what the first call installed.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    install_tracing(config)?;
    let metrics = METRICS_HANDLE
        .get_or_try_init(|| install_metrics(config))?
        .clone();
    Ok(TelemetryGuard { metrics })
}

fn install_tracing(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    if SUBSCRIBER_INSTALLED.get().is_some() {
        return Ok(());
    }
    let env_filter = EnvFilter::try_new(config.log_filter())
        .map_err(|err| TelemetryError::InvalidLogFilter(err.to_string()))?;
    if SUBSCRIBER_INSTALLED.set(()).is_ok() {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
            .map_err(|err| TelemetryError::Tracing(err.to_string()))?;
    }
    Ok(())
}

fn install_metrics(config: &TelemetryConfig) -> Result<Arc<PrometheusHandle>, TelemetryError> {
    let mut builder = PrometheusBuilder::new();
    if let Some(addr) = config.metrics_address() {
        let socket: SocketAddr = addr
            .parse()
            .map_err(|err: std::net::AddrParseError| {
                TelemetryError::InvalidMetricsAddress(addr.to_string(), err.to_string())
            })?;
        builder = builder.with_http_listener(socket);
    }
    let handle = builder
        .install_recorder()
        .map_err(|err| TelemetryError::Metrics(err.to_string()))?;
    describe_metrics();
    Ok(Arc::new(handle))
}

fn describe_metrics() {
    describe_counter!(
        "worker_calls_total",
        "Isolated worker operations by operation and result"
    );
    describe_counter!(
        "ad_cache_lookups_total",
        "Parsed-ad cache lookups by hit or miss"
    );
    describe_counter!("api_requests_total", "HTTP API requests by route and status");
    describe_counter!(
        "downloader_fetches_total",
        "Repository fetches by result"
    );
    describe_counter!(
        "downloader_payloads_total",
        "Fetched repositories by outcome"
    );
    describe_gauge!(
        "downloader_retained_entries",
        "Remote data entries kept after the last applied download"
    );
    describe_histogram!(
        "downloader_payload_bytes",
        Unit::Bytes,
        "Size of fetched repositories"
    );
    describe_histogram!(
        "downloader_round_seconds",
        Unit::Seconds,
        "Duration of one fetch and apply round"
    );
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid log filter: {0}")]
    InvalidLogFilter(String),
    #[error("failed to install tracing subscriber: {0}")]
    Tracing(String),
    #[error("invalid metrics address `{0}`: {1}")]
    InvalidMetricsAddress(String, String),
    #[error("failed to install metrics recorder: {0}")]
    Metrics(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_GUARD: Mutex<()> = Mutex::new(());

    fn clear() {
        env::remove_var("DOWNLOADER_LOG_FILTER");
        env::remove_var("DOWNLOADER_METRICS_ADDRESS");
    }

    #[test]
    fn defaults_apply_without_env() {
        let _guard = ENV_GUARD.lock().unwrap();
        clear();
        let cfg = TelemetryConfig::from_env("downloader");
        assert_eq!(cfg.log_filter(), DEFAULT_LOG_FILTER);
        assert_eq!(cfg.metrics_address(), None);
    }

    #[test]
    fn prefixed_variables_are_read() {
        let _guard = ENV_GUARD.lock().unwrap();
        env::set_var("DOWNLOADER_LOG_FILTER", "odp_downloader=debug");
        env::set_var("DOWNLOADER_METRICS_ADDRESS", " 127.0.0.1:9898 ");
        let cfg = TelemetryConfig::from_env(" Downloader ");
        assert_eq!(cfg.log_filter(), "odp_downloader=debug");
        assert_eq!(cfg.metrics_address(), Some("127.0.0.1:9898"));
        clear();
    }

    #[test]
    fn blank_values_fall_back() {
        let _guard = ENV_GUARD.lock().unwrap();
        env::set_var("DOWNLOADER_LOG_FILTER", "");
        env::set_var("DOWNLOADER_METRICS_ADDRESS", "  ");
        let cfg = TelemetryConfig::from_env("DOWNLOADER");
        assert_eq!(cfg.log_filter(), DEFAULT_LOG_FILTER);
        assert_eq!(cfg.metrics_address(), None);
        clear();
    }
}
