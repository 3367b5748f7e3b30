use std::time::Instant;

use metrics::{counter, gauge, histogram};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{info, warn};

use odp_domain::{
    config::{ConfigError, DownloaderConfig},
    event_url::EventTokenSigner,
    model::UserData,
    services::telemetry::TelemetryError,
    storage::{DownloadStateStore, RemoteDataStore, StorageError},
    worker::SampleWorker,
};
use odp_storage::SeaOrmStorage;

use crate::{
    pipeline::{process_payload, PipelineOutcome},
    source::ContentSource,
};

// Tracking-link base; the downloader never renders.
const WORKER_PUBLIC_URL: &str = "http://localhost";

/// Worker used only for download filtering.
pub fn download_worker(storage: &SeaOrmStorage) -> SampleWorker {
    storage.sample_worker(WORKER_PUBLIC_URL, EventTokenSigner::random())
}

#[derive(Debug, Error)]
pub enum DownloaderError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("fetch error: {0}")]
    Fetch(String),
    #[error("invalid repository payload: {0}")]
    Payload(String),
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
}

impl From<reqwest::Error> for DownloaderError {
    fn from(value: reqwest::Error) -> Self {
        Self::Fetch(value.to_string())
    }
}

pub async fn run_downloader<C>(
    config: DownloaderConfig,
    storage: SeaOrmStorage,
    source: C,
) -> Result<(), DownloaderError>
where
    C: ContentSource,
{
    let worker = download_worker(&storage);
    let user_data = UserData::from_installed(config.installed_apps().iter().cloned());
    info!(
        url = config.download_url(),
        interval_secs = config.interval().as_secs(),
        installed_apps = config.installed_apps().len(),
        "downloader started"
    );

    loop {
        match poll_once(&storage, &worker, &source, &user_data).await {
            Ok(_) => {}
            // 存储错误无法在下一轮自愈，直接退出。
            Err(err @ DownloaderError::Storage(_)) => return Err(err),
            Err(err) => warn!(error = %err, "download round failed"),
        }
        sleep(config.interval()).await;
    }
}

/// Fetches the repository once and applies it.
pub async fn poll_once<S, C>(
    storage: &S,
    worker: &SampleWorker,
    source: &C,
    user_data: &UserData,
) -> Result<PipelineOutcome, DownloaderError>
where
    S: RemoteDataStore + DownloadStateStore,
    C: ContentSource,
{
    let started = Instant::now();
    let payload = match source.fetch().await {
        Ok(payload) => payload,
        Err(err) => {
            counter!("downloader_fetches_total", "result" => "error").increment(1);
            return Err(err);
        }
    };
    counter!("downloader_fetches_total", "result" => "ok").increment(1);
    histogram!("downloader_payload_bytes").record(payload.len() as f64);

    let outcome = process_payload(storage, worker, &payload, user_data).await?;
    if let PipelineOutcome::Applied { retained, .. } = outcome {
        gauge!("downloader_retained_entries").set(retained as f64);
    }
    histogram!("downloader_round_seconds").record(started.elapsed().as_secs_f64());
    Ok(outcome)
}
