//! Downloader binary that keeps the device's remote data in sync with the ad
//! server repository.

use std::io;

use odp_domain::config::DownloaderConfig;
use odp_domain::services::telemetry::{init_telemetry, TelemetryConfig};
use odp_downloader::{run_downloader, DownloaderError, HttpContentSource};
use odp_storage::SeaOrmStorage;

#[tokio::main]
async fn main() -> io::Result<()> {
    if let Err(err) = bootstrap().await {
        eprintln!("[downloader] bootstrap failed: {err}");
        return Err(io::Error::other(err.to_string()));
    }

    Ok(())
}

async fn bootstrap() -> Result<(), DownloaderError> {
    let config = DownloaderConfig::load_from_env()?;
    let telemetry_config = TelemetryConfig::from_env("DOWNLOADER");
    init_telemetry(&telemetry_config)?;
    let storage = SeaOrmStorage::connect(config.database_url()).await?;
    let source = HttpContentSource::new(config.download_url())?;
    run_downloader(config, storage, source).await
}
