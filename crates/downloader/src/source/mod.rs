use async_trait::async_trait;
use tracing::debug;

use crate::worker::DownloaderError;

mod types;

pub use types::{Repository, RepositoryEntry};

/// Where repository payloads come from.
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<u8>, DownloaderError>;
}

pub struct HttpContentSource {
    client: reqwest::Client,
    url: reqwest::Url,
}

impl HttpContentSource {
    pub fn new(url: &str) -> Result<Self, DownloaderError> {
        let url = reqwest::Url::parse(url)
            .map_err(|err| DownloaderError::Fetch(format!("invalid download url '{url}': {err}")))?;
        Ok(Self {
            client: reqwest::Client::new(),
            url,
        })
    }
}

#[async_trait]
impl ContentSource for HttpContentSource {
    async fn fetch(&self) -> Result<Vec<u8>, DownloaderError> {
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await?
            .error_for_status()?;
        let body = response.bytes().await?;
        debug!(url = %self.url, bytes = body.len(), "repository fetched");
        Ok(body.to_vec())
    }
}
