//! Library entrypoint for the content downloader. The binary in `main.rs`
//! polls the ad server; tests and other processes can drive a single poll
//! through [`poll_once`] with their own [`ContentSource`].

pub mod pipeline;
pub mod source;
pub mod worker;

pub use pipeline::{process_payload, PipelineOutcome};
pub use source::{ContentSource, HttpContentSource, Repository, RepositoryEntry};
pub use worker::{download_worker, poll_once, run_downloader, DownloaderError};
