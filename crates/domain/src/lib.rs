//! Domain-level building blocks shared by the API, the downloader and the
//! cuckoo filter tools.
//!
//! The ad network's isolated worker lives in [`worker`]; it reads remote data,
//! request logs and joined events through the ports in [`storage`], so the
//! database crate and the tests can supply their own backends.

pub mod config;
pub mod event_url;
pub mod filter;
pub mod inference;
pub mod model;
pub mod services;
pub mod storage;
pub mod training;
pub mod worker;

pub use config::{hydrate_env_file, ApiConfig, ConfigError, DownloaderConfig, Listener};
pub use services::{init_telemetry, TelemetryConfig, TelemetryError, TelemetryGuard};
