//! Environment-driven configuration structures shared by all binaries.

use std::{env, time::Duration};

use thiserror::Error;

const DEFAULT_DOWNLOAD_INTERVAL_SECS: u64 = 3600;

/// Where an HTTP server listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Listener {
    Tcp(String),
    /// Unix domain socket path; replaces any TCP address for the same server.
    Unix(String),
}

impl Listener {
    fn from_env(socket_key: &'static str, address_key: &'static str) -> Option<Self> {
        get_optional_var(socket_key)
            .map(Self::Unix)
            .or_else(|| get_optional_var(address_key).map(Self::Tcp))
    }
}

impl std::fmt::Display for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp(address) => write!(f, "tcp://{address}"),
            Self::Unix(path) => write!(f, "unix://{path}"),
        }
    }
}

/// Settings for the HTTP API: listeners, database and the public base of
/// event tracking links. Downloader variables are never read here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    database_url: String,
    public_listener: Listener,
    internal_listener: Option<Listener>,
    public_url: String,
    event_key: Option<String>,
}

impl ApiConfig {
    pub fn load_from_env() -> Result<Self, ConfigError> {
        hydrate_env_file()?;

        let public_listener = Listener::from_env("API_UNIX_SOCKET", "API_BIND_ADDRESS")
            .ok_or(ConfigError::MissingVar {
                key: "API_BIND_ADDRESS",
            })?;
        let public_url = match (get_optional_var("API_PUBLIC_URL"), &public_listener) {
            (Some(url), _) => url,
            (None, Listener::Tcp(address)) => format!("http://{address}"),
            (None, Listener::Unix(_)) => {
                return Err(ConfigError::MissingVar {
                    key: "API_PUBLIC_URL",
                })
            }
        };

        Ok(Self {
            database_url: get_required_var("DATABASE_URL")?,
            internal_listener: Listener::from_env(
                "API_INTERNAL_UNIX_SOCKET",
                "API_INTERNAL_BIND_ADDRESS",
            ),
            public_url: public_url.trim_end_matches('/').to_string(),
            public_listener,
            event_key: get_optional_var("API_EVENT_KEY"),
        })
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn public_listener(&self) -> &Listener {
        &self.public_listener
    }

    /// Metrics-only listener. When absent, `/metrics` is served publicly.
    pub fn internal_listener(&self) -> Option<&Listener> {
        self.internal_listener.as_ref()
    }

    /// Base URL embedded in event tracking links, without a trailing slash.
    pub fn public_url(&self) -> &str {
        &self.public_url
    }

    /// Secret signing tracking links. Without it each process draws its own.
    pub fn event_key(&self) -> Option<&str> {
        self.event_key.as_deref()
    }
}

/// Settings for the remote-data downloader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloaderConfig {
    database_url: String,
    download_url: String,
    interval: Duration,
    installed_apps: Vec<String>,
}

impl DownloaderConfig {
    /// Loads configuration by hydrating `.env` (if present) and reading the
    /// required process variables. Missing or malformed entries surface as
    /// `ConfigError` so binaries can respond gracefully.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        hydrate_env_file()?;

        let database_url = get_required_var("DATABASE_URL")?;
        let download_url = get_required_var("DOWNLOAD_URL")?;
        let interval_secs = match get_optional_var("DOWNLOAD_INTERVAL_SECS") {
            Some(raw) => raw.parse().map_err(|source| ConfigError::InvalidNumber {
                key: "DOWNLOAD_INTERVAL_SECS",
                source,
            })?,
            None => DEFAULT_DOWNLOAD_INTERVAL_SECS,
        };
        let installed_apps = get_optional_var("DOWNLOADER_INSTALLED_APPS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|app| !app.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            database_url,
            download_url,
            interval: Duration::from_secs(interval_secs.max(1)),
            installed_apps,
        })
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn download_url(&self) -> &str {
        &self.download_url
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn installed_apps(&self) -> &[String] {
        &self.installed_apps
    }
}

fn get_required_var(key: &'static str) -> Result<String, ConfigError> {
    match env::var(key) {
        Ok(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                Err(ConfigError::MissingVar { key })
            } else {
                Ok(trimmed.to_string())
            }
        }
        Err(_) => Err(ConfigError::MissingVar { key }),
    }
}

fn get_optional_var(key: &'static str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

pub fn hydrate_env_file() -> Result<(), ConfigError> {
    if env::var_os("ODP_SKIP_DOTENV").is_some() {
        return Ok(());
    }
    match dotenvy::dotenv() {
        Ok(_) => {}
        Err(dotenvy::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(ConfigError::Dotenv { source: err }),
    }

    Ok(())
}

/// Errors emitted when `.env` hydration or environment parsing fails.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable `{key}`")]
    MissingVar { key: &'static str },
    #[error("invalid integer in `{key}`: {source}")]
    InvalidNumber {
        key: &'static str,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("failed to load .env file: {source}")]
    Dotenv {
        #[from]
        source: dotenvy::Error,
    },
}
