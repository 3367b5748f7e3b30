use std::time::Duration;

use odp_domain::storage::StorageResult;
use sea_orm::{ConnectOptions, Database};
use tracing::debug;

use crate::{errors::StorageError, prepare_connection, SeaOrmStorage};

const DEFAULT_MAX_CONNECTIONS: u32 = 8;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection settings for [`SeaOrmStorage`]. Schema migrations run as part
/// of [`StorageBuilder::build`].
#[derive(Debug, Clone)]
pub struct StorageBuilder {
    database_url: Option<String>,
    max_connections: u32,
    sql_logging: bool,
}

impl Default for StorageBuilder {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            sql_logging: false,
        }
    }
}

impl StorageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max.max(1);
        self
    }

    /// Emits every statement through `tracing`.
    pub fn sql_logging(mut self, enabled: bool) -> Self {
        self.sql_logging = enabled;
        self
    }

    pub async fn build(self) -> StorageResult<SeaOrmStorage> {
        let url = self
            .database_url
            .ok_or_else(|| StorageError::Database("missing database url".into()))?;

        let mut options = ConnectOptions::new(url.clone());
        options
            .connect_timeout(CONNECT_TIMEOUT)
            .sqlx_logging(self.sql_logging);
        // An in-memory SQLite database lives only as long as its connection.
        if is_in_memory(&url) {
            options.max_connections(1).min_connections(1);
        } else {
            options.max_connections(self.max_connections);
        }

        let db = Database::connect(options)
            .await
            .map_err(StorageError::from_source)?;
        prepare_connection(&db).await?;
        debug!(in_memory = is_in_memory(&url), "storage connected");
        Ok(SeaOrmStorage::from_connection(db))
    }
}

fn is_in_memory(url: &str) -> bool {
    url.starts_with("sqlite::memory:") || url.contains("mode=memory")
}
