use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{
    EventLogRecord, JoinedEvent, QueryId, RemoteDataEntry, RequestLogRecord, TrainingInterval,
    TrainingSchedule,
};

/// Common result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),
    #[error("corrupt stored value: {0}")]
    Corrupt(String),
}

impl StorageError {
    pub fn from_source(err: impl std::fmt::Display) -> Self {
        Self::Database(err.to_string())
    }
}

/// Key/value store holding the retained remote data.
#[async_trait]
pub trait RemoteDataStore: Send + Sync {
    async fn keys(&self) -> StorageResult<Vec<String>>;
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;
    /// Atomically swaps the stored contents for `entries`.
    async fn replace_all(&self, entries: Vec<RemoteDataEntry>) -> StorageResult<()>;
}

#[async_trait]
pub trait RequestLogStore: Send + Sync {
    async fn insert_request_log(&self, record: &RequestLogRecord) -> StorageResult<QueryId>;
    async fn find_request_log(&self, query_id: QueryId) -> StorageResult<Option<RequestLogRecord>>;
}

#[async_trait]
pub trait EventLogStore: Send + Sync {
    async fn insert_event(&self, record: &EventLogRecord) -> StorageResult<()>;
}

#[async_trait]
pub trait LogReader: Send + Sync {
    /// Events recorded in `[start, end]`, each joined with its request log.
    async fn joined_events(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<Vec<JoinedEvent>>;
}

#[async_trait]
pub trait TrainingScheduler: Send + Sync {
    async fn schedule(&self, population_name: &str, interval: TrainingInterval)
        -> StorageResult<()>;
    /// Returns `false` when nothing was scheduled for the population.
    async fn cancel(&self, population_name: &str) -> StorageResult<bool>;
    async fn find_schedule(&self, population_name: &str)
        -> StorageResult<Option<TrainingSchedule>>;
}

#[async_trait]
pub trait DownloadStateStore: Send + Sync {
    async fn last_fingerprint(&self) -> StorageResult<Option<String>>;
    async fn upsert_fingerprint(&self, fingerprint: &str) -> StorageResult<()>;
}
