//! SeaORM-backed storage adapters that satisfy the domain storage ports while
//! keeping the database backend swappable (SQLite by default, PostgreSQL via
//! feature flag).

mod builder;
mod download_state_store;
mod entity;
mod errors;
mod log_store;
mod migration;
mod remote_data_store;
mod training_store;

pub use builder::StorageBuilder;

use std::sync::Arc;

use odp_domain::event_url::{EventTokenSigner, TokenEventUrlProvider};
use odp_domain::inference::RemoteDataModelRunner;
use odp_domain::storage::StorageResult;
use odp_domain::worker::{SampleWorker, WorkerPorts};
use sea_orm::DatabaseConnection;

use migration::run_migrations;

/// Shared storage handle used by the HTTP API and the downloader.
#[derive(Clone)]
pub struct SeaOrmStorage {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmStorage {
    /// Connects to the provided database URL and ensures the schema is present.
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        Self::builder().database_url(database_url).build().await
    }

    pub fn builder() -> StorageBuilder {
        StorageBuilder::new()
    }

    pub(crate) fn from_connection(db: DatabaseConnection) -> Self {
        Self { db: Arc::new(db) }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        self.db.as_ref()
    }

    /// Builds a worker whose ports are all backed by this storage, handing
    /// out tracking links under `public_url` signed by `signer`.
    pub fn sample_worker(&self, public_url: &str, signer: EventTokenSigner) -> SampleWorker {
        let shared = Arc::new(self.clone());
        SampleWorker::new(WorkerPorts {
            remote_data: shared.clone(),
            request_logs: shared.clone(),
            log_reader: shared.clone(),
            scheduler: shared.clone(),
            model_runner: Arc::new(RemoteDataModelRunner::new(shared)),
            event_urls: Arc::new(TokenEventUrlProvider::new(public_url, signer)),
        })
    }
}

pub(crate) async fn prepare_connection(db: &DatabaseConnection) -> StorageResult<()> {
    run_migrations(db).await
}

#[cfg(test)]
pub(crate) async fn memory_storage() -> SeaOrmStorage {
    SeaOrmStorage::connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite")
}
