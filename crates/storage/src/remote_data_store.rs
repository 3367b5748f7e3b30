use odp_domain::model::RemoteDataEntry;
use odp_domain::storage::{RemoteDataStore, StorageResult};
use sea_orm::{EntityTrait, QueryOrder, QuerySelect, Set, TransactionTrait};
use tracing::debug;

use crate::entity::remote_data;
use crate::errors::StorageError;
use crate::SeaOrmStorage;

#[async_trait::async_trait]
impl RemoteDataStore for SeaOrmStorage {
    async fn keys(&self) -> StorageResult<Vec<String>> {
        remote_data::Entity::find()
            .select_only()
            .column(remote_data::Column::Key)
            .order_by_asc(remote_data::Column::Key)
            .into_tuple::<String>()
            .all(self.connection())
            .await
            .map_err(StorageError::from_source)
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let maybe = remote_data::Entity::find_by_id(key.to_string())
            .one(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(maybe.map(|model| model.data))
    }

    async fn replace_all(&self, entries: Vec<RemoteDataEntry>) -> StorageResult<()> {
        let count = entries.len();
        let txn = self
            .connection()
            .begin()
            .await
            .map_err(StorageError::from_source)?;
        remote_data::Entity::delete_many()
            .exec(&txn)
            .await
            .map_err(StorageError::from_source)?;
        if !entries.is_empty() {
            let models = entries.into_iter().map(|entry| remote_data::ActiveModel {
                key: Set(entry.key),
                data: Set(entry.data),
            });
            remote_data::Entity::insert_many(models)
                .exec_without_returning(&txn)
                .await
                .map_err(StorageError::from_source)?;
        }
        txn.commit().await.map_err(StorageError::from_source)?;
        debug!(entries = count, "remote data replaced");
        Ok(())
    }
}
