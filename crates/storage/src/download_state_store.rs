use odp_domain::storage::{DownloadStateStore, StorageResult};
use sea_orm::{sea_query::OnConflict, EntityTrait, Set};

use crate::entity::downloader_state;
use crate::errors::StorageError;
use crate::SeaOrmStorage;

const LAST_FINGERPRINT_KEY: &str = "last_content_fingerprint";

#[async_trait::async_trait]
impl DownloadStateStore for SeaOrmStorage {
    async fn last_fingerprint(&self) -> StorageResult<Option<String>> {
        let maybe = downloader_state::Entity::find_by_id(LAST_FINGERPRINT_KEY.to_string())
            .one(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(maybe.map(|model| model.value))
    }

    async fn upsert_fingerprint(&self, fingerprint: &str) -> StorageResult<()> {
        let active = downloader_state::ActiveModel {
            key: Set(LAST_FINGERPRINT_KEY.to_string()),
            value: Set(fingerprint.to_string()),
        };
        downloader_state::Entity::insert(active)
            .on_conflict(
                OnConflict::column(downloader_state::Column::Key)
                    .update_column(downloader_state::Column::Value)
                    .to_owned(),
            )
            .exec_without_returning(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(())
    }
}
