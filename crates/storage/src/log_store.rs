use std::collections::HashMap;

use chrono::{DateTime, Utc};
use odp_domain::model::{EventLogRecord, JoinedEvent, LogRow, QueryId, RequestLogRecord};
use odp_domain::storage::{EventLogStore, LogReader, RequestLogStore, StorageResult};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use tracing::warn;

use crate::entity::{event_logs, request_logs};
use crate::errors::{corrupt, StorageError};
use crate::SeaOrmStorage;

#[async_trait::async_trait]
impl RequestLogStore for SeaOrmStorage {
    async fn insert_request_log(&self, record: &RequestLogRecord) -> StorageResult<QueryId> {
        let rows = serde_json::to_string(&record.rows).map_err(|err| corrupt("request log", err))?;
        let model = request_logs::ActiveModel {
            rows: Set(rows),
            created_at: Set(Utc::now()),
            ..Default::default()
        };
        let created = model
            .insert(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(QueryId::new(created.query_id))
    }

    async fn find_request_log(&self, query_id: QueryId) -> StorageResult<Option<RequestLogRecord>> {
        let maybe = request_logs::Entity::find_by_id(query_id.get())
            .one(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        maybe.map(request_to_record).transpose()
    }
}

#[async_trait::async_trait]
impl EventLogStore for SeaOrmStorage {
    async fn insert_event(&self, record: &EventLogRecord) -> StorageResult<()> {
        let data = serde_json::to_string(&record.data).map_err(|err| corrupt("event data", err))?;
        let model = event_logs::ActiveModel {
            query_id: Set(record.query_id.get()),
            row_index: Set(record.row_index as i32),
            event_type: Set(record.event_type),
            data: Set(data),
            created_at: Set(Utc::now()),
            ..Default::default()
        };
        event_logs::Entity::insert(model)
            .exec_without_returning(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl LogReader for SeaOrmStorage {
    async fn joined_events(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<Vec<JoinedEvent>> {
        let events = event_logs::Entity::find()
            .filter(event_logs::Column::CreatedAt.between(start, end))
            .order_by_asc(event_logs::Column::CreatedAt)
            .all(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let mut query_ids: Vec<i64> = events.iter().map(|event| event.query_id).collect();
        query_ids.sort_unstable();
        query_ids.dedup();
        let requests: HashMap<i64, RequestLogRecord> = request_logs::Entity::find()
            .filter(request_logs::Column::QueryId.is_in(query_ids))
            .all(self.connection())
            .await
            .map_err(StorageError::from_source)?
            .into_iter()
            .map(|model| {
                let query_id = model.query_id;
                request_to_record(model).map(|record| (query_id, record))
            })
            .collect::<StorageResult<_>>()?;

        let mut joined = Vec::with_capacity(events.len());
        for event in events {
            let Some(request) = requests.get(&event.query_id) else {
                warn!(query_id = event.query_id, "event without request log");
                continue;
            };
            let data: LogRow =
                serde_json::from_str(&event.data).map_err(|err| corrupt("event data", err))?;
            joined.push(JoinedEvent {
                query_id: QueryId::new(event.query_id),
                row_index: event.row_index.max(0) as u32,
                event_type: event.event_type,
                time: event.created_at,
                request: request.clone(),
                data,
            });
        }
        Ok(joined)
    }
}

fn request_to_record(model: request_logs::Model) -> StorageResult<RequestLogRecord> {
    let rows = serde_json::from_str(&model.rows).map_err(|err| corrupt("request log", err))?;
    Ok(RequestLogRecord { rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_storage;
    use chrono::Duration;
    use serde_json::json;

    fn row(ad_id: &str) -> LogRow {
        json!({"adid": ad_id, "price": 1.5}).as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn request_logs_round_trip_through_query_ids() {
        let storage = memory_storage().await;
        let first = storage
            .insert_request_log(&RequestLogRecord::single(row("ad1")))
            .await
            .unwrap();
        let second = storage
            .insert_request_log(&RequestLogRecord::single(row("ad2")))
            .await
            .unwrap();
        assert_ne!(first, second);

        let stored = storage.find_request_log(second).await.unwrap().unwrap();
        assert_eq!(stored, RequestLogRecord::single(row("ad2")));
        assert!(storage
            .find_request_log(QueryId::new(999))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn events_join_their_request_logs() {
        let storage = memory_storage().await;
        let query_id = storage
            .insert_request_log(&RequestLogRecord::single(row("ad1")))
            .await
            .unwrap();
        let mut data = LogRow::new();
        data.insert("clkcost".into(), json!(3.0));
        storage
            .insert_event(&EventLogRecord {
                query_id,
                row_index: 0,
                event_type: 2,
                data: data.clone(),
            })
            .await
            .unwrap();
        storage
            .insert_event(&EventLogRecord {
                query_id: QueryId::new(404),
                row_index: 0,
                event_type: 1,
                data: LogRow::new(),
            })
            .await
            .unwrap();

        let now = Utc::now();
        let joined = storage
            .joined_events(now - Duration::hours(1), now + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(joined.len(), 1);
        let event = &joined[0];
        assert_eq!(event.query_id, query_id);
        assert_eq!(event.event_type, 2);
        assert_eq!(event.data, data);
        assert_eq!(event.request_row(), Some(&row("ad1")));

        let stale = storage
            .joined_events(now - Duration::hours(48), now - Duration::hours(24))
            .await
            .unwrap();
        assert!(stale.is_empty());
    }
}
