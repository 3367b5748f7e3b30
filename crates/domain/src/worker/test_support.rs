use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::event_url::{EventToken, EventTokenSigner, TokenEventUrlProvider};
use crate::inference::RemoteDataModelRunner;
use crate::model::{
    JoinedEvent, QueryId, RemoteDataEntry, RequestLogRecord, TrainingInterval, TrainingSchedule,
};
use crate::storage::{
    LogReader, RemoteDataStore, RequestLogStore, StorageError, StorageResult, TrainingScheduler,
};

use super::{SampleWorker, WorkerPorts};

pub(crate) const BASE_URL: &str = "http://odp.test";
const SIGNING_KEY: &[u8] = b"worker-test-key";

pub(crate) fn signer() -> EventTokenSigner {
    EventTokenSigner::new(SIGNING_KEY).unwrap()
}

/// In-memory implementation of every port the worker reads through.
#[derive(Default)]
pub(crate) struct MemoryStore {
    remote: Mutex<BTreeMap<String, Vec<u8>>>,
    request_logs: Mutex<Vec<RequestLogRecord>>,
    events: Mutex<Vec<JoinedEvent>>,
    schedules: Mutex<BTreeMap<String, TrainingSchedule>>,
    failing: AtomicBool,
}

impl MemoryStore {
    pub(crate) fn put(&self, key: &str, data: impl Into<Vec<u8>>) {
        self.remote
            .lock()
            .unwrap()
            .insert(key.to_string(), data.into());
    }

    pub(crate) fn push_event(&self, event: JoinedEvent) {
        self.events.lock().unwrap().push(event);
    }

    pub(crate) fn schedules(&self) -> BTreeMap<String, TrainingSchedule> {
        self.schedules.lock().unwrap().clone()
    }

    pub(crate) fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    fn check(&self) -> StorageResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StorageError::Database("injected failure".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteDataStore for MemoryStore {
    async fn keys(&self) -> StorageResult<Vec<String>> {
        self.check()?;
        Ok(self.remote.lock().unwrap().keys().cloned().collect())
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.check()?;
        Ok(self.remote.lock().unwrap().get(key).cloned())
    }

    async fn replace_all(&self, entries: Vec<RemoteDataEntry>) -> StorageResult<()> {
        self.check()?;
        let mut guard = self.remote.lock().unwrap();
        guard.clear();
        guard.extend(entries.into_iter().map(|entry| (entry.key, entry.data)));
        Ok(())
    }
}

#[async_trait]
impl RequestLogStore for MemoryStore {
    async fn insert_request_log(&self, record: &RequestLogRecord) -> StorageResult<QueryId> {
        self.check()?;
        let mut logs = self.request_logs.lock().unwrap();
        logs.push(record.clone());
        Ok(QueryId::new(logs.len() as i64))
    }

    async fn find_request_log(&self, query_id: QueryId) -> StorageResult<Option<RequestLogRecord>> {
        self.check()?;
        let index = query_id.get() - 1;
        if index < 0 {
            return Ok(None);
        }
        Ok(self.request_logs.lock().unwrap().get(index as usize).cloned())
    }
}

#[async_trait]
impl LogReader for MemoryStore {
    async fn joined_events(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<Vec<JoinedEvent>> {
        self.check()?;
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| event.time >= start && event.time <= end)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TrainingScheduler for MemoryStore {
    async fn schedule(&self, population_name: &str, interval: TrainingInterval) -> StorageResult<()> {
        self.check()?;
        self.schedules.lock().unwrap().insert(
            population_name.to_string(),
            TrainingSchedule {
                population_name: population_name.to_string(),
                interval,
                scheduled_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn cancel(&self, population_name: &str) -> StorageResult<bool> {
        self.check()?;
        Ok(self
            .schedules
            .lock()
            .unwrap()
            .remove(population_name)
            .is_some())
    }

    async fn find_schedule(&self, population_name: &str) -> StorageResult<Option<TrainingSchedule>> {
        self.check()?;
        Ok(self.schedules.lock().unwrap().get(population_name).cloned())
    }
}

#[derive(Default, Clone)]
pub(crate) struct TestPorts {
    pub(crate) store: Arc<MemoryStore>,
}

impl TestPorts {
    pub(crate) fn worker(&self) -> SampleWorker {
        SampleWorker::new(WorkerPorts {
            remote_data: self.store.clone(),
            request_logs: self.store.clone(),
            log_reader: self.store.clone(),
            scheduler: self.store.clone(),
            model_runner: Arc::new(RemoteDataModelRunner::new(self.store.clone())),
            event_urls: Arc::new(TokenEventUrlProvider::new(BASE_URL, signer())),
        })
    }

    /// Verifies and decodes the token at the end of a tracking link.
    pub(crate) fn token_in(&self, url: &str) -> EventToken {
        let (_, token) = url.rsplit_once('/').unwrap();
        signer().decode(token).unwrap()
    }
}

pub(crate) mod fixture {
    use serde_json::json;

    pub(crate) fn ad_json(max_cpc: f64, keywords: &[&str]) -> String {
        json!({
            "max_cpc": max_cpc,
            "keywords": keywords,
            "landingPage": "https://shop.example/landing",
            "text": "Buy now",
        })
        .to_string()
    }

    /// Weights that turn the first embedding feature into the score logit.
    pub(crate) fn model_json() -> String {
        json!({"weights": [1.0], "bias": 0.0}).to_string()
    }
}
