//! The ad network's isolated worker: download filtering, ad selection,
//! rendering, event logging, conversion attribution and training examples.
//!
//! The worker only reads through its ports. Persisting the request logs and
//! event records it returns is the caller's job.

mod download;
mod event;
mod execute;
mod render;
mod training;

use std::{collections::BTreeMap, sync::Arc};

use chrono::{Duration, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use strum_macros::AsRefStr;
use thiserror::Error;
use tracing::error;

use crate::event_url::{EventParams, EventUrlError, EventUrlProvider};
use crate::inference::{InferenceError, ModelRunner};
use crate::model::{
    row_str, AdParseError, AppParams, EventLogRecord, JoinedEvent, QueryId, RemoteDataEntry,
    RequestLogRecord, UserData,
};
use crate::services::cache::AdCache;
use crate::storage::{
    LogReader, RemoteDataStore, RequestLogStore, StorageError, TrainingScheduler,
};
use crate::training::TrainingExampleRecord;

/// Multiplier applied to the logged bid price when charging a click.
pub const COST_RAISING_FACTOR: f64 = 2.0;

/// Window searched when attributing conversions.
pub const ATTRIBUTION_WINDOW_HOURS: i64 = 24;

/// Error codes reported to the caller, as `IsolatedServiceException` codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorCode {
    InjectedError = 10,
    IllegalArgument = 11,
    OnExecute = 12,
    OnRender = 13,
    OnEvent = 14,
    OnWebTrigger = 15,
}

impl ErrorCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("client-requested crash")]
    ClientRequestedCrash,
    #[error("worker error {code:?}: {reason}")]
    Isolated { code: ErrorCode, reason: String },
}

impl WorkerError {
    pub fn isolated(code: ErrorCode, reason: impl Into<String>) -> Self {
        Self::Isolated {
            code,
            reason: reason.into(),
        }
    }

    /// The reported error code; a crash has none.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::ClientRequestedCrash => None,
            Self::Isolated { code, .. } => Some(*code),
        }
    }
}

/// Failures inside a worker step before they are mapped to an [`ErrorCode`].
#[derive(Debug, Error)]
pub(crate) enum StepError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error(transparent)]
    EventUrl(#[from] EventUrlError),
    #[error(transparent)]
    Ad(#[from] AdParseError),
    #[error("remote data has no entry `{0}`")]
    MissingKey(String),
    #[error("no rendering key supplied")]
    NoRenderingKey,
    #[error("template `{id}` failed to render: {reason}")]
    Template { id: String, reason: String },
}

impl StepError {
    fn into_worker_error(self, code: ErrorCode, operation: &'static str) -> WorkerError {
        error!(operation, code = code.code(), error = %self, "worker step failed");
        WorkerError::isolated(code, self.to_string())
    }
}

pub(crate) fn record_call(operation: &'static str, result: &'static str) {
    counter!("worker_calls_total", "operation" => operation, "result" => result).increment(1);
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadCompletedInput {
    pub contents: Vec<RemoteDataEntry>,
    pub user_data: UserData,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DownloadCompletedOutput {
    pub retained_keys: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteInput {
    #[serde(default)]
    pub app_params: AppParams,
    #[serde(default)]
    pub user_data: UserData,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecuteOutput {
    pub request_log: Option<RequestLogRecord>,
    pub rendering_keys: Vec<String>,
    /// Records attached to earlier queries (conversions).
    pub event_records: Vec<EventLogRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderInput {
    pub query_id: QueryId,
    pub rendering_keys: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RenderOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub template_params: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventInput {
    pub query_id: QueryId,
    pub params: EventParams,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventOutput {
    pub record: Option<EventLogRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebTriggerInput {
    pub destination_url: String,
    pub app_package_name: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WebTriggerOutput {
    pub event_records: Vec<EventLogRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TrainingExamplesInput {
    pub population_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrainingExamplesOutput {
    pub records: Vec<TrainingExampleRecord>,
}

/// Ports the worker reads through.
#[derive(Clone)]
pub struct WorkerPorts {
    pub remote_data: Arc<dyn RemoteDataStore>,
    pub request_logs: Arc<dyn RequestLogStore>,
    pub log_reader: Arc<dyn LogReader>,
    pub scheduler: Arc<dyn TrainingScheduler>,
    pub model_runner: Arc<dyn ModelRunner>,
    pub event_urls: Arc<dyn EventUrlProvider>,
}

#[derive(Clone)]
pub struct SampleWorker {
    ports: WorkerPorts,
    ads: AdCache,
}

impl SampleWorker {
    pub fn new(ports: WorkerPorts) -> Self {
        Self::with_ad_cache(ports, AdCache::default())
    }

    pub fn with_ad_cache(ports: WorkerPorts, ads: AdCache) -> Self {
        Self { ports, ads }
    }

    pub fn ad_cache(&self) -> &AdCache {
        &self.ads
    }

    /// Most recent event within the attribution window whose request row has
    /// `column` equal to `value`.
    async fn latest_event_with(
        &self,
        column: &str,
        value: &str,
    ) -> Result<Option<JoinedEvent>, StorageError> {
        let now = Utc::now();
        let events = self
            .ports
            .log_reader
            .joined_events(now - Duration::hours(ATTRIBUTION_WINDOW_HOURS), now)
            .await?;
        Ok(events
            .into_iter()
            .filter(|event| {
                event
                    .request_row()
                    .and_then(|row| row_str(row, column))
                    .is_some_and(|found| found == value)
            })
            // Ties on time keep the earliest row.
            .fold(None, |latest: Option<JoinedEvent>, event| match latest {
                Some(current) if current.time >= event.time => Some(current),
                _ => Some(event),
            }))
    }
}

#[cfg(test)]
pub(crate) mod test_support;
