//! Data structures shared across the API, downloader and tooling binaries.

mod ad;

use std::{collections::BTreeMap, time::Duration};

use chrono::{DateTime, Utc};
use hex::encode as hex_encode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha3::{Digest, Sha3_256};
use strum_macros::{AsRefStr, EnumString};

pub use ad::{Ad, AdParseError, DEFAULT_AD_TEXT};

/// Keys written into request and event log rows.
pub mod log_keys {
    pub const AD_ID: &str = "adid";
    pub const BID_PRICE: &str = "price";
    pub const AUCTION_SCORE: &str = "score";
    pub const LANDING_PAGE: &str = "landingpage";
    pub const CLICK_COST: &str = "clkcost";
    pub const EVENT_TYPE: &str = "type";
    pub const SOURCE_TYPE: &str = "sourcetype";
    pub const WEB_TRIGGER_DATA: &str = "webtriggerdata";
}

/// Remote-data key prefixes recognised by the worker.
pub mod key_prefix {
    pub const AD: &str = "ad";
    pub const TEMPLATE: &str = "template";
    pub const EXAMPLE: &str = "example";
    pub const MODEL: &str = "model";
}

/// Deterministically derives a SHA3-256 fingerprint (hex) for a payload.
pub fn content_fingerprint(data: &[u8]) -> String {
    let mut hasher = Sha3_256::new();
    hasher.update(data);
    hex_encode(hasher.finalize())
}

/// One key/value pair of the downloaded remote data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDataEntry {
    pub key: String,
    pub data: Vec<u8>,
}

impl RemoteDataEntry {
    pub fn new(key: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            data: data.into(),
        }
    }
}

/// Identifier of a persisted request log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryId(i64);

impl QueryId {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn get(&self) -> i64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum EventType {
    Impression = 1,
    Click = 2,
    Conversion = 3,
    WebConversion = 4,
}

impl EventType {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(Self::Impression),
            2 => Some(Self::Click),
            3 => Some(Self::Conversion),
            4 => Some(Self::WebConversion),
            _ => None,
        }
    }
}

/// Parameters passed by the calling app to `execute`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyword: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_training: Option<String>,
    /// Seconds between recurrent training runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_interval: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_training: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversion_ad_id: Option<String>,
}

impl AppParams {
    pub fn with_keyword(keyword: impl Into<String>) -> Self {
        Self {
            keyword: Some(keyword.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInfo {
    #[serde(default)]
    pub installed: bool,
}

/// Device signals visible to the worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserData {
    #[serde(default)]
    pub app_infos: BTreeMap<String, AppInfo>,
}

impl UserData {
    pub fn from_installed<I, S>(apps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let app_infos = apps
            .into_iter()
            .map(|app| (app.into(), AppInfo { installed: true }))
            .collect();
        Self { app_infos }
    }

    pub fn installed_apps(&self) -> impl Iterator<Item = &str> {
        self.app_infos
            .iter()
            .filter(|(_, info)| info.installed)
            .map(|(name, _)| name.as_str())
    }
}

/// A log row is a flat JSON object keyed by the names in [`log_keys`].
pub type LogRow = Map<String, Value>;

/// Reads a numeric column, accepting numbers stored as strings.
pub fn row_f64(row: &LogRow, key: &str) -> Option<f64> {
    match row.get(key)? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

pub fn row_str<'a>(row: &'a LogRow, key: &str) -> Option<&'a str> {
    row.get(key).and_then(Value::as_str)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestLogRecord {
    pub rows: Vec<LogRow>,
}

impl RequestLogRecord {
    pub fn single(row: LogRow) -> Self {
        Self { rows: vec![row] }
    }

    pub fn row(&self, index: u32) -> Option<&LogRow> {
        self.rows.get(index as usize)
    }
}

/// Event row to be written against a persisted request log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLogRecord {
    pub query_id: QueryId,
    pub row_index: u32,
    pub event_type: i32,
    #[serde(default)]
    pub data: LogRow,
}

/// An event joined with the request log it was recorded against.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinedEvent {
    pub query_id: QueryId,
    pub row_index: u32,
    pub event_type: i32,
    pub time: DateTime<Utc>,
    pub request: RequestLogRecord,
    pub data: LogRow,
}

impl JoinedEvent {
    pub fn request_row(&self) -> Option<&LogRow> {
        self.request.row(self.row_index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum SchedulingMode {
    OneTime,
    Recurrent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrainingInterval {
    pub minimum_interval: Duration,
    pub mode: SchedulingMode,
}

impl TrainingInterval {
    pub fn one_time(minimum_interval: Duration) -> Self {
        Self {
            minimum_interval,
            mode: SchedulingMode::OneTime,
        }
    }

    pub fn recurrent(minimum_interval: Duration) -> Self {
        Self {
            minimum_interval,
            mode: SchedulingMode::Recurrent,
        }
    }
}

/// A training job registered for a federated population.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingSchedule {
    pub population_name: String,
    pub interval: TrainingInterval,
    pub scheduled_at: DateTime<Utc>,
}
