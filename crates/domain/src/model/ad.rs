use serde::Deserialize;
use thiserror::Error;

use crate::filter::{decode_filter, CuckooFilter, FilterError};

use super::UserData;

pub const DEFAULT_AD_TEXT: &str = "Click Here!";

#[derive(Debug, Error)]
pub enum AdParseError {
    #[error("ad `{id}` is not valid utf-8 json: {reason}")]
    Json { id: String, reason: String },
    #[error("ad `{id}` has an unreadable `{field}`: {source}")]
    Filter {
        id: String,
        field: &'static str,
        #[source]
        source: FilterError,
    },
    #[error("ad `{id}` has a non-numeric embedding feature `{value}`")]
    Embedding { id: String, value: String },
}

/// JSON form stored under `ad*` remote-data keys.
#[derive(Debug, Deserialize)]
struct AdDocument {
    #[serde(default)]
    max_cpc: f64,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    apps: Vec<String>,
    #[serde(default)]
    excludes: Vec<String>,
    #[serde(default, rename = "landingPage")]
    landing_page: String,
    #[serde(default = "default_text")]
    text: String,
    #[serde(default)]
    template: Option<String>,
    #[serde(default, rename = "keywordFilter")]
    keyword_filter: Option<String>,
    #[serde(default, rename = "appFilter")]
    app_filter: Option<String>,
    #[serde(default, rename = "excludeFilter")]
    exclude_filter: Option<String>,
    #[serde(default)]
    embedding_features: Option<String>,
}

fn default_text() -> String {
    DEFAULT_AD_TEXT.to_string()
}

#[derive(Debug, Clone)]
pub struct Ad {
    pub id: String,
    pub max_cpc: f64,
    pub keywords: Vec<String>,
    pub apps: Vec<String>,
    pub excludes: Vec<String>,
    pub landing_page: String,
    pub text: String,
    pub template_id: Option<String>,
    pub keyword_filter: Option<CuckooFilter>,
    pub app_filter: Option<CuckooFilter>,
    pub exclude_filter: Option<CuckooFilter>,
    pub embedding: Option<Vec<f32>>,
}

impl Ad {
    pub fn parse(id: &str, data: &[u8]) -> Result<Self, AdParseError> {
        let doc: AdDocument = serde_json::from_slice(data).map_err(|err| AdParseError::Json {
            id: id.to_string(),
            reason: err.to_string(),
        })?;

        let filter = |field: &'static str, encoded: Option<String>| {
            encoded
                .map(|value| decode_filter(&value))
                .transpose()
                .map_err(|source| AdParseError::Filter {
                    id: id.to_string(),
                    field,
                    source,
                })
        };

        let embedding = doc
            .embedding_features
            .map(|raw| parse_embedding(id, &raw))
            .transpose()?;

        Ok(Self {
            id: id.to_string(),
            max_cpc: doc.max_cpc,
            keywords: non_empty(doc.keywords),
            apps: non_empty(doc.apps),
            excludes: non_empty(doc.excludes),
            landing_page: doc.landing_page,
            text: doc.text,
            template_id: doc.template,
            keyword_filter: filter("keywordFilter", doc.keyword_filter)?,
            app_filter: filter("appFilter", doc.app_filter)?,
            exclude_filter: filter("excludeFilter", doc.exclude_filter)?,
            embedding,
        })
    }

    /// Applies the targeting rules for a normalized request keyword.
    pub fn matches(&self, keyword: &str, user: &UserData) -> bool {
        if !self.keywords.is_empty() && !self.keywords.iter().any(|k| k == keyword) {
            return false;
        }
        if !self.apps.is_empty() && !installed_in_list(user, &self.apps) {
            return false;
        }
        if !self.excludes.is_empty()
            && (self.excludes.iter().any(|k| k == keyword) || installed_in_list(user, &self.excludes))
        {
            return false;
        }
        if let Some(filter) = &self.keyword_filter {
            if !filter.contains(keyword) {
                return false;
            }
        }
        if let Some(filter) = &self.exclude_filter {
            if filter.contains(keyword) || installed_in_filter(user, filter) {
                return false;
            }
        }
        if let Some(filter) = &self.app_filter {
            if !installed_in_filter(user, filter) {
                return false;
            }
        }
        true
    }

    /// An ad is blocked for a device when any installed app is excluded.
    pub fn is_blocked(&self, user: &UserData) -> bool {
        self.exclude_filter
            .as_ref()
            .is_some_and(|filter| installed_in_filter(user, filter))
            || installed_in_list(user, &self.excludes)
    }
}

fn non_empty(values: Vec<String>) -> Vec<String> {
    values.into_iter().filter(|value| !value.is_empty()).collect()
}

fn parse_embedding(id: &str, raw: &str) -> Result<Vec<f32>, AdParseError> {
    raw.split(',')
        .map(|value| {
            value.trim().parse::<f32>().map_err(|_| AdParseError::Embedding {
                id: id.to_string(),
                value: value.to_string(),
            })
        })
        .collect()
}

fn installed_in_list(user: &UserData, apps: &[String]) -> bool {
    user.installed_apps()
        .any(|installed| apps.iter().any(|app| app == installed))
}

fn installed_in_filter(user: &UserData, filter: &CuckooFilter) -> bool {
    user.installed_apps().any(|installed| filter.contains(installed))
}
