//! Ad scoring. The worker hands the matched ads to a [`ModelRunner`] and
//! multiplies each ad's max CPC by the returned score.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::model::Ad;
use crate::storage::{RemoteDataStore, StorageError};

/// Remote-data key holding the default model.
pub const DEFAULT_MODEL_KEY: &str = "model1";

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("model `{0}` not found in remote data")]
    MissingModel(String),
    #[error("model `{key}` is invalid: {reason}")]
    InvalidModel { key: String, reason: String },
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

#[async_trait]
pub trait ModelRunner: Send + Sync {
    /// Returns one score per ad, in order.
    async fn run(&self, ads: &[Arc<Ad>]) -> Result<Vec<f32>, InferenceError>;
}

/// Logistic regression over ad embeddings: `sigmoid(w · x + b)`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LinearModel {
    pub weights: Vec<f32>,
    #[serde(default)]
    pub bias: f32,
}

impl LinearModel {
    /// Missing embeddings score as a zero vector; embeddings are zero-padded
    /// or truncated to the weight length.
    pub fn score(&self, embedding: Option<&[f32]>) -> f32 {
        let dot: f32 = embedding
            .unwrap_or_default()
            .iter()
            .zip(&self.weights)
            .map(|(x, w)| x * w)
            .sum();
        sigmoid(dot + self.bias)
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Loads a [`LinearModel`] from remote data on every run so a fresh
/// download takes effect immediately.
pub struct RemoteDataModelRunner {
    remote_data: Arc<dyn RemoteDataStore>,
    model_key: String,
}

impl RemoteDataModelRunner {
    pub fn new(remote_data: Arc<dyn RemoteDataStore>) -> Self {
        Self::with_model_key(remote_data, DEFAULT_MODEL_KEY)
    }

    pub fn with_model_key(remote_data: Arc<dyn RemoteDataStore>, key: impl Into<String>) -> Self {
        Self {
            remote_data,
            model_key: key.into(),
        }
    }

    async fn load_model(&self) -> Result<LinearModel, InferenceError> {
        let bytes = self
            .remote_data
            .get(&self.model_key)
            .await?
            .ok_or_else(|| InferenceError::MissingModel(self.model_key.clone()))?;
        serde_json::from_slice(&bytes).map_err(|err| InferenceError::InvalidModel {
            key: self.model_key.clone(),
            reason: err.to_string(),
        })
    }
}

#[async_trait]
impl ModelRunner for RemoteDataModelRunner {
    async fn run(&self, ads: &[Arc<Ad>]) -> Result<Vec<f32>, InferenceError> {
        let model = self.load_model().await?;
        debug!(
            model = %self.model_key,
            ads = ads.len(),
            weights = model.weights.len(),
            "running inference"
        );
        Ok(ads
            .iter()
            .map(|ad| model.score(ad.embedding.as_deref()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RemoteDataEntry;
    use crate::storage::StorageResult;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryRemoteData {
        entries: Mutex<BTreeMap<String, Vec<u8>>>,
    }

    #[async_trait]
    impl RemoteDataStore for MemoryRemoteData {
        async fn keys(&self) -> StorageResult<Vec<String>> {
            Ok(self.entries.lock().unwrap().keys().cloned().collect())
        }

        async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
            Ok(self.entries.lock().unwrap().get(key).cloned())
        }

        async fn replace_all(&self, entries: Vec<RemoteDataEntry>) -> StorageResult<()> {
            let mut guard = self.entries.lock().unwrap();
            guard.clear();
            guard.extend(entries.into_iter().map(|entry| (entry.key, entry.data)));
            Ok(())
        }
    }

    fn ad_with(embedding: Option<Vec<f32>>) -> Arc<Ad> {
        let mut ad = Ad::parse("ad1", b"{}").unwrap();
        ad.embedding = embedding;
        Arc::new(ad)
    }

    #[test]
    fn score_pads_and_truncates_embeddings() {
        let model = LinearModel {
            weights: vec![1.0, 1.0],
            bias: 0.0,
        };
        assert_eq!(model.score(None), 0.5);
        assert_eq!(model.score(Some(&[0.0])), 0.5);
        let long = model.score(Some(&[1.0, 1.0, 100.0]));
        assert!((long - sigmoid(2.0)).abs() < 1e-6);
    }

    #[tokio::test]
    async fn runner_reads_model_from_remote_data() {
        let store = Arc::new(MemoryRemoteData::default());
        store
            .replace_all(vec![RemoteDataEntry::new(
                DEFAULT_MODEL_KEY,
                br#"{"weights": [2.0], "bias": -1.0}"#.to_vec(),
            )])
            .await
            .unwrap();
        let runner = RemoteDataModelRunner::new(store);
        let scores = runner
            .run(&[ad_with(Some(vec![0.5])), ad_with(None)])
            .await
            .unwrap();
        assert_eq!(scores.len(), 2);
        assert_eq!(scores[0], 0.5);
        assert!((scores[1] - sigmoid(-1.0)).abs() < 1e-6);
    }

    #[tokio::test]
    async fn missing_model_is_an_error() {
        let runner = RemoteDataModelRunner::new(Arc::new(MemoryRemoteData::default()));
        let err = runner.run(&[ad_with(None)]).await.unwrap_err();
        assert!(matches!(err, InferenceError::MissingModel(key) if key == "model1"));
    }
}
