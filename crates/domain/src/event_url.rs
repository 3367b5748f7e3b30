//! Tracking links handed out at render time. A link carries the query, the
//! event parameters and what to answer with, in a single URL-safe token
//! signed with HMAC-SHA3 so the event endpoint only acts on links it issued.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha3::Sha3_256;
use thiserror::Error;

use crate::model::QueryId;

/// Route prefix served by the API for tracking links.
pub const EVENT_PATH: &str = "/api/v1/event";

pub const PIXEL_MIME_TYPE: &str = "image/png";

/// 1x1 transparent PNG served by impression links.
pub const TRACKING_PIXEL: &[u8] = &[
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1f,
    0x15, 0xc4, 0x89, 0x00, 0x00, 0x00, 0x01, 0x73, 0x52, 0x47, 0x42, 0x00, 0xae, 0xce, 0x1c,
    0xe9, 0x00, 0x00, 0x00, 0x0b, 0x49, 0x44, 0x41, 0x54, 0x18, 0x57, 0x63, 0x60, 0x00, 0x02,
    0x00, 0x00, 0x05, 0x00, 0x01, 0xaa, 0xd5, 0xc8, 0x51, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45,
    0x4e, 0x44, 0xae, 0x42, 0x60, 0x82,
];

const SIGNING_KEY_LEN: usize = 32;

type HmacSha3 = Hmac<Sha3_256>;

/// Parameters attached to a tracking link and handed back to `on_event`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventParams {
    #[serde(rename = "type")]
    pub event_type: i32,
}

/// What the event endpoint answers once the event is logged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventAction {
    /// Serve [`TRACKING_PIXEL`].
    Pixel,
    Redirect { url: String },
    /// Click on an ad without a landing page.
    NoContent,
}

impl EventAction {
    /// Redirect for `destination`; an empty destination only logs the click.
    pub fn redirect_to(destination: &str) -> Result<Self, EventUrlError> {
        let destination = destination.trim();
        if destination.is_empty() {
            return Ok(Self::NoContent);
        }
        if !(destination.starts_with("http://") || destination.starts_with("https://")) {
            return Err(EventUrlError::InvalidRedirect(destination.to_string()));
        }
        Ok(Self::Redirect {
            url: destination.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventToken {
    pub query_id: QueryId,
    pub params: EventParams,
    pub action: EventAction,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventUrlError {
    #[error("malformed event token: {0}")]
    MalformedToken(String),
    #[error("event token signature mismatch")]
    BadSignature,
    #[error("invalid redirect target `{0}`")]
    InvalidRedirect(String),
    #[error("cannot encode event token: {0}")]
    Encode(String),
    #[error("invalid event signing key: {0}")]
    Key(String),
}

/// Signs tokens into `<payload>.<tag>` and verifies them on the way back.
#[derive(Clone)]
pub struct EventTokenSigner {
    key: Arc<[u8]>,
}

impl fmt::Debug for EventTokenSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventTokenSigner").finish_non_exhaustive()
    }
}

impl EventTokenSigner {
    pub fn new(key: impl AsRef<[u8]>) -> Result<Self, EventUrlError> {
        let key = key.as_ref();
        if key.is_empty() {
            return Err(EventUrlError::Key("key is empty".into()));
        }
        Ok(Self { key: key.into() })
    }

    /// Process-local key; links stop verifying after a restart.
    pub fn random() -> Self {
        let mut key = [0u8; SIGNING_KEY_LEN];
        rand::thread_rng().fill(&mut key);
        Self { key: key.into() }
    }

    fn mac(&self, payload: &[u8]) -> Result<HmacSha3, EventUrlError> {
        let mut mac =
            HmacSha3::new_from_slice(&self.key).map_err(|err| EventUrlError::Key(err.to_string()))?;
        mac.update(payload);
        Ok(mac)
    }

    pub fn encode(&self, token: &EventToken) -> Result<String, EventUrlError> {
        let payload =
            serde_json::to_vec(token).map_err(|err| EventUrlError::Encode(err.to_string()))?;
        let tag = self.mac(&payload)?.finalize().into_bytes();
        Ok(format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&payload),
            URL_SAFE_NO_PAD.encode(tag)
        ))
    }

    pub fn decode(&self, token: &str) -> Result<EventToken, EventUrlError> {
        let malformed = |reason: String| EventUrlError::MalformedToken(reason);
        let (payload, tag) = token
            .trim()
            .split_once('.')
            .ok_or_else(|| malformed("missing signature".into()))?;
        let payload = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|err| malformed(err.to_string()))?;
        let tag = URL_SAFE_NO_PAD
            .decode(tag)
            .map_err(|err| malformed(err.to_string()))?;
        self.mac(&payload)?
            .verify_slice(&tag)
            .map_err(|_| EventUrlError::BadSignature)?;

        let token: EventToken =
            serde_json::from_slice(&payload).map_err(|err| malformed(err.to_string()))?;
        if let EventAction::Redirect { url } = &token.action {
            EventAction::redirect_to(url)?;
        }
        Ok(token)
    }
}

#[async_trait]
pub trait EventUrlProvider: Send + Sync {
    /// Link that logs the event and answers with the tracking pixel.
    async fn pixel_url(&self, query_id: QueryId, params: EventParams)
        -> Result<String, EventUrlError>;

    /// Link that logs the event and redirects to `destination`, or answers
    /// with no content when `destination` is empty.
    async fn url_with_redirect(
        &self,
        query_id: QueryId,
        params: EventParams,
        destination: &str,
    ) -> Result<String, EventUrlError>;
}

/// Builds `<base>/api/v1/event/<token>` links.
#[derive(Debug, Clone)]
pub struct TokenEventUrlProvider {
    base_url: String,
    signer: EventTokenSigner,
}

impl TokenEventUrlProvider {
    pub fn new(base_url: impl Into<String>, signer: EventTokenSigner) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            signer,
        }
    }

    fn link(&self, token: &EventToken) -> Result<String, EventUrlError> {
        Ok(format!(
            "{}{}/{}",
            self.base_url,
            EVENT_PATH,
            self.signer.encode(token)?
        ))
    }
}

#[async_trait]
impl EventUrlProvider for TokenEventUrlProvider {
    async fn pixel_url(
        &self,
        query_id: QueryId,
        params: EventParams,
    ) -> Result<String, EventUrlError> {
        self.link(&EventToken {
            query_id,
            params,
            action: EventAction::Pixel,
        })
    }

    async fn url_with_redirect(
        &self,
        query_id: QueryId,
        params: EventParams,
        destination: &str,
    ) -> Result<String, EventUrlError> {
        self.link(&EventToken {
            query_id,
            params,
            action: EventAction::redirect_to(destination)?,
        })
    }
}
