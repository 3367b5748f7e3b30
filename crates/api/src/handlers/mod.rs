pub mod event;
pub mod execute;
pub mod metrics;
pub mod render;
pub mod training;
pub mod web_trigger;

pub use event::event_handler;
pub use execute::execute_handler;
pub use metrics::metrics_handler;
pub use render::render_handler;
pub use training::training_examples_handler;
pub use web_trigger::web_trigger_handler;

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use ::metrics::counter;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use odp_domain::event_url::EventUrlError;
use odp_domain::storage::StorageError;
use odp_domain::worker::{ErrorCode, WorkerError};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Worker(#[from] WorkerError),
    #[error("invalid event link: {0}")]
    EventLink(#[from] EventUrlError),
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),
}

impl ApiError {
    fn worker_code(&self) -> Option<i32> {
        match self {
            ApiError::Worker(err) => err.code().map(ErrorCode::code),
            _ => None,
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Worker(err) if err.code() == Some(ErrorCode::IllegalArgument) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Worker(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::EventLink(_) | ApiError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            ApiError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: self.to_string(),
            code: self.worker_code(),
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
}

/// Counts a finished request by route and outcome.
pub(crate) fn record_request<T>(route: &'static str, result: &Result<T, ApiError>) {
    let status = match result {
        Ok(_) => "ok",
        Err(ApiError::Worker(WorkerError::ClientRequestedCrash)) => "crash",
        Err(ApiError::Worker(_)) => "worker_error",
        Err(ApiError::EventLink(_) | ApiError::InvalidPayload(_)) => "bad_request",
        Err(ApiError::Storage(_)) => "storage_error",
    };
    counter!("api_requests_total", "route" => route, "status" => status).increment(1);
}
