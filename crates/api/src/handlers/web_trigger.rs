use actix_web::{web, HttpResponse};
use base64::{engine::general_purpose::STANDARD, Engine};
use odp_domain::storage::EventLogStore;
use odp_domain::worker::WebTriggerInput;
use serde::{Deserialize, Serialize};

use crate::state::AppState;

use super::{record_request, ApiError};

#[derive(Debug, Serialize, Deserialize)]
pub struct WebTriggerRequest {
    pub destination_url: String,
    #[serde(default)]
    pub app_package_name: String,
    /// Base64 trigger payload.
    #[serde(default)]
    pub data: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WebTriggerResponse {
    pub event_count: usize,
}

pub async fn web_trigger_handler(
    state: web::Data<AppState>,
    payload: web::Json<WebTriggerRequest>,
) -> Result<HttpResponse, ApiError> {
    let result = web_trigger(&state, payload.into_inner()).await;
    record_request("web_trigger", &result);
    result.map(|response| HttpResponse::Ok().json(response))
}

async fn web_trigger(
    state: &AppState,
    request: WebTriggerRequest,
) -> Result<WebTriggerResponse, ApiError> {
    let data = STANDARD
        .decode(request.data.trim())
        .map_err(|err| ApiError::InvalidPayload(format!("data is not base64: {err}")))?;
    let output = state
        .worker()
        .on_web_trigger(&WebTriggerInput {
            destination_url: request.destination_url,
            app_package_name: request.app_package_name,
            data,
        })
        .await?;
    for record in &output.event_records {
        state.storage().insert_event(record).await?;
    }
    Ok(WebTriggerResponse {
        event_count: output.event_records.len(),
    })
}
