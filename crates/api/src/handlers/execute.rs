use actix_web::{web, HttpResponse};
use odp_domain::model::QueryId;
use odp_domain::storage::{EventLogStore, RequestLogStore};
use odp_domain::worker::ExecuteInput;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::state::AppState;

use super::{record_request, ApiError};

#[derive(Debug, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub query_id: Option<QueryId>,
    pub rendering_keys: Vec<String>,
    pub event_count: usize,
}

/// Runs `on_execute` and persists what it produced: the request log gets a
/// fresh query id, event records are bound to earlier queries.
pub async fn execute_handler(
    state: web::Data<AppState>,
    payload: web::Json<ExecuteInput>,
) -> Result<HttpResponse, ApiError> {
    let result = execute(&state, &payload).await;
    record_request("execute", &result);
    result.map(|response| HttpResponse::Ok().json(response))
}

async fn execute(state: &AppState, input: &ExecuteInput) -> Result<ExecuteResponse, ApiError> {
    let output = state.worker().on_execute(input).await?;

    let query_id = match &output.request_log {
        Some(log) => Some(state.storage().insert_request_log(log).await?),
        None => None,
    };
    for record in &output.event_records {
        state.storage().insert_event(record).await?;
    }
    debug!(
        query_id = query_id.map(|id| id.get()),
        events = output.event_records.len(),
        "execute output persisted"
    );

    Ok(ExecuteResponse {
        query_id,
        rendering_keys: output.rendering_keys,
        event_count: output.event_records.len(),
    })
}
