use actix_web::{http::header, web, HttpResponse};
use odp_domain::event_url::{EventAction, PIXEL_MIME_TYPE, TRACKING_PIXEL};
use odp_domain::storage::EventLogStore;
use odp_domain::worker::EventInput;
use tracing::{debug, warn};

use crate::state::AppState;

use super::{record_request, ApiError};

/// Target of the tracking links handed out by `on_render`. Logs the event,
/// then serves the pixel, redirects, or answers with no content. Links this
/// server did not sign are rejected before anything is logged.
pub async fn event_handler(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let result = handle_event(&state, &path.into_inner()).await;
    record_request("event", &result);
    result
}

async fn handle_event(state: &AppState, token: &str) -> Result<HttpResponse, ApiError> {
    let token = state.event_signer().decode(token).map_err(|err| {
        warn!(error = %err, "rejected event link");
        err
    })?;
    let output = state
        .worker()
        .on_event(&EventInput {
            query_id: token.query_id,
            params: token.params,
        })
        .await?;
    if let Some(record) = &output.record {
        state.storage().insert_event(record).await?;
        debug!(
            query_id = record.query_id.get(),
            event_type = record.event_type,
            "event recorded"
        );
    }

    Ok(match &token.action {
        EventAction::Pixel => HttpResponse::Ok()
            .content_type(PIXEL_MIME_TYPE)
            .body(TRACKING_PIXEL),
        EventAction::Redirect { url } => HttpResponse::Found()
            .insert_header((header::LOCATION, url.as_str()))
            .finish(),
        EventAction::NoContent => HttpResponse::NoContent().finish(),
    })
}
