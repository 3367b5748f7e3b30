use actix_web::{web, HttpResponse};
use odp_domain::worker::RenderInput;

use crate::state::AppState;

use super::{record_request, ApiError};

pub async fn render_handler(
    state: web::Data<AppState>,
    payload: web::Json<RenderInput>,
) -> Result<HttpResponse, ApiError> {
    let result = state
        .worker()
        .on_render(&payload)
        .await
        .map_err(ApiError::from);
    record_request("render", &result);
    result.map(|output| HttpResponse::Ok().json(output))
}
