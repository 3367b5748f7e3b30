use actix_web::{web::Data, HttpResponse};

use crate::state::AppState;

const PROMETHEUS_TEXT_FORMAT: &str = "text/plain; version=0.0.4";

pub async fn metrics_handler(state: Data<AppState>) -> HttpResponse {
    HttpResponse::Ok()
        .content_type(PROMETHEUS_TEXT_FORMAT)
        .body(state.telemetry().render_metrics())
}
