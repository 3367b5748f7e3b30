use actix_web::{web, HttpResponse};
use base64::{engine::general_purpose::STANDARD, Engine};
use metrics::counter;
use odp_domain::worker::TrainingExamplesInput;
use serde::{Deserialize, Serialize};

use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct TrainingRecordBody {
    /// Base64 of the serialized `tf.Example`.
    pub example: String,
    pub resumption_token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TrainingExamplesResponse {
    pub records: Vec<TrainingRecordBody>,
}

pub async fn training_examples_handler(
    state: web::Data<AppState>,
    payload: web::Json<TrainingExamplesInput>,
) -> HttpResponse {
    let output = state.worker().on_training_examples(&payload).await;
    let records = output
        .records
        .into_iter()
        .map(|record| TrainingRecordBody {
            example: STANDARD.encode(&record.example),
            resumption_token: String::from_utf8_lossy(&record.resumption_token).into_owned(),
        })
        .collect();
    counter!("api_requests_total", "route" => "training_examples", "status" => "ok").increment(1);
    HttpResponse::Ok().json(TrainingExamplesResponse { records })
}
