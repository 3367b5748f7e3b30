use actix_web::{
    body::to_bytes,
    http::{header, StatusCode},
    test, web, App,
};
use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine,
};
use chrono::{Duration, Utc};
use odp_domain::event_url::{EventAction, EventParams, EventToken, EventTokenSigner};
use odp_domain::model::{log_keys, row_f64, QueryId, RemoteDataEntry};
use odp_domain::services::telemetry::{init_telemetry, TelemetryConfig, TelemetryGuard};
use odp_domain::storage::{LogReader, RemoteDataStore, RequestLogStore};
use odp_storage::SeaOrmStorage;
use serde_json::{json, Value};

use crate::application::worker_routes;
use crate::handlers::{
    execute::ExecuteResponse, metrics_handler, training::TrainingExamplesResponse,
    web_trigger::WebTriggerResponse, ErrorBody,
};
use crate::state::AppState;

const PUBLIC_URL: &str = "http://odp.test";
const EVENT_KEY: &[u8] = b"api-test-event-key";

fn signer() -> EventTokenSigner {
    EventTokenSigner::new(EVENT_KEY).expect("signer")
}

async fn storage() -> SeaOrmStorage {
    SeaOrmStorage::connect("sqlite::memory:")
        .await
        .expect("storage inits")
}

fn telemetry() -> TelemetryGuard {
    let config = TelemetryConfig::from_env("API_TEST");
    init_telemetry(&config).expect("telemetry inits")
}

async fn seeded_storage() -> SeaOrmStorage {
    let storage = storage().await;
    storage
        .replace_all(vec![
            RemoteDataEntry::new(
                "ad1",
                json!({
                    "max_cpc": 2.0,
                    "keywords": ["shoes"],
                    "landingPage": "https://shop.example/landing",
                    "text": "Buy shoes",
                })
                .to_string(),
            ),
            RemoteDataEntry::new("model1", json!({"weights": [1.0], "bias": 0.0}).to_string()),
        ])
        .await
        .unwrap();
    storage
}

macro_rules! app {
    ($storage:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new(AppState::with_storage(
                    $storage,
                    PUBLIC_URL,
                    signer(),
                    telemetry(),
                )))
                .configure(worker_routes)
                .route("/metrics", web::get().to(metrics_handler)),
        )
        .await
    };
}

fn execute_request(body: Value) -> test::TestRequest {
    test::TestRequest::post().uri("/api/v1/execute").set_json(body)
}

/// Strips the public base so the link can be replayed against the test app.
fn local_path(link: &str) -> &str {
    link.strip_prefix(PUBLIC_URL).expect("link under public url")
}

async fn joined_event_count(storage: &SeaOrmStorage) -> usize {
    let now = Utc::now();
    storage
        .joined_events(now - Duration::hours(1), now + Duration::hours(1))
        .await
        .unwrap()
        .len()
}

#[actix_web::test]
async fn execute_render_and_track_an_ad() {
    let storage = seeded_storage().await;
    let app = app!(storage.clone());

    let req = execute_request(json!({"app_params": {"keyword": "Shoes"}})).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = to_bytes(resp.into_body()).await.unwrap();
    let executed: ExecuteResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(executed.rendering_keys, vec!["ad1"]);
    let query_id = executed.query_id.expect("request log persisted");
    let logged = storage.find_request_log(query_id).await.unwrap().unwrap();
    assert_eq!(row_f64(logged.row(0).unwrap(), log_keys::BID_PRICE), Some(2.0));

    let req = test::TestRequest::post()
        .uri("/api/v1/render")
        .set_json(json!({"query_id": query_id, "rendering_keys": executed.rendering_keys}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = to_bytes(resp.into_body()).await.unwrap();
    let rendered: Value = serde_json::from_slice(&body).unwrap();
    let html = rendered["content"].as_str().unwrap().to_string();
    let impression = html
        .split('"')
        .nth(1)
        .expect("impression link")
        .to_string();
    let click = html.split('"').nth(5).expect("click link").to_string();

    let resp = test::call_service(
        &app,
        test::TestRequest::get().uri(local_path(&impression)).to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get(header::CONTENT_TYPE).unwrap(), "image/png");
    let pixel = to_bytes(resp.into_body()).await.unwrap();
    assert!(pixel.starts_with(b"\x89PNG"));

    let resp = test::call_service(
        &app,
        test::TestRequest::get().uri(local_path(&click)).to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(
        resp.headers().get(header::LOCATION).unwrap(),
        "https://shop.example/landing"
    );

    let now = Utc::now();
    let events = storage
        .joined_events(now - Duration::hours(1), now + Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(events.len(), 2);
    let click_event = events.iter().find(|event| event.event_type == 2).unwrap();
    assert_eq!(row_f64(&click_event.data, log_keys::CLICK_COST), Some(4.0));
}

#[actix_web::test]
async fn no_matching_ad_returns_empty_execute_output() {
    let app = app!(seeded_storage().await);
    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/v1/execute")
            .set_json(json!({"app_params": {"keyword": "hats"}}))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = to_bytes(resp.into_body()).await.unwrap();
    let executed: ExecuteResponse = serde_json::from_slice(&body).unwrap();
    assert!(executed.query_id.is_none());
    assert!(executed.rendering_keys.is_empty());
}

#[actix_web::test]
async fn worker_errors_map_to_codes() {
    let app = app!(storage().await);

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/v1/execute")
            .set_json(json!({"app_params": {"schedule_training": ""}}))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: ErrorBody = serde_json::from_slice(&to_bytes(resp.into_body()).await.unwrap()).unwrap();
    assert_eq!(body.code, Some(11));

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/v1/execute")
            .set_json(json!({"app_params": {"keyword": "error"}}))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: ErrorBody = serde_json::from_slice(&to_bytes(resp.into_body()).await.unwrap()).unwrap();
    assert_eq!(body.code, Some(10));

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/v1/execute")
            .set_json(json!({"app_params": {"keyword": "crash"}}))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: ErrorBody = serde_json::from_slice(&to_bytes(resp.into_body()).await.unwrap()).unwrap();
    assert_eq!(body.code, None);
}

#[actix_web::test]
async fn render_of_unknown_key_reports_render_code() {
    let app = app!(storage().await);
    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/v1/render")
            .set_json(json!({"query_id": 1, "rendering_keys": ["ad404"]}))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: ErrorBody = serde_json::from_slice(&to_bytes(resp.into_body()).await.unwrap()).unwrap();
    assert_eq!(body.code, Some(13));
}

#[actix_web::test]
async fn malformed_event_links_are_rejected() {
    let app = app!(storage().await);
    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri("/api/v1/event/not-a-token")
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn conversions_are_attributed_and_persisted() {
    let storage = seeded_storage().await;
    let app = app!(storage.clone());

    let resp = test::call_service(&app, execute_request(json!({"app_params": {"keyword": "shoes"}})).to_request()).await;
    let executed: ExecuteResponse =
        serde_json::from_slice(&to_bytes(resp.into_body()).await.unwrap()).unwrap();
    let query_id = executed.query_id.unwrap();

    let rendered = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/v1/render")
            .set_json(json!({"query_id": query_id, "rendering_keys": ["ad1"]}))
            .to_request(),
    )
    .await;
    let rendered: Value =
        serde_json::from_slice(&to_bytes(rendered.into_body()).await.unwrap()).unwrap();
    let html = rendered["content"].as_str().unwrap().to_string();
    let impression = html.split('"').nth(1).unwrap().to_string();
    test::call_service(
        &app,
        test::TestRequest::get().uri(local_path(&impression)).to_request(),
    )
    .await;

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/v1/web-trigger")
            .set_json(json!({
                "destination_url": "https://shop.example/landing",
                "app_package_name": "com.example.odptargetingapp2",
                "data": STANDARD.encode(b"order-17"),
            }))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let triggered: WebTriggerResponse =
        serde_json::from_slice(&to_bytes(resp.into_body()).await.unwrap()).unwrap();
    assert_eq!(triggered.event_count, 1);

    let resp = test::call_service(
        &app,
        execute_request(json!({"app_params": {"conversion_ad_id": "ad1"}})).to_request(),
    )
    .await;
    let converted: ExecuteResponse =
        serde_json::from_slice(&to_bytes(resp.into_body()).await.unwrap()).unwrap();
    assert_eq!(converted.event_count, 1);
    assert!(converted.query_id.is_none());

    let now = Utc::now();
    let events = storage
        .joined_events(now - Duration::hours(1), now + Duration::hours(1))
        .await
        .unwrap();
    let web = events.iter().find(|event| event.event_type == 4).unwrap();
    assert_eq!(web.query_id, query_id);
    assert_eq!(web.data[log_keys::WEB_TRIGGER_DATA], json!(STANDARD.encode(b"order-17")));
    assert!(events.iter().any(|event| event.event_type == 3));
}

#[actix_web::test]
async fn web_trigger_rejects_non_base64_data() {
    let app = app!(storage().await);
    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/v1/web-trigger")
            .set_json(json!({"destination_url": "https://a.example", "data": "%%%"}))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn training_examples_are_base64_encoded() {
    let storage = storage().await;
    let pixels = vec!["0.5"; odp_domain::training::MNIST_PIXELS].join(",");
    storage
        .replace_all(vec![RemoteDataEntry::new("example1", format!("{pixels}:7"))])
        .await
        .unwrap();
    let app = app!(storage);

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/v1/training-examples")
            .set_json(json!({"population_name": "mnist"}))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: TrainingExamplesResponse =
        serde_json::from_slice(&to_bytes(resp.into_body()).await.unwrap()).unwrap();
    assert_eq!(body.records.len(), 1);
    assert_eq!(body.records[0].resumption_token, "token1");
    let bytes = STANDARD.decode(&body.records[0].example).unwrap();
    let example = <odp_domain::training::Example as prost::Message>::decode(bytes.as_slice()).unwrap();
    assert!(example.feature("y").is_some());
}

#[actix_web::test]
async fn metrics_endpoint_renders() {
    let app = app!(storage().await);
    let resp = test::call_service(&app, test::TestRequest::get().uri("/metrics").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[actix_web::test]
async fn forged_event_links_are_rejected_without_logging() {
    let storage = seeded_storage().await;
    let app = app!(storage.clone());
    let resp = test::call_service(
        &app,
        execute_request(json!({"app_params": {"keyword": "shoes"}})).to_request(),
    )
    .await;
    let executed: ExecuteResponse =
        serde_json::from_slice(&to_bytes(resp.into_body()).await.unwrap()).unwrap();
    let query_id = executed.query_id.unwrap();

    let redirect = EventToken {
        query_id,
        params: EventParams { event_type: 2 },
        action: EventAction::Redirect {
            url: "https://evil.example/phish".into(),
        },
    };
    let foreign = EventTokenSigner::new(b"someone-else").unwrap().encode(&redirect).unwrap();

    let genuine = signer()
        .encode(&EventToken {
            action: EventAction::Pixel,
            ..redirect.clone()
        })
        .unwrap();
    let (_, tag) = genuine.split_once('.').unwrap();
    let tampered = format!(
        "{}.{tag}",
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(&redirect).unwrap())
    );

    let unsigned = URL_SAFE_NO_PAD.encode(
        json!({
            "query_id": query_id,
            "params": {"type": 2},
            "action": {
                "kind": "respond",
                "mime_type": "text/html",
                "body": STANDARD.encode("<script>alert(1)</script>"),
            },
        })
        .to_string(),
    );

    for token in [foreign, tampered, unsigned] {
        let resp = test::call_service(
            &app,
            test::TestRequest::get()
                .uri(&format!("/api/v1/event/{token}"))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(resp.headers().get(header::LOCATION).is_none());
    }
    assert_eq!(joined_event_count(&storage).await, 0);

    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri(&format!("/api/v1/event/{genuine}"))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get(header::CONTENT_TYPE).unwrap(), "image/png");
    assert_eq!(joined_event_count(&storage).await, 1);
}

#[actix_web::test]
async fn ads_without_landing_page_render_and_log_clicks() {
    let storage = storage().await;
    storage
        .replace_all(vec![
            RemoteDataEntry::new("ad1", json!({"max_cpc": 2.0, "keywords": ["shoes"]}).to_string()),
            RemoteDataEntry::new("model1", json!({"weights": [1.0], "bias": 0.0}).to_string()),
        ])
        .await
        .unwrap();
    let app = app!(storage.clone());

    let resp = test::call_service(
        &app,
        execute_request(json!({"app_params": {"keyword": "shoes"}})).to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let executed: ExecuteResponse =
        serde_json::from_slice(&to_bytes(resp.into_body()).await.unwrap()).unwrap();
    assert_eq!(executed.rendering_keys, vec!["ad1"]);
    let query_id: QueryId = executed.query_id.unwrap();

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/v1/render")
            .set_json(json!({"query_id": query_id, "rendering_keys": ["ad1"]}))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let rendered: Value =
        serde_json::from_slice(&to_bytes(resp.into_body()).await.unwrap()).unwrap();
    let html = rendered["content"].as_str().unwrap().to_string();
    let click = html.split('"').nth(5).expect("click link").to_string();

    let resp = test::call_service(
        &app,
        test::TestRequest::get().uri(local_path(&click)).to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert!(resp.headers().get(header::LOCATION).is_none());

    let now = Utc::now();
    let events = storage
        .joined_events(now - Duration::hours(1), now + Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, 2);
    assert_eq!(row_f64(&events[0].data, log_keys::CLICK_COST), Some(4.0));
}
