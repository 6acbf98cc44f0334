use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;
use trashmap_store::{ResultStore, StoreConfig};
use trashmap_vision::GeminiClient;
use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::*;
use crate::middleware::AuthState;
use crate::scheduler::InsightRunner;

const BOUNDARY: &str = "trashmap-test-boundary";
const FRAME: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46];

struct Harness {
    app: Router,
    state: AppState,
    vision: MockServer,
    _dir: TempDir,
}

async fn harness_with(auth: AuthState, max_upload_bytes: usize) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let vision_server = MockServer::start().await;

    let store = Arc::new(
        ResultStore::open(StoreConfig::new(dir.path()))
            .await
            .expect("store"),
    );
    let vision = Arc::new(
        GeminiClient::with_base_url("test-key", 5, &vision_server.uri())
            .expect("client")
            .with_retry(0, 0),
    );
    let insights = Arc::new(InsightRunner::new(Arc::clone(&store), Arc::clone(&vision)));
    let state = AppState {
        store,
        vision,
        insights,
        max_upload_bytes,
    };
    let app = build_app(state.clone(), auth, default_rate_limit_state());

    Harness {
        app,
        state,
        vision: vision_server,
        _dir: dir,
    }
}

async fn harness() -> Harness {
    harness_with(AuthState::disabled(), 1024 * 1024).await
}

fn classifier_reply(text: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "candidates": [{"content": {"role": "model", "parts": [{"text": text}]}}]
    }))
}

async fn mount_classifier(server: &MockServer, template: ResponseTemplate, expected: u64) {
    Mock::given(method("POST"))
        .and(path_regex(r"/v1beta/models/.+:generateContent$"))
        .respond_with(template)
        .expect(expected)
        .mount(server)
        .await;
}

const ONE_BOTTLE: &str = r#"```json
[{"type": "plastic bottle", "material": "plastic", "confidence": 0.93,
  "disposal_category": "recyclable", "contamination": "low"}]
```"#;

fn metadata(detection_id: &str) -> String {
    json!({
        "detection_id": detection_id,
        "timestamp": "2025-05-01T14:30:00Z",
        "device_id": "walle-01",
        "gps": {"latitude": 43.6629, "longitude": -79.3957, "location_name": "Queen's Park"},
        "sensors": {"battery": 87, "temperature_c": 21.5}
    })
    .to_string()
}

fn multipart_body(image: Option<&[u8]>, metadata: Option<&str>) -> Vec<u8> {
    let mut body = Vec::new();
    if let Some(meta) = metadata {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"metadata\"\r\n\r\n{meta}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some(bytes) = image {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"frame.jpg\"\r\nContent-Type: image/jpeg\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn upload_request(image: Option<&[u8]>, metadata: Option<&str>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/v1/detections")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(image, metadata)))
        .expect("request")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}

fn with_method(verb: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(verb)
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body bytes");
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

#[test]
fn normalize_limit_applies_defaults_and_bounds() {
    assert_eq!(normalize_limit(None, 100, 500), 100);
    assert_eq!(normalize_limit(Some(0), 100, 500), 1);
    assert_eq!(normalize_limit(Some(-7), 100, 500), 1);
    assert_eq!(normalize_limit(Some(10_000), 100, 500), 500);
    assert_eq!(normalize_limit(Some(25), 100, 500), 25);
}

#[test]
fn api_error_codes_map_to_statuses() {
    let cases = [
        ("validation_error", StatusCode::BAD_REQUEST),
        ("not_found", StatusCode::NOT_FOUND),
        ("conflict", StatusCode::CONFLICT),
        ("payload_too_large", StatusCode::PAYLOAD_TOO_LARGE),
        ("classifier_unavailable", StatusCode::BAD_GATEWAY),
        ("internal_error", StatusCode::INTERNAL_SERVER_ERROR),
    ];
    for (code, status) in cases {
        let response = ApiError::new("req-1", code, "msg").into_response();
        assert_eq!(response.status(), status, "{code}");
    }
}

#[tokio::test]
async fn health_reports_store_status() {
    let h = harness().await;
    let (status, json) = send(&h.app, get("/api/v1/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["status"], "ok");
    assert_eq!(json["data"]["store"], "ok");
    assert_eq!(json["data"]["detections"], 0);
}

#[tokio::test]
async fn bearer_auth_guards_api_but_not_health() {
    let auth = AuthState::from_config(&["robot-key".to_string()], false).expect("auth");
    let h = harness_with(auth, 1024).await;

    let (status, _) = send(&h.app, get("/api/v1/health")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = send(&h.app, get("/api/v1/dashboard")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"]["code"], "unauthorized");

    let request = Request::builder()
        .uri("/api/v1/dashboard")
        .header(header::AUTHORIZATION, "Bearer robot-key")
        .body(Body::empty())
        .expect("request");
    let (status, _) = send(&h.app, request).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn request_id_is_echoed_in_meta_and_header() {
    let h = harness().await;
    let request = Request::builder()
        .uri("/api/v1/stats")
        .header("x-request-id", "req-abc")
        .body(Body::empty())
        .expect("request");
    let response = h.app.clone().oneshot(request).await.expect("response");
    assert_eq!(
        response.headers().get("x-request-id").unwrap(),
        "req-abc"
    );
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["meta"]["request_id"], "req-abc");
}

#[tokio::test]
async fn upload_classifies_and_stores_detection() {
    let h = harness().await;
    mount_classifier(&h.vision, classifier_reply(ONE_BOTTLE), 1).await;

    let meta = metadata("det_qp_001");
    let (status, json) = send(&h.app, upload_request(Some(FRAME), Some(&meta))).await;
    assert_eq!(status, StatusCode::CREATED, "{json}");
    assert_eq!(json["data"]["detection_id"], "det_qp_001");
    assert_eq!(json["data"]["items_found"], 1);

    let detection = &json["data"]["detection"];
    assert_eq!(detection["image_url"], "/images/det_qp_001.jpeg");
    assert_eq!(detection["detections"][0]["type"], "plastic bottle");
    assert_eq!(detection["detections"][0]["disposal_category"], "recyclable");
    assert_eq!(detection["metadata"]["device_id"], "walle-01");
    assert_eq!(detection["metadata"]["model_version"], "gemini-2.0-flash");
    assert_eq!(detection["sensors"]["battery"], 87);
    assert_eq!(detection["timestamp"], "2025-05-01T14:30:00Z");

    let (status, json) = send(&h.app, get("/api/v1/detections/det_qp_001")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["gps"]["location_name"], "Queen's Park");

    let response = h
        .app
        .clone()
        .oneshot(get("/images/det_qp_001.jpeg"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "image/jpeg"
    );
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], FRAME);

    let (_, json) = send(&h.app, get("/api/v1/dashboard")).await;
    assert_eq!(json["data"]["detections"].as_array().unwrap().len(), 1);
    assert_eq!(json["data"]["heatmap"].as_array().unwrap().len(), 1);
    assert_eq!(json["data"]["stats"]["total_items"], 1);
    assert!(json["data"]["latest_insight"].is_null());
}

#[tokio::test]
async fn upload_without_id_gets_generated_one() {
    let h = harness().await;
    mount_classifier(&h.vision, classifier_reply(ONE_BOTTLE), 1).await;

    let meta = json!({"gps": {"latitude": 10.0, "longitude": 20.0}}).to_string();
    let (status, json) = send(&h.app, upload_request(Some(FRAME), Some(&meta))).await;
    assert_eq!(status, StatusCode::CREATED);
    let id = json["data"]["detection_id"].as_str().unwrap();
    assert!(id.starts_with("det_"), "{id}");
    assert_eq!(json["data"]["detection"]["metadata"]["device_id"], "unknown");
}

#[tokio::test]
async fn frame_without_trash_is_not_stored() {
    let h = harness().await;
    mount_classifier(&h.vision, classifier_reply("[]"), 1).await;

    let meta = metadata("det_clean");
    let (status, json) = send(&h.app, upload_request(Some(FRAME), Some(&meta))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["items_found"], 0);
    assert!(json["data"]["detection"].is_null());
    assert_eq!(h.state.store.detection_count().await, 0);
}

#[tokio::test]
async fn classifier_failure_writes_nothing() {
    let h = harness().await;
    mount_classifier(&h.vision, ResponseTemplate::new(503), 1).await;

    let meta = metadata("det_fail");
    let (status, json) = send(&h.app, upload_request(Some(FRAME), Some(&meta))).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json["error"]["code"], "classifier_unavailable");

    assert_eq!(h.state.store.detection_count().await, 0);
    let (status, _) = send(&h.app, get("/images/det_fail.jpeg")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_metadata_is_rejected_before_classification() {
    let h = harness().await;
    mount_classifier(&h.vision, classifier_reply(ONE_BOTTLE), 0).await;

    let cases = [
        json!({"detection_id": "det_nogps"}).to_string(),
        json!({"gps": {"latitude": 91.0, "longitude": 0.0}}).to_string(),
        json!({"gps": {"latitude": 0.0, "longitude": -180.5}}).to_string(),
        json!({"detection_id": "../etc", "gps": {"latitude": 0.0, "longitude": 0.0}}).to_string(),
        json!({"timestamp": "yesterday", "gps": {"latitude": 0.0, "longitude": 0.0}}).to_string(),
        "not json".to_string(),
    ];
    for meta in cases {
        let (status, json) = send(&h.app, upload_request(Some(FRAME), Some(&meta))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{meta}");
        assert_eq!(json["error"]["code"], "validation_error", "{meta}");
    }

    let meta = metadata("det_noimage");
    let (status, _) = send(&h.app, upload_request(None, Some(&meta))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&h.app, upload_request(Some(FRAME), None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&h.app, upload_request(Some(b"".as_slice()), Some(&meta))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn oversized_image_is_rejected() {
    let h = harness_with(AuthState::disabled(), 4).await;
    mount_classifier(&h.vision, classifier_reply(ONE_BOTTLE), 0).await;

    let meta = metadata("det_big");
    let (status, json) = send(&h.app, upload_request(Some(FRAME), Some(&meta))).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(json["error"]["code"], "payload_too_large");
}

#[tokio::test]
async fn duplicate_id_conflicts_without_second_classification() {
    let h = harness().await;
    mount_classifier(&h.vision, classifier_reply(ONE_BOTTLE), 1).await;

    let meta = metadata("det_twice");
    let (status, _) = send(&h.app, upload_request(Some(FRAME), Some(&meta))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, json) = send(&h.app, upload_request(Some(FRAME), Some(&meta))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"]["code"], "conflict");
    assert_eq!(h.state.store.detection_count().await, 1);
}

#[tokio::test]
async fn list_is_newest_first_and_limit_is_clamped() {
    let h = harness().await;
    mount_classifier(&h.vision, classifier_reply(ONE_BOTTLE), 3).await;

    for (id, ts) in [
        ("det_a", "2025-05-01T08:00:00Z"),
        ("det_b", "2025-05-01T09:00:00Z"),
        ("det_c", "2025-05-01T10:00:00Z"),
    ] {
        let meta = json!({
            "detection_id": id,
            "timestamp": ts,
            "gps": {"latitude": 43.65, "longitude": -79.38}
        })
        .to_string();
        let (status, _) = send(&h.app, upload_request(Some(FRAME), Some(&meta))).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (_, json) = send(&h.app, get("/api/v1/detections")).await;
    let ids: Vec<&str> = json["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["detection_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["det_c", "det_b", "det_a"]);

    let (_, json) = send(&h.app, get("/api/v1/detections?limit=0")).await;
    assert_eq!(json["data"].as_array().unwrap().len(), 1);

    let (_, json) = send(&h.app, get("/api/v1/detections?limit=2")).await;
    assert_eq!(json["data"].as_array().unwrap().len(), 2);

    let (_, json) = send(&h.app, get("/api/v1/heatmap")).await;
    assert_eq!(json["data"]["total_points"], 1);
    let point = &json["data"]["points"][0];
    assert!((point[2].as_f64().unwrap() - 0.3).abs() < 1e-9);

    let (status, json) = send(&h.app, with_method("DELETE", "/api/v1/detections")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["cleared"], 3);
    assert_eq!(h.state.store.detection_count().await, 0);
}

#[tokio::test]
async fn unknown_detection_is_not_found() {
    let h = harness().await;
    let (status, json) = send(&h.app, get("/api/v1/detections/det_missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"]["code"], "not_found");
}

#[tokio::test]
async fn image_route_rejects_traversal() {
    let h = harness().await;
    let (status, json) = send(&h.app, get("/images/..%2Fdetections.json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "validation_error");
}

#[tokio::test]
async fn predictions_need_more_data() {
    let h = harness().await;
    let (status, json) = send(&h.app, get("/api/v1/predictions")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["message"], "Need more data for predictions");
    assert_eq!(json["data"]["peak_trash_hours"], json!([]));
}

#[tokio::test]
async fn stats_on_empty_store_are_zero() {
    let h = harness().await;
    let (status, json) = send(&h.app, get("/api/v1/stats")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["total_detections"], 0);
    assert_eq!(json["data"]["trash_types"], json!({}));
}

#[tokio::test]
async fn insight_run_on_demand_then_latest() {
    let h = harness().await;

    let (status, _) = send(&h.app, get("/api/v1/insights/latest")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, json) = send(&h.app, with_method("POST", "/api/v1/insights/run")).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["data"]["source"], "empty");
    let first_id = json["data"]["insight_id"].clone();

    let (status, json) = send(&h.app, get("/api/v1/insights/latest")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["insight_id"], first_id);

    let (_, json) = send(&h.app, get("/api/v1/insights?limit=5")).await;
    assert_eq!(json["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn insight_run_conflicts_while_another_is_running() {
    let h = harness().await;
    let guard = h.state.insights.hold_guard().await;

    let (status, json) = send(&h.app, with_method("POST", "/api/v1/insights/run")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"]["code"], "conflict");

    drop(guard);
    let (status, _) = send(&h.app, with_method("POST", "/api/v1/insights/run")).await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn reply_listing_only_unusable_items_is_a_classifier_failure() {
    let h = harness().await;
    mount_classifier(
        &h.vision,
        classifier_reply(r#"[{"material": "plastic"}, {"type": ""}]"#),
        1,
    )
    .await;

    let meta = metadata("det_garbled");
    let (status, json) = send(&h.app, upload_request(Some(FRAME), Some(&meta))).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json["error"]["code"], "classifier_unavailable");
    assert_eq!(h.state.store.detection_count().await, 0);
}

#[tokio::test]
async fn loosely_typed_items_are_still_stored() {
    let h = harness().await;
    let reply = r#"[{"type": "paper cup", "material": "paper", "confidence": "0.8",
                     "disposal_category": null, "contamination": null}]"#;
    mount_classifier(&h.vision, classifier_reply(reply), 1).await;

    let meta = metadata("det_loose");
    let (status, json) = send(&h.app, upload_request(Some(FRAME), Some(&meta))).await;
    assert_eq!(status, StatusCode::CREATED, "{json}");
    let item = &json["data"]["detection"]["detections"][0];
    assert_eq!(item["disposal_category"], "unknown");
    assert_eq!(item["confidence"], 0.8);
}

#[tokio::test]
async fn non_multipart_upload_gets_json_validation_error() {
    let h = harness().await;
    mount_classifier(&h.vision, classifier_reply(ONE_BOTTLE), 0).await;

    let requests = [
        Request::builder()
            .method("POST")
            .uri("/api/v1/detections")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(metadata("det_json")))
            .expect("request"),
        Request::builder()
            .method("POST")
            .uri("/api/v1/detections")
            .header(header::CONTENT_TYPE, "multipart/form-data")
            .body(Body::from(multipart_body(Some(FRAME), None)))
            .expect("request"),
    ];
    for request in requests {
        let (status, json) = send(&h.app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["code"], "validation_error");
        assert!(json["meta"]["request_id"].is_string());
    }
}

#[tokio::test]
async fn malformed_limit_gets_json_validation_error() {
    let h = harness().await;
    for uri in ["/api/v1/detections?limit=abc", "/api/v1/insights?limit=1.5"] {
        let (status, json) = send(&h.app, get(uri)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(json["error"]["code"], "validation_error", "{uri}");
    }
}
