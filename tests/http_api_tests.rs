// Integration tests for the HTTP control API
//
// Requests go through the full router (CORS, tracing, fallback) with
// `tower::ServiceExt::oneshot`, backed by the mock engines.

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use loqa_live::config::ServiceConfig;
use loqa_live::engine::{Engines, MockSpeechEngine, MockTranslationEngine};
use loqa_live::session::{PipelineSettings, SessionController};
use loqa_live::{create_router, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn app() -> (Router, SessionController) {
    let engines = Engines::new(Arc::new(MockSpeechEngine), Arc::new(MockTranslationEngine));
    let controller = SessionController::new(engines, PipelineSettings::default(), None);
    let router = create_router(AppState::new(controller.clone(), ServiceConfig::default()));
    (router, controller)
}

async fn send(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            request = request.header(header::CONTENT_TYPE, "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };

    let response = router
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn create(router: &Router, targets: &[&str]) -> String {
    let (status, body) = send(
        router,
        Method::POST,
        "/sessions",
        Some(json!({ "sourceLang": "en", "targetLangs": targets })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["sessionKey"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health_and_api_info() {
    let (router, _) = app();

    let (status, body) = send(&router, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "OK");
    assert!(body["timestamp"].is_string());

    let (status, body) = send(&router, Method::GET, "/api", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "loqa-live API");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_create_session() {
    let (router, controller) = app();

    let (status, body) = send(
        &router,
        Method::POST,
        "/sessions",
        Some(json!({ "sourceLang": "EN", "targetLangs": ["es", "fr", "es"] })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["state"], "created");
    assert_eq!(body["sourceLang"], "en");
    assert_eq!(body["targetLangs"], json!(["es", "fr"]));
    assert!(!body["sessionKey"].as_str().unwrap().is_empty());
    assert_eq!(controller.session_count(), 1);
}

#[tokio::test]
async fn test_create_session_rejects_bad_requests() {
    let (router, controller) = app();

    let (status, body) = send(
        &router,
        Method::POST,
        "/sessions",
        Some(json!({ "sourceLang": "en", "targetLangs": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "InvalidRequest");

    let (status, body) = send(
        &router,
        Method::POST,
        "/sessions",
        Some(json!({ "targetLangs": ["es"] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "InvalidRequest");

    assert_eq!(controller.session_count(), 0);
}

#[tokio::test]
async fn test_session_status_and_list() {
    let (router, _) = app();
    let key = create(&router, &["es"]).await;

    let (status, body) = send(&router, Method::GET, &format!("/sessions/{}", key), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sessionKey"], key.as_str());
    assert_eq!(body["state"], "created");
    assert_eq!(body["broadcasterConnected"], false);
    assert_eq!(body["subscribers"], 0);
    assert_eq!(body["counters"]["framesReceived"], 0);

    create(&router, &["fr"]).await;
    let (status, body) = send(&router, Method::GET, "/sessions", None).await;
    assert_eq!(status, StatusCode::OK);
    let sessions = body["sessions"].as_array().unwrap();
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0]["sessionKey"], key.as_str());
}

#[tokio::test]
async fn test_unknown_session_is_404() {
    let (router, _) = app();

    let (status, body) = send(&router, Method::GET, "/sessions/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "SessionNotFound");

    let (status, _) = send(&router, Method::POST, "/sessions/nope/end", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_end_session_twice() {
    let (router, _) = app();
    let key = create(&router, &["es"]).await;
    let uri = format!("/sessions/{}/end", key);

    for _ in 0..2 {
        let (status, body) = send(&router, Method::POST, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "ended");
        assert_eq!(body["sessionKey"], key.as_str());
    }

    let (status, _) = send(&router, Method::GET, &format!("/sessions/{}", key), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_update_languages() {
    let (router, controller) = app();
    let key = create(&router, &["es"]).await;
    let uri = format!("/sessions/{}/languages", key);

    let (status, body) = send(
        &router,
        Method::PATCH,
        &uri,
        Some(json!({ "targetLangs": ["de", "es"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sourceLang"], "en");
    assert_eq!(body["targetLangs"], json!(["de", "es"]));

    let session = controller
        .get(&loqa_live::SessionKey::from_string(key.clone()))
        .unwrap();
    assert_eq!(session.languages().target_langs, vec!["de", "es"]);

    let (status, body) = send(&router, Method::PATCH, &uri, Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "InvalidRequest");
}

#[tokio::test]
async fn test_language_change_after_end_rejected() {
    let (router, _) = app();
    let key = create(&router, &["es"]).await;
    send(&router, Method::POST, &format!("/sessions/{}/end", key), None).await;

    let (status, _) = send(
        &router,
        Method::PATCH,
        &format!("/sessions/{}/languages", key),
        Some(json!({ "targetLangs": ["fr"] })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_fallback_route() {
    let (router, _) = app();

    let (status, body) = send(&router, Method::GET, "/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Not Found");
    assert_eq!(body["message"], "Route GET /nope not found");
}

#[tokio::test]
async fn test_cors_allows_frontend_origin() {
    let (router, _) = app();

    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/sessions")
        .header(header::ORIGIN, "http://localhost:3000")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "http://localhost:3000"
    );
}
