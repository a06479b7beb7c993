//! Integration tests for the HTTP API, driven through the router without a socket

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use redmoon::config::Config;
use redmoon::core::{Catalog, Dispatcher};
use redmoon::llm::{
    ChatReply, ChatRequest, ImageRequest, ImageResult, LlmError, Provider, ProviderRegistry,
    SimProvider,
};
use redmoon::transport::http::{router, AppState, SESSION_HEADER};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tower::ServiceExt;

/// Fails chat with an authorization error and images with a network error
struct Broken;

#[async_trait]
impl Provider for Broken {
    fn name(&self) -> &str {
        "broken"
    }

    async fn chat(&self, _request: &ChatRequest) -> Result<ChatReply, LlmError> {
        Err(LlmError::Unauthorized("invalid api key".into()))
    }

    async fn generate_image(&self, _request: &ImageRequest) -> Result<ImageResult, LlmError> {
        Err(LlmError::Network("connection refused".into()))
    }
}

struct UrlImages;

#[async_trait]
impl Provider for UrlImages {
    fn name(&self) -> &str {
        "url"
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatReply, LlmError> {
        Ok(ChatReply::new(format!("**echo** {}", request.message)))
    }

    async fn generate_image(&self, _request: &ImageRequest) -> Result<ImageResult, LlmError> {
        Ok(ImageResult::Url("http://x/y.png".into()))
    }
}

/// Answers only when released
struct Gate {
    release: Arc<Notify>,
}

#[async_trait]
impl Provider for Gate {
    fn name(&self) -> &str {
        "gate"
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatReply, LlmError> {
        self.release.notified().await;
        Ok(ChatReply::new(format!("re: {}", request.message)))
    }

    async fn generate_image(&self, _request: &ImageRequest) -> Result<ImageResult, LlmError> {
        self.release.notified().await;
        Ok(ImageResult::Url("http://x/slow.png".into()))
    }
}

fn app_with(provider: Arc<dyn Provider>) -> axum::Router {
    let config = Config::default();
    let registry = ProviderRegistry::new()
        .with_provider("default", Arc::clone(&provider))
        .with_provider("search", Arc::clone(&provider))
        .with_provider("flux-schnell", provider);
    let state = AppState::new(Catalog::from_config(&config), Dispatcher::new(registry));
    router(Arc::new(state))
}

fn sim_app() -> axum::Router {
    let state = AppState::from_config(&Config::default()).unwrap();
    router(Arc::new(state))
}

async fn send(app: &axum::Router, method: &str, uri: &str, session: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(SESSION_HEADER, session);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_health() {
    let app = sim_app();
    let (status, body) = send(&app, "GET", "/health", "s", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["version"]
        .as_str()
        .unwrap()
        .starts_with(env!("CARGO_PKG_VERSION")));
}

#[tokio::test]
async fn test_models_hide_backends() {
    let app = sim_app();
    let (status, body) = send(&app, "GET", "/api/models", "s", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["chat_models"][1], json!({"id": "search", "name": "Search", "websearch": true}));
    assert_eq!(
        body["image_models"][0],
        json!({"id": "flux-schnell", "name": "Flux Schnell", "provider": "Simulated"})
    );
}

#[tokio::test]
async fn test_chat_selects_model_and_records_transcript() {
    let app = app_with(Arc::new(UrlImages));
    let (status, body) = send(
        &app,
        "POST",
        "/api/chat",
        "a",
        Some(json!({"model_id": "default", "message": "hello"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response"], "**echo** hello");
    assert_eq!(body["html"], "<strong>echo</strong> hello");

    let (_, view) = send(&app, "GET", "/api/session", "a", None).await;
    assert_eq!(view["active_chat_model"], "default");
    assert_eq!(view["status"], "Default");
    assert_eq!(view["typing"], false);
    assert_eq!(view["units"].as_array().unwrap().len(), 2);
    assert_eq!(view["units"][0]["role"], "user");

    // Other sessions are untouched
    let (_, other) = send(&app, "GET", "/api/session", "b", None).await;
    assert_eq!(other["units"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_chat_validation_status_codes() {
    let app = sim_app();
    let (status, body) = send(&app, "POST", "/api/chat", "s", Some(json!({"model_id": "default"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, _) = send(
        &app,
        "POST",
        "/api/chat",
        "s",
        Some(json!({"model_id": "nope", "message": "hi"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&app, "POST", "/api/session/theme", "s", Some(json!({"theme": "sepia"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("sepia"));
}

#[tokio::test]
async fn test_provider_and_transport_errors() {
    let app = app_with(Arc::new(Broken));
    let (status, body) = send(
        &app,
        "POST",
        "/api/chat",
        "s",
        Some(json!({"model_id": "default", "message": "hi"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["error"].as_str().unwrap().contains("invalid api key"));

    let (status, body) = send(
        &app,
        "POST",
        "/api/generate-image",
        "s",
        Some(json!({"model_id": "flux-schnell", "prompt": "a cat", "aspect_ratio": "1:1"})),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(!body["error"].as_str().unwrap().contains("refused"));

    let (_, view) = send(&app, "GET", "/api/session", "s", None).await;
    assert_eq!(view["image_area"]["state"], "alert");
    assert_eq!(view["typing"], false);
}

#[tokio::test]
async fn test_generate_image_shapes() {
    let app = app_with(Arc::new(UrlImages));
    let (status, body) = send(
        &app,
        "POST",
        "/api/generate-image",
        "s",
        Some(json!({"model_id": "flux-schnell", "prompt": "a cat", "aspect_ratio": "1:1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"image_url": "http://x/y.png"}));

    let app = sim_app();
    let (status, body) = send(
        &app,
        "POST",
        "/api/generate-image",
        "s",
        Some(json!({"model_id": "flux-schnell", "prompt": "a cat"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["content_type"], "image/png");
    assert!(body["image_data"].as_str().unwrap().starts_with("iVBOR"));

    let (status, _) = send(
        &app,
        "POST",
        "/api/generate-image",
        "s",
        Some(json!({"model_id": "flux-schnell", "prompt": "a cat", "aspect_ratio": "4:3"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_clear_empties_transcript() {
    let app = sim_app();
    send(
        &app,
        "POST",
        "/api/chat",
        "s",
        Some(json!({"model_id": "default", "message": "hello"})),
    )
    .await;

    let (status, body) = send(&app, "POST", "/api/clear", "s", Some(json!({"model_id": "default"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({}));

    let (_, view) = send(&app, "GET", "/api/session", "s", None).await;
    assert!(view["units"].as_array().unwrap().is_empty());
    assert_eq!(view["active_chat_model"], "default");
}

#[tokio::test]
async fn test_presentation_endpoints() {
    let app = sim_app();

    let (_, view) = send(&app, "GET", "/api/session", "s", None).await;
    assert_eq!(view["theme"], "dark");
    assert_eq!(view["status"], "Select a chat model");
    assert_eq!(view["websearch"], Value::Null);

    let (status, view) = send(&app, "POST", "/api/session/theme", "s", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["theme"], "light");
    assert!(view["palette"]["background"].as_str().unwrap().starts_with('#'));

    let (_, view) = send(&app, "POST", "/api/session/theme", "s", Some(json!({"theme": "light"}))).await;
    assert_eq!(view["theme"], "light");

    let (_, view) = send(
        &app,
        "POST",
        "/api/session/select",
        "s",
        Some(json!({"mode": "chat", "model_id": "search"})),
    )
    .await;
    assert_eq!(view["websearch"], false);

    let (status, view) = send(&app, "POST", "/api/session/websearch", "s", Some(json!({"enabled": true}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["websearch"], true);

    let (_, view) = send(&app, "POST", "/api/session/mode", "s", Some(json!({"mode": "image"}))).await;
    assert_eq!(view["mode"], "image");
    assert_eq!(view["status"], "Select an image model");

    let (status, _) = send(
        &app,
        "POST",
        "/api/session/select",
        "s",
        Some(json!({"mode": "image", "model_id": "default"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_websearch_rejected_for_plain_model() {
    let app = sim_app();
    send(
        &app,
        "POST",
        "/api/session/select",
        "s",
        Some(json!({"mode": "chat", "model_id": "default"})),
    )
    .await;
    let (status, _) = send(&app, "POST", "/api/session/websearch", "s", Some(json!({"enabled": true}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_end_session_discards_state() {
    let app = app_with(Arc::new(SimProvider::new("sim")));
    send(
        &app,
        "POST",
        "/api/chat",
        "gone",
        Some(json!({"model_id": "default", "message": "hello"})),
    )
    .await;

    let (status, _) = send(&app, "DELETE", "/api/session", "gone", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, view) = send(&app, "GET", "/api/session", "gone", None).await;
    assert!(view["units"].as_array().unwrap().is_empty());
    assert_eq!(view["active_chat_model"], Value::Null);
}

/// Poll the session view until a request is in flight
async fn wait_for_typing(app: &axum::Router, session: &str) {
    for _ in 0..200 {
        let (_, view) = send(app, "GET", "/api/session", session, None).await;
        if view["typing"] == true {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("request never went in flight");
}

#[tokio::test]
async fn test_rejected_chat_keeps_selection_and_transcript() {
    let release = Arc::new(Notify::new());
    let app = app_with(Arc::new(Gate {
        release: Arc::clone(&release),
    }));

    release.notify_one();
    let (status, _) = send(
        &app,
        "POST",
        "/api/chat",
        "s",
        Some(json!({"model_id": "default", "message": "first"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let pending = {
        let app = app.clone();
        tokio::spawn(async move {
            send(
                &app,
                "POST",
                "/api/chat",
                "s",
                Some(json!({"model_id": "default", "message": "second"})),
            )
            .await
        })
    };
    wait_for_typing(&app, "s").await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/chat",
        "s",
        Some(json!({"model_id": "search", "message": "intruder"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("in progress"));

    let (_, view) = send(&app, "GET", "/api/session", "s", None).await;
    assert_eq!(view["active_chat_model"], "default");
    assert_eq!(view["units"].as_array().unwrap().len(), 3);

    release.notify_one();
    let (status, body) = pending.await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response"], "re: second");

    let (_, view) = send(&app, "GET", "/api/session", "s", None).await;
    assert_eq!(view["active_chat_model"], "default");
    assert_eq!(view["typing"], false);
    let units = view["units"].as_array().unwrap();
    assert_eq!(units.len(), 4);
    assert_eq!(units[3]["html"], "re: second");
}

#[tokio::test]
async fn test_rejected_image_keeps_image_selection() {
    let release = Arc::new(Notify::new());
    let app = app_with(Arc::new(Gate {
        release: Arc::clone(&release),
    }));

    let pending = {
        let app = app.clone();
        tokio::spawn(async move {
            send(
                &app,
                "POST",
                "/api/chat",
                "s",
                Some(json!({"model_id": "default", "message": "slow"})),
            )
            .await
        })
    };
    wait_for_typing(&app, "s").await;

    let (status, _) = send(
        &app,
        "POST",
        "/api/generate-image",
        "s",
        Some(json!({"model_id": "flux-schnell", "prompt": "a cat"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, view) = send(&app, "GET", "/api/session", "s", None).await;
    assert_eq!(view["active_image_model"], Value::Null);
    assert_eq!(view["image_area"]["state"], "idle");

    release.notify_one();
    let (status, _) = pending.await.unwrap();
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_reading_unknown_session_stores_nothing() {
    let state = Arc::new(AppState::from_config(&Config::default()).unwrap());
    let app = router(Arc::clone(&state));

    let (status, view) = send(&app, "GET", "/api/session", "stranger", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["theme"], "dark");
    assert_eq!(state.session_count(), 0);

    send(&app, "POST", "/api/session/mode", "stranger", Some(json!({"mode": "image"}))).await;
    assert_eq!(state.session_count(), 1);
}

#[tokio::test]
async fn test_picker_endpoint() {
    let app = sim_app();
    let (_, view) = send(&app, "GET", "/api/session", "s", None).await;
    assert_eq!(view["open_picker"], Value::Null);

    let (status, view) = send(
        &app,
        "POST",
        "/api/session/picker",
        "s",
        Some(json!({"picker": "chat_model_picker"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["open_picker"], "chat_model_picker");

    let (_, view) = send(&app, "POST", "/api/session/picker", "s", Some(json!({"picker": "side_menu"}))).await;
    assert_eq!(view["open_picker"], "side_menu");

    let (_, view) = send(&app, "POST", "/api/session/picker", "s", Some(json!({"picker": "side_menu"}))).await;
    assert_eq!(view["open_picker"], Value::Null);

    send(&app, "POST", "/api/session/picker", "s", Some(json!({"picker": "side_menu"}))).await;
    let (_, view) = send(&app, "POST", "/api/session/mode", "s", Some(json!({"mode": "image"}))).await;
    assert_eq!(view["open_picker"], Value::Null);

    let (status, _) = send(&app, "POST", "/api/session/picker", "s", Some(json!({"picker": "dropdown"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
