//! HTTP API consumed by the web UI
//!
//! Every request belongs to a session named by the `x-session-id` header
//! (`default` when absent). Sessions are created by the first request that
//! changes them; reading an unknown session returns a fresh view without
//! storing anything. A session ends with `DELETE /api/session` or after
//! `server.session_ttl_secs` without requests.

use crate::config::Config;
use crate::core::{
    lock, markdown, Catalog, DispatchError, Dispatcher, ImageUnit, MemoryThemeStore, Mode, Picker,
    PresentationController, Session, SharedSession, Theme, View,
};
use crate::llm::ProviderRegistry;
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tower_http::cors::{Any, CorsLayer};

pub const SESSION_HEADER: &str = "x-session-id";
const DEFAULT_SESSION: &str = "default";

/// One browser session: its state plus its presentation controller
pub struct SessionHandle {
    pub session: SharedSession,
    presentation: Mutex<PresentationController<MemoryThemeStore>>,
    last_seen: Mutex<Instant>,
}

impl SessionHandle {
    fn new(catalog: Arc<Catalog>) -> Self {
        let presentation = PresentationController::new(MemoryThemeStore::new());
        let mut session = Session::new(catalog);
        presentation.restore(&mut session);
        Self {
            session: session.shared(),
            presentation: Mutex::new(presentation),
            last_seen: Mutex::new(Instant::now()),
        }
    }

    fn view(&self) -> View {
        self.present(|ui, session| ui.render(session))
    }

    fn touch(&self) {
        *self.last_seen.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    /// Idle for at least `ttl` with nothing in flight
    fn is_expired(&self, ttl: Duration) -> bool {
        let idle = self
            .last_seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .elapsed();
        idle >= ttl && !lock(&self.session).is_in_flight()
    }

    /// Run `f` with the presentation controller and the session both locked
    fn present<T>(
        &self,
        f: impl FnOnce(&mut PresentationController<MemoryThemeStore>, &mut Session) -> T,
    ) -> T {
        let mut presentation = self.presentation.lock().unwrap_or_else(|e| e.into_inner());
        let mut session = lock(&self.session);
        f(&mut presentation, &mut session)
    }
}

/// Shared application state
pub struct AppState {
    catalog: Arc<Catalog>,
    dispatcher: Dispatcher,
    sessions: DashMap<String, Arc<SessionHandle>>,
}

impl AppState {
    pub fn new(catalog: Catalog, dispatcher: Dispatcher) -> Self {
        Self {
            catalog: Arc::new(catalog),
            dispatcher,
            sessions: DashMap::new(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let registry = ProviderRegistry::from_config(config)?;
        Ok(Self::new(
            Catalog::from_config(config),
            Dispatcher::new(registry),
        ))
    }

    fn session_id(headers: &HeaderMap) -> String {
        headers
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .unwrap_or(DEFAULT_SESSION)
            .to_string()
    }

    /// Look up the caller's session, creating it on first use
    fn session(&self, headers: &HeaderMap) -> Arc<SessionHandle> {
        let id = Self::session_id(headers);
        let entry = self.sessions.entry(id.clone()).or_insert_with(|| {
            tracing::debug!("New session {}", id);
            Arc::new(SessionHandle::new(Arc::clone(&self.catalog)))
        });
        let handle = Arc::clone(entry.value());
        drop(entry);
        handle.touch();
        handle
    }

    /// The caller's view, without creating a session for an unknown id
    fn peek(&self, headers: &HeaderMap) -> View {
        let id = Self::session_id(headers);
        let existing = self.sessions.get(&id).map(|entry| Arc::clone(entry.value()));
        match existing {
            Some(handle) => {
                handle.touch();
                handle.view()
            }
            None => SessionHandle::new(Arc::clone(&self.catalog)).view(),
        }
    }

    /// Drop sessions idle for at least `ttl`; returns how many went
    pub fn expire_idle(&self, ttl: Duration) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, handle| !handle.is_expired(ttl));
        let removed = before.saturating_sub(self.sessions.len());
        if removed > 0 {
            tracing::debug!("Expired {} idle session(s)", removed);
        }
        removed
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

/// Health check response
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Debug, Deserialize)]
struct ChatBody {
    #[serde(default)]
    model_id: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    websearch: Option<bool>,
}

#[derive(Debug, Serialize)]
struct ChatResponse {
    response: String,
    /// The reply as rendered for display
    html: String,
}

#[derive(Debug, Deserialize)]
struct ClearBody {
    #[serde(default)]
    model_id: String,
}

#[derive(Debug, Deserialize)]
struct ImageBody {
    #[serde(default)]
    model_id: String,
    #[serde(default)]
    prompt: String,
    #[serde(default)]
    negative_prompt: Option<String>,
    #[serde(default = "default_aspect_ratio")]
    aspect_ratio: String,
}

fn default_aspect_ratio() -> String {
    "1:1".to_string()
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ImageResponse {
    Url {
        image_url: String,
    },
    Inline {
        image_data: String,
        content_type: String,
    },
}

impl From<ImageUnit> for ImageResponse {
    fn from(unit: ImageUnit) -> Self {
        let image_data = unit.inline_base64();
        match unit {
            ImageUnit::Url { url } => ImageResponse::Url { image_url: url },
            ImageUnit::Inline { content_type, .. } => ImageResponse::Inline {
                image_data: image_data.unwrap_or_default(),
                content_type,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct SelectBody {
    mode: String,
    model_id: String,
}

#[derive(Debug, Deserialize)]
struct ModeBody {
    mode: String,
}

#[derive(Debug, Deserialize)]
struct ThemeBody {
    #[serde(default)]
    theme: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WebsearchBody {
    enabled: bool,
}

#[derive(Debug, Deserialize)]
struct PickerBody {
    /// Absent or null closes every dropdown
    #[serde(default)]
    picker: Option<String>,
}

fn error_json(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({ "error": message.into() })),
    )
        .into_response()
}

fn dispatch_error(err: &DispatchError) -> Response {
    let status = match err {
        DispatchError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        DispatchError::Provider(_) => StatusCode::BAD_GATEWAY,
        DispatchError::Transport(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    error_json(status, err.user_message())
}

fn bad_body(rejection: JsonRejection) -> Response {
    error_json(
        StatusCode::BAD_REQUEST,
        format!("Invalid request body: {}", rejection.body_text()),
    )
}

fn parse_mode(mode: &str) -> Result<Mode, Response> {
    mode.parse()
        .map_err(|e: String| error_json(StatusCode::BAD_REQUEST, e))
}

/// 400 for a missing id, 404 for one the catalog does not list
fn check_model(catalog: &Catalog, mode: Mode, model_id: &str) -> Result<(), Response> {
    if model_id.trim().is_empty() {
        return Err(error_json(StatusCode::BAD_REQUEST, "Missing model_id"));
    }
    if !catalog.contains(mode, model_id) {
        return Err(error_json(StatusCode::NOT_FOUND, "Model not found"));
    }
    Ok(())
}

/// Adopt `model_id` as the session's selection for `mode`
fn select(handle: &SessionHandle, catalog: &Catalog, mode: Mode, model_id: &str) -> Result<(), Response> {
    check_model(catalog, mode, model_id)?;
    lock(&handle.session)
        .select_model(mode, model_id)
        .map_err(|e| dispatch_error(&e))
}

/// Build the router (exposed for tests)
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/models", get(list_models))
        .route("/api/chat", post(handle_chat))
        .route("/api/clear", post(handle_clear))
        .route("/api/generate-image", post(handle_generate_image))
        .route("/api/session", get(get_session).delete(end_session))
        .route("/api/session/select", post(select_model))
        .route("/api/session/mode", post(set_mode))
        .route("/api/session/theme", post(set_theme))
        .route("/api/session/websearch", post(set_websearch))
        .route("/api/session/picker", post(toggle_picker))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the HTTP server
pub async fn run_http_server(host: &str, port: u16, config: &Config) -> Result<()> {
    let state = Arc::new(AppState::from_config(config)?);
    tracing::info!(
        "Serving {} chat and {} image models",
        state.catalog.chat_models.len(),
        state.catalog.image_models.len()
    );

    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", host, port))?;
    tracing::info!("HTTP server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    if config.server.session_ttl_secs > 0 {
        spawn_session_sweeper(
            Arc::clone(&state),
            Duration::from_secs(config.server.session_ttl_secs),
        );
    }
    axum::serve(listener, router(state)).await?;

    Ok(())
}

/// Periodically drop idle sessions
fn spawn_session_sweeper(state: Arc<AppState>, ttl: Duration) {
    let period = ttl.min(Duration::from_secs(60)).max(Duration::from_secs(1));
    tracing::debug!("Sessions expire after {:?} idle", ttl);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            state.expire_idle(ttl);
        }
    });
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: format!(
            "{}{}",
            env!("CARGO_PKG_VERSION"),
            env!("REDMOON_VERSION_SUFFIX")
        ),
    })
}

async fn list_models(State(state): State<Arc<AppState>>) -> Json<Catalog> {
    Json(state.catalog.as_ref().clone())
}

async fn handle_chat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<ChatBody>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };
    if req.message.trim().is_empty() {
        return error_json(StatusCode::BAD_REQUEST, "Missing required fields");
    }

    if let Err(response) = check_model(&state.catalog, Mode::Chat, &req.model_id) {
        return response;
    }

    let handle = state.session(&headers);
    match state
        .dispatcher
        .select_and_send_chat(&handle.session, &req.model_id, &req.message, req.websearch)
        .await
    {
        Ok(reply) => Json(ChatResponse {
            html: markdown::to_html(&reply.text),
            response: reply.text,
        })
        .into_response(),
        Err(e) => dispatch_error(&e),
    }
}

async fn handle_clear(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<ClearBody>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };

    let handle = state.session(&headers);
    match state.dispatcher.clear(&handle.session, &req.model_id).await {
        Ok(()) => Json(serde_json::json!({})).into_response(),
        Err(e) => dispatch_error(&e),
    }
}

async fn handle_generate_image(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<ImageBody>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };
    if req.prompt.trim().is_empty() {
        return error_json(StatusCode::BAD_REQUEST, "Missing required fields");
    }

    if let Err(response) = check_model(&state.catalog, Mode::Image, &req.model_id) {
        return response;
    }

    let handle = state.session(&headers);
    match state
        .dispatcher
        .select_and_generate_image(
            &handle.session,
            &req.model_id,
            &req.prompt,
            req.negative_prompt.as_deref(),
            &req.aspect_ratio,
        )
        .await
    {
        Ok(unit) => Json(ImageResponse::from(unit)).into_response(),
        Err(e) => dispatch_error(&e),
    }
}

async fn get_session(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Json<View> {
    Json(state.peek(&headers))
}

async fn end_session(State(state): State<Arc<AppState>>, headers: HeaderMap) -> StatusCode {
    let id = AppState::session_id(&headers);
    if state.sessions.remove(&id).is_some() {
        tracing::debug!("Ended session {}", id);
    }
    StatusCode::NO_CONTENT
}

async fn select_model(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<SelectBody>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };
    let mode = match parse_mode(&req.mode) {
        Ok(mode) => mode,
        Err(response) => return response,
    };

    let handle = state.session(&headers);
    match select(&handle, &state.catalog, mode, &req.model_id) {
        Ok(()) => Json(handle.view()).into_response(),
        Err(response) => response,
    }
}

async fn set_mode(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<ModeBody>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };
    let mode = match parse_mode(&req.mode) {
        Ok(mode) => mode,
        Err(response) => return response,
    };

    let handle = state.session(&headers);
    handle.present(|ui, session| ui.switch_mode(session, mode));
    Json(handle.view()).into_response()
}

/// Set the theme, or toggle it when the body is empty or names none
async fn set_theme(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let requested = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        match serde_json::from_slice::<ThemeBody>(&body) {
            Ok(req) => req.theme,
            Err(e) => {
                return error_json(StatusCode::BAD_REQUEST, format!("Invalid request body: {}", e))
            }
        }
    };
    let theme = match requested.map(|t| t.parse::<Theme>()).transpose() {
        Ok(theme) => theme,
        Err(e) => return error_json(StatusCode::BAD_REQUEST, e),
    };

    let handle = state.session(&headers);
    handle.present(|ui, session| match theme {
        Some(theme) => ui.set_theme(session, theme),
        None => ui.toggle_theme(session),
    });
    Json(handle.view()).into_response()
}

async fn set_websearch(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<WebsearchBody>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };

    let handle = state.session(&headers);
    let result = lock(&handle.session).set_websearch(req.enabled);
    match result {
        Ok(()) => Json(handle.view()).into_response(),
        Err(e) => dispatch_error(&e),
    }
}

/// Toggle one dropdown, closing any other; no picker closes them all
async fn toggle_picker(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<PickerBody>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };
    let picker = match req.picker.map(|p| p.parse::<Picker>()).transpose() {
        Ok(picker) => picker,
        Err(e) => return error_json(StatusCode::BAD_REQUEST, e),
    };

    let handle = state.session(&headers);
    let view = handle.present(|ui, session| {
        match picker {
            Some(picker) => ui.toggle(picker),
            None => ui.close_all(),
        }
        ui.render(session)
    });
    Json(view).into_response()
}
