use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tower::ServiceExt;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::room_registry::SharedRegistry;
use crate::score_api::ScoreApi;
use crate::server_utils::now_ms;
use crate::session::run_socket;
use crate::types::{StageRecord, SubmitOutcome};

#[derive(Clone)]
pub struct AppState {
    pub scores: Arc<ScoreApi>,
    pub rooms: SharedRegistry,
    pub static_dir: Option<PathBuf>,
}

pub fn build_router(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/api/score", post(submit_score).fallback(api_not_found))
        .route("/api/records", get(list_records).fallback(api_not_found))
        .route("/api/ping", get(ping).fallback(api_not_found))
        .route("/api", any(api_not_found))
        .route("/api/{*rest}", any(api_not_found))
        .route("/healthc", get(healthc))
        .route("/ws", get(ws_handler))
        .route("/", get(root_handler));

    if let Some(static_dir) = state.static_dir.as_deref() {
        let index_file = static_dir.join("index.html");
        app = app.fallback_service(
            ServeDir::new(static_dir).not_found_service(ServeFile::new(index_file)),
        );
    }

    app.layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn submit_score(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<SubmitOutcome>, ApiError> {
    if !is_json_content_type(&headers) {
        return Err(ApiError::UnsupportedMediaType);
    }
    let payload = parse_json_body(&body?)?;
    let outcome = state.scores.submit_score(&payload).await?;
    Ok(Json(outcome))
}

async fn list_records(State(state): State<AppState>) -> Result<Json<Vec<StageRecord>>, ApiError> {
    Ok(Json(state.scores.list_records().await?))
}

async fn ping() -> impl IntoResponse {
    Json(json!({ "ok": true, "ts": now_ms() }))
}

async fn healthc() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

async fn api_not_found() -> ApiError {
    ApiError::NotFound
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    upgrade(ws, state.rooms)
}

/// The browser client opens its socket on the host root, so `/` is both the
/// WebSocket endpoint and the SPA entry point.
async fn root_handler(
    State(state): State<AppState>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    request: Request,
) -> Response {
    match ws {
        Ok(ws) => upgrade(ws, state.rooms),
        Err(_) => serve_index(state.static_dir.as_deref(), request).await,
    }
}

fn upgrade(ws: WebSocketUpgrade, rooms: SharedRegistry) -> Response {
    ws.on_upgrade(move |socket| run_socket(rooms, socket))
}

async fn serve_index(static_dir: Option<&Path>, request: Request) -> Response {
    let Some(static_dir) = static_dir else {
        return (StatusCode::NOT_FOUND, "client build not found").into_response();
    };
    match ServeFile::new(static_dir.join("index.html"))
        .oneshot(request)
        .await
    {
        Ok(response) => response.into_response(),
        Err(never) => match never {},
    }
}

fn is_json_content_type(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_ascii_lowercase().contains("application/json"))
        .unwrap_or(false)
}

/// An empty body reads as `{}` so it fails field validation, not parsing.
fn parse_json_body(body: &[u8]) -> Result<Value, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(json!({}));
    }
    serde_json::from_slice(body).map_err(|_| ApiError::InvalidJson)
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!(detail, "request handler panicked");
    ApiError::Internal.into_response()
}
