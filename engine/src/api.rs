use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use uuid::Uuid;

use crate::model::{PlayEvent, RequestRecord, StatusSnapshot, Track};
use crate::scheduler::{Scheduler, SubmitError};
use crate::search::SearchProvider;
use crate::stats::StatsSnapshot;

#[derive(Clone)]
pub struct AppState {
    pub version: String,
    pub scheduler: Scheduler,
    pub search: Arc<dyn SearchProvider>,
}

pub fn build_router(state: AppState, ui_dir: Option<PathBuf>) -> Router {
    let router = Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/api/v1/ping", get(ping))
        .route("/api/v1/search", get(api_search))
        .route("/api/v1/requests", get(api_requests).post(api_submit))
        .route("/api/v1/requests/:id", delete(api_remove))
        .route("/api/v1/playout/start", post(api_start))
        .route("/api/v1/playout/stop", post(api_stop))
        .route("/api/v1/status", get(api_status))
        .route("/api/v1/stats", get(api_stats))
        .route("/api/v1/history", get(api_history))
        .with_state(state);

    let router = match ui_dir {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router.route("/", get(root)),
    };

    router
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn root() -> &'static str {
    "requestbox engine is running. Try /api/v1/status"
}

async fn ping(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "ok": true,
        "version": state.version,
    }))
}

#[derive(Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: String,
}

async fn api_search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Json<Vec<Track>> {
    if params.q.trim().is_empty() {
        return Json(Vec::new());
    }
    Json(state.search.search(&params.q).await)
}

async fn api_requests(State(state): State<AppState>) -> Json<Vec<RequestRecord>> {
    Json(state.scheduler.requests().await)
}

/// `track` stays raw JSON so a malformed track is reported in the API's own
/// error envelope rather than as an extractor rejection.
#[derive(Deserialize)]
struct SubmitReq {
    #[serde(alias = "music")]
    track: Option<serde_json::Value>,
    requester: Option<String>,
}

fn error_response(status: StatusCode, error: impl std::fmt::Display) -> Response {
    (status, Json(json!({"ok": false, "error": error.to_string()}))).into_response()
}

impl IntoResponse for SubmitError {
    fn into_response(self) -> Response {
        let status = match &self {
            SubmitError::MissingTrack | SubmitError::InvalidTrack(_) => StatusCode::BAD_REQUEST,
            SubmitError::Rejected(_) => StatusCode::FORBIDDEN,
        };
        error_response(status, self)
    }
}

async fn api_submit(
    State(state): State<AppState>,
    body: Result<Json<SubmitReq>, JsonRejection>,
) -> Response {
    let req = match body {
        Ok(Json(req)) => req,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, rejection.body_text()),
    };
    let track = match req.track.map(serde_json::from_value::<Track>).transpose() {
        Ok(track) => track,
        Err(e) => return SubmitError::InvalidTrack(e.to_string()).into_response(),
    };

    match state.scheduler.submit(track, req.requester.as_deref()).await {
        Ok(record) => Json(json!({"ok": true, "request": record})).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Ids that are not UUIDs cannot name a record, so they answer like any
/// other unknown id.
async fn api_remove(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    let removed = match Uuid::parse_str(&id) {
        Ok(id) => state.scheduler.remove(id).await,
        Err(_) => false,
    };
    Json(json!({"ok": removed}))
}

async fn api_start(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.scheduler.start().await;
    Json(json!({"ok": true}))
}

async fn api_stop(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.scheduler.stop().await;
    Json(json!({"ok": true}))
}

async fn api_status(State(state): State<AppState>) -> Json<StatusSnapshot> {
    Json(state.scheduler.status().await)
}

async fn api_stats(State(state): State<AppState>) -> Json<StatsSnapshot> {
    Json(state.scheduler.stats().await)
}

async fn api_history(State(state): State<AppState>) -> Json<Vec<PlayEvent>> {
    Json(state.scheduler.history().await)
}
