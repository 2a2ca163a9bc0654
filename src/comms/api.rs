//! Axum handlers for `/api/*` routes.
//!
//! Each handler receives [`AxumState`] via [`axum::extract::State`], calls
//! one [`Tutor`](crate::tutor::Tutor) operation and maps [`TutorError`] to a
//! status code with a `{ "error": code, "message": text }` body.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::error::TutorError;
use crate::model::{Complexity, Curriculum, LearnerProfile, Length, Role};

use super::AxumState;

// ── Request / response types ──────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct AppendTurnRequest {
    role: Role,
    content: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct CreateCurriculumRequest {
    user_id: String,
    topic: String,
    #[serde(default)]
    length: Option<Length>,
    #[serde(default)]
    complexity: Option<Complexity>,
}

/// A curriculum with its derived progress fields.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CurriculumView {
    #[serde(flatten)]
    curriculum: Curriculum,
    progress: f64,
    complete: bool,
}

impl From<Curriculum> for CurriculumView {
    fn from(curriculum: Curriculum) -> Self {
        Self {
            progress: curriculum.progress(),
            complete: curriculum.is_complete(),
            curriculum,
        }
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Build a JSON error response body.
fn json_error(code: &str, msg: impl std::fmt::Display) -> Json<serde_json::Value> {
    Json(json!({ "error": code, "message": format!("{msg}") }))
}

fn status_for(e: &TutorError) -> StatusCode {
    match e {
        TutorError::Validation(_) => StatusCode::BAD_REQUEST,
        TutorError::NotFound { .. } => StatusCode::NOT_FOUND,
        TutorError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
        TutorError::Generation(_) => StatusCode::BAD_GATEWAY,
        TutorError::Cancelled | TutorError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(state: &AxumState, e: TutorError) -> Response {
    let status = status_for(&e);
    if status.is_server_error() {
        warn!(channel_id = %state.channel_id, error = %e, "api request failed");
    }
    (status, json_error(e.code(), &e)).into_response()
}

// ── Handlers ──────────────────────────────────────────────────────────────────

/// GET /api/health
pub(super) async fn health(State(state): State<AxumState>) -> Response {
    let body = json!({
        "status": "ok",
        "channel": &*state.channel_id,
        "provider": state.tutor.provider_name(),
        "store": state.tutor.store_type(),
    });
    (StatusCode::OK, Json(body)).into_response()
}

/// GET /api/conversations/{id}/turns
pub(super) async fn get_turns(State(state): State<AxumState>, Path(conversation_id): Path<String>) -> Response {
    match state.tutor.get_turns(&conversation_id).await {
        Ok(turns) => (StatusCode::OK, Json(turns)).into_response(),
        Err(e) => error_response(&state, e),
    }
}

/// POST /api/conversations/{id}/turns: stores a turn without generating a reply.
pub(super) async fn append_turn(
    State(state): State<AxumState>,
    Path(conversation_id): Path<String>,
    Json(req): Json<AppendTurnRequest>,
) -> Response {
    match state.tutor.append_turn(&conversation_id, req.role, &req.content).await {
        Ok(turn) => (StatusCode::CREATED, Json(turn)).into_response(),
        Err(e) => error_response(&state, e),
    }
}

/// GET /api/conversations/{id}/follow-ups: `null` until the first set lands.
pub(super) async fn follow_ups(State(state): State<AxumState>, Path(conversation_id): Path<String>) -> Response {
    match state.tutor.follow_ups(&conversation_id).await {
        Ok(set) => (StatusCode::OK, Json(set)).into_response(),
        Err(e) => error_response(&state, e),
    }
}

/// POST /api/curricula
pub(super) async fn create_curriculum(
    State(state): State<AxumState>,
    Json(req): Json<CreateCurriculumRequest>,
) -> Response {
    match state
        .tutor
        .create_curriculum(&req.user_id, &req.topic, req.length, req.complexity)
        .await
    {
        Ok(curriculum) => (StatusCode::CREATED, Json(CurriculumView::from(curriculum))).into_response(),
        Err(e) => error_response(&state, e),
    }
}

/// GET /api/curricula/{id}
pub(super) async fn get_curriculum(State(state): State<AxumState>, Path(curriculum_id): Path<String>) -> Response {
    match state.tutor.get_curriculum(&curriculum_id).await {
        Ok(curriculum) => (StatusCode::OK, Json(CurriculumView::from(curriculum))).into_response(),
        Err(e) => error_response(&state, e),
    }
}

/// DELETE /api/curricula/{id}
pub(super) async fn delete_curriculum(State(state): State<AxumState>, Path(curriculum_id): Path<String>) -> Response {
    match state.tutor.delete_curriculum(&curriculum_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(&state, e),
    }
}

/// GET /api/users/{id}/curricula
pub(super) async fn list_curricula(State(state): State<AxumState>, Path(user_id): Path<String>) -> Response {
    match state.tutor.list_curricula(&user_id).await {
        Ok(list) => {
            let views: Vec<CurriculumView> = list.into_iter().map(CurriculumView::from).collect();
            (StatusCode::OK, Json(views)).into_response()
        }
        Err(e) => error_response(&state, e),
    }
}

/// PUT /api/users/{id}/profile
pub(super) async fn save_profile(
    State(state): State<AxumState>,
    Path(user_id): Path<String>,
    Json(profile): Json<LearnerProfile>,
) -> Response {
    match state.tutor.save_profile(&user_id, profile).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(&state, e),
    }
}

/// POST /api/units/{id}/complete
pub(super) async fn complete_unit(State(state): State<AxumState>, Path(unit_id): Path<String>) -> Response {
    match state.tutor.complete_unit(&unit_id).await {
        Ok(done) => (StatusCode::OK, Json(done)).into_response(),
        Err(e) => error_response(&state, e),
    }
}
