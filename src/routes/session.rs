use axum::{
    extract::{Path, State},
    response::{IntoResponse, Json, Response},
    Extension,
};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::dto::session_dto::{
    PostMessageRequest, SaveAnswerResponse, SubmitAnswerRequest, TerminateRequest,
};
use crate::error::Result;
use crate::middleware::auth::Claims;
use crate::utils::time::now;
use crate::AppState;

#[axum::debug_handler]
pub async fn start_exam(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<Uuid>,
) -> Result<Response> {
    let started = state
        .session_service
        .start(session_id, claims.actor()?, now())
        .await?;
    Ok(Json(started).into_response())
}

#[axum::debug_handler]
pub async fn get_question(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((session_id, seq_no)): Path<(Uuid, i32)>,
) -> Result<Response> {
    let view = state
        .session_service
        .get_question(session_id, seq_no, claims.actor()?, now())
        .await?;
    Ok(Json(view).into_response())
}

#[axum::debug_handler]
pub async fn submit_answer(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((session_id, seq_no)): Path<(Uuid, i32)>,
    Json(req): Json<SubmitAnswerRequest>,
) -> Result<Response> {
    req.validate()?;
    let receipt = state
        .session_service
        .submit_answer(
            session_id,
            seq_no,
            req.answer,
            req.marked_for_later,
            claims.actor()?,
            now(),
        )
        .await?;
    Ok(Json(SaveAnswerResponse {
        saved: true,
        seq_no: receipt.seq_no,
        status: receipt.status,
        marked_for_later: receipt.marked_for_later,
    })
    .into_response())
}

#[axum::debug_handler]
pub async fn submit_exam(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<Uuid>,
) -> Result<Response> {
    let outcome = state
        .session_service
        .submit(session_id, claims.actor()?, now())
        .await?;
    Ok(Json(outcome).into_response())
}

#[axum::debug_handler]
pub async fn terminate_exam(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<Uuid>,
    Json(req): Json<TerminateRequest>,
) -> Result<Response> {
    req.validate()?;
    let outcome = state
        .session_service
        .terminate(session_id, claims.actor()?, &req.reason, now())
        .await?;
    Ok(Json(outcome).into_response())
}

#[axum::debug_handler]
pub async fn post_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<Uuid>,
    Json(req): Json<PostMessageRequest>,
) -> Result<Response> {
    req.validate()?;
    let posted = state
        .session_service
        .post_message(
            session_id,
            claims.actor()?,
            &req.message,
            req.category,
            req.warning_type,
            now(),
        )
        .await?;
    Ok(Json(posted).into_response())
}

#[axum::debug_handler]
pub async fn list_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<Uuid>,
) -> Result<Response> {
    let events = state
        .session_service
        .messages(session_id, claims.actor()?)
        .await?;
    Ok(Json(json!({ "session_id": session_id, "messages": events })).into_response())
}

#[axum::debug_handler]
pub async fn session_overview(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<Uuid>,
) -> Result<Response> {
    let overview = state
        .session_service
        .overview(session_id, claims.actor()?, now())
        .await?;
    Ok(Json(overview).into_response())
}

#[axum::debug_handler]
pub async fn exam_result(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<Uuid>,
) -> Result<Response> {
    let result = state
        .session_service
        .result(session_id, claims.actor()?, now())
        .await?;
    Ok(Json(result).into_response())
}
