use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::dto::admin_dto::{CreateExamRequest, CreateQuestionRequest, CreateScheduleRequest};
use crate::error::Result;
use crate::utils::time::now;
use crate::AppState;

#[axum::debug_handler]
pub async fn create_question(
    State(state): State<AppState>,
    Json(req): Json<CreateQuestionRequest>,
) -> Result<Response> {
    req.validate()?;
    let question = state.exam_service.save_question(req.into()).await?;
    Ok((StatusCode::CREATED, Json(question)).into_response())
}

#[axum::debug_handler]
pub async fn create_exam(
    State(state): State<AppState>,
    Json(req): Json<CreateExamRequest>,
) -> Result<Response> {
    req.validate()?;
    let exam = state.exam_service.save_exam(req.into()).await?;
    Ok((StatusCode::CREATED, Json(exam)).into_response())
}

#[axum::debug_handler]
pub async fn create_schedule(
    State(state): State<AppState>,
    Json(req): Json<CreateScheduleRequest>,
) -> Result<Response> {
    req.validate()?;
    let schedule = state.schedule_service.save_schedule(req.into()).await?;
    Ok((StatusCode::CREATED, Json(schedule)).into_response())
}

#[axum::debug_handler]
pub async fn end_schedule(
    State(state): State<AppState>,
    Path(schedule_id): Path<Uuid>,
) -> Result<Response> {
    let closure = state
        .schedule_service
        .end_schedule(schedule_id, now())
        .await?;
    Ok(Json(closure).into_response())
}

#[axum::debug_handler]
pub async fn delete_schedule(
    State(state): State<AppState>,
    Path(schedule_id): Path<Uuid>,
) -> Result<Response> {
    state.schedule_service.delete_schedule(schedule_id).await?;
    Ok(Json(json!({ "deleted": true, "schedule_id": schedule_id })).into_response())
}

#[axum::debug_handler]
pub async fn run_recovery(State(state): State<AppState>) -> Result<Response> {
    let report = state.recovery_service.run(now()).await?;
    Ok(Json(report).into_response())
}
