use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    Extension,
};
use serde_json::json;
use uuid::Uuid;

use crate::dto::session_dto::{RegisterRequest, RegisterResponse};
use crate::error::{Error, Result};
use crate::middleware::auth::Claims;
use crate::utils::time::now;
use crate::AppState;

#[axum::debug_handler]
pub async fn register_candidate(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(schedule_id): Path<Uuid>,
    body: Option<Json<RegisterRequest>>,
) -> Result<Response> {
    let caller = claims.user_id()?;
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let candidate_id = match req.candidate_id {
        Some(id) if id != caller && !claims.is_admin() => {
            return Err(Error::Permission(
                "Only administrators can register other candidates".to_string(),
            ))
        }
        Some(id) => id,
        None => caller,
    };

    let session = state
        .schedule_service
        .register(schedule_id, candidate_id)
        .await?;
    let response = RegisterResponse {
        session_id: session.id,
        schedule_id: session.schedule_id,
        candidate_id: session.candidate_id,
        status: session.status,
        assigned_proctor: session.assigned_proctor,
    };
    Ok((StatusCode::CREATED, Json(response)).into_response())
}

#[axum::debug_handler]
pub async fn proctor_sessions(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Response> {
    let windows = state
        .schedule_service
        .proctor_dashboard(claims.user_id()?, now())
        .await?;
    Ok(Json(json!({ "schedules": windows })).into_response())
}

#[axum::debug_handler]
pub async fn evaluator_sessions(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Response> {
    let tasks = state
        .schedule_service
        .evaluator_queue(claims.user_id()?, now())
        .await?;
    Ok(Json(json!({ "sessions": tasks })).into_response())
}
