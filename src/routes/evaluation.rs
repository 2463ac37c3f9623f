use axum::{
    extract::{Path, State},
    response::{IntoResponse, Json, Response},
    Extension,
};
use uuid::Uuid;
use validator::Validate;

use crate::dto::session_dto::SaveMarksRequest;
use crate::error::Result;
use crate::middleware::auth::Claims;
use crate::AppState;

#[axum::debug_handler]
pub async fn save_marks(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<Uuid>,
    Json(req): Json<SaveMarksRequest>,
) -> Result<Response> {
    req.validate()?;
    let aggregate = state
        .evaluation_service
        .save_marks(
            session_id,
            req.question_id,
            req.mark,
            req.feedback,
            claims.actor()?,
        )
        .await?;
    Ok(Json(aggregate).into_response())
}

#[axum::debug_handler]
pub async fn evaluation_sheet(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<Uuid>,
) -> Result<Response> {
    let sheet = state
        .evaluation_service
        .evaluation_sheet(session_id, claims.actor()?)
        .await?;
    Ok(Json(sheet).into_response())
}

#[axum::debug_handler]
pub async fn finish_evaluation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<Uuid>,
) -> Result<Response> {
    let aggregate = state
        .evaluation_service
        .finish_evaluation(session_id, claims.actor()?)
        .await?;
    Ok(Json(aggregate).into_response())
}
