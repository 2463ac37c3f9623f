use axum::{
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde_json::json;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed input, e.g. a mark above the question maximum.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Validation error: {0}")]
    InvalidInput(#[from] validator::ValidationErrors),

    /// The actor is not the candidate, proctor or evaluator the operation requires.
    #[error("Permission denied: {0}")]
    Permission(String),

    /// The operation is not valid for the session's current state or time window.
    #[error("{0}")]
    State(String),

    /// A random question draw cannot be satisfied by the question bank.
    #[error("Insufficient questions: {0}")]
    Capacity(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let (status, code, error_message) = match self {
            Error::Validation(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg),
            Error::InvalidInput(err) => {
                (StatusCode::BAD_REQUEST, "validation_error", err.to_string())
            }
            Error::Permission(msg) => (StatusCode::FORBIDDEN, "permission_denied", msg),
            Error::State(msg) => (StatusCode::CONFLICT, "invalid_state", msg),
            Error::Capacity(msg) => (StatusCode::UNPROCESSABLE_ENTITY, "insufficient_questions", msg),
            Error::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg),
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            Error::Json(err) => (StatusCode::BAD_REQUEST, "bad_request", err.to_string()),
            Error::Http(err) => (
                StatusCode::BAD_GATEWAY,
                "upstream_error",
                format!("External service error: {}", err),
            ),
            other => {
                tracing::error!(error = %other, "Unhandled internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An unexpected error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({ "error": code, "message": error_message }));
        (status, body).into_response()
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Error::NotFound("Resource not found".to_string()),
            other => Error::Database(other),
        }
    }
}
