pub mod admin;
pub mod evaluation;
pub mod health;
pub mod schedule;
pub mod session;

use axum::{
    middleware::from_fn_with_state,
    routing::{delete, get, post},
    Router,
};

use crate::middleware::auth::{require_admin, require_bearer_auth};
use crate::AppState;

/// The full HTTP surface. Callers add transport layers (tracing, CORS).
pub fn router(state: AppState) -> Router {
    let base_routes = Router::new().route("/health", get(health::health));

    let session_api = Router::new()
        .route("/api/sessions/:id/start", post(session::start_exam))
        .route(
            "/api/sessions/:id/questions/:seq_no",
            get(session::get_question).put(session::submit_answer),
        )
        .route("/api/sessions/:id/submit", post(session::submit_exam))
        .route("/api/sessions/:id/terminate", post(session::terminate_exam))
        .route(
            "/api/sessions/:id/messages",
            get(session::list_messages).post(session::post_message),
        )
        .route("/api/sessions/:id/overview", get(session::session_overview))
        .route("/api/sessions/:id/result", get(session::exam_result))
        .route("/api/sessions/:id/marks", post(evaluation::save_marks))
        .route("/api/sessions/:id/evaluation", get(evaluation::evaluation_sheet))
        .route(
            "/api/sessions/:id/evaluation/finish",
            post(evaluation::finish_evaluation),
        )
        .route(
            "/api/schedules/:id/registrations",
            post(schedule::register_candidate),
        )
        .route("/api/proctor/sessions", get(schedule::proctor_sessions))
        .route("/api/evaluator/sessions", get(schedule::evaluator_sessions))
        .layer(from_fn_with_state(state.clone(), require_bearer_auth));

    let admin_api = Router::new()
        .route("/api/admin/questions", post(admin::create_question))
        .route("/api/admin/exams", post(admin::create_exam))
        .route("/api/admin/schedules", post(admin::create_schedule))
        .route("/api/admin/schedules/:id/end", post(admin::end_schedule))
        .route("/api/admin/schedules/:id", delete(admin::delete_schedule))
        .route("/api/admin/recovery", post(admin::run_recovery))
        .layer(from_fn_with_state(state.clone(), require_admin));

    base_routes
        .merge(session_api)
        .merge(admin_api)
        .with_state(state)
}
