use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use exam_engine::{
    cache::MemoryLiveCache,
    database::MemoryExamStore,
    middleware::auth::Claims,
    routes,
    services::notification_service::LogNotifier,
    AppState,
};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value as JsonValue};
use tower::ServiceExt;
use uuid::Uuid;

const SECRET: &str = "test_secret_key";

fn app() -> Router {
    let state = AppState::new(
        Arc::new(MemoryExamStore::new()),
        Arc::new(MemoryLiveCache::new()),
        Arc::new(LogNotifier),
        SECRET,
    );
    routes::router(state)
}

fn token(user: Uuid, role: Option<&str>) -> String {
    let claims = Claims {
        sub: user.to_string(),
        exp: (Utc::now() + Duration::hours(1)).timestamp() as usize,
        role: role.map(str::to_string),
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
}

async fn call(app: &Router, method: &str, uri: &str, bearer: Option<&str>, body: Option<JsonValue>) -> (StatusCode, JsonValue) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(bearer) = bearer {
        builder = builder.header("authorization", format!("Bearer {}", bearer));
    }
    let req = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    let body = if bytes.is_empty() {
        JsonValue::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(JsonValue::Null)
    };
    (status, body)
}

/// Two 1-mark choice questions, an exam over them and a schedule that opened a
/// minute ago with a single examiner. Returns (schedule_id, examiner_id).
async fn seed(app: &Router, admin: &str) -> (Uuid, Uuid) {
    let mut question_ids = Vec::new();
    for n in 0..2 {
        let id = Uuid::new_v4();
        let (status, _) = call(
            app,
            "POST",
            "/api/admin/questions",
            Some(admin),
            Some(json!({
                "id": id,
                "category": "safety",
                "kind": "choices",
                "text": format!("Question {}", n + 1),
                "mark": "1",
                "options": [
                    {"id": "a", "text": "Right", "is_correct": true},
                    {"id": "b", "text": "Wrong"}
                ]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        question_ids.push(id);
    }

    let (status, exam) = call(
        app,
        "POST",
        "/api/admin/exams",
        Some(admin),
        Some(json!({
            "title": "Safety induction",
            "duration_minutes": 30,
            "pass_percentage": "50",
            "question_type": "choices",
            "question_selection": {"mode": "fixed", "items": question_ids}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(exam["total_questions"], 2);

    let examiner = Uuid::new_v4();
    let (status, schedule) = call(
        app,
        "POST",
        "/api/admin/schedules",
        Some(admin),
        Some(json!({
            "exam_id": exam["id"],
            "start_time": Utc::now() - Duration::minutes(1),
            "schedule_type": "fixed",
            "duration_minutes": 30,
            "examiners": [{"user_id": examiner, "can_proctor": true, "can_evaluate": true}]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let schedule_id = schedule["id"].as_str().unwrap().parse().unwrap();
    (schedule_id, examiner)
}

#[tokio::test]
async fn candidate_takes_an_exam_end_to_end() {
    let app = app();
    let admin = token(Uuid::new_v4(), Some("admin"));
    let (schedule_id, examiner) = seed(&app, &admin).await;

    let candidate_id = Uuid::new_v4();
    let candidate = token(candidate_id, None);
    let (status, registration) = call(
        &app,
        "POST",
        &format!("/api/schedules/{}/registrations", schedule_id),
        Some(&candidate),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(registration["assigned_proctor"], json!(examiner));
    let session_id = registration["session_id"].as_str().unwrap().to_string();

    let (status, started) = call(&app, "POST", &format!("/api/sessions/{}/start", session_id), Some(&candidate), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(started["already_started"], false);
    assert_eq!(started["total_questions"], 2);

    let (status, question) = call(&app, "GET", &format!("/api/sessions/{}/questions/1", session_id), Some(&candidate), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(question["question"]["options"][0].get("is_correct").is_none());

    let (status, saved) = call(
        &app,
        "PUT",
        &format!("/api/sessions/{}/questions/1", session_id),
        Some(&candidate),
        Some(json!({"answer": "a", "marked_for_later": false})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(saved["status"], "auto");

    let stranger = token(Uuid::new_v4(), None);
    let (status, _) = call(&app, "GET", &format!("/api/sessions/{}/questions/1", session_id), Some(&stranger), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let proctor = token(examiner, None);
    let (status, posted) = call(
        &app,
        "POST",
        &format!("/api/sessions/{}/messages", session_id),
        Some(&proctor),
        Some(json!({"message": "Please face the camera"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(posted["terminated"], false);

    let (status, overview) = call(&app, "GET", &format!("/api/sessions/{}/overview", session_id), Some(&proctor), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(overview["answered"], 1);

    let (status, outcome) = call(&app, "POST", &format!("/api/sessions/{}/submit", session_id), Some(&candidate), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["show_result"], true);
    assert_eq!(outcome["result_status"], "passed");

    let (status, body) = call(&app, "POST", &format!("/api/sessions/{}/submit", session_id), Some(&candidate), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "invalid_state");

    let (status, result) = call(&app, "GET", &format!("/api/sessions/{}/result", session_id), Some(&candidate), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["state"], "scorecard");
    assert_eq!(result["result_status"], "passed");
}

#[tokio::test]
async fn proctor_can_terminate_and_candidate_sees_the_reason() {
    let app = app();
    let admin = token(Uuid::new_v4(), Some("admin"));
    let (schedule_id, examiner) = seed(&app, &admin).await;
    let candidate = token(Uuid::new_v4(), None);

    let (_, registration) = call(&app, "POST", &format!("/api/schedules/{}/registrations", schedule_id), Some(&candidate), None).await;
    let session_id = registration["session_id"].as_str().unwrap().to_string();
    call(&app, "POST", &format!("/api/sessions/{}/start", session_id), Some(&candidate), None).await;

    let (status, _) = call(
        &app,
        "POST",
        &format!("/api/sessions/{}/terminate", session_id),
        Some(&candidate),
        Some(json!({"reason": "I give up"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = call(
        &app,
        "POST",
        &format!("/api/sessions/{}/terminate", session_id),
        Some(&token(examiner, None)),
        Some(json!({"reason": "Second person in the room"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, result) = call(&app, "GET", &format!("/api/sessions/{}/result", session_id), Some(&candidate), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["state"], "terminated");
    assert_eq!(result["message"], "Second person in the room");
}

#[tokio::test]
async fn auth_and_input_errors_map_to_statuses() {
    let app = app();
    let (status, body) = call(&app, "POST", &format!("/api/sessions/{}/start", Uuid::new_v4()), None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "missing_authorization");

    let user = token(Uuid::new_v4(), Some("candidate"));
    let (status, _) = call(&app, "POST", "/api/admin/recovery", Some(&user), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = call(&app, "POST", &format!("/api/sessions/{}/start", Uuid::new_v4()), Some(&user), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let admin = token(Uuid::new_v4(), Some("admin"));
    let (status, body) = call(
        &app,
        "POST",
        "/api/admin/exams",
        Some(&admin),
        Some(json!({
            "title": "Empty bank",
            "duration_minutes": 30,
            "pass_percentage": "50",
            "question_type": "choices",
            "question_selection": {
                "mode": "draw",
                "items": [{"category": "nothing", "mark_per_question": "1", "count": 2}]
            }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "insufficient_questions");

    let (status, body) = call(&app, "POST", "/api/admin/recovery", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["rebuilt"], 0);

    let (status, _) = call(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
}
