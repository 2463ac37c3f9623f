use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::integrity_event::{EventCategory, WarningType};
use crate::models::session::{AnswerStatus, SessionStatus};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SubmitAnswerRequest {
    /// Comma separated option ids for choice questions, free text otherwise.
    #[validate(length(max = 20000))]
    pub answer: Option<String>,
    #[serde(default)]
    pub marked_for_later: bool,
}

fn default_category() -> EventCategory {
    EventCategory::General
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PostMessageRequest {
    #[validate(length(min = 1, max = 2000))]
    pub message: String,
    #[serde(default = "default_category")]
    pub category: EventCategory,
    #[serde(default)]
    pub warning_type: WarningType,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TerminateRequest {
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SaveMarksRequest {
    pub question_id: Uuid,
    pub mark: Decimal,
    #[validate(length(max = 2000))]
    pub feedback: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct RegisterRequest {
    /// Admins may register someone else; candidates register themselves.
    pub candidate_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub session_id: Uuid,
    pub schedule_id: Uuid,
    pub candidate_id: Uuid,
    pub status: SessionStatus,
    pub assigned_proctor: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveAnswerResponse {
    pub saved: bool,
    pub seq_no: i32,
    pub status: AnswerStatus,
    pub marked_for_later: bool,
}
