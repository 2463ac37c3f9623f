use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::exam::{ExamDefinition, ExamQuestionType, QuestionSelection, ResultVisibility};
use crate::models::question::{Question, QuestionKind, QuestionOption};
use crate::models::schedule::{Examiner, ScheduleStatus, ScheduleType, ScheduleWindow};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct OptionPayload {
    #[validate(length(min = 1, max = 32))]
    pub id: String,
    #[validate(length(min = 1, max = 1000))]
    pub text: String,
    #[serde(default)]
    pub is_correct: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateQuestionRequest {
    pub id: Option<Uuid>,
    #[validate(length(min = 1, max = 100))]
    pub category: String,
    pub kind: QuestionKind,
    #[validate(length(min = 1, max = 10000))]
    pub text: String,
    pub mark: Decimal,
    #[serde(default)]
    #[validate(nested)]
    pub options: Vec<OptionPayload>,
}

impl From<CreateQuestionRequest> for Question {
    fn from(req: CreateQuestionRequest) -> Self {
        Self {
            id: req.id.unwrap_or_else(Uuid::new_v4),
            category: req.category,
            kind: req.kind,
            text: req.text,
            mark: req.mark,
            options: req
                .options
                .into_iter()
                .map(|o| QuestionOption {
                    id: o.id,
                    text: o.text,
                    is_correct: o.is_correct,
                })
                .collect(),
        }
    }
}

fn default_max_warning_count() -> i32 {
    3
}

fn default_evaluation_window_days() -> i32 {
    3
}

fn default_visibility() -> ResultVisibility {
    ResultVisibility::AfterExamSubmission
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateExamRequest {
    pub id: Option<Uuid>,
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(range(min = 1, max = 1440))]
    pub duration_minutes: i32,
    pub pass_percentage: Decimal,
    pub question_type: ExamQuestionType,
    #[serde(default)]
    pub randomize_questions: bool,
    #[serde(default = "default_max_warning_count")]
    #[validate(range(min = 1))]
    pub max_warning_count: i32,
    #[serde(default)]
    pub enable_certification: bool,
    #[validate(range(min = 1, max = 50))]
    pub certificate_expiry_years: Option<i32>,
    #[serde(default = "default_visibility")]
    pub result_visibility: ResultVisibility,
    pub show_result_after: Option<DateTime<Utc>>,
    #[serde(default = "default_evaluation_window_days")]
    #[validate(range(min = 0, max = 365))]
    pub evaluation_window_days: i32,
    pub question_selection: QuestionSelection,
}

impl From<CreateExamRequest> for ExamDefinition {
    fn from(req: CreateExamRequest) -> Self {
        Self {
            id: req.id.unwrap_or_else(Uuid::new_v4),
            title: req.title,
            duration_minutes: req.duration_minutes,
            pass_percentage: req.pass_percentage,
            total_marks: Decimal::ZERO,
            total_questions: 0,
            question_type: req.question_type,
            randomize_questions: req.randomize_questions,
            max_warning_count: req.max_warning_count,
            enable_certification: req.enable_certification,
            certificate_expiry_years: req.certificate_expiry_years,
            result_visibility: req.result_visibility,
            show_result_after: req.show_result_after,
            evaluation_window_days: req.evaluation_window_days,
            question_selection: req.question_selection,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExaminerPayload {
    pub user_id: Uuid,
    #[serde(default)]
    pub can_proctor: bool,
    #[serde(default)]
    pub can_evaluate: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateScheduleRequest {
    pub id: Option<Uuid>,
    pub exam_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub schedule_type: ScheduleType,
    #[validate(range(min = 1, max = 1440))]
    pub duration_minutes: i32,
    #[serde(default)]
    #[validate(range(min = 0, max = 365))]
    pub expire_in_days: i32,
    #[serde(default)]
    pub examiners: Vec<ExaminerPayload>,
}

impl From<CreateScheduleRequest> for ScheduleWindow {
    fn from(req: CreateScheduleRequest) -> Self {
        Self {
            id: req.id.unwrap_or_else(Uuid::new_v4),
            exam_id: req.exam_id,
            start_time: req.start_time,
            schedule_type: req.schedule_type,
            duration_minutes: req.duration_minutes,
            expire_in_days: req.expire_in_days,
            examiners: req
                .examiners
                .into_iter()
                .map(|e| Examiner {
                    user_id: e.user_id,
                    can_proctor: e.can_proctor,
                    can_evaluate: e.can_evaluate,
                    proctoring_load: 0,
                    evaluation_load: 0,
                })
                .collect(),
            status: ScheduleStatus::Scheduled,
            version: 0,
        }
    }
}
