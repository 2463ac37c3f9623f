use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::question::QuestionKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "exam_question_type", rename_all = "snake_case")]
pub enum ExamQuestionType {
    Choices,
    UserInput,
    Mixed,
}

impl ExamQuestionType {
    /// `None` means any question kind may be drawn.
    pub fn draw_kind(&self) -> Option<QuestionKind> {
        match self {
            ExamQuestionType::Choices => Some(QuestionKind::Choices),
            ExamQuestionType::UserInput => Some(QuestionKind::UserInput),
            ExamQuestionType::Mixed => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "result_visibility", rename_all = "snake_case")]
pub enum ResultVisibility {
    AfterExamSubmission,
    AfterScheduleCompletion,
    AfterSpecificDate,
    DoNotShow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryDraw {
    pub category: String,
    pub mark_per_question: Decimal,
    pub count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", content = "items", rename_all = "snake_case")]
pub enum QuestionSelection {
    Fixed(Vec<Uuid>),
    Draw(Vec<CategoryDraw>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamDefinition {
    pub id: Uuid,
    pub title: String,
    pub duration_minutes: i32,
    pub pass_percentage: Decimal,
    pub total_marks: Decimal,
    pub total_questions: i32,
    pub question_type: ExamQuestionType,
    pub randomize_questions: bool,
    pub max_warning_count: i32,
    pub enable_certification: bool,
    pub certificate_expiry_years: Option<i32>,
    pub result_visibility: ResultVisibility,
    pub show_result_after: Option<DateTime<Utc>>,
    pub evaluation_window_days: i32,
    pub question_selection: QuestionSelection,
}

impl ExamDefinition {
    pub fn pass_mark(&self) -> Decimal {
        self.total_marks * self.pass_percentage / Decimal::from(100)
    }

    pub fn requires_evaluation(&self) -> bool {
        self.question_type != ExamQuestionType::Choices
    }
}
