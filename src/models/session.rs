use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "session_status", rename_all = "snake_case")]
pub enum SessionStatus {
    Registered,
    Started,
    Submitted,
    Terminated,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Submitted | SessionStatus::Terminated)
    }

    /// Registered -> Started -> {Submitted, Terminated}. Nothing leaves a terminal state.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        matches!(
            (self, next),
            (SessionStatus::Registered, SessionStatus::Started)
                | (SessionStatus::Started, SessionStatus::Submitted)
                | (SessionStatus::Started, SessionStatus::Terminated)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Registered => "registered",
            SessionStatus::Started => "started",
            SessionStatus::Submitted => "submitted",
            SessionStatus::Terminated => "terminated",
        }
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "registered" => Ok(SessionStatus::Registered),
            "started" => Ok(SessionStatus::Started),
            "submitted" => Ok(SessionStatus::Submitted),
            "terminated" => Ok(SessionStatus::Terminated),
            other => Err(format!("unknown session status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "evaluation_status", rename_all = "snake_case")]
pub enum EvaluationStatus {
    #[serde(rename = "na")]
    #[sqlx(rename = "na")]
    NA,
    Pending,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "result_status", rename_all = "snake_case")]
pub enum ResultStatus {
    #[serde(rename = "na")]
    #[sqlx(rename = "na")]
    NA,
    Passed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "answer_status", rename_all = "snake_case")]
pub enum AnswerStatus {
    NotAttempted,
    Pending,
    Auto,
    Done,
}

impl AnswerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnswerStatus::NotAttempted => "not_attempted",
            AnswerStatus::Pending => "pending",
            AnswerStatus::Auto => "auto",
            AnswerStatus::Done => "done",
        }
    }
}

impl FromStr for AnswerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_attempted" => Ok(AnswerStatus::NotAttempted),
            "pending" => Ok(AnswerStatus::Pending),
            "auto" => Ok(AnswerStatus::Auto),
            "done" => Ok(AnswerStatus::Done),
            other => Err(format!("unknown answer status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Answer {
    pub seq_no: i32,
    pub question_id: Uuid,
    pub submitted: Option<String>,
    pub is_correct: Option<bool>,
    pub mark: Decimal,
    pub evaluation_status: AnswerStatus,
    pub marked_for_later: bool,
    pub evaluator_id: Option<Uuid>,
    pub evaluator_feedback: Option<String>,
}

impl Answer {
    pub fn placeholder(seq_no: i32, question_id: Uuid) -> Self {
        Self {
            seq_no,
            question_id,
            submitted: None,
            is_correct: None,
            mark: Decimal::ZERO,
            evaluation_status: AnswerStatus::NotAttempted,
            marked_for_later: false,
            evaluator_id: None,
            evaluator_feedback: None,
        }
    }

    pub fn is_attempted(&self) -> bool {
        self.evaluation_status != AnswerStatus::NotAttempted
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ExamSession {
    pub id: Uuid,
    pub exam_id: Uuid,
    pub schedule_id: Uuid,
    pub candidate_id: Uuid,
    pub status: SessionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub additional_time_minutes: i32,
    pub assigned_proctor: Option<Uuid>,
    pub assigned_evaluator: Option<Uuid>,
    pub total_marks: Decimal,
    pub evaluation_status: EvaluationStatus,
    pub result_status: ResultStatus,
    /// Bumped by every durable write; writes carrying a stale value are refused.
    pub version: i32,
    #[sqlx(skip)]
    pub answers: Vec<Answer>,
}

impl ExamSession {
    pub fn register(exam_id: Uuid, schedule_id: Uuid, candidate_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            exam_id,
            schedule_id,
            candidate_id,
            status: SessionStatus::Registered,
            started_at: None,
            submitted_at: None,
            additional_time_minutes: 0,
            assigned_proctor: None,
            assigned_evaluator: None,
            total_marks: Decimal::ZERO,
            evaluation_status: EvaluationStatus::NA,
            result_status: ResultStatus::NA,
            version: 0,
            answers: Vec::new(),
        }
    }

    pub fn answer(&self, seq_no: i32) -> Option<&Answer> {
        self.answers.iter().find(|a| a.seq_no == seq_no)
    }

    pub fn answer_for_question_mut(&mut self, question_id: Uuid) -> Option<&mut Answer> {
        self.answers.iter_mut().find(|a| a.question_id == question_id)
    }

    pub fn needs_assignment(&self) -> bool {
        self.assigned_proctor.is_none() || self.assigned_evaluator.is_none()
    }

    /// Applies a status change, refusing anything outside the lifecycle graph.
    pub fn transition(&mut self, next: SessionStatus) -> crate::error::Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(crate::error::Error::State(format!(
                "Exam session cannot move from {} to {}",
                self.status.as_str(),
                next.as_str()
            )));
        }
        self.status = next;
        Ok(())
    }
}
