use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::certificate::Certificate;
use crate::models::exam::ExamDefinition;
use crate::models::integrity_event::{IntegrityEvent, WarningType};
use crate::models::question::{Question, QuestionKind};
use crate::models::schedule::{Examiner, ScheduleStatus, ScheduleWindow};
use crate::models::session::{Answer, ExamSession, SessionStatus};

/// How often a service re-reads a session and re-applies its change after losing
/// a versioned write to a concurrent request.
pub const MAX_WRITE_ATTEMPTS: usize = 5;

pub fn write_contention(what: &str) -> Error {
    Error::State(format!("{} is busy, please retry the request", what))
}

/// Durable record store. It is authoritative for grading and resumption;
/// the live cache only mirrors what is written here.
///
/// Every session returned from this trait carries its answers ordered by `seq_no`.
#[async_trait]
pub trait ExamStore: Send + Sync {
    async fn exam(&self, id: Uuid) -> Result<ExamDefinition>;
    async fn save_exam(&self, exam: &ExamDefinition) -> Result<()>;

    async fn question(&self, id: Uuid) -> Result<Question>;
    async fn save_question(&self, question: &Question) -> Result<()>;
    /// Ids of bank questions in `category` worth exactly `mark`. `kind = None` matches any kind.
    async fn question_ids_matching(
        &self,
        category: &str,
        mark: Decimal,
        kind: Option<QuestionKind>,
    ) -> Result<Vec<Uuid>>;

    async fn schedule(&self, id: Uuid) -> Result<ScheduleWindow>;
    async fn save_schedule(&self, schedule: &ScheduleWindow) -> Result<()>;
    async fn set_schedule_status(&self, id: Uuid, status: ScheduleStatus) -> Result<()>;
    /// Writes the examiner pool only if the stored version still equals `expected_version`.
    /// Returns `false` when another writer got there first.
    async fn update_examiner_loads(
        &self,
        schedule_id: Uuid,
        expected_version: i32,
        examiners: &[Examiner],
    ) -> Result<bool>;
    /// Removes the schedule together with its sessions, answers, events and certificates.
    async fn delete_schedule(&self, id: Uuid) -> Result<()>;

    async fn session(&self, id: Uuid) -> Result<ExamSession>;
    async fn find_session(&self, candidate_id: Uuid, schedule_id: Uuid)
        -> Result<Option<ExamSession>>;
    /// Inserts a new session. If one already exists for the same candidate and
    /// schedule, that one is returned untouched.
    async fn insert_session(&self, session: &ExamSession) -> Result<ExamSession>;
    /// Writes the session row and all of its answers in one unit, but only if the
    /// stored version still equals `session.version`. On success both versions are
    /// bumped. Returns `false`, writing nothing, when another writer got there first.
    async fn update_session(&self, session: &mut ExamSession) -> Result<bool>;
    /// Records a response in an existing sequence slot of a Started session and bumps
    /// the session version. The slot's question never changes. Returns `false` when
    /// the session is no longer in progress.
    async fn update_answer(&self, session_id: Uuid, answer: &Answer) -> Result<bool>;
    async fn answer(&self, session_id: Uuid, seq_no: i32) -> Result<Option<Answer>>;
    async fn sessions_with_status(&self, status: SessionStatus) -> Result<Vec<ExamSession>>;
    async fn sessions_for_schedule(&self, schedule_id: Uuid) -> Result<Vec<ExamSession>>;
    async fn sessions_for_proctor(&self, proctor_id: Uuid) -> Result<Vec<ExamSession>>;
    async fn sessions_for_evaluator(&self, evaluator_id: Uuid) -> Result<Vec<ExamSession>>;

    async fn insert_event(&self, event: &IntegrityEvent) -> Result<()>;
    /// Events for a session, oldest first.
    async fn events(&self, session_id: Uuid) -> Result<Vec<IntegrityEvent>>;
    async fn count_warnings(&self, session_id: Uuid, warning_type: WarningType) -> Result<i64>;

    /// At most one certificate exists per session; a second insert returns the first.
    async fn insert_certificate(&self, certificate: &Certificate) -> Result<Certificate>;
    async fn certificate_for_session(&self, session_id: Uuid) -> Result<Option<Certificate>>;
}
