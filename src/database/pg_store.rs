use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::collections::HashMap;
use uuid::Uuid;

use crate::database::store::ExamStore;
use crate::error::{Error, Result};
use crate::models::certificate::Certificate;
use crate::models::exam::{ExamDefinition, ExamQuestionType, QuestionSelection, ResultVisibility};
use crate::models::integrity_event::{IntegrityEvent, WarningType};
use crate::models::question::{Question, QuestionKind, QuestionOption};
use crate::models::schedule::{Examiner, ScheduleStatus, ScheduleType, ScheduleWindow};
use crate::models::session::{Answer, ExamSession, SessionStatus};

const SESSION_COLUMNS: &str = r#"id, exam_id, schedule_id, candidate_id, status, started_at, submitted_at,
    additional_time_minutes, assigned_proctor, assigned_evaluator, total_marks,
    evaluation_status, result_status, version"#;

const ANSWER_COLUMNS: &str = r#"session_id, seq_no, question_id, submitted, is_correct, mark,
    evaluation_status, marked_for_later, evaluator_id, evaluator_feedback"#;

#[derive(FromRow)]
struct ExamRow {
    id: Uuid,
    title: String,
    duration_minutes: i32,
    pass_percentage: Decimal,
    total_marks: Decimal,
    total_questions: i32,
    question_type: ExamQuestionType,
    randomize_questions: bool,
    max_warning_count: i32,
    enable_certification: bool,
    certificate_expiry_years: Option<i32>,
    result_visibility: ResultVisibility,
    show_result_after: Option<DateTime<Utc>>,
    evaluation_window_days: i32,
    question_selection: Json<QuestionSelection>,
}

impl From<ExamRow> for ExamDefinition {
    fn from(row: ExamRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            duration_minutes: row.duration_minutes,
            pass_percentage: row.pass_percentage,
            total_marks: row.total_marks,
            total_questions: row.total_questions,
            question_type: row.question_type,
            randomize_questions: row.randomize_questions,
            max_warning_count: row.max_warning_count,
            enable_certification: row.enable_certification,
            certificate_expiry_years: row.certificate_expiry_years,
            result_visibility: row.result_visibility,
            show_result_after: row.show_result_after,
            evaluation_window_days: row.evaluation_window_days,
            question_selection: row.question_selection.0,
        }
    }
}

#[derive(FromRow)]
struct QuestionRow {
    id: Uuid,
    category: String,
    kind: QuestionKind,
    text: String,
    mark: Decimal,
    options: Json<Vec<QuestionOption>>,
}

impl From<QuestionRow> for Question {
    fn from(row: QuestionRow) -> Self {
        Self {
            id: row.id,
            category: row.category,
            kind: row.kind,
            text: row.text,
            mark: row.mark,
            options: row.options.0,
        }
    }
}

#[derive(FromRow)]
struct ScheduleRow {
    id: Uuid,
    exam_id: Uuid,
    start_time: DateTime<Utc>,
    schedule_type: ScheduleType,
    duration_minutes: i32,
    expire_in_days: i32,
    examiners: Json<Vec<Examiner>>,
    status: ScheduleStatus,
    version: i32,
}

impl From<ScheduleRow> for ScheduleWindow {
    fn from(row: ScheduleRow) -> Self {
        Self {
            id: row.id,
            exam_id: row.exam_id,
            start_time: row.start_time,
            schedule_type: row.schedule_type,
            duration_minutes: row.duration_minutes,
            expire_in_days: row.expire_in_days,
            examiners: row.examiners.0,
            status: row.status,
            version: row.version,
        }
    }
}

#[derive(FromRow)]
struct AnswerRow {
    session_id: Uuid,
    #[sqlx(flatten)]
    answer: Answer,
}

/// Postgres-backed store. All statements are runtime-checked queries.
#[derive(Clone)]
pub struct PgExamStore {
    pool: PgPool,
}

impl PgExamStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn attach_answers(&self, mut sessions: Vec<ExamSession>) -> Result<Vec<ExamSession>> {
        if sessions.is_empty() {
            return Ok(sessions);
        }
        let ids: Vec<Uuid> = sessions.iter().map(|s| s.id).collect();
        let rows = sqlx::query_as::<_, AnswerRow>(&format!(
            "SELECT {} FROM exam_answers WHERE session_id = ANY($1) ORDER BY session_id, seq_no",
            ANSWER_COLUMNS
        ))
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut grouped: HashMap<Uuid, Vec<Answer>> = HashMap::new();
        for row in rows {
            grouped.entry(row.session_id).or_default().push(row.answer);
        }
        for session in sessions.iter_mut() {
            session.answers = grouped.remove(&session.id).unwrap_or_default();
        }
        Ok(sessions)
    }

    async fn sessions_where(&self, clause: &str, value: Uuid) -> Result<Vec<ExamSession>> {
        let sessions = sqlx::query_as::<_, ExamSession>(&format!(
            "SELECT {} FROM exam_sessions WHERE {} = $1 ORDER BY created_at",
            SESSION_COLUMNS, clause
        ))
        .bind(value)
        .fetch_all(&self.pool)
        .await?;
        self.attach_answers(sessions).await
    }

    async fn upsert_answer(
        tx: &mut Transaction<'_, Postgres>,
        session_id: Uuid,
        answer: &Answer,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO exam_answers (
                session_id, seq_no, question_id, submitted, is_correct, mark,
                evaluation_status, marked_for_later, evaluator_id, evaluator_feedback
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (session_id, seq_no) DO UPDATE SET
                question_id = EXCLUDED.question_id,
                submitted = EXCLUDED.submitted,
                is_correct = EXCLUDED.is_correct,
                mark = EXCLUDED.mark,
                evaluation_status = EXCLUDED.evaluation_status,
                marked_for_later = EXCLUDED.marked_for_later,
                evaluator_id = EXCLUDED.evaluator_id,
                evaluator_feedback = EXCLUDED.evaluator_feedback
            "#,
        )
        .bind(session_id)
        .bind(answer.seq_no)
        .bind(answer.question_id)
        .bind(&answer.submitted)
        .bind(answer.is_correct)
        .bind(answer.mark)
        .bind(answer.evaluation_status)
        .bind(answer.marked_for_later)
        .bind(answer.evaluator_id)
        .bind(&answer.evaluator_feedback)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ExamStore for PgExamStore {
    async fn exam(&self, id: Uuid) -> Result<ExamDefinition> {
        let row = sqlx::query_as::<_, ExamRow>(
            r#"SELECT id, title, duration_minutes, pass_percentage, total_marks, total_questions,
                      question_type, randomize_questions, max_warning_count, enable_certification,
                      certificate_expiry_years, result_visibility, show_result_after,
                      evaluation_window_days, question_selection
               FROM exams WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Exam {} not found", id)))?;
        Ok(row.into())
    }

    async fn save_exam(&self, exam: &ExamDefinition) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO exams (
                id, title, duration_minutes, pass_percentage, total_marks, total_questions,
                question_type, randomize_questions, max_warning_count, enable_certification,
                certificate_expiry_years, result_visibility, show_result_after,
                evaluation_window_days, question_selection
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (id) DO UPDATE SET
                title = EXCLUDED.title,
                duration_minutes = EXCLUDED.duration_minutes,
                pass_percentage = EXCLUDED.pass_percentage,
                total_marks = EXCLUDED.total_marks,
                total_questions = EXCLUDED.total_questions,
                question_type = EXCLUDED.question_type,
                randomize_questions = EXCLUDED.randomize_questions,
                max_warning_count = EXCLUDED.max_warning_count,
                enable_certification = EXCLUDED.enable_certification,
                certificate_expiry_years = EXCLUDED.certificate_expiry_years,
                result_visibility = EXCLUDED.result_visibility,
                show_result_after = EXCLUDED.show_result_after,
                evaluation_window_days = EXCLUDED.evaluation_window_days,
                question_selection = EXCLUDED.question_selection,
                updated_at = NOW()
            "#,
        )
        .bind(exam.id)
        .bind(&exam.title)
        .bind(exam.duration_minutes)
        .bind(exam.pass_percentage)
        .bind(exam.total_marks)
        .bind(exam.total_questions)
        .bind(exam.question_type)
        .bind(exam.randomize_questions)
        .bind(exam.max_warning_count)
        .bind(exam.enable_certification)
        .bind(exam.certificate_expiry_years)
        .bind(exam.result_visibility)
        .bind(exam.show_result_after)
        .bind(exam.evaluation_window_days)
        .bind(Json(&exam.question_selection))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn question(&self, id: Uuid) -> Result<Question> {
        let row = sqlx::query_as::<_, QuestionRow>(
            "SELECT id, category, kind, text, mark, options FROM questions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Question {} not found", id)))?;
        Ok(row.into())
    }

    async fn save_question(&self, question: &Question) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO questions (id, category, kind, text, mark, options)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                category = EXCLUDED.category,
                kind = EXCLUDED.kind,
                text = EXCLUDED.text,
                mark = EXCLUDED.mark,
                options = EXCLUDED.options
            "#,
        )
        .bind(question.id)
        .bind(&question.category)
        .bind(question.kind)
        .bind(&question.text)
        .bind(question.mark)
        .bind(Json(&question.options))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn question_ids_matching(
        &self,
        category: &str,
        mark: Decimal,
        kind: Option<QuestionKind>,
    ) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"SELECT id FROM questions
               WHERE category = $1 AND mark = $2 AND ($3::question_kind IS NULL OR kind = $3)
               ORDER BY id"#,
        )
        .bind(category)
        .bind(mark)
        .bind(kind)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn schedule(&self, id: Uuid) -> Result<ScheduleWindow> {
        let row = sqlx::query_as::<_, ScheduleRow>(
            r#"SELECT id, exam_id, start_time, schedule_type, duration_minutes, expire_in_days,
                      examiners, status, version
               FROM schedules WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Schedule {} not found", id)))?;
        Ok(row.into())
    }

    async fn save_schedule(&self, schedule: &ScheduleWindow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO schedules (
                id, exam_id, start_time, schedule_type, duration_minutes, expire_in_days,
                examiners, status, version
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                start_time = EXCLUDED.start_time,
                schedule_type = EXCLUDED.schedule_type,
                duration_minutes = EXCLUDED.duration_minutes,
                expire_in_days = EXCLUDED.expire_in_days,
                examiners = EXCLUDED.examiners,
                status = EXCLUDED.status,
                version = schedules.version + 1
            "#,
        )
        .bind(schedule.id)
        .bind(schedule.exam_id)
        .bind(schedule.start_time)
        .bind(schedule.schedule_type)
        .bind(schedule.duration_minutes)
        .bind(schedule.expire_in_days)
        .bind(Json(&schedule.examiners))
        .bind(schedule.status)
        .bind(schedule.version)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_schedule_status(&self, id: Uuid, status: ScheduleStatus) -> Result<()> {
        let result = sqlx::query("UPDATE schedules SET status = $1 WHERE id = $2")
            .bind(status)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("Schedule {} not found", id)));
        }
        Ok(())
    }

    async fn update_examiner_loads(
        &self,
        schedule_id: Uuid,
        expected_version: i32,
        examiners: &[Examiner],
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"UPDATE schedules SET examiners = $1, version = version + 1
               WHERE id = $2 AND version = $3"#,
        )
        .bind(Json(examiners))
        .bind(schedule_id)
        .bind(expected_version)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_schedule(&self, id: Uuid) -> Result<()> {
        // sessions, answers, events and certificates go with it via ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM schedules WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("Schedule {} not found", id)));
        }
        Ok(())
    }

    async fn session(&self, id: Uuid) -> Result<ExamSession> {
        let session = sqlx::query_as::<_, ExamSession>(&format!(
            "SELECT {} FROM exam_sessions WHERE id = $1",
            SESSION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Exam session {} not found", id)))?;
        let mut sessions = self.attach_answers(vec![session]).await?;
        sessions
            .pop()
            .ok_or_else(|| Error::Internal("session vanished while loading answers".to_string()))
    }

    async fn find_session(
        &self,
        candidate_id: Uuid,
        schedule_id: Uuid,
    ) -> Result<Option<ExamSession>> {
        let session = sqlx::query_as::<_, ExamSession>(&format!(
            "SELECT {} FROM exam_sessions WHERE candidate_id = $1 AND schedule_id = $2",
            SESSION_COLUMNS
        ))
        .bind(candidate_id)
        .bind(schedule_id)
        .fetch_optional(&self.pool)
        .await?;
        match session {
            Some(session) => Ok(self.attach_answers(vec![session]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn insert_session(&self, session: &ExamSession) -> Result<ExamSession> {
        sqlx::query(
            r#"
            INSERT INTO exam_sessions (
                id, exam_id, schedule_id, candidate_id, status, started_at, submitted_at,
                additional_time_minutes, assigned_proctor, assigned_evaluator, total_marks,
                evaluation_status, result_status
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (candidate_id, schedule_id) DO NOTHING
            "#,
        )
        .bind(session.id)
        .bind(session.exam_id)
        .bind(session.schedule_id)
        .bind(session.candidate_id)
        .bind(session.status)
        .bind(session.started_at)
        .bind(session.submitted_at)
        .bind(session.additional_time_minutes)
        .bind(session.assigned_proctor)
        .bind(session.assigned_evaluator)
        .bind(session.total_marks)
        .bind(session.evaluation_status)
        .bind(session.result_status)
        .execute(&self.pool)
        .await?;

        self.find_session(session.candidate_id, session.schedule_id)
            .await?
            .ok_or_else(|| Error::Internal("registered session could not be read back".to_string()))
    }

    async fn update_session(&self, session: &mut ExamSession) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE exam_sessions SET
                status = $3,
                started_at = $4,
                submitted_at = $5,
                additional_time_minutes = $6,
                assigned_proctor = $7,
                assigned_evaluator = $8,
                total_marks = $9,
                evaluation_status = $10,
                result_status = $11,
                version = version + 1
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(session.id)
        .bind(session.version)
        .bind(session.status)
        .bind(session.started_at)
        .bind(session.submitted_at)
        .bind(session.additional_time_minutes)
        .bind(session.assigned_proctor)
        .bind(session.assigned_evaluator)
        .bind(session.total_marks)
        .bind(session.evaluation_status)
        .bind(session.result_status)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            let exists: Option<i32> =
                sqlx::query_scalar("SELECT version FROM exam_sessions WHERE id = $1")
                    .bind(session.id)
                    .fetch_optional(&mut *tx)
                    .await?;
            return match exists {
                Some(_) => Ok(false),
                None => Err(Error::NotFound(format!("Exam session {} not found", session.id))),
            };
        }

        for answer in &session.answers {
            Self::upsert_answer(&mut tx, session.id, answer).await?;
        }
        tx.commit().await?;
        session.version += 1;
        Ok(true)
    }

    async fn update_answer(&self, session_id: Uuid, answer: &Answer) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        // row lock on the session serializes this against whole-record writes
        let claimed = sqlx::query(
            "UPDATE exam_sessions SET version = version + 1 WHERE id = $1 AND status = $2",
        )
        .bind(session_id)
        .bind(SessionStatus::Started)
        .execute(&mut *tx)
        .await?;
        if claimed.rows_affected() == 0 {
            return Ok(false);
        }

        let result = sqlx::query(
            r#"
            UPDATE exam_answers SET
                submitted = $3,
                is_correct = $4,
                mark = $5,
                evaluation_status = $6,
                marked_for_later = $7,
                evaluator_id = $8,
                evaluator_feedback = $9
            WHERE session_id = $1 AND seq_no = $2
            "#,
        )
        .bind(session_id)
        .bind(answer.seq_no)
        .bind(&answer.submitted)
        .bind(answer.is_correct)
        .bind(answer.mark)
        .bind(answer.evaluation_status)
        .bind(answer.marked_for_later)
        .bind(answer.evaluator_id)
        .bind(&answer.evaluator_feedback)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!(
                "Question {} is not part of exam session {}",
                answer.seq_no, session_id
            )));
        }
        tx.commit().await?;
        Ok(true)
    }

    async fn answer(&self, session_id: Uuid, seq_no: i32) -> Result<Option<Answer>> {
        let row = sqlx::query_as::<_, AnswerRow>(&format!(
            "SELECT {} FROM exam_answers WHERE session_id = $1 AND seq_no = $2",
            ANSWER_COLUMNS
        ))
        .bind(session_id)
        .bind(seq_no)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.answer))
    }

    async fn sessions_with_status(&self, status: SessionStatus) -> Result<Vec<ExamSession>> {
        let sessions = sqlx::query_as::<_, ExamSession>(&format!(
            "SELECT {} FROM exam_sessions WHERE status = $1 ORDER BY created_at",
            SESSION_COLUMNS
        ))
        .bind(status)
        .fetch_all(&self.pool)
        .await?;
        self.attach_answers(sessions).await
    }

    async fn sessions_for_schedule(&self, schedule_id: Uuid) -> Result<Vec<ExamSession>> {
        self.sessions_where("schedule_id", schedule_id).await
    }

    async fn sessions_for_proctor(&self, proctor_id: Uuid) -> Result<Vec<ExamSession>> {
        self.sessions_where("assigned_proctor", proctor_id).await
    }

    async fn sessions_for_evaluator(&self, evaluator_id: Uuid) -> Result<Vec<ExamSession>> {
        self.sessions_where("assigned_evaluator", evaluator_id).await
    }

    async fn insert_event(&self, event: &IntegrityEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO integrity_events (
                id, session_id, created_at, actor_role, actor_id, message, category, warning_type
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(event.id)
        .bind(event.session_id)
        .bind(event.created_at)
        .bind(event.actor_role)
        .bind(event.actor_id)
        .bind(&event.message)
        .bind(event.category)
        .bind(event.warning_type)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn events(&self, session_id: Uuid) -> Result<Vec<IntegrityEvent>> {
        let events = sqlx::query_as::<_, IntegrityEvent>(
            r#"SELECT id, session_id, created_at, actor_role, actor_id, message, category, warning_type
               FROM integrity_events WHERE session_id = $1 ORDER BY created_at, id"#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }

    async fn count_warnings(&self, session_id: Uuid, warning_type: WarningType) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(*) FROM integrity_events
               WHERE session_id = $1 AND warning_type = $2"#,
        )
        .bind(session_id)
        .bind(warning_type)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn insert_certificate(&self, certificate: &Certificate) -> Result<Certificate> {
        sqlx::query(
            r#"
            INSERT INTO certificates (
                id, session_id, exam_id, candidate_id, issue_date, expiry_date, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (session_id) DO NOTHING
            "#,
        )
        .bind(certificate.id)
        .bind(certificate.session_id)
        .bind(certificate.exam_id)
        .bind(certificate.candidate_id)
        .bind(certificate.issue_date)
        .bind(certificate.expiry_date)
        .bind(certificate.created_at)
        .execute(&self.pool)
        .await?;

        self.certificate_for_session(certificate.session_id)
            .await?
            .ok_or_else(|| Error::Internal("issued certificate could not be read back".to_string()))
    }

    async fn certificate_for_session(&self, session_id: Uuid) -> Result<Option<Certificate>> {
        let certificate = sqlx::query_as::<_, Certificate>(
            r#"SELECT id, session_id, exam_id, candidate_id, issue_date, expiry_date, created_at
               FROM certificates WHERE session_id = $1"#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(certificate)
    }
}
