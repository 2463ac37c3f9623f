use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::database::store::ExamStore;
use crate::error::{Error, Result};
use crate::models::certificate::Certificate;
use crate::models::exam::ExamDefinition;
use crate::models::integrity_event::{IntegrityEvent, WarningType};
use crate::models::question::{Question, QuestionKind};
use crate::models::schedule::{Examiner, ScheduleStatus, ScheduleWindow};
use crate::models::session::{Answer, ExamSession, SessionStatus};

#[derive(Default)]
struct Tables {
    exams: HashMap<Uuid, ExamDefinition>,
    questions: HashMap<Uuid, Question>,
    schedules: HashMap<Uuid, ScheduleWindow>,
    sessions: HashMap<Uuid, ExamSession>,
    /// Insertion order, so listings come back oldest first like the Postgres store.
    session_order: Vec<Uuid>,
    events: Vec<IntegrityEvent>,
    certificates: HashMap<Uuid, Certificate>,
}

impl Tables {
    fn ordered_sessions<F>(&self, mut keep: F) -> Vec<ExamSession>
    where
        F: FnMut(&ExamSession) -> bool,
    {
        self.session_order
            .iter()
            .filter_map(|id| self.sessions.get(id))
            .filter(|s| keep(s))
            .cloned()
            .collect()
    }
}

/// Process-local store with the same contract as the Postgres one.
#[derive(Clone, Default)]
pub struct MemoryExamStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryExamStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExamStore for MemoryExamStore {
    async fn exam(&self, id: Uuid) -> Result<ExamDefinition> {
        self.tables
            .read()
            .await
            .exams
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Exam {} not found", id)))
    }

    async fn save_exam(&self, exam: &ExamDefinition) -> Result<()> {
        self.tables.write().await.exams.insert(exam.id, exam.clone());
        Ok(())
    }

    async fn question(&self, id: Uuid) -> Result<Question> {
        self.tables
            .read()
            .await
            .questions
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Question {} not found", id)))
    }

    async fn save_question(&self, question: &Question) -> Result<()> {
        self.tables
            .write()
            .await
            .questions
            .insert(question.id, question.clone());
        Ok(())
    }

    async fn question_ids_matching(
        &self,
        category: &str,
        mark: Decimal,
        kind: Option<QuestionKind>,
    ) -> Result<Vec<Uuid>> {
        let tables = self.tables.read().await;
        let mut ids: Vec<Uuid> = tables
            .questions
            .values()
            .filter(|q| q.category == category && q.mark == mark)
            .filter(|q| kind.map_or(true, |k| q.kind == k))
            .map(|q| q.id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn schedule(&self, id: Uuid) -> Result<ScheduleWindow> {
        self.tables
            .read()
            .await
            .schedules
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Schedule {} not found", id)))
    }

    async fn save_schedule(&self, schedule: &ScheduleWindow) -> Result<()> {
        let mut tables = self.tables.write().await;
        let mut stored = schedule.clone();
        if let Some(existing) = tables.schedules.get(&schedule.id) {
            stored.version = existing.version + 1;
        }
        tables.schedules.insert(schedule.id, stored);
        Ok(())
    }

    async fn set_schedule_status(&self, id: Uuid, status: ScheduleStatus) -> Result<()> {
        let mut tables = self.tables.write().await;
        let schedule = tables
            .schedules
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("Schedule {} not found", id)))?;
        schedule.status = status;
        Ok(())
    }

    async fn update_examiner_loads(
        &self,
        schedule_id: Uuid,
        expected_version: i32,
        examiners: &[Examiner],
    ) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let schedule = tables
            .schedules
            .get_mut(&schedule_id)
            .ok_or_else(|| Error::NotFound(format!("Schedule {} not found", schedule_id)))?;
        if schedule.version != expected_version {
            return Ok(false);
        }
        schedule.examiners = examiners.to_vec();
        schedule.version += 1;
        Ok(true)
    }

    async fn delete_schedule(&self, id: Uuid) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.schedules.remove(&id).is_none() {
            return Err(Error::NotFound(format!("Schedule {} not found", id)));
        }
        let doomed: Vec<Uuid> = tables
            .sessions
            .values()
            .filter(|s| s.schedule_id == id)
            .map(|s| s.id)
            .collect();
        for session_id in &doomed {
            tables.sessions.remove(session_id);
            tables.certificates.remove(session_id);
        }
        tables.session_order.retain(|sid| !doomed.contains(sid));
        tables.events.retain(|e| !doomed.contains(&e.session_id));
        Ok(())
    }

    async fn session(&self, id: Uuid) -> Result<ExamSession> {
        self.tables
            .read()
            .await
            .sessions
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Exam session {} not found", id)))
    }

    async fn find_session(
        &self,
        candidate_id: Uuid,
        schedule_id: Uuid,
    ) -> Result<Option<ExamSession>> {
        let tables = self.tables.read().await;
        Ok(tables
            .sessions
            .values()
            .find(|s| s.candidate_id == candidate_id && s.schedule_id == schedule_id)
            .cloned())
    }

    async fn insert_session(&self, session: &ExamSession) -> Result<ExamSession> {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables.sessions.values().find(|s| {
            s.candidate_id == session.candidate_id && s.schedule_id == session.schedule_id
        }) {
            return Ok(existing.clone());
        }
        tables.sessions.insert(session.id, session.clone());
        tables.session_order.push(session.id);
        Ok(session.clone())
    }

    async fn update_session(&self, session: &mut ExamSession) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let stored = tables
            .sessions
            .get_mut(&session.id)
            .ok_or_else(|| Error::NotFound(format!("Exam session {} not found", session.id)))?;
        if stored.version != session.version {
            return Ok(false);
        }
        session.version += 1;
        session.answers.sort_by_key(|a| a.seq_no);
        *stored = session.clone();
        Ok(true)
    }

    async fn update_answer(&self, session_id: Uuid, answer: &Answer) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let stored = tables
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| Error::NotFound(format!("Exam session {} not found", session_id)))?;
        if stored.status != SessionStatus::Started {
            return Ok(false);
        }
        let existing = stored
            .answers
            .iter_mut()
            .find(|a| a.seq_no == answer.seq_no)
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "Question {} is not part of exam session {}",
                    answer.seq_no, session_id
                ))
            })?;
        *existing = Answer {
            question_id: existing.question_id,
            ..answer.clone()
        };
        stored.version += 1;
        Ok(true)
    }

    async fn answer(&self, session_id: Uuid, seq_no: i32) -> Result<Option<Answer>> {
        let tables = self.tables.read().await;
        let session = tables
            .sessions
            .get(&session_id)
            .ok_or_else(|| Error::NotFound(format!("Exam session {} not found", session_id)))?;
        Ok(session.answer(seq_no).cloned())
    }

    async fn sessions_with_status(&self, status: SessionStatus) -> Result<Vec<ExamSession>> {
        Ok(self
            .tables
            .read()
            .await
            .ordered_sessions(|s| s.status == status))
    }

    async fn sessions_for_schedule(&self, schedule_id: Uuid) -> Result<Vec<ExamSession>> {
        Ok(self
            .tables
            .read()
            .await
            .ordered_sessions(|s| s.schedule_id == schedule_id))
    }

    async fn sessions_for_proctor(&self, proctor_id: Uuid) -> Result<Vec<ExamSession>> {
        Ok(self
            .tables
            .read()
            .await
            .ordered_sessions(|s| s.assigned_proctor == Some(proctor_id)))
    }

    async fn sessions_for_evaluator(&self, evaluator_id: Uuid) -> Result<Vec<ExamSession>> {
        Ok(self
            .tables
            .read()
            .await
            .ordered_sessions(|s| s.assigned_evaluator == Some(evaluator_id)))
    }

    async fn insert_event(&self, event: &IntegrityEvent) -> Result<()> {
        self.tables.write().await.events.push(event.clone());
        Ok(())
    }

    async fn events(&self, session_id: Uuid) -> Result<Vec<IntegrityEvent>> {
        let tables = self.tables.read().await;
        let mut events: Vec<IntegrityEvent> = tables
            .events
            .iter()
            .filter(|e| e.session_id == session_id)
            .cloned()
            .collect();
        // stable sort keeps insertion order for identical timestamps
        events.sort_by_key(|e| e.created_at);
        Ok(events)
    }

    async fn count_warnings(&self, session_id: Uuid, warning_type: WarningType) -> Result<i64> {
        let tables = self.tables.read().await;
        Ok(tables
            .events
            .iter()
            .filter(|e| e.session_id == session_id && e.warning_type == warning_type)
            .count() as i64)
    }

    async fn insert_certificate(&self, certificate: &Certificate) -> Result<Certificate> {
        let mut tables = self.tables.write().await;
        Ok(tables
            .certificates
            .entry(certificate.session_id)
            .or_insert_with(|| certificate.clone())
            .clone())
    }

    async fn certificate_for_session(&self, session_id: Uuid) -> Result<Option<Certificate>> {
        Ok(self
            .tables
            .read()
            .await
            .certificates
            .get(&session_id)
            .cloned())
    }
}
