//! Shared fixtures for service tests: in-memory store and cache, a silent
//! notifier, and builders for questions, exams and schedules.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::cache::{LiveCache, MemoryLiveCache};
use crate::database::store::ExamStore;
use crate::database::MemoryExamStore;
use crate::error::Result;
use crate::models::actor::Actor;
use crate::models::certificate::Certificate;
use crate::models::exam::{ExamDefinition, ExamQuestionType, QuestionSelection, ResultVisibility};
use crate::models::integrity_event::{IntegrityEvent, WarningType};
use crate::models::question::{Question, QuestionKind, QuestionOption};
use crate::models::schedule::{Examiner, ScheduleStatus, ScheduleType, ScheduleWindow};
use crate::models::session::{Answer, ExamSession, SessionStatus};
use crate::services::notification_service::MockNotifier;
use crate::services::sequencer_service::SequencerService;
use crate::services::session_service::SessionService;

pub fn examiner(can_proctor: bool, can_evaluate: bool) -> Examiner {
    Examiner {
        user_id: Uuid::new_v4(),
        can_proctor,
        can_evaluate,
        proctoring_load: 0,
        evaluation_load: 0,
    }
}

pub fn quiet_notifier() -> MockNotifier {
    let mut notifier = MockNotifier::new();
    notifier.expect_notify().returning(|_| Ok(()));
    notifier
}

pub struct Fixture {
    pub store: Arc<dyn ExamStore>,
    pub cache: Arc<dyn LiveCache>,
}

impl Fixture {
    pub async fn new() -> Self {
        Self {
            store: Arc::new(MemoryExamStore::new()),
            cache: Arc::new(MemoryLiveCache::new()),
        }
    }

    /// Every store call takes `millis` first, so concurrent requests interleave
    /// between their reads and writes the way they do against a real database.
    pub async fn lagging(millis: u64) -> Self {
        Self {
            store: Arc::new(LaggingStore::new(millis)),
            cache: Arc::new(MemoryLiveCache::new()),
        }
    }

    pub fn sequencer(&self) -> SequencerService {
        SequencerService::new(self.store.clone())
    }

    pub fn session_service(&self) -> SessionService {
        SessionService::new(self.store.clone(), self.cache.clone(), Arc::new(quiet_notifier()))
    }

    pub fn actor(&self, session: &ExamSession) -> Actor {
        Actor::User(session.candidate_id)
    }

    /// Choice questions with options a (correct), b and c.
    pub async fn seed_choice_questions(&self, category: &str, count: usize, mark: i64) -> Vec<Uuid> {
        let mut ids = Vec::with_capacity(count);
        for n in 0..count {
            let question = Question {
                id: Uuid::new_v4(),
                category: category.to_string(),
                kind: QuestionKind::Choices,
                text: format!("{} question {}", category, n + 1),
                mark: Decimal::from(mark),
                options: ["a", "b", "c"]
                    .iter()
                    .map(|id| QuestionOption {
                        id: id.to_string(),
                        text: format!("option {}", id),
                        is_correct: *id == "a",
                    })
                    .collect(),
            };
            self.store.save_question(&question).await.unwrap();
            ids.push(question.id);
        }
        ids
    }

    pub async fn seed_user_input_questions(&self, category: &str, count: usize, mark: i64) -> Vec<Uuid> {
        let mut ids = Vec::with_capacity(count);
        for n in 0..count {
            let question = Question {
                id: Uuid::new_v4(),
                category: category.to_string(),
                kind: QuestionKind::UserInput,
                text: format!("Describe {} topic {}", category, n + 1),
                mark: Decimal::from(mark),
                options: Vec::new(),
            };
            self.store.save_question(&question).await.unwrap();
            ids.push(question.id);
        }
        ids
    }

    /// An unsaved mixed-kind exam worth nothing until the caller says otherwise.
    pub fn exam_with(&self, selection: QuestionSelection, tweak: impl FnOnce(&mut ExamDefinition)) -> ExamDefinition {
        let mut exam = ExamDefinition {
            id: Uuid::new_v4(),
            title: "Workplace safety".to_string(),
            duration_minutes: 60,
            pass_percentage: Decimal::from(50),
            total_marks: Decimal::ZERO,
            total_questions: 0,
            question_type: ExamQuestionType::Mixed,
            randomize_questions: false,
            max_warning_count: 3,
            enable_certification: false,
            certificate_expiry_years: None,
            result_visibility: ResultVisibility::AfterExamSubmission,
            show_result_after: None,
            evaluation_window_days: 3,
            question_selection: selection,
        };
        tweak(&mut exam);
        exam
    }

    /// A saved exam of 1-mark questions, choices first, and a fixed schedule that
    /// opened five minutes ago and runs for the exam's duration.
    pub async fn exam_and_schedule(
        &self,
        choices: usize,
        user_input: usize,
        examiners: Vec<Examiner>,
        tweak: impl FnOnce(&mut ExamDefinition),
    ) -> (ExamDefinition, ScheduleWindow) {
        let mut ids = self.seed_choice_questions("general", choices, 1).await;
        ids.extend(self.seed_user_input_questions("general", user_input, 1).await);
        let question_type = match (choices, user_input) {
            (_, 0) => ExamQuestionType::Choices,
            (0, _) => ExamQuestionType::UserInput,
            _ => ExamQuestionType::Mixed,
        };
        let total = ids.len();
        let exam = self.exam_with(QuestionSelection::Fixed(ids), |e| {
            e.question_type = question_type;
            e.total_marks = Decimal::from(total as i64);
            e.total_questions = total as i32;
            tweak(e);
        });
        self.store.save_exam(&exam).await.unwrap();

        let schedule = ScheduleWindow {
            id: Uuid::new_v4(),
            exam_id: exam.id,
            start_time: Utc::now() - Duration::minutes(5),
            schedule_type: ScheduleType::Fixed,
            duration_minutes: exam.duration_minutes,
            expire_in_days: 0,
            examiners,
            status: ScheduleStatus::Scheduled,
            version: 0,
        };
        self.store.save_schedule(&schedule).await.unwrap();
        (exam, schedule)
    }

    pub async fn ongoing_schedule(&self, examiners: Vec<Examiner>) -> ScheduleWindow {
        self.exam_and_schedule(1, 0, examiners, |_| {}).await.1
    }

    pub async fn register(&self, schedule: &ScheduleWindow) -> ExamSession {
        let session = ExamSession::register(schedule.exam_id, schedule.id, Uuid::new_v4());
        self.store.insert_session(&session).await.unwrap()
    }
}

/// Memory store with a fixed delay in front of every call. It also counts full
/// session loads.
pub struct LaggingStore {
    inner: MemoryExamStore,
    delay: std::time::Duration,
    session_reads: AtomicUsize,
}

impl LaggingStore {
    pub fn new(millis: u64) -> Self {
        Self {
            inner: MemoryExamStore::new(),
            delay: std::time::Duration::from_millis(millis),
            session_reads: AtomicUsize::new(0),
        }
    }

    pub fn session_reads(&self) -> usize {
        self.session_reads.load(Ordering::SeqCst)
    }

    async fn lag(&self) {
        tokio::time::sleep(self.delay).await;
    }
}

#[async_trait]
impl ExamStore for LaggingStore {
    async fn exam(&self, id: Uuid) -> Result<ExamDefinition> {
        self.lag().await;
        self.inner.exam(id).await
    }

    async fn save_exam(&self, exam: &ExamDefinition) -> Result<()> {
        self.lag().await;
        self.inner.save_exam(exam).await
    }

    async fn question(&self, id: Uuid) -> Result<Question> {
        self.lag().await;
        self.inner.question(id).await
    }

    async fn save_question(&self, question: &Question) -> Result<()> {
        self.lag().await;
        self.inner.save_question(question).await
    }

    async fn question_ids_matching(
        &self,
        category: &str,
        mark: Decimal,
        kind: Option<QuestionKind>,
    ) -> Result<Vec<Uuid>> {
        self.lag().await;
        self.inner.question_ids_matching(category, mark, kind).await
    }

    async fn schedule(&self, id: Uuid) -> Result<ScheduleWindow> {
        self.lag().await;
        self.inner.schedule(id).await
    }

    async fn save_schedule(&self, schedule: &ScheduleWindow) -> Result<()> {
        self.lag().await;
        self.inner.save_schedule(schedule).await
    }

    async fn set_schedule_status(&self, id: Uuid, status: ScheduleStatus) -> Result<()> {
        self.lag().await;
        self.inner.set_schedule_status(id, status).await
    }

    async fn update_examiner_loads(
        &self,
        schedule_id: Uuid,
        expected_version: i32,
        examiners: &[Examiner],
    ) -> Result<bool> {
        self.lag().await;
        self.inner
            .update_examiner_loads(schedule_id, expected_version, examiners)
            .await
    }

    async fn delete_schedule(&self, id: Uuid) -> Result<()> {
        self.lag().await;
        self.inner.delete_schedule(id).await
    }

    async fn session(&self, id: Uuid) -> Result<ExamSession> {
        self.lag().await;
        self.session_reads.fetch_add(1, Ordering::SeqCst);
        self.inner.session(id).await
    }

    async fn find_session(
        &self,
        candidate_id: Uuid,
        schedule_id: Uuid,
    ) -> Result<Option<ExamSession>> {
        self.lag().await;
        self.inner.find_session(candidate_id, schedule_id).await
    }

    async fn insert_session(&self, session: &ExamSession) -> Result<ExamSession> {
        self.lag().await;
        self.inner.insert_session(session).await
    }

    async fn update_session(&self, session: &mut ExamSession) -> Result<bool> {
        self.lag().await;
        self.inner.update_session(session).await
    }

    async fn update_answer(&self, session_id: Uuid, answer: &Answer) -> Result<bool> {
        self.lag().await;
        self.inner.update_answer(session_id, answer).await
    }

    async fn answer(&self, session_id: Uuid, seq_no: i32) -> Result<Option<Answer>> {
        self.lag().await;
        self.inner.answer(session_id, seq_no).await
    }

    async fn sessions_with_status(&self, status: SessionStatus) -> Result<Vec<ExamSession>> {
        self.lag().await;
        self.inner.sessions_with_status(status).await
    }

    async fn sessions_for_schedule(&self, schedule_id: Uuid) -> Result<Vec<ExamSession>> {
        self.lag().await;
        self.inner.sessions_for_schedule(schedule_id).await
    }

    async fn sessions_for_proctor(&self, proctor_id: Uuid) -> Result<Vec<ExamSession>> {
        self.lag().await;
        self.inner.sessions_for_proctor(proctor_id).await
    }

    async fn sessions_for_evaluator(&self, evaluator_id: Uuid) -> Result<Vec<ExamSession>> {
        self.lag().await;
        self.inner.sessions_for_evaluator(evaluator_id).await
    }

    async fn insert_event(&self, event: &IntegrityEvent) -> Result<()> {
        self.lag().await;
        self.inner.insert_event(event).await
    }

    async fn events(&self, session_id: Uuid) -> Result<Vec<IntegrityEvent>> {
        self.lag().await;
        self.inner.events(session_id).await
    }

    async fn count_warnings(&self, session_id: Uuid, warning_type: WarningType) -> Result<i64> {
        self.lag().await;
        self.inner.count_warnings(session_id, warning_type).await
    }

    async fn insert_certificate(&self, certificate: &Certificate) -> Result<Certificate> {
        self.lag().await;
        self.inner.insert_certificate(certificate).await
    }

    async fn certificate_for_session(&self, session_id: Uuid) -> Result<Option<Certificate>> {
        self.lag().await;
        self.inner.certificate_for_session(session_id).await
    }
}
