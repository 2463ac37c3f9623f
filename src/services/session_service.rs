use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::cache::{LiveCache, LiveEntry, QuestionPointer};
use crate::database::store::{write_contention, ExamStore, MAX_WRITE_ATTEMPTS};
use crate::error::{Error, Result};
use crate::models::actor::Actor;
use crate::models::exam::{ExamQuestionType, ResultVisibility};
use crate::models::integrity_event::{EventCategory, IntegrityEvent, WarningType};
use crate::models::question::QuestionContent;
use crate::models::schedule::ScheduleStatus;
use crate::models::session::{
    Answer, AnswerStatus, EvaluationStatus, ExamSession, ResultStatus, SessionStatus,
};
use crate::services::balancer_service::{Assignment, BalancerService};
use crate::services::grading_service::GradingService;
use crate::services::integrity_service::{role_of, IntegrityService};
use crate::services::notification_service::{notify_quietly, Notification, Notifier};
use crate::services::recovery_service::{auto_submit, RecoveryService};
use crate::services::schedule_resolver::{
    end_time, remaining_seconds, resolve, WindowParams, WindowState,
};
use crate::services::sequencer_service::SequencerService;

#[derive(Debug, Clone, Serialize)]
pub struct StartedExam {
    pub session_id: Uuid,
    pub already_started: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub end_time: DateTime<Utc>,
    pub remaining_seconds: i64,
    pub total_questions: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuestionView {
    pub seq_no: i32,
    pub total_questions: usize,
    pub question: QuestionContent,
    pub submitted: Option<String>,
    pub marked_for_later: bool,
    pub status: AnswerStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnswerReceipt {
    pub seq_no: i32,
    pub status: AnswerStatus,
    pub marked_for_later: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitOutcome {
    pub show_result: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_marks: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_status: Option<ResultStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TerminateOutcome {
    pub session_id: Uuid,
    pub already_terminated: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct OverviewItem {
    pub seq_no: i32,
    pub status: AnswerStatus,
    pub marked_for_later: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionOverview {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub total_questions: usize,
    pub answered: usize,
    pub marked_for_later: usize,
    pub not_attempted: usize,
    pub questions: Vec<OverviewItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Scorecard {
    pub total_marks: Decimal,
    pub max_marks: Decimal,
    pub pass_mark: Decimal,
    pub result_status: ResultStatus,
    pub evaluation_status: EvaluationStatus,
    pub answered: usize,
    pub total_questions: usize,
    pub submitted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ResultView {
    Terminated { message: String },
    Pending { reason: String },
    Scorecard(Scorecard),
}

#[derive(Debug, Clone, Serialize)]
pub struct MessagePosted {
    pub event: IntegrityEvent,
    pub warning_count: i64,
    pub terminated: bool,
}

/// Where a sequence slot points, plus the attempt size it was read alongside.
struct LiveSlot {
    pointer: QuestionPointer,
    total_questions: usize,
}

#[derive(Clone)]
pub struct SessionService {
    store: Arc<dyn ExamStore>,
    cache: Arc<dyn LiveCache>,
    notifier: Arc<dyn Notifier>,
    sequencer: SequencerService,
    balancer: BalancerService,
    recovery: RecoveryService,
    integrity: IntegrityService,
}

impl SessionService {
    pub fn new(store: Arc<dyn ExamStore>, cache: Arc<dyn LiveCache>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            sequencer: SequencerService::new(store.clone()),
            balancer: BalancerService::new(store.clone()),
            recovery: RecoveryService::new(store.clone(), cache.clone()),
            integrity: IntegrityService::new(store.clone(), cache.clone(), notifier.clone()),
            store,
            cache,
            notifier,
        }
    }

    fn ensure_candidate(session: &ExamSession, actor: Actor) -> Result<()> {
        if !actor.is(Some(session.candidate_id)) {
            return Err(Error::Permission(
                "This exam session belongs to another candidate".to_string(),
            ));
        }
        Ok(())
    }

    /// Lazily submits a started session whose window has closed.
    async fn settle(&self, mut session: ExamSession, now: DateTime<Utc>) -> Result<ExamSession> {
        if session.status != SessionStatus::Started {
            return Ok(session);
        }
        let schedule = self.store.schedule(session.schedule_id).await?;
        let end = end_time(&WindowParams::for_session(&schedule, &session));
        if remaining_seconds(end, now) <= 0 {
            auto_submit(self.store.as_ref(), &mut session, now).await?;
            self.cache.evict(session.id).await?;
        }
        Ok(session)
    }

    /// Starts the attempt once. Concurrent or repeated calls all observe the same
    /// started session; only the call whose write lands sequences and assigns.
    pub async fn start(&self, session_id: Uuid, actor: Actor, now: DateTime<Utc>) -> Result<StartedExam> {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let session = self.store.session(session_id).await?;
            Self::ensure_candidate(&session, actor)?;
            let mut session = self.settle(session, now).await?;
            if session.status.is_terminal() {
                return Err(Error::State(format!(
                    "Exam session is already {}",
                    session.status.as_str()
                )));
            }

            let schedule = self.store.schedule(session.schedule_id).await?;
            if session.status == SessionStatus::Started {
                let end = end_time(&WindowParams::for_session(&schedule, &session));
                return Ok(StartedExam {
                    session_id,
                    already_started: true,
                    started_at: session.started_at,
                    end_time: end,
                    remaining_seconds: remaining_seconds(end, now).max(0),
                    total_questions: session.answers.len(),
                });
            }

            if now < schedule.start_time {
                return Err(Error::State(format!(
                    "Exam is not yet open. It starts at {}",
                    schedule.start_time.to_rfc3339()
                )));
            }
            if resolve(&WindowParams::for_session(&schedule, &session), now) == WindowState::Completed {
                return Err(Error::State("The exam window has already closed".to_string()));
            }

            let exam = self.store.exam(session.exam_id).await?;
            self.sequencer.materialize(&exam, &mut session).await?;
            let assignment = if schedule.has_examiners() && session.needs_assignment() {
                self.balancer.assign(&mut session).await?
            } else {
                Assignment::default()
            };
            session.started_at = Some(now);
            session.transition(SessionStatus::Started)?;
            if !self.store.update_session(&mut session).await? {
                self.balancer.release(schedule.id, &assignment).await?;
                tracing::debug!(session_id = %session_id, attempt, "Session changed underneath, re-reading");
                continue;
            }

            let end = end_time(&WindowParams::for_session(&schedule, &session));
            let remaining = remaining_seconds(end, now);
            let warnings = self
                .store
                .count_warnings(session.id, WarningType::Tabchange)
                .await?;
            let entry = LiveEntry::from_session(&session, end, warnings)?;
            self.cache
                .write_entry(session.id, &entry, remaining.max(0) as u64)
                .await?;

            tracing::info!(
                session_id = %session.id,
                candidate_id = %session.candidate_id,
                end_time = %end,
                "Exam started"
            );
            return Ok(StartedExam {
                session_id,
                already_started: false,
                started_at: session.started_at,
                end_time: end,
                remaining_seconds: remaining.max(0),
                total_questions: session.answers.len(),
            });
        }
        Err(write_contention("Exam session"))
    }

    /// Resolves `qs:<seq_no>` from the live cache, falling back to the store
    /// (and rebuilding the entry) when the cache has nothing.
    async fn live_pointer(
        &self,
        session_id: Uuid,
        seq_no: i32,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<LiveSlot> {
        if self.cache.is_live(session_id).await? {
            if let Some(candidate) = self.cache.field(session_id, "candidate").await? {
                if !actor.is(candidate.parse().ok()) {
                    return Err(Error::Permission(
                        "This exam session belongs to another candidate".to_string(),
                    ));
                }
                let pointer = self
                    .cache
                    .pointer(session_id, seq_no)
                    .await?
                    .ok_or_else(|| invalid_question(seq_no))?;
                let total_questions = self
                    .cache
                    .field(session_id, "total_questions")
                    .await?
                    .and_then(|raw| raw.parse().ok())
                    .unwrap_or(0);
                return Ok(LiveSlot {
                    pointer,
                    total_questions,
                });
            }
        }

        let mut session = self.store.session(session_id).await?;
        Self::ensure_candidate(&session, actor)?;
        match session.status {
            SessionStatus::Registered => {
                return Err(Error::State("Exam has not been started".to_string()))
            }
            SessionStatus::Submitted | SessionStatus::Terminated => {
                return Err(Error::State(format!(
                    "Exam session is already {}",
                    session.status.as_str()
                )))
            }
            SessionStatus::Started => {}
        }

        let schedule = self.store.schedule(session.schedule_id).await?;
        let end = end_time(&WindowParams::for_session(&schedule, &session));
        if remaining_seconds(end, now) <= 0 {
            auto_submit(self.store.as_ref(), &mut session, now).await?;
            self.cache.evict(session.id).await?;
            return Err(Error::State(format!(
                "Exam time is over. It ended at {}",
                end.to_rfc3339()
            )));
        }

        self.recovery.restore(&mut session, &schedule, now).await?;
        let pointer = session
            .answer(seq_no)
            .map(|a| QuestionPointer {
                question_id: a.question_id,
                status: a.evaluation_status,
            })
            .ok_or_else(|| invalid_question(seq_no))?;
        Ok(LiveSlot {
            pointer,
            total_questions: session.answers.len(),
        })
    }

    pub async fn get_question(
        &self,
        session_id: Uuid,
        seq_no: i32,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<QuestionView> {
        let LiveSlot {
            pointer,
            total_questions,
        } = self.live_pointer(session_id, seq_no, actor, now).await?;
        let question = self.store.question(pointer.question_id).await?;
        let answer = self.store.answer(session_id, seq_no).await?;
        Ok(QuestionView {
            seq_no,
            total_questions,
            question: QuestionContent::from(&question),
            submitted: answer.as_ref().and_then(|a| a.submitted.clone()),
            marked_for_later: answer.as_ref().map_or(false, |a| a.marked_for_later),
            status: answer.map_or(pointer.status, |a| a.evaluation_status),
        })
    }

    pub async fn submit_answer(
        &self,
        session_id: Uuid,
        seq_no: i32,
        value: Option<String>,
        marked_for_later: bool,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<AnswerReceipt> {
        let pointer = self.live_pointer(session_id, seq_no, actor, now).await?.pointer;
        let question = self.store.question(pointer.question_id).await?;
        let grade = GradingService::grade_answer(&question, value.as_deref());

        let answer = Answer {
            seq_no,
            question_id: pointer.question_id,
            submitted: value,
            is_correct: grade.is_correct,
            mark: grade.mark,
            evaluation_status: grade.status,
            marked_for_later,
            evaluator_id: None,
            evaluator_feedback: None,
        };
        if !self.store.update_answer(session_id, &answer).await? {
            return Err(Error::State(
                "Exam session is no longer in progress".to_string(),
            ));
        }
        // last writer wins on the pointer
        self.cache
            .set_pointer(
                session_id,
                seq_no,
                QuestionPointer {
                    question_id: pointer.question_id,
                    status: grade.status,
                },
            )
            .await?;

        Ok(AnswerReceipt {
            seq_no,
            status: grade.status,
            marked_for_later,
        })
    }

    pub async fn submit(&self, session_id: Uuid, actor: Actor, now: DateTime<Utc>) -> Result<SubmitOutcome> {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let mut session = self.store.session(session_id).await?;
            Self::ensure_candidate(&session, actor)?;
            if session.status != SessionStatus::Started {
                return Err(Error::State(format!(
                    "Only an exam in progress can be submitted; this one is {}",
                    session.status.as_str()
                )));
            }

            let exam = self.store.exam(session.exam_id).await?;
            session.transition(SessionStatus::Submitted)?;
            session.submitted_at = Some(now);
            let aggregate = GradingService::apply(&exam, &mut session);
            if !self.store.update_session(&mut session).await? {
                tracing::debug!(session_id = %session_id, attempt, "Session changed underneath, re-reading");
                continue;
            }
            self.cache.evict(session.id).await?;
            tracing::info!(session_id = %session.id, total_marks = %aggregate.total_marks, "Exam submitted");

            let show_result = exam.question_type == ExamQuestionType::Choices
                && exam.result_visibility == ResultVisibility::AfterExamSubmission;
            return Ok(SubmitOutcome {
                show_result,
                total_marks: show_result.then_some(aggregate.total_marks),
                result_status: show_result.then_some(aggregate.result_status),
            });
        }
        Err(write_contention("Exam session"))
    }

    pub async fn terminate(
        &self,
        session_id: Uuid,
        actor: Actor,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<TerminateOutcome> {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let session = self.store.session(session_id).await?;
            if let Actor::User(_) = actor {
                if !actor.is(session.assigned_proctor) {
                    return Err(Error::Permission(
                        "Only the assigned proctor can terminate this exam".to_string(),
                    ));
                }
            }
            let mut session = self.settle(session, now).await?;
            if session.status == SessionStatus::Terminated {
                return Ok(TerminateOutcome {
                    session_id,
                    already_terminated: true,
                });
            }

            let exam = self.store.exam(session.exam_id).await?;
            session.transition(SessionStatus::Terminated)?;
            GradingService::apply(&exam, &mut session);
            if !self.store.update_session(&mut session).await? {
                tracing::debug!(session_id = %session_id, attempt, "Session changed underneath, re-reading");
                continue;
            }
            self.integrity
                .record_termination(&session, actor, reason)
                .await?;
            self.cache.evict(session.id).await?;

            let mut recipients = vec![session.candidate_id];
            recipients.extend(session.assigned_proctor);
            notify_quietly(
                self.notifier.as_ref(),
                Notification::new(
                    "exam_terminated",
                    Some(session.id),
                    recipients,
                    json!({ "reason": reason }),
                ),
            )
            .await;
            tracing::warn!(session_id = %session.id, reason, "Exam terminated");

            return Ok(TerminateOutcome {
                session_id,
                already_terminated: false,
            });
        }
        Err(write_contention("Exam session"))
    }

    pub async fn post_message(
        &self,
        session_id: Uuid,
        actor: Actor,
        message: &str,
        category: EventCategory,
        warning_type: WarningType,
        now: DateTime<Utc>,
    ) -> Result<MessagePosted> {
        let session = self.store.session(session_id).await?;
        role_of(&session, actor)?;
        let session = self.settle(session, now).await?;
        let exam = self.store.exam(session.exam_id).await?;

        let verdict = self
            .integrity
            .post_message(&session, &exam, actor, message, category, warning_type)
            .await?;
        let terminated = match verdict.terminate_reason {
            Some(reason) => {
                self.terminate(session_id, Actor::System, reason, now).await?;
                true
            }
            None => false,
        };
        Ok(MessagePosted {
            event: verdict.event,
            warning_count: verdict.warning_count,
            terminated,
        })
    }

    pub async fn messages(&self, session_id: Uuid, actor: Actor) -> Result<Vec<IntegrityEvent>> {
        let session = self.store.session(session_id).await?;
        self.integrity.messages(&session, actor).await
    }

    pub async fn overview(&self, session_id: Uuid, actor: Actor, now: DateTime<Utc>) -> Result<SessionOverview> {
        let session = self.store.session(session_id).await?;
        let involved = actor == Actor::System
            || actor.is(Some(session.candidate_id))
            || actor.is(session.assigned_proctor)
            || actor.is(session.assigned_evaluator);
        if !involved {
            return Err(Error::Permission(
                "You are not a participant of this exam session".to_string(),
            ));
        }
        let session = self.settle(session, now).await?;
        Ok(overview_of(&session))
    }

    pub async fn result(&self, session_id: Uuid, actor: Actor, now: DateTime<Utc>) -> Result<ResultView> {
        let session = self.store.session(session_id).await?;
        Self::ensure_candidate(&session, actor)?;
        let session = self.settle(session, now).await?;

        match session.status {
            SessionStatus::Registered | SessionStatus::Started => {
                return Err(Error::State("Exam has not been submitted yet".to_string()))
            }
            SessionStatus::Terminated => {
                let message = self
                    .store
                    .events(session.id)
                    .await?
                    .into_iter()
                    .rev()
                    .find(|e| e.category == EventCategory::Critical)
                    .map(|e| e.message)
                    .unwrap_or_else(|| "Exam was terminated.".to_string());
                return Ok(ResultView::Terminated { message });
            }
            SessionStatus::Submitted => {}
        }

        let exam = self.store.exam(session.exam_id).await?;
        let pending = |reason: String| -> Result<ResultView> { Ok(ResultView::Pending { reason }) };
        match exam.result_visibility {
            ResultVisibility::DoNotShow => {
                return pending("Results for this exam are not published".to_string())
            }
            ResultVisibility::AfterScheduleCompletion => {
                let schedule = self.store.schedule(session.schedule_id).await?;
                if schedule.status != ScheduleStatus::Ended {
                    return pending("Results will be published once the schedule is complete".to_string());
                }
            }
            ResultVisibility::AfterSpecificDate => match exam.show_result_after {
                Some(date) if now >= date => {}
                Some(date) => {
                    return pending(format!("Results will be published after {}", date.to_rfc3339()))
                }
                None => return pending("Results have not been published yet".to_string()),
            },
            ResultVisibility::AfterExamSubmission => {}
        }
        if session.result_status == ResultStatus::NA {
            return pending("Evaluation is pending".to_string());
        }

        let overview = overview_of(&session);
        Ok(ResultView::Scorecard(Scorecard {
            total_marks: session.total_marks,
            max_marks: exam.total_marks,
            pass_mark: exam.pass_mark(),
            result_status: session.result_status,
            evaluation_status: session.evaluation_status,
            answered: overview.answered,
            total_questions: overview.total_questions,
            submitted_at: session.submitted_at,
        }))
    }
}

fn invalid_question(seq_no: i32) -> Error {
    Error::State(format!("Question {} does not exist in this exam", seq_no))
}

fn overview_of(session: &ExamSession) -> SessionOverview {
    let questions: Vec<OverviewItem> = session
        .answers
        .iter()
        .map(|a| OverviewItem {
            seq_no: a.seq_no,
            status: a.evaluation_status,
            marked_for_later: a.marked_for_later,
        })
        .collect();
    let answered = session.answers.iter().filter(|a| a.is_attempted()).count();
    SessionOverview {
        session_id: session.id,
        status: session.status,
        total_questions: questions.len(),
        answered,
        marked_for_later: session.answers.iter().filter(|a| a.marked_for_later).count(),
        not_attempted: questions.len() - answered,
        questions,
    }
}
