use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::database::store::{write_contention, ExamStore, MAX_WRITE_ATTEMPTS};
use crate::error::{Error, Result};
use crate::models::actor::Actor;
use crate::models::question::QuestionContent;
use crate::models::session::{AnswerStatus, EvaluationStatus, ExamSession, SessionStatus};
use crate::services::grading_service::{Aggregate, GradingService};

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationItem {
    pub seq_no: i32,
    pub question: QuestionContent,
    pub correct_options: Vec<String>,
    pub submitted: Option<String>,
    pub is_correct: Option<bool>,
    pub mark: Decimal,
    pub max_mark: Decimal,
    pub status: AnswerStatus,
    pub feedback: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationSheet {
    pub session_id: Uuid,
    pub candidate_id: Uuid,
    pub evaluation_status: EvaluationStatus,
    pub items: Vec<EvaluationItem>,
}

#[derive(Clone)]
pub struct EvaluationService {
    store: Arc<dyn ExamStore>,
}

impl EvaluationService {
    pub fn new(store: Arc<dyn ExamStore>) -> Self {
        Self { store }
    }

    async fn load_for_evaluator(&self, session_id: Uuid, actor: Actor) -> Result<ExamSession> {
        let session = self.store.session(session_id).await?;
        if !actor.is(session.assigned_evaluator) {
            return Err(Error::Permission(
                "Only the assigned evaluator can evaluate this exam".to_string(),
            ));
        }
        if session.status != SessionStatus::Submitted {
            return Err(Error::State(format!(
                "Exam session is {}; only submitted exams can be evaluated",
                session.status.as_str()
            )));
        }
        Ok(session)
    }

    /// Marks one answer and regrades the session. A concurrent write to the same
    /// session makes this re-read and re-apply, so no mark is lost.
    pub async fn save_marks(
        &self,
        session_id: Uuid,
        question_id: Uuid,
        mark: Decimal,
        feedback: Option<String>,
        actor: Actor,
    ) -> Result<Aggregate> {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let mut session = self.load_for_evaluator(session_id, actor).await?;
            let question = self.store.question(question_id).await?;
            if mark < Decimal::ZERO {
                return Err(Error::Validation("Marks cannot be negative".to_string()));
            }
            if mark > question.mark {
                return Err(Error::Validation(format!(
                    "Marks {} exceed the question maximum of {}",
                    mark, question.mark
                )));
            }

            let answer = session.answer_for_question_mut(question_id).ok_or_else(|| {
                Error::NotFound(format!("Question {} is not part of this exam", question_id))
            })?;
            answer.mark = mark;
            answer.evaluation_status = AnswerStatus::Done;
            answer.evaluator_id = actor.user_id();
            answer.evaluator_feedback = feedback.clone();

            let exam = self.store.exam(session.exam_id).await?;
            let aggregate = GradingService::apply(&exam, &mut session);
            if self.store.update_session(&mut session).await? {
                tracing::info!(
                    session_id = %session.id,
                    question_id = %question_id,
                    total_marks = %aggregate.total_marks,
                    pending = aggregate.pending,
                    "Marks saved"
                );
                return Ok(aggregate);
            }
            tracing::debug!(session_id = %session_id, attempt, "Session changed underneath, re-reading");
        }
        Err(write_contention("Exam session"))
    }

    pub async fn finish_evaluation(&self, session_id: Uuid, actor: Actor) -> Result<Aggregate> {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let mut session = self.load_for_evaluator(session_id, actor).await?;
            let pending = session
                .answers
                .iter()
                .filter(|a| a.evaluation_status == AnswerStatus::Pending)
                .count();
            if pending > 0 {
                return Err(Error::State(format!(
                    "{} answer(s) still need marks before evaluation can finish",
                    pending
                )));
            }

            session.evaluation_status = EvaluationStatus::Finished;
            let exam = self.store.exam(session.exam_id).await?;
            let aggregate = GradingService::apply(&exam, &mut session);
            if self.store.update_session(&mut session).await? {
                tracing::info!(session_id = %session.id, result = ?aggregate.result_status, "Evaluation finished");
                return Ok(aggregate);
            }
            tracing::debug!(session_id = %session_id, attempt, "Session changed underneath, re-reading");
        }
        Err(write_contention("Exam session"))
    }

    pub async fn evaluation_sheet(&self, session_id: Uuid, actor: Actor) -> Result<EvaluationSheet> {
        let session = self.load_for_evaluator(session_id, actor).await?;
        let mut items = Vec::with_capacity(session.answers.len());
        for answer in &session.answers {
            let question = self.store.question(answer.question_id).await?;
            items.push(EvaluationItem {
                seq_no: answer.seq_no,
                question: QuestionContent::from(&question),
                correct_options: question.correct_option_ids().into_iter().collect(),
                submitted: answer.submitted.clone(),
                is_correct: answer.is_correct,
                mark: answer.mark,
                max_mark: question.mark,
                status: answer.evaluation_status,
                feedback: answer.evaluator_feedback.clone(),
            });
        }
        Ok(EvaluationSheet {
            session_id: session.id,
            candidate_id: session.candidate_id,
            evaluation_status: session.evaluation_status,
            items,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::schedule::Examiner;
    use crate::models::session::ResultStatus;
    use crate::services::test_support::{examiner, Fixture};
    use chrono::Utc;

    struct Submitted {
        fx: Fixture,
        session_id: Uuid,
        evaluator: Uuid,
        essay: Uuid,
    }

    /// One correct 1-mark choice answer plus one 1-mark essay, exam worth 2, pass at 100%.
    async fn submitted_mixed_exam() -> Submitted {
        let fx = Fixture::new().await;
        let pool: Vec<Examiner> = vec![examiner(true, true)];
        let evaluator = pool[0].user_id;
        let (_exam, schedule) = fx
            .exam_and_schedule(1, 1, pool, |e| e.pass_percentage = Decimal::from(100))
            .await;
        let session = fx.register(&schedule).await;
        let actor = fx.actor(&session);
        let service = fx.session_service();
        let now = Utc::now();
        service.start(session.id, actor, now).await.unwrap();
        service
            .submit_answer(session.id, 1, Some("a".to_string()), false, actor, now)
            .await
            .unwrap();
        service
            .submit_answer(session.id, 2, Some("an essay".to_string()), false, actor, now)
            .await
            .unwrap();
        service.submit(session.id, actor, now).await.unwrap();
        let essay = fx.store.session(session.id).await.unwrap().answers[1].question_id;
        Submitted {
            fx,
            session_id: session.id,
            evaluator,
            essay,
        }
    }

    #[tokio::test]
    async fn marks_complete_the_result() {
        let s = submitted_mixed_exam().await;
        let service = EvaluationService::new(s.fx.store.clone());
        let before = s.fx.store.session(s.session_id).await.unwrap();
        assert_eq!(before.result_status, ResultStatus::NA);
        assert_eq!(before.evaluation_status, EvaluationStatus::Pending);

        let agg = service
            .save_marks(s.session_id, s.essay, Decimal::from(1), Some("good".into()), Actor::User(s.evaluator))
            .await
            .unwrap();
        assert_eq!(agg.total_marks, Decimal::from(2));
        assert_eq!(agg.result_status, ResultStatus::Passed);

        let after = s.fx.store.session(s.session_id).await.unwrap();
        assert_eq!(after.answers[1].evaluation_status, AnswerStatus::Done);
        assert_eq!(after.answers[1].evaluator_id, Some(s.evaluator));
        assert_eq!(after.total_marks, Decimal::from(2));

        let finished = service
            .finish_evaluation(s.session_id, Actor::User(s.evaluator))
            .await
            .unwrap();
        assert_eq!(finished.evaluation_status, EvaluationStatus::Finished);
    }

    #[tokio::test]
    async fn marks_above_the_maximum_are_rejected() {
        let s = submitted_mixed_exam().await;
        let service = EvaluationService::new(s.fx.store.clone());
        let err = service
            .save_marks(s.session_id, s.essay, Decimal::from(5), None, Actor::User(s.evaluator))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        let err = service
            .save_marks(s.session_id, s.essay, Decimal::from(-1), None, Actor::User(s.evaluator))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn only_the_assigned_evaluator_may_mark() {
        let s = submitted_mixed_exam().await;
        let service = EvaluationService::new(s.fx.store.clone());
        let err = service
            .save_marks(s.session_id, s.essay, Decimal::ONE, None, Actor::User(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Permission(_)));
        let err = service
            .evaluation_sheet(s.session_id, Actor::System)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Permission(_)));
    }

    #[tokio::test]
    async fn finishing_with_pending_answers_is_refused() {
        let s = submitted_mixed_exam().await;
        let service = EvaluationService::new(s.fx.store.clone());
        let err = service
            .finish_evaluation(s.session_id, Actor::User(s.evaluator))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::State(_)));

        let sheet = service
            .evaluation_sheet(s.session_id, Actor::User(s.evaluator))
            .await
            .unwrap();
        assert_eq!(sheet.items.len(), 2);
        assert_eq!(sheet.items[0].correct_options, vec!["a".to_string()]);
        assert_eq!(sheet.items[1].status, AnswerStatus::Pending);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_marks_on_one_session_are_all_kept() {
        for _ in 0..10 {
            let fx = Fixture::lagging(2).await;
            let pool = vec![examiner(true, true)];
            let evaluator = Actor::User(pool[0].user_id);
            let (_exam, schedule) = fx.exam_and_schedule(0, 2, pool, |_| {}).await;
            let session = fx.register(&schedule).await;
            let (session_id, candidate) = (session.id, fx.actor(&session));
            let sessions = fx.session_service();
            let now = Utc::now();
            sessions.start(session_id, candidate, now).await.unwrap();
            for seq_no in 1..=2 {
                sessions
                    .submit_answer(session_id, seq_no, Some("an essay".to_string()), false, candidate, now)
                    .await
                    .unwrap();
            }
            sessions.submit(session_id, candidate, now).await.unwrap();

            let essays: Vec<Uuid> = fx
                .store
                .session(session_id)
                .await
                .unwrap()
                .answers
                .iter()
                .map(|a| a.question_id)
                .collect();
            let handles: Vec<_> = essays
                .into_iter()
                .map(|question_id| {
                    let service = EvaluationService::new(fx.store.clone());
                    tokio::spawn(async move {
                        service
                            .save_marks(session_id, question_id, Decimal::ONE, None, evaluator)
                            .await
                    })
                })
                .collect();
            for handle in handles {
                handle.await.unwrap().unwrap();
            }

            let stored = fx.store.session(session_id).await.unwrap();
            assert!(stored
                .answers
                .iter()
                .all(|a| a.evaluation_status == AnswerStatus::Done));
            assert_eq!(stored.total_marks, Decimal::from(2));
            assert_eq!(stored.evaluation_status, EvaluationStatus::NA);
            assert_eq!(stored.result_status, ResultStatus::Passed);
        }
    }
}
