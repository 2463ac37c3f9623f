use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::database::store::ExamStore;
use crate::error::{Error, Result};
use crate::models::exam::{CategoryDraw, ExamDefinition, QuestionSelection};
use crate::models::session::{Answer, ExamSession};

#[derive(Clone)]
pub struct SequencerService {
    store: Arc<dyn ExamStore>,
}

impl SequencerService {
    pub fn new(store: Arc<dyn ExamStore>) -> Self {
        Self { store }
    }

    /// Fills the session's answer slots once. Sessions that already have slots are left alone.
    pub async fn materialize(&self, exam: &ExamDefinition, session: &mut ExamSession) -> Result<()> {
        if !session.answers.is_empty() {
            return Ok(());
        }

        let mut question_ids = match &exam.question_selection {
            QuestionSelection::Fixed(ids) => ids.clone(),
            QuestionSelection::Draw(rows) => self.draw(exam, rows).await?,
        };
        if exam.randomize_questions {
            shuffle(&mut question_ids);
        }

        session.answers = question_ids
            .into_iter()
            .enumerate()
            .map(|(idx, qid)| Answer::placeholder(idx as i32 + 1, qid))
            .collect();
        tracing::debug!(
            session_id = %session.id,
            questions = session.answers.len(),
            "Question sequence materialized"
        );
        Ok(())
    }

    /// Confirms every draw row could be satisfied right now.
    pub async fn check_capacity(&self, exam: &ExamDefinition) -> Result<()> {
        if let QuestionSelection::Draw(rows) = &exam.question_selection {
            let mut taken = HashSet::new();
            for row in rows {
                let pool = self.available(exam, row, &taken).await?;
                ensure_capacity(row, pool.len())?;
                taken.extend(pool.into_iter().take(row.count as usize));
            }
        }
        Ok(())
    }

    async fn draw(&self, exam: &ExamDefinition, rows: &[CategoryDraw]) -> Result<Vec<Uuid>> {
        let mut picked = Vec::new();
        let mut taken = HashSet::new();
        for row in rows {
            let pool = self.available(exam, row, &taken).await?;
            ensure_capacity(row, pool.len())?;
            let chosen = sample(&pool, row.count as usize);
            taken.extend(chosen.iter().copied());
            picked.extend(chosen);
        }
        Ok(picked)
    }

    /// Candidates for one row, excluding anything an earlier row already drew.
    async fn available(
        &self,
        exam: &ExamDefinition,
        row: &CategoryDraw,
        taken: &HashSet<Uuid>,
    ) -> Result<Vec<Uuid>> {
        let ids = self
            .store
            .question_ids_matching(&row.category, row.mark_per_question, exam.question_type.draw_kind())
            .await?;
        Ok(ids.into_iter().filter(|id| !taken.contains(id)).collect())
    }
}

fn ensure_capacity(row: &CategoryDraw, available: usize) -> Result<()> {
    if available < row.count as usize {
        return Err(Error::Capacity(format!(
            "Insufficient no. of {} questions with mark {}: {} required, {} available",
            row.category, row.mark_per_question, row.count, available
        )));
    }
    Ok(())
}

// rng handles are not Send, so they never live across an await
fn sample(pool: &[Uuid], count: usize) -> Vec<Uuid> {
    let mut rng = rand::thread_rng();
    pool.choose_multiple(&mut rng, count).copied().collect()
}

fn shuffle(ids: &mut [Uuid]) {
    ids.shuffle(&mut rand::thread_rng());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::Fixture;
    use crate::models::exam::ExamQuestionType;
    use crate::models::question::QuestionKind;
    use crate::models::session::AnswerStatus;
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn fixed_selection_keeps_order_and_numbers_densely() {
        let fx = Fixture::new().await;
        let ids = fx.seed_choice_questions("safety", 3, 1).await;
        let exam = fx.exam_with(QuestionSelection::Fixed(ids.clone()), |_| {});
        let mut session = ExamSession::register(exam.id, Uuid::new_v4(), Uuid::new_v4());

        fx.sequencer().materialize(&exam, &mut session).await.unwrap();

        let seqs: Vec<i32> = session.answers.iter().map(|a| a.seq_no).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        let qids: Vec<Uuid> = session.answers.iter().map(|a| a.question_id).collect();
        assert_eq!(qids, ids);
        assert!(session
            .answers
            .iter()
            .all(|a| a.evaluation_status == AnswerStatus::NotAttempted));
    }

    #[tokio::test]
    async fn draw_takes_distinct_questions_per_row() {
        let fx = Fixture::new().await;
        let pool: HashSet<Uuid> = fx.seed_choice_questions("safety", 5, 2).await.into_iter().collect();
        let exam = fx.exam_with(
            QuestionSelection::Draw(vec![
                CategoryDraw {
                    category: "safety".to_string(),
                    mark_per_question: Decimal::from(2),
                    count: 2,
                },
                CategoryDraw {
                    category: "safety".to_string(),
                    mark_per_question: Decimal::from(2),
                    count: 3,
                },
            ]),
            |e| e.randomize_questions = true,
        );
        let mut session = ExamSession::register(exam.id, Uuid::new_v4(), Uuid::new_v4());

        fx.sequencer().materialize(&exam, &mut session).await.unwrap();

        let drawn: HashSet<Uuid> = session.answers.iter().map(|a| a.question_id).collect();
        assert_eq!(session.answers.len(), 5);
        assert_eq!(drawn, pool);
    }

    #[tokio::test]
    async fn draw_respects_question_kind() {
        let fx = Fixture::new().await;
        fx.seed_choice_questions("safety", 2, 1).await;
        fx.seed_user_input_questions("safety", 2, 1).await;
        let rows = vec![CategoryDraw {
            category: "safety".to_string(),
            mark_per_question: Decimal::from(1),
            count: 3,
        }];

        let choices_only = fx.exam_with(QuestionSelection::Draw(rows.clone()), |e| {
            e.question_type = ExamQuestionType::Choices
        });
        let err = fx.sequencer().check_capacity(&choices_only).await.unwrap_err();
        assert!(matches!(err, Error::Capacity(_)));

        let mixed = fx.exam_with(QuestionSelection::Draw(rows), |e| {
            e.question_type = ExamQuestionType::Mixed
        });
        let mut session = ExamSession::register(mixed.id, Uuid::new_v4(), Uuid::new_v4());
        fx.sequencer().materialize(&mixed, &mut session).await.unwrap();
        assert_eq!(session.answers.len(), 3);
        let mut kinds = Vec::new();
        for a in &session.answers {
            kinds.push(fx.store.question(a.question_id).await.unwrap().kind);
        }
        // three out of two-plus-two must mix both kinds
        assert!(kinds.contains(&QuestionKind::Choices));
        assert!(kinds.contains(&QuestionKind::UserInput));
    }

    #[tokio::test]
    async fn insufficient_pool_is_a_capacity_error() {
        let fx = Fixture::new().await;
        fx.seed_choice_questions("safety", 1, 1).await;
        let exam = fx.exam_with(
            QuestionSelection::Draw(vec![CategoryDraw {
                category: "safety".to_string(),
                mark_per_question: Decimal::from(1),
                count: 2,
            }]),
            |_| {},
        );
        let mut session = ExamSession::register(exam.id, Uuid::new_v4(), Uuid::new_v4());

        let err = fx.sequencer().materialize(&exam, &mut session).await.unwrap_err();
        assert!(matches!(err, Error::Capacity(_)));
        assert!(session.answers.is_empty());
    }

    #[tokio::test]
    async fn existing_sequence_is_never_redrawn() {
        let fx = Fixture::new().await;
        let ids = fx.seed_choice_questions("safety", 3, 1).await;
        let exam = fx.exam_with(QuestionSelection::Fixed(ids), |e| e.randomize_questions = true);
        let mut session = ExamSession::register(exam.id, Uuid::new_v4(), Uuid::new_v4());
        fx.sequencer().materialize(&exam, &mut session).await.unwrap();
        let first = session.answers.clone();

        fx.sequencer().materialize(&exam, &mut session).await.unwrap();
        assert_eq!(session.answers, first);
    }
}
