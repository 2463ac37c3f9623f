use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;

use crate::database::store::ExamStore;
use crate::error::{Error, Result};
use crate::models::exam::{ExamDefinition, QuestionSelection, ResultVisibility};
use crate::models::question::{Question, QuestionKind};
use crate::services::sequencer_service::SequencerService;

#[derive(Clone)]
pub struct ExamService {
    store: Arc<dyn ExamStore>,
    sequencer: SequencerService,
}

impl ExamService {
    pub fn new(store: Arc<dyn ExamStore>) -> Self {
        Self {
            sequencer: SequencerService::new(store.clone()),
            store,
        }
    }

    pub async fn save_question(&self, question: Question) -> Result<Question> {
        if question.text.trim().is_empty() || question.category.trim().is_empty() {
            return Err(Error::Validation(
                "Question text and category are required".to_string(),
            ));
        }
        if question.mark <= Decimal::ZERO {
            return Err(Error::Validation("Question mark must be positive".to_string()));
        }
        match question.kind {
            QuestionKind::Choices => {
                let ids: HashSet<&str> = question.options.iter().map(|o| o.id.as_str()).collect();
                if question.options.len() < 2 || ids.len() != question.options.len() {
                    return Err(Error::Validation(
                        "Choice questions need at least two options with unique ids".to_string(),
                    ));
                }
                if ids.iter().any(|id| id.contains(',')) {
                    return Err(Error::Validation("Option ids cannot contain commas".to_string()));
                }
                if question.correct_option_ids().is_empty() {
                    return Err(Error::Validation(
                        "Choice questions need at least one correct option".to_string(),
                    ));
                }
            }
            QuestionKind::UserInput => {
                if !question.options.is_empty() {
                    return Err(Error::Validation(
                        "Free-text questions cannot have options".to_string(),
                    ));
                }
            }
        }

        self.store.save_question(&question).await?;
        tracing::info!(question_id = %question.id, category = %question.category, "Question saved");
        Ok(question)
    }

    /// Validates the definition, fills in its totals and stores it. Draw rows must
    /// be satisfiable by the bank as it stands now.
    pub async fn save_exam(&self, mut exam: ExamDefinition) -> Result<ExamDefinition> {
        if exam.title.trim().is_empty() {
            return Err(Error::Validation("Exam title is required".to_string()));
        }
        if exam.duration_minutes <= 0 {
            return Err(Error::Validation("Exam duration must be positive".to_string()));
        }
        if exam.pass_percentage <= Decimal::ZERO || exam.pass_percentage > Decimal::from(100) {
            return Err(Error::Validation(
                "Pass percentage must be greater than 0 and at most 100".to_string(),
            ));
        }
        if exam.max_warning_count < 1 {
            return Err(Error::Validation("Maximum warning count must be at least 1".to_string()));
        }
        if exam.evaluation_window_days < 0 {
            return Err(Error::Validation("Evaluation window cannot be negative".to_string()));
        }
        if exam.result_visibility == ResultVisibility::AfterSpecificDate
            && exam.show_result_after.is_none()
        {
            return Err(Error::Validation(
                "A result date is required when results are shown after a specific date".to_string(),
            ));
        }

        let (total_questions, total_marks) = match &exam.question_selection {
            QuestionSelection::Fixed(ids) => self.fixed_totals(&exam, ids).await?,
            QuestionSelection::Draw(rows) => {
                if rows.is_empty() {
                    return Err(Error::Validation("At least one draw row is required".to_string()));
                }
                for row in rows {
                    if row.count == 0 || row.mark_per_question <= Decimal::ZERO {
                        return Err(Error::Validation(format!(
                            "Draw row for {} needs a positive count and mark",
                            row.category
                        )));
                    }
                }
                self.sequencer.check_capacity(&exam).await?;
                rows.iter().fold((0i32, Decimal::ZERO), |(n, total), row| {
                    (
                        n + row.count as i32,
                        total + row.mark_per_question * Decimal::from(row.count),
                    )
                })
            }
        };
        exam.total_questions = total_questions;
        exam.total_marks = total_marks;

        self.store.save_exam(&exam).await?;
        tracing::info!(
            exam_id = %exam.id,
            total_questions,
            total_marks = %total_marks,
            "Exam definition saved"
        );
        Ok(exam)
    }

    async fn fixed_totals(&self, exam: &ExamDefinition, ids: &[uuid::Uuid]) -> Result<(i32, Decimal)> {
        if ids.is_empty() {
            return Err(Error::Validation("An exam needs at least one question".to_string()));
        }
        let unique: HashSet<_> = ids.iter().collect();
        if unique.len() != ids.len() {
            return Err(Error::Validation("A question may appear only once per exam".to_string()));
        }

        let mut total = Decimal::ZERO;
        for id in ids {
            let question = match self.store.question(*id).await {
                Ok(question) => question,
                Err(Error::NotFound(_)) => {
                    return Err(Error::Validation(format!("Question {} does not exist", id)))
                }
                Err(e) => return Err(e),
            };
            if let Some(kind) = exam.question_type.draw_kind() {
                if question.kind != kind {
                    return Err(Error::Validation(format!(
                        "Question {} does not match the exam's question type",
                        id
                    )));
                }
            }
            total += question.mark;
        }
        Ok((ids.len() as i32, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::exam::{CategoryDraw, ExamQuestionType};
    use crate::models::question::QuestionOption;
    use crate::services::test_support::Fixture;
    use uuid::Uuid;

    fn option(id: &str, is_correct: bool) -> QuestionOption {
        QuestionOption {
            id: id.to_string(),
            text: id.to_uppercase(),
            is_correct,
        }
    }

    fn choice_question(options: Vec<QuestionOption>) -> Question {
        Question {
            id: Uuid::new_v4(),
            category: "safety".to_string(),
            kind: QuestionKind::Choices,
            text: "Which extinguisher for electrical fires?".to_string(),
            mark: Decimal::ONE,
            options,
        }
    }

    #[tokio::test]
    async fn choice_questions_need_a_correct_option() {
        let fx = Fixture::new().await;
        let service = ExamService::new(fx.store.clone());

        let err = service
            .save_question(choice_question(vec![option("a", false), option("b", false)]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = service
            .save_question(choice_question(vec![option("a", true), option("a", false)]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let saved = service
            .save_question(choice_question(vec![option("a", true), option("b", false)]))
            .await
            .unwrap();
        assert_eq!(fx.store.question(saved.id).await.unwrap().options.len(), 2);
    }

    #[tokio::test]
    async fn draw_exam_totals_come_from_the_rows() {
        let fx = Fixture::new().await;
        fx.seed_choice_questions("safety", 4, 2).await;
        let service = ExamService::new(fx.store.clone());
        let exam = fx.exam_with(
            QuestionSelection::Draw(vec![CategoryDraw {
                category: "safety".to_string(),
                mark_per_question: Decimal::from(2),
                count: 3,
            }]),
            |e| e.question_type = ExamQuestionType::Choices,
        );

        let saved = service.save_exam(exam).await.unwrap();
        assert_eq!(saved.total_questions, 3);
        assert_eq!(saved.total_marks, Decimal::from(6));
        assert_eq!(fx.store.exam(saved.id).await.unwrap().total_marks, Decimal::from(6));
    }

    #[tokio::test]
    async fn unsatisfiable_draw_is_rejected() {
        let fx = Fixture::new().await;
        fx.seed_choice_questions("safety", 1, 2).await;
        let exam = fx.exam_with(
            QuestionSelection::Draw(vec![CategoryDraw {
                category: "safety".to_string(),
                mark_per_question: Decimal::from(2),
                count: 2,
            }]),
            |_| {},
        );
        let err = ExamService::new(fx.store.clone()).save_exam(exam).await.unwrap_err();
        assert!(matches!(err, Error::Capacity(ref m) if m.contains("safety")));
    }

    #[tokio::test]
    async fn fixed_exam_checks_kinds_and_sums_marks() {
        let fx = Fixture::new().await;
        let mut ids = fx.seed_choice_questions("safety", 2, 3).await;
        ids.extend(fx.seed_user_input_questions("safety", 1, 5).await);
        let service = ExamService::new(fx.store.clone());

        let choices_only = fx.exam_with(QuestionSelection::Fixed(ids.clone()), |e| {
            e.question_type = ExamQuestionType::Choices
        });
        assert!(matches!(
            service.save_exam(choices_only).await.unwrap_err(),
            Error::Validation(_)
        ));

        let mixed = fx.exam_with(QuestionSelection::Fixed(ids), |_| {});
        let saved = service.save_exam(mixed).await.unwrap();
        assert_eq!(saved.total_questions, 3);
        assert_eq!(saved.total_marks, Decimal::from(11));
    }

    #[tokio::test]
    async fn definition_rules_are_enforced() {
        let fx = Fixture::new().await;
        let ids = fx.seed_choice_questions("safety", 1, 1).await;
        let service = ExamService::new(fx.store.clone());
        let cases: Vec<Box<dyn FnOnce(&mut ExamDefinition)>> = vec![
            Box::new(|e| e.duration_minutes = 0),
            Box::new(|e| e.pass_percentage = Decimal::ZERO),
            Box::new(|e| e.pass_percentage = Decimal::from(101)),
            Box::new(|e| e.max_warning_count = 0),
            Box::new(|e| e.result_visibility = ResultVisibility::AfterSpecificDate),
            Box::new(|e| e.question_selection = QuestionSelection::Fixed(vec![Uuid::new_v4()])),
        ];
        for tweak in cases {
            let exam = fx.exam_with(QuestionSelection::Fixed(ids.clone()), tweak);
            assert!(matches!(service.save_exam(exam).await.unwrap_err(), Error::Validation(_)));
        }
    }
}
