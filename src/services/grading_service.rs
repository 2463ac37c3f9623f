use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeSet;

use crate::models::exam::ExamDefinition;
use crate::models::question::{Question, QuestionKind};
use crate::models::session::{Answer, AnswerStatus, EvaluationStatus, ExamSession, ResultStatus};

#[derive(Debug, Clone, PartialEq)]
pub struct AnswerGrade {
    pub is_correct: Option<bool>,
    pub mark: Decimal,
    pub status: AnswerStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Aggregate {
    pub total_marks: Decimal,
    pub pending: usize,
    pub pass_mark: Decimal,
    pub result_status: ResultStatus,
    pub evaluation_status: EvaluationStatus,
}

pub struct GradingService;

impl GradingService {
    /// Choices answers are comma separated option ids; order and duplicates do not matter.
    pub fn parse_selection(raw: &str) -> BTreeSet<String> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn grade_answer(question: &Question, submitted: Option<&str>) -> AnswerGrade {
        match question.kind {
            QuestionKind::Choices => {
                let selected = submitted.map(Self::parse_selection).unwrap_or_default();
                if selected.is_empty() {
                    return AnswerGrade {
                        is_correct: None,
                        mark: Decimal::ZERO,
                        status: AnswerStatus::Auto,
                    };
                }
                let correct = selected == question.correct_option_ids();
                AnswerGrade {
                    is_correct: Some(correct),
                    mark: if correct { question.mark } else { Decimal::ZERO },
                    status: AnswerStatus::Auto,
                }
            }
            QuestionKind::UserInput => AnswerGrade {
                is_correct: None,
                mark: Decimal::ZERO,
                status: AnswerStatus::Pending,
            },
        }
    }

    /// `evaluation_closed` is true once an evaluator has finished the session.
    pub fn aggregate(exam: &ExamDefinition, answers: &[Answer], evaluation_closed: bool) -> Aggregate {
        let total_marks: Decimal = answers
            .iter()
            .filter(|a| a.is_correct == Some(true) || a.evaluation_status == AnswerStatus::Done)
            .map(|a| a.mark)
            .sum();
        let pending = answers
            .iter()
            .filter(|a| a.evaluation_status == AnswerStatus::Pending)
            .count();
        let pass_mark = exam.pass_mark();

        let result_status = if total_marks >= pass_mark {
            ResultStatus::Passed
        } else if pending == 0 {
            ResultStatus::Failed
        } else {
            ResultStatus::NA
        };

        let evaluation_status = if pending > 0 {
            EvaluationStatus::Pending
        } else if evaluation_closed {
            EvaluationStatus::Finished
        } else {
            EvaluationStatus::NA
        };

        Aggregate {
            total_marks,
            pending,
            pass_mark,
            result_status,
            evaluation_status,
        }
    }

    /// Recomputes and stores the aggregate on the session. The caller persists it
    /// in the same write as whatever status change triggered the recomputation.
    pub fn apply(exam: &ExamDefinition, session: &mut ExamSession) -> Aggregate {
        let closed = session.evaluation_status == EvaluationStatus::Finished;
        let aggregate = Self::aggregate(exam, &session.answers, closed);
        session.total_marks = aggregate.total_marks;
        session.result_status = aggregate.result_status;
        session.evaluation_status = aggregate.evaluation_status;
        aggregate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::exam::{ExamQuestionType, QuestionSelection, ResultVisibility};
    use crate::models::question::QuestionOption;
    use uuid::Uuid;

    fn exam(total: i64, pct: i64) -> ExamDefinition {
        ExamDefinition {
            id: Uuid::new_v4(),
            title: "Safety basics".to_string(),
            duration_minutes: 60,
            pass_percentage: Decimal::from(pct),
            total_marks: Decimal::from(total),
            total_questions: 3,
            question_type: ExamQuestionType::Mixed,
            randomize_questions: false,
            max_warning_count: 3,
            enable_certification: false,
            certificate_expiry_years: None,
            result_visibility: ResultVisibility::AfterExamSubmission,
            show_result_after: None,
            evaluation_window_days: 3,
            question_selection: QuestionSelection::Fixed(Vec::new()),
        }
    }

    fn choices(correct: &[&str]) -> Question {
        Question {
            id: Uuid::new_v4(),
            category: "general".to_string(),
            kind: QuestionKind::Choices,
            text: "Pick".to_string(),
            mark: Decimal::from(2),
            options: ["a", "b", "c"]
                .iter()
                .map(|id| QuestionOption {
                    id: id.to_string(),
                    text: id.to_uppercase(),
                    is_correct: correct.contains(id),
                })
                .collect(),
        }
    }

    fn answer(seq: i32, mark: i64, correct: Option<bool>, status: AnswerStatus) -> Answer {
        Answer {
            is_correct: correct,
            mark: Decimal::from(mark),
            evaluation_status: status,
            ..Answer::placeholder(seq, Uuid::new_v4())
        }
    }

    #[test]
    fn choices_grading_uses_set_equality() {
        let q = choices(&["a", "c"]);
        let graded = GradingService::grade_answer(&q, Some("c, a,a"));
        assert_eq!(graded.is_correct, Some(true));
        assert_eq!(graded.mark, Decimal::from(2));
        assert_eq!(graded.status, AnswerStatus::Auto);

        let partial = GradingService::grade_answer(&q, Some("a"));
        assert_eq!(partial.is_correct, Some(false));
        assert_eq!(partial.mark, Decimal::ZERO);
    }

    #[test]
    fn empty_choice_answer_scores_zero() {
        let q = choices(&["a"]);
        for raw in [None, Some(""), Some(" , ")] {
            let graded = GradingService::grade_answer(&q, raw);
            assert_eq!(graded.mark, Decimal::ZERO);
            assert_eq!(graded.status, AnswerStatus::Auto);
            assert_eq!(graded.is_correct, None);
        }
    }

    #[test]
    fn user_input_waits_for_an_evaluator() {
        let q = Question {
            kind: QuestionKind::UserInput,
            options: Vec::new(),
            ..choices(&[])
        };
        let graded = GradingService::grade_answer(&q, Some("my essay"));
        assert_eq!(graded.status, AnswerStatus::Pending);
        assert_eq!(graded.mark, Decimal::ZERO);
    }

    #[test]
    fn aggregate_counts_only_correct_or_evaluated_marks() {
        let e = exam(10, 50);
        let answers = vec![
            answer(1, 2, Some(true), AnswerStatus::Auto),
            // stale mark on a wrong answer must not count
            answer(2, 2, Some(false), AnswerStatus::Auto),
            answer(3, 4, None, AnswerStatus::Done),
        ];
        let agg = GradingService::aggregate(&e, &answers, false);
        assert_eq!(agg.total_marks, Decimal::from(6));
        assert_eq!(agg.pass_mark, Decimal::from(5));
        assert_eq!(agg.result_status, ResultStatus::Passed);
        assert_eq!(agg.evaluation_status, EvaluationStatus::NA);
    }

    #[test]
    fn pending_answers_hold_back_a_failing_result() {
        let e = exam(10, 50);
        let answers = vec![
            answer(1, 2, Some(true), AnswerStatus::Auto),
            answer(2, 0, None, AnswerStatus::Pending),
        ];
        let agg = GradingService::aggregate(&e, &answers, false);
        assert_eq!(agg.pending, 1);
        assert_eq!(agg.result_status, ResultStatus::NA);
        assert_eq!(agg.evaluation_status, EvaluationStatus::Pending);
    }

    #[test]
    fn passing_is_reported_even_with_pending_answers() {
        let e = exam(10, 20);
        let answers = vec![
            answer(1, 2, Some(true), AnswerStatus::Auto),
            answer(2, 0, None, AnswerStatus::Pending),
        ];
        let agg = GradingService::aggregate(&e, &answers, false);
        assert_eq!(agg.result_status, ResultStatus::Passed);
        assert_eq!(agg.evaluation_status, EvaluationStatus::Pending);
    }

    #[test]
    fn closed_evaluation_reports_finished() {
        let e = exam(10, 50);
        let answers = vec![answer(1, 1, None, AnswerStatus::Done)];
        let agg = GradingService::aggregate(&e, &answers, true);
        assert_eq!(agg.result_status, ResultStatus::Failed);
        assert_eq!(agg.evaluation_status, EvaluationStatus::Finished);
    }
}
