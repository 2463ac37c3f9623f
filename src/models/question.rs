use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "question_kind", rename_all = "snake_case")]
pub enum QuestionKind {
    Choices,
    UserInput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionOption {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub is_correct: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: Uuid,
    pub category: String,
    pub kind: QuestionKind,
    pub text: String,
    pub mark: Decimal,
    #[serde(default)]
    pub options: Vec<QuestionOption>,
}

impl Question {
    pub fn is_objective(&self) -> bool {
        self.kind == QuestionKind::Choices
    }

    pub fn correct_option_ids(&self) -> BTreeSet<String> {
        self.options
            .iter()
            .filter(|o| o.is_correct)
            .map(|o| o.id.clone())
            .collect()
    }

    /// More than one correct option means the candidate may select several.
    pub fn allows_multiple(&self) -> bool {
        self.options.iter().filter(|o| o.is_correct).count() > 1
    }
}

/// Candidate-facing view of a question; correctness flags are never exposed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionContent {
    pub id: Uuid,
    pub kind: QuestionKind,
    pub text: String,
    pub mark: Decimal,
    pub multiple: bool,
    pub options: Vec<PublicOption>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicOption {
    pub id: String,
    pub text: String,
}

impl From<&Question> for QuestionContent {
    fn from(q: &Question) -> Self {
        Self {
            id: q.id,
            kind: q.kind,
            text: q.text.clone(),
            mark: q.mark,
            multiple: q.allows_multiple(),
            options: q
                .options
                .iter()
                .map(|o| PublicOption {
                    id: o.id.clone(),
                    text: o.text.clone(),
                })
                .collect(),
        }
    }
}
