use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who is asking. Identity is verified upstream; the engine only checks roles
/// against the session's candidate, proctor and evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Actor {
    User(Uuid),
    /// Internal callers: integrity enforcement, recovery, schedule sweeps.
    System,
}

impl Actor {
    pub fn is(&self, user: Option<Uuid>) -> bool {
        match (self, user) {
            (Actor::User(id), Some(user)) => *id == user,
            _ => false,
        }
    }

    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Actor::User(id) => Some(*id),
            Actor::System => None,
        }
    }
}
