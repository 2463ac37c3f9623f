use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "actor_role", rename_all = "snake_case")]
pub enum ActorRole {
    Candidate,
    Proctor,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "event_category", rename_all = "snake_case")]
pub enum EventCategory {
    General,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "warning_type", rename_all = "lowercase")]
pub enum WarningType {
    Tabchange,
    Nowebcam,
    Other,
}

impl Default for WarningType {
    fn default() -> Self {
        WarningType::Other
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct IntegrityEvent {
    pub id: Uuid,
    pub session_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub actor_role: ActorRole,
    pub actor_id: Option<Uuid>,
    pub message: String,
    pub category: EventCategory,
    pub warning_type: WarningType,
}

impl IntegrityEvent {
    pub fn new(
        session_id: Uuid,
        actor_role: ActorRole,
        actor_id: Option<Uuid>,
        message: impl Into<String>,
        category: EventCategory,
        warning_type: WarningType,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            created_at: Utc::now(),
            actor_role,
            actor_id,
            message: message.into(),
            category,
            warning_type,
        }
    }
}
