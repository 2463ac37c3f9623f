use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "schedule_type", rename_all = "snake_case")]
pub enum ScheduleType {
    Fixed,
    Flexible,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "schedule_status", rename_all = "snake_case")]
pub enum ScheduleStatus {
    Scheduled,
    Ended,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Examiner {
    pub user_id: Uuid,
    pub can_proctor: bool,
    pub can_evaluate: bool,
    #[serde(default)]
    pub proctoring_load: i32,
    #[serde(default)]
    pub evaluation_load: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleWindow {
    pub id: Uuid,
    pub exam_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub schedule_type: ScheduleType,
    pub duration_minutes: i32,
    pub expire_in_days: i32,
    pub examiners: Vec<Examiner>,
    pub status: ScheduleStatus,
    /// Bumped on every examiner pool write; used for compare-and-swap.
    pub version: i32,
}

impl ScheduleWindow {
    pub fn has_examiners(&self) -> bool {
        !self.examiners.is_empty()
    }
}
