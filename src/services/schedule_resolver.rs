use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::models::schedule::{ScheduleType, ScheduleWindow};
use crate::models::session::ExamSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowState {
    Upcoming,
    Ongoing,
    Completed,
}

/// Everything needed to place one candidate's attempt on the clock.
#[derive(Debug, Clone, Copy)]
pub struct WindowParams {
    pub start_time: DateTime<Utc>,
    pub duration_minutes: i32,
    pub schedule_type: ScheduleType,
    pub additional_minutes: i32,
    pub expire_in_days: i32,
    pub personal_started_at: Option<DateTime<Utc>>,
}

impl WindowParams {
    pub fn for_schedule(schedule: &ScheduleWindow) -> Self {
        Self {
            start_time: schedule.start_time,
            duration_minutes: schedule.duration_minutes,
            schedule_type: schedule.schedule_type,
            additional_minutes: 0,
            expire_in_days: schedule.expire_in_days,
            personal_started_at: None,
        }
    }

    pub fn for_session(schedule: &ScheduleWindow, session: &ExamSession) -> Self {
        Self {
            additional_minutes: session.additional_time_minutes,
            personal_started_at: session.started_at,
            ..Self::for_schedule(schedule)
        }
    }
}

pub fn end_time(params: &WindowParams) -> DateTime<Utc> {
    let duration = Duration::minutes(params.duration_minutes as i64);
    let additional = Duration::minutes(params.additional_minutes as i64);
    match (params.schedule_type, params.personal_started_at) {
        (ScheduleType::Fixed, _) => params.start_time + duration + additional,
        (ScheduleType::Flexible, Some(started_at)) => started_at + duration + additional,
        (ScheduleType::Flexible, None) => {
            params.start_time + duration + Duration::days(params.expire_in_days as i64)
        }
    }
}

pub fn resolve(params: &WindowParams, now: DateTime<Utc>) -> WindowState {
    let end = end_time(params);
    if now < params.start_time {
        WindowState::Upcoming
    } else if now <= end {
        WindowState::Ongoing
    } else {
        WindowState::Completed
    }
}

/// Whole seconds left until `end`; zero or negative once it has passed.
pub fn remaining_seconds(end: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (end - now).num_seconds()
}
