use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::cache::{LiveCache, LiveEntry};
use crate::database::store::{write_contention, ExamStore, MAX_WRITE_ATTEMPTS};
use crate::error::Result;
use crate::models::integrity_event::WarningType;
use crate::models::schedule::ScheduleWindow;
use crate::models::session::{ExamSession, SessionStatus};
use crate::services::grading_service::GradingService;
use crate::services::schedule_resolver::{end_time, remaining_seconds, WindowParams};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    pub rebuilt: usize,
    pub finalized: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildOutcome {
    Rebuilt,
    Finalized,
}

/// Submits a started session whose time ran out and grades it. Status and grades
/// land in the same store write. `session` is left holding the stored record; the
/// result is `false` when a concurrent request closed the session first.
pub async fn auto_submit(store: &dyn ExamStore, session: &mut ExamSession, now: DateTime<Utc>) -> Result<bool> {
    let exam = store.exam(session.exam_id).await?;
    for attempt in 1..=MAX_WRITE_ATTEMPTS {
        if session.status != SessionStatus::Started {
            return Ok(false);
        }
        session.transition(SessionStatus::Submitted)?;
        session.submitted_at = Some(now);
        let aggregate = GradingService::apply(&exam, session);
        if store.update_session(session).await? {
            tracing::warn!(
                session_id = %session.id,
                total_marks = %aggregate.total_marks,
                "Exam time elapsed, session auto-submitted"
            );
            return Ok(true);
        }
        tracing::debug!(session_id = %session.id, attempt, "Session changed underneath, re-reading");
        *session = store.session(session.id).await?;
    }
    Err(write_contention("Exam session"))
}

#[derive(Clone)]
pub struct RecoveryService {
    store: Arc<dyn ExamStore>,
    cache: Arc<dyn LiveCache>,
}

impl RecoveryService {
    pub fn new(store: Arc<dyn ExamStore>, cache: Arc<dyn LiveCache>) -> Self {
        Self { store, cache }
    }

    /// Rebuilds the live entry of a started session from its durable record, or
    /// finalizes it when no time is left.
    pub async fn restore(
        &self,
        session: &mut ExamSession,
        schedule: &ScheduleWindow,
        now: DateTime<Utc>,
    ) -> Result<RebuildOutcome> {
        let end = end_time(&WindowParams::for_session(schedule, session));
        let remaining = remaining_seconds(end, now);
        if remaining <= 0 {
            auto_submit(self.store.as_ref(), session, now).await?;
            return Ok(RebuildOutcome::Finalized);
        }

        let warnings = self
            .store
            .count_warnings(session.id, WarningType::Tabchange)
            .await?;
        let entry = LiveEntry::from_session(session, end, warnings)?;
        self.cache
            .write_entry(session.id, &entry, remaining as u64)
            .await?;
        tracing::info!(session_id = %session.id, ttl = remaining, "Live entry rebuilt");
        Ok(RebuildOutcome::Rebuilt)
    }

    /// Sweeps every started session after a cache loss or restart.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();
        for mut session in self.store.sessions_with_status(SessionStatus::Started).await? {
            if self.cache.is_live(session.id).await? {
                report.skipped += 1;
                continue;
            }
            let outcome = match self.store.schedule(session.schedule_id).await {
                Ok(schedule) => self.restore(&mut session, &schedule, now).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(RebuildOutcome::Rebuilt) => report.rebuilt += 1,
                Ok(RebuildOutcome::Finalized) => report.finalized += 1,
                Err(e) => {
                    tracing::error!(session_id = %session.id, error = %e, "Failed to recover session");
                    report.failed += 1;
                }
            }
        }
        tracing::info!(
            rebuilt = report.rebuilt,
            finalized = report.finalized,
            skipped = report.skipped,
            failed = report.failed,
            "Live cache recovery finished"
        );
        Ok(report)
    }
}
