use chrono::{DateTime, Duration, Months, Utc};
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use crate::cache::LiveCache;
use crate::database::store::ExamStore;
use crate::error::{Error, Result};
use crate::models::certificate::Certificate;
use crate::models::exam::ExamDefinition;
use crate::models::schedule::{Examiner, ScheduleStatus, ScheduleWindow};
use crate::models::session::{EvaluationStatus, ExamSession, ResultStatus, SessionStatus};
use crate::services::balancer_service::BalancerService;
use crate::services::notification_service::{notify_quietly, Notification, Notifier};
use crate::services::recovery_service::auto_submit;
use crate::services::schedule_resolver::{end_time, resolve, WindowParams, WindowState};

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScheduleClosure {
    pub schedule_id: Uuid,
    pub finalized: usize,
    pub certificates: Vec<Certificate>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CandidateRow {
    pub session_id: Uuid,
    pub candidate_id: Uuid,
    pub status: SessionStatus,
}

impl From<&ExamSession> for CandidateRow {
    fn from(session: &ExamSession) -> Self {
        Self {
            session_id: session.id,
            candidate_id: session.candidate_id,
            status: session.status,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProctorWindow {
    pub schedule_id: Uuid,
    pub exam_id: Uuid,
    pub ends_at: DateTime<Utc>,
    pub live: Vec<CandidateRow>,
    pub pending: Vec<CandidateRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationTask {
    pub session_id: Uuid,
    pub exam_id: Uuid,
    pub candidate_id: Uuid,
    pub submitted_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ScheduleService {
    store: Arc<dyn ExamStore>,
    cache: Arc<dyn LiveCache>,
    notifier: Arc<dyn Notifier>,
    balancer: BalancerService,
}

impl ScheduleService {
    pub fn new(store: Arc<dyn ExamStore>, cache: Arc<dyn LiveCache>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            balancer: BalancerService::new(store.clone()),
            store,
            cache,
            notifier,
        }
    }

    /// Creates or updates a schedule. Loads already counted for an examiner are
    /// carried over; new examiners start at zero.
    pub async fn save_schedule(&self, mut schedule: ScheduleWindow) -> Result<ScheduleWindow> {
        if schedule.duration_minutes <= 0 {
            return Err(Error::Validation("Schedule duration must be positive".to_string()));
        }
        if schedule.expire_in_days < 0 {
            return Err(Error::Validation("Availability window cannot be negative".to_string()));
        }
        let unique: HashSet<Uuid> = schedule.examiners.iter().map(|e| e.user_id).collect();
        if unique.len() != schedule.examiners.len() {
            return Err(Error::Validation("Each examiner may be listed only once".to_string()));
        }
        match self.store.exam(schedule.exam_id).await {
            Ok(_) => {}
            Err(Error::NotFound(_)) => {
                return Err(Error::Validation(format!(
                    "Exam {} does not exist",
                    schedule.exam_id
                )))
            }
            Err(e) => return Err(e),
        }

        let existing = match self.store.schedule(schedule.id).await {
            Ok(existing) => Some(existing),
            Err(Error::NotFound(_)) => None,
            Err(e) => return Err(e),
        };
        let previous: HashMap<Uuid, &Examiner> = existing
            .iter()
            .flat_map(|s| s.examiners.iter())
            .map(|e| (e.user_id, e))
            .collect();
        for examiner in &mut schedule.examiners {
            let (proctoring, evaluation) = previous
                .get(&examiner.user_id)
                .map_or((0, 0), |p| (p.proctoring_load, p.evaluation_load));
            examiner.proctoring_load = proctoring;
            examiner.evaluation_load = evaluation;
        }
        schedule.version = existing.as_ref().map_or(0, |s| s.version);
        schedule.status = existing.as_ref().map_or(ScheduleStatus::Scheduled, |s| s.status);

        self.store.save_schedule(&schedule).await?;
        tracing::info!(
            schedule_id = %schedule.id,
            exam_id = %schedule.exam_id,
            examiners = schedule.examiners.len(),
            "Schedule saved"
        );
        self.store.schedule(schedule.id).await
    }

    /// Registers a candidate once per schedule. A repeat registration returns the
    /// existing session unchanged.
    pub async fn register(&self, schedule_id: Uuid, candidate_id: Uuid) -> Result<ExamSession> {
        let schedule = self.store.schedule(schedule_id).await?;
        if schedule.status == ScheduleStatus::Ended {
            return Err(Error::State("This schedule has already ended".to_string()));
        }

        let fresh = ExamSession::register(schedule.exam_id, schedule.id, candidate_id);
        let mut session = self.store.insert_session(&fresh).await?;
        if session.id != fresh.id {
            return Ok(session);
        }

        if schedule.has_examiners() {
            let assignment = self.balancer.assign(&mut session).await?;
            if !self.store.update_session(&mut session).await? {
                // the candidate started meanwhile, which assigns on its own
                self.balancer.release(schedule.id, &assignment).await?;
                session = self.store.session(session.id).await?;
            }
        }
        tracing::info!(
            session_id = %session.id,
            schedule_id = %schedule.id,
            candidate_id = %candidate_id,
            "Candidate registered"
        );
        Ok(session)
    }

    /// Closes a schedule whose window is over: finalizes stragglers, issues
    /// certificates to passing candidates and marks the schedule ended.
    pub async fn end_schedule(&self, schedule_id: Uuid, now: DateTime<Utc>) -> Result<ScheduleClosure> {
        let schedule = self.store.schedule(schedule_id).await?;
        if schedule.status == ScheduleStatus::Ended {
            return Err(Error::State("This schedule has already ended".to_string()));
        }
        if resolve(&WindowParams::for_schedule(&schedule), now) != WindowState::Completed {
            return Err(Error::State(format!(
                "Schedule is still open until {}",
                end_time(&WindowParams::for_schedule(&schedule)).to_rfc3339()
            )));
        }

        let exam = self.store.exam(schedule.exam_id).await?;
        let mut closure = ScheduleClosure {
            schedule_id,
            ..Default::default()
        };
        for mut session in self.store.sessions_for_schedule(schedule_id).await? {
            if session.status == SessionStatus::Started
                && resolve(&WindowParams::for_session(&schedule, &session), now) == WindowState::Completed
            {
                if auto_submit(self.store.as_ref(), &mut session, now).await? {
                    closure.finalized += 1;
                }
                self.cache.evict(session.id).await?;
            }
            if exam.enable_certification
                && session.status == SessionStatus::Submitted
                && session.result_status == ResultStatus::Passed
            {
                closure.certificates.push(self.issue_certificate(&exam, &session, now).await?);
            }
        }

        self.store
            .set_schedule_status(schedule_id, ScheduleStatus::Ended)
            .await?;
        tracing::info!(
            schedule_id = %schedule_id,
            finalized = closure.finalized,
            certificates = closure.certificates.len(),
            "Schedule ended"
        );
        Ok(closure)
    }

    async fn issue_certificate(
        &self,
        exam: &ExamDefinition,
        session: &ExamSession,
        now: DateTime<Utc>,
    ) -> Result<Certificate> {
        let issue_date = now.date_naive();
        let expiry_date = exam
            .certificate_expiry_years
            .filter(|years| *years > 0)
            .and_then(|years| issue_date.checked_add_months(Months::new(years as u32 * 12)));
        let certificate = self
            .store
            .insert_certificate(&Certificate {
                id: Uuid::new_v4(),
                session_id: session.id,
                exam_id: exam.id,
                candidate_id: session.candidate_id,
                issue_date,
                expiry_date,
                created_at: now,
            })
            .await?;

        notify_quietly(
            self.notifier.as_ref(),
            Notification::new(
                "certificate_issued",
                Some(session.id),
                vec![session.candidate_id],
                json!({
                    "certificate_id": certificate.id,
                    "exam_id": exam.id,
                    "exam_title": exam.title,
                    "issue_date": certificate.issue_date,
                    "expiry_date": certificate.expiry_date,
                    "total_marks": session.total_marks,
                }),
            ),
        )
        .await;
        Ok(certificate)
    }

    pub async fn delete_schedule(&self, schedule_id: Uuid) -> Result<()> {
        let sessions = self.store.sessions_for_schedule(schedule_id).await?;
        for session in &sessions {
            self.cache.evict(session.id).await?;
        }
        self.store.delete_schedule(schedule_id).await?;
        tracing::info!(schedule_id = %schedule_id, sessions = sessions.len(), "Schedule deleted");
        Ok(())
    }

    /// Ongoing windows the proctor is assigned to, with candidates split by
    /// whether their exam is live right now.
    pub async fn proctor_dashboard(&self, proctor_id: Uuid, now: DateTime<Utc>) -> Result<Vec<ProctorWindow>> {
        let mut by_schedule: BTreeMap<Uuid, Vec<ExamSession>> = BTreeMap::new();
        for session in self.store.sessions_for_proctor(proctor_id).await? {
            by_schedule.entry(session.schedule_id).or_default().push(session);
        }

        let mut windows = Vec::new();
        for (schedule_id, sessions) in by_schedule {
            let schedule = self.store.schedule(schedule_id).await?;
            let params = WindowParams::for_schedule(&schedule);
            if schedule.status == ScheduleStatus::Ended || resolve(&params, now) != WindowState::Ongoing {
                continue;
            }
            let mut window = ProctorWindow {
                schedule_id,
                exam_id: schedule.exam_id,
                ends_at: end_time(&params),
                live: Vec::new(),
                pending: Vec::new(),
            };
            for session in sessions.iter().filter(|s| !s.status.is_terminal()) {
                if self.cache.is_live(session.id).await? {
                    window.live.push(CandidateRow::from(session));
                } else {
                    window.pending.push(CandidateRow::from(session));
                }
            }
            windows.push(window);
        }
        Ok(windows)
    }

    /// Submitted sessions still waiting on this evaluator, within each exam's
    /// evaluation window.
    pub async fn evaluator_queue(&self, evaluator_id: Uuid, now: DateTime<Utc>) -> Result<Vec<EvaluationTask>> {
        let mut exams: HashMap<Uuid, ExamDefinition> = HashMap::new();
        let mut tasks = Vec::new();
        for session in self.store.sessions_for_evaluator(evaluator_id).await? {
            if session.status != SessionStatus::Submitted
                || session.evaluation_status != EvaluationStatus::Pending
            {
                continue;
            }
            let Some(submitted_at) = session.submitted_at else {
                continue;
            };
            if !exams.contains_key(&session.exam_id) {
                let exam = self.store.exam(session.exam_id).await?;
                exams.insert(exam.id, exam);
            }
            let window_days = exams
                .get(&session.exam_id)
                .map_or(0, |e| e.evaluation_window_days);
            let due_at = submitted_at + Duration::days(window_days as i64);
            if now > due_at {
                continue;
            }
            tasks.push(EvaluationTask {
                session_id: session.id,
                exam_id: session.exam_id,
                candidate_id: session.candidate_id,
                submitted_at,
                due_at,
            });
        }
        tasks.sort_by_key(|t| t.due_at);
        Ok(tasks)
    }
}
