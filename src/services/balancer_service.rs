use std::sync::Arc;
use uuid::Uuid;

use crate::database::store::{write_contention, ExamStore, MAX_WRITE_ATTEMPTS};
use crate::error::Result;
use crate::models::schedule::Examiner;
use crate::models::session::ExamSession;

/// Examiners whose counters a single `assign` call bumped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Assignment {
    pub proctor: Option<Uuid>,
    pub evaluator: Option<Uuid>,
}

impl Assignment {
    pub fn is_empty(&self) -> bool {
        self.proctor.is_none() && self.evaluator.is_none()
    }
}

/// Indices into the examiner pool for the least-loaded proctor and evaluator.
/// Each role is picked on its own load; ties go to the earlier examiner.
pub fn pick(examiners: &[Examiner]) -> (Option<usize>, Option<usize>) {
    let proctor = examiners
        .iter()
        .enumerate()
        .filter(|(_, e)| e.can_proctor)
        .min_by_key(|(idx, e)| (e.proctoring_load, *idx))
        .map(|(idx, _)| idx);
    let evaluator = examiners
        .iter()
        .enumerate()
        .filter(|(_, e)| e.can_evaluate)
        .min_by_key(|(idx, e)| (e.evaluation_load, *idx))
        .map(|(idx, _)| idx);
    (proctor, evaluator)
}

#[derive(Clone)]
pub struct BalancerService {
    store: Arc<dyn ExamStore>,
}

impl BalancerService {
    pub fn new(store: Arc<dyn ExamStore>) -> Self {
        Self { store }
    }

    /// Fills whichever of proctor/evaluator the session lacks and bumps the chosen
    /// examiners' counters. Existing assignments are never changed. The caller
    /// persists the session, and hands the result to `release` if that write loses.
    pub async fn assign(&self, session: &mut ExamSession) -> Result<Assignment> {
        if !session.needs_assignment() {
            return Ok(Assignment::default());
        }

        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let schedule = self.store.schedule(session.schedule_id).await?;
            if !schedule.has_examiners() {
                return Ok(Assignment::default());
            }

            let mut examiners = schedule.examiners.clone();
            let (proctor_idx, evaluator_idx) = pick(&examiners);
            let proctor_idx = proctor_idx.filter(|_| session.assigned_proctor.is_none());
            let evaluator_idx = evaluator_idx.filter(|_| session.assigned_evaluator.is_none());
            if proctor_idx.is_none() && evaluator_idx.is_none() {
                return Ok(Assignment::default());
            }
            if let Some(idx) = proctor_idx {
                examiners[idx].proctoring_load += 1;
            }
            if let Some(idx) = evaluator_idx {
                examiners[idx].evaluation_load += 1;
            }

            if self
                .store
                .update_examiner_loads(schedule.id, schedule.version, &examiners)
                .await?
            {
                if let Some(idx) = proctor_idx {
                    session.assigned_proctor = Some(examiners[idx].user_id);
                }
                if let Some(idx) = evaluator_idx {
                    session.assigned_evaluator = Some(examiners[idx].user_id);
                }
                tracing::info!(
                    session_id = %session.id,
                    proctor = ?session.assigned_proctor,
                    evaluator = ?session.assigned_evaluator,
                    "Examiners assigned"
                );
                return Ok(Assignment {
                    proctor: proctor_idx.map(|idx| examiners[idx].user_id),
                    evaluator: evaluator_idx.map(|idx| examiners[idx].user_id),
                });
            }
            tracing::debug!(schedule_id = %schedule.id, attempt, "Examiner pool changed underneath, retrying");
        }

        Err(write_contention("Examiner pool"))
    }

    /// Hands back the counters taken by an `assign` whose session write was lost.
    pub async fn release(&self, schedule_id: Uuid, assignment: &Assignment) -> Result<()> {
        if assignment.is_empty() {
            return Ok(());
        }

        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let schedule = self.store.schedule(schedule_id).await?;
            let mut examiners = schedule.examiners.clone();
            for examiner in examiners.iter_mut() {
                if assignment.proctor == Some(examiner.user_id) {
                    examiner.proctoring_load = (examiner.proctoring_load - 1).max(0);
                }
                if assignment.evaluator == Some(examiner.user_id) {
                    examiner.evaluation_load = (examiner.evaluation_load - 1).max(0);
                }
            }
            if self
                .store
                .update_examiner_loads(schedule.id, schedule.version, &examiners)
                .await?
            {
                tracing::debug!(schedule_id = %schedule_id, ?assignment, "Examiner loads released");
                return Ok(());
            }
            tracing::debug!(schedule_id = %schedule_id, attempt, "Examiner pool changed underneath, retrying");
        }

        Err(write_contention("Examiner pool"))
    }
}
