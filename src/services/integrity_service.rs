use serde_json::json;
use std::sync::Arc;

use crate::cache::{LiveCache, FIELD_WARNING_COUNT};
use crate::database::store::ExamStore;
use crate::error::{Error, Result};
use crate::models::actor::Actor;
use crate::models::exam::ExamDefinition;
use crate::models::integrity_event::{ActorRole, EventCategory, IntegrityEvent, WarningType};
use crate::models::session::{ExamSession, SessionStatus};
use crate::services::notification_service::{notify_quietly, Notification, Notifier};

pub const TAB_CHANGE_TERMINATION: &str = "Exam terminated due to excessive tab changes.";
pub const WEBCAM_TERMINATION: &str = "Exam terminated due to webcam disconnection.";

#[derive(Debug, Clone)]
pub struct IntegrityVerdict {
    pub event: IntegrityEvent,
    pub warning_count: i64,
    /// Set when the session must be terminated by the system.
    pub terminate_reason: Option<&'static str>,
}

/// Resolves which side of the session the actor is on.
pub fn role_of(session: &ExamSession, actor: Actor) -> Result<ActorRole> {
    match actor {
        Actor::System => Ok(ActorRole::System),
        _ if actor.is(session.assigned_proctor) => Ok(ActorRole::Proctor),
        _ if actor.is(Some(session.candidate_id)) => Ok(ActorRole::Candidate),
        _ => Err(Error::Permission(
            "Only the candidate or the assigned proctor can access this exam's messages".to_string(),
        )),
    }
}

#[derive(Clone)]
pub struct IntegrityService {
    store: Arc<dyn ExamStore>,
    cache: Arc<dyn LiveCache>,
    notifier: Arc<dyn Notifier>,
}

impl IntegrityService {
    pub fn new(store: Arc<dyn ExamStore>, cache: Arc<dyn LiveCache>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            cache,
            notifier,
        }
    }

    /// Records the event, pushes it to both sides, and decides whether the
    /// warning policy has been breached. Policy is only enforced while the
    /// exam is in progress.
    pub async fn post_message(
        &self,
        session: &ExamSession,
        exam: &ExamDefinition,
        actor: Actor,
        message: &str,
        category: EventCategory,
        warning_type: WarningType,
    ) -> Result<IntegrityVerdict> {
        let role = role_of(session, actor)?;
        let event = IntegrityEvent::new(
            session.id,
            role,
            actor.user_id(),
            message,
            category,
            warning_type,
        );
        self.store.insert_event(&event).await?;

        let mut recipients = vec![session.candidate_id];
        recipients.extend(session.assigned_proctor);
        notify_quietly(
            self.notifier.as_ref(),
            Notification::new("exam_message", Some(session.id), recipients, json!(event)),
        )
        .await;

        let mut verdict = IntegrityVerdict {
            event,
            warning_count: 0,
            terminate_reason: None,
        };
        if session.status != SessionStatus::Started {
            return Ok(verdict);
        }

        match warning_type {
            WarningType::Tabchange => {
                let count = self
                    .store
                    .count_warnings(session.id, WarningType::Tabchange)
                    .await?;
                self.cache
                    .set_field(session.id, FIELD_WARNING_COUNT, &count.to_string())
                    .await?;
                verdict.warning_count = count;
                if count >= exam.max_warning_count as i64 {
                    verdict.terminate_reason = Some(TAB_CHANGE_TERMINATION);
                }
            }
            WarningType::Nowebcam => verdict.terminate_reason = Some(WEBCAM_TERMINATION),
            WarningType::Other => {}
        }

        if let Some(reason) = verdict.terminate_reason {
            tracing::warn!(session_id = %session.id, reason, "Integrity policy breached");
        }
        Ok(verdict)
    }

    pub async fn messages(&self, session: &ExamSession, actor: Actor) -> Result<Vec<IntegrityEvent>> {
        role_of(session, actor)?;
        self.store.events(session.id).await
    }

    pub async fn record_termination(&self, session: &ExamSession, actor: Actor, reason: &str) -> Result<IntegrityEvent> {
        let role = match actor {
            Actor::System => ActorRole::System,
            Actor::User(_) => ActorRole::Proctor,
        };
        let event = IntegrityEvent::new(
            session.id,
            role,
            actor.user_id(),
            reason,
            EventCategory::Critical,
            WarningType::Other,
        );
        self.store.insert_event(&event).await?;
        Ok(event)
    }
}
