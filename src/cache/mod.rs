//! Short-lived mirror of sessions that are currently being taken.
//!
//! Each live session is a hash keyed by the session id holding the metadata fields
//! plus one `qs:<seq_no>` pointer per question, and a scalar `<session id>:tracker`.
//! Both carry the same TTL, which never exceeds the time left in the attempt.
//! Tracker presence is what marks a session as live.

pub mod memory_cache;
pub mod redis_cache;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::session::{AnswerStatus, ExamSession, SessionStatus};

pub use memory_cache::MemoryLiveCache;
pub use redis_cache::RedisLiveCache;

pub const POINTER_PREFIX: &str = "qs:";
pub const FIELD_WARNING_COUNT: &str = "warning_count";

pub fn entry_key(session_id: Uuid) -> String {
    session_id.to_string()
}

pub fn tracker_key(session_id: Uuid) -> String {
    format!("{}:tracker", session_id)
}

pub fn pointer_field(seq_no: i32) -> String {
    format!("{}{}", POINTER_PREFIX, seq_no)
}

/// Value stored under `qs:<seq_no>`: `"<question id>:<answer status>"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuestionPointer {
    pub question_id: Uuid,
    pub status: AnswerStatus,
}

impl QuestionPointer {
    pub fn encode(&self) -> String {
        format!("{}:{}", self.question_id, self.status.as_str())
    }

    pub fn decode(raw: &str) -> Option<Self> {
        let (id, status) = raw.rsplit_once(':')?;
        Some(Self {
            question_id: id.parse().ok()?,
            status: status.parse().ok()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LiveEntry {
    pub candidate: Uuid,
    pub exam: Uuid,
    pub exam_schedule: Uuid,
    pub status: SessionStatus,
    pub exam_started_time: DateTime<Utc>,
    pub exam_end_time: DateTime<Utc>,
    pub additional_time_given: i32,
    pub assigned_proctor: Option<Uuid>,
    pub assigned_evaluator: Option<Uuid>,
    pub warning_count: i64,
    pub total_questions: i32,
    pub pointers: BTreeMap<i32, QuestionPointer>,
}

impl LiveEntry {
    /// Builds the entry from a started session's durable record.
    pub fn from_session(
        session: &ExamSession,
        end_time: DateTime<Utc>,
        warning_count: i64,
    ) -> Result<Self> {
        let started_at = session.started_at.ok_or_else(|| {
            Error::Internal(format!("session {} has no start time", session.id))
        })?;
        let pointers = session
            .answers
            .iter()
            .map(|a| {
                (
                    a.seq_no,
                    QuestionPointer {
                        question_id: a.question_id,
                        status: a.evaluation_status,
                    },
                )
            })
            .collect();
        Ok(Self {
            candidate: session.candidate_id,
            exam: session.exam_id,
            exam_schedule: session.schedule_id,
            status: session.status,
            exam_started_time: started_at,
            exam_end_time: end_time,
            additional_time_given: session.additional_time_minutes,
            assigned_proctor: session.assigned_proctor,
            assigned_evaluator: session.assigned_evaluator,
            warning_count,
            total_questions: session.answers.len() as i32,
            pointers,
        })
    }

    pub fn to_fields(&self) -> Vec<(String, String)> {
        let opt = |id: Option<Uuid>| id.map(|u| u.to_string()).unwrap_or_default();
        let mut fields = vec![
            ("candidate".to_string(), self.candidate.to_string()),
            ("exam".to_string(), self.exam.to_string()),
            ("exam_schedule".to_string(), self.exam_schedule.to_string()),
            ("status".to_string(), self.status.as_str().to_string()),
            ("exam_started_time".to_string(), self.exam_started_time.to_rfc3339()),
            ("exam_end_time".to_string(), self.exam_end_time.to_rfc3339()),
            ("additional_time_given".to_string(), self.additional_time_given.to_string()),
            ("assigned_proctor".to_string(), opt(self.assigned_proctor)),
            ("assigned_evaluator".to_string(), opt(self.assigned_evaluator)),
            (FIELD_WARNING_COUNT.to_string(), self.warning_count.to_string()),
            ("total_questions".to_string(), self.total_questions.to_string()),
        ];
        fields.extend(
            self.pointers
                .iter()
                .map(|(seq, p)| (pointer_field(*seq), p.encode())),
        );
        fields
    }

    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self> {
        fn get<'a>(fields: &'a HashMap<String, String>, name: &str) -> Result<&'a str> {
            fields
                .get(name)
                .map(String::as_str)
                .ok_or_else(|| Error::Internal(format!("live entry is missing '{}'", name)))
        }
        fn parse<T: std::str::FromStr>(fields: &HashMap<String, String>, name: &str) -> Result<T> {
            get(fields, name)?
                .parse()
                .map_err(|_| Error::Internal(format!("live entry field '{}' is malformed", name)))
        }
        fn optional_id(fields: &HashMap<String, String>, name: &str) -> Result<Option<Uuid>> {
            match fields.get(name).map(String::as_str) {
                None | Some("") => Ok(None),
                Some(raw) => raw
                    .parse()
                    .map(Some)
                    .map_err(|_| Error::Internal(format!("live entry field '{}' is malformed", name))),
            }
        }
        fn timestamp(fields: &HashMap<String, String>, name: &str) -> Result<DateTime<Utc>> {
            crate::utils::time::from_rfc3339(get(fields, name)?)
                .map_err(|_| Error::Internal(format!("live entry field '{}' is malformed", name)))
        }

        let mut pointers = BTreeMap::new();
        for (field, raw) in fields {
            if let Some(seq) = field.strip_prefix(POINTER_PREFIX) {
                let seq_no: i32 = seq
                    .parse()
                    .map_err(|_| Error::Internal(format!("bad pointer field '{}'", field)))?;
                let pointer = QuestionPointer::decode(raw)
                    .ok_or_else(|| Error::Internal(format!("bad pointer value '{}'", raw)))?;
                pointers.insert(seq_no, pointer);
            }
        }

        Ok(Self {
            candidate: parse(fields, "candidate")?,
            exam: parse(fields, "exam")?,
            exam_schedule: parse(fields, "exam_schedule")?,
            status: parse(fields, "status")?,
            exam_started_time: timestamp(fields, "exam_started_time")?,
            exam_end_time: timestamp(fields, "exam_end_time")?,
            additional_time_given: parse(fields, "additional_time_given")?,
            assigned_proctor: optional_id(fields, "assigned_proctor")?,
            assigned_evaluator: optional_id(fields, "assigned_evaluator")?,
            warning_count: parse(fields, FIELD_WARNING_COUNT)?,
            total_questions: parse(fields, "total_questions")?,
            pointers,
        })
    }
}

#[async_trait]
pub trait LiveCache: Send + Sync {
    /// Replaces the whole entry and the tracker, both expiring after `ttl_seconds`.
    /// A zero TTL writes nothing.
    async fn write_entry(&self, session_id: Uuid, entry: &LiveEntry, ttl_seconds: u64)
        -> Result<()>;
    async fn is_live(&self, session_id: Uuid) -> Result<bool>;
    async fn entry(&self, session_id: Uuid) -> Result<Option<LiveEntry>>;
    async fn field(&self, session_id: Uuid, field: &str) -> Result<Option<String>>;
    /// Updates one field of an existing entry. Does nothing once the entry has expired,
    /// so a late write can never resurrect a hash without a TTL.
    async fn set_field(&self, session_id: Uuid, field: &str, value: &str) -> Result<()>;
    async fn ttl_seconds(&self, session_id: Uuid) -> Result<Option<i64>>;
    async fn evict(&self, session_id: Uuid) -> Result<()>;

    async fn pointer(&self, session_id: Uuid, seq_no: i32) -> Result<Option<QuestionPointer>> {
        Ok(self
            .field(session_id, &pointer_field(seq_no))
            .await?
            .and_then(|raw| QuestionPointer::decode(&raw)))
    }

    async fn set_pointer(
        &self,
        session_id: Uuid,
        seq_no: i32,
        pointer: QuestionPointer,
    ) -> Result<()> {
        self.set_field(session_id, &pointer_field(seq_no), &pointer.encode())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::session::Answer;

    fn started_session() -> ExamSession {
        let mut session = ExamSession::register(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        session.status = SessionStatus::Started;
        session.started_at = Some(Utc::now());
        session.assigned_proctor = Some(Uuid::new_v4());
        session.answers = vec![
            Answer::placeholder(1, Uuid::new_v4()),
            Answer::placeholder(2, Uuid::new_v4()),
        ];
        session
    }

    #[test]
    fn entry_survives_the_field_encoding() {
        let session = started_session();
        let entry = LiveEntry::from_session(&session, Utc::now(), 2).unwrap();
        let fields: HashMap<String, String> = entry.to_fields().into_iter().collect();

        assert_eq!(fields.get("qs:1").unwrap(), &format!("{}:not_attempted", session.answers[0].question_id));
        assert_eq!(fields.get("assigned_evaluator").unwrap(), "");

        let decoded = LiveEntry::from_fields(&fields).unwrap();
        assert_eq!(decoded.candidate, entry.candidate);
        assert_eq!(decoded.assigned_proctor, entry.assigned_proctor);
        assert_eq!(decoded.assigned_evaluator, None);
        assert_eq!(decoded.pointers, entry.pointers);
        assert_eq!(decoded.total_questions, 2);
    }

    #[test]
    fn pointer_decode_rejects_garbage() {
        assert!(QuestionPointer::decode("nonsense").is_none());
        assert!(QuestionPointer::decode(&format!("{}:graded", Uuid::new_v4())).is_none());
    }

    #[test]
    fn unstarted_session_has_no_entry() {
        let session = ExamSession::register(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        assert!(LiveEntry::from_session(&session, Utc::now(), 0).is_err());
    }
}
