use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;
use crate::models::outbox_event::OutboxEvent;

/// A push to the host's realtime channel: candidate and proctor screens, the
/// certificate renderer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub event_type: String,
    pub session_id: Option<Uuid>,
    pub recipients: Vec<Uuid>,
    pub payload: JsonValue,
}

impl Notification {
    pub fn new(event_type: &str, session_id: Option<Uuid>, recipients: Vec<Uuid>, payload: JsonValue) -> Self {
        Self {
            event_type: event_type.to_string(),
            session_id,
            recipients,
            payload,
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<()>;
}

/// Fire-and-forget wrapper: a failed push is logged, never surfaced to the caller.
pub async fn notify_quietly(notifier: &dyn Notifier, notification: Notification) {
    let event_type = notification.event_type.clone();
    if let Err(e) = notifier.notify(notification).await {
        tracing::warn!(error = %e, event_type = %event_type, "Failed to enqueue notification");
    }
}

/// Used when no webhook is configured.
#[derive(Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: Notification) -> Result<()> {
        tracing::info!(
            event_type = %notification.event_type,
            session_id = ?notification.session_id,
            recipients = notification.recipients.len(),
            "Notification"
        );
        Ok(())
    }
}

/// How long a claimed event may sit in `sending` before a worker takes it back.
const CLAIM_LEASE_SECS: f64 = 300.0;

/// Where an event goes when its claim lapsed without a recorded outcome. The lost
/// attempt counts against `max_attempts`.
pub fn reclaimed_status(attempts: i32, max_attempts: i32) -> &'static str {
    if attempts + 1 < max_attempts {
        "retrying"
    } else {
        "failed"
    }
}

/// Durable outbox: events are written to Postgres and delivered to the webhook
/// by a background worker with exponential backoff.
#[derive(Clone)]
pub struct NotificationService {
    pool: PgPool,
    client: Client,
    target_url: String,
    secret: String,
}

impl NotificationService {
    pub fn new(pool: PgPool, target_url: String, secret: String) -> Self {
        Self {
            pool,
            client: Client::new(),
            target_url,
            secret,
        }
    }

    pub async fn enqueue(&self, notification: &Notification) -> Result<OutboxEvent> {
        let row = sqlx::query_as::<_, OutboxEvent>(
            r#"
            INSERT INTO outbox_events (session_id, event_type, recipients, payload)
            VALUES ($1, $2, $3, $4)
            RETURNING id, session_id, event_type, recipients, payload, delivery_status,
                      attempts, max_attempts, last_error, next_retry_at, created_at
            "#,
        )
        .bind(notification.session_id)
        .bind(&notification.event_type)
        .bind(&notification.recipients)
        .bind(&notification.payload)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn deliver_once(&self, event: &OutboxEvent) -> Result<()> {
        let body = json!({
            "event": event.event_type,
            "session_id": event.session_id,
            "recipients": event.recipients,
            "payload": event.payload,
            "created_at": event.created_at,
        });
        let res = self
            .client
            .post(&self.target_url)
            .header("X-Webhook-Secret", &self.secret)
            .json(&body)
            .send()
            .await;

        let (delivered, error) = match res {
            Ok(resp) if resp.status().is_success() => (true, None),
            Ok(resp) => {
                let status = resp.status();
                let text = resp.text().await.unwrap_or_default();
                (false, Some(format!("HTTP {}: {}", status, text)))
            }
            Err(err) => (false, Some(err.to_string())),
        };

        sqlx::query(
            r#"UPDATE outbox_events
               SET delivery_status = CASE WHEN $1 THEN 'delivered' ELSE 'failed' END,
                   last_error = $2,
                   attempts = attempts + 1
               WHERE id = $3"#,
        )
        .bind(delivered)
        .bind(error)
        .bind(event.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Returns events stuck in `sending` past their lease to the queue, so a crash or a
    /// failed bookkeeping write between claim and outcome never strands them.
    pub async fn reclaim_stale(&self) -> Result<usize> {
        let stale: Vec<(Uuid, i32, i32)> = sqlx::query_as(
            r#"SELECT id, attempts, max_attempts FROM outbox_events
               WHERE delivery_status = 'sending' AND next_retry_at <= NOW()"#,
        )
        .fetch_all(&self.pool)
        .await?;

        for (id, attempts, max_attempts) in &stale {
            sqlx::query(
                r#"UPDATE outbox_events
                   SET delivery_status = $1,
                       attempts = attempts + 1,
                       last_error = COALESCE(last_error, 'delivery outcome was not recorded'),
                       next_retry_at = NOW()
                   WHERE id = $2 AND delivery_status = 'sending' AND next_retry_at <= NOW()"#,
            )
            .bind(reclaimed_status(*attempts, *max_attempts))
            .bind(id)
            .execute(&self.pool)
            .await?;
            tracing::warn!(outbox_id = %id, attempts, "Outbox claim expired, event requeued");
        }
        Ok(stale.len())
    }

    /// Delivers at most one due event. Returns `false` when the outbox is idle.
    pub async fn run_once(&self) -> Result<bool> {
        self.reclaim_stale().await?;

        let event = sqlx::query_as::<_, OutboxEvent>(
            r#"UPDATE outbox_events
               SET delivery_status = 'sending',
                   next_retry_at = NOW() + make_interval(secs => $1)
               WHERE id = (
                   SELECT id FROM outbox_events
                   WHERE delivery_status IN ('pending', 'retrying')
                     AND (next_retry_at IS NULL OR next_retry_at <= NOW())
                   ORDER BY created_at ASC
                   FOR UPDATE SKIP LOCKED
                   LIMIT 1
               )
               RETURNING id, session_id, event_type, recipients, payload, delivery_status,
                         attempts, max_attempts, last_error, next_retry_at, created_at"#,
        )
        .bind(CLAIM_LEASE_SECS)
        .fetch_optional(&self.pool)
        .await?;

        let Some(event) = event else { return Ok(false) };

        if let Err(e) = self.deliver_once(&event).await {
            tracing::warn!(error = %e, outbox_id = %event.id, "Outbox delivery bookkeeping failed");
        }

        // failed deliveries go back to the queue until max_attempts is reached
        sqlx::query(
            r#"UPDATE outbox_events
               SET delivery_status = 'retrying',
                   next_retry_at = NOW() + make_interval(secs => LEAST(3600, 30 * power(2::float, GREATEST(0, attempts - 1))::int))
               WHERE id = $1 AND delivery_status = 'failed' AND attempts < max_attempts"#,
        )
        .bind(event.id)
        .execute(&self.pool)
        .await?;

        Ok(true)
    }
}

#[async_trait]
impl Notifier for NotificationService {
    async fn notify(&self, notification: Notification) -> Result<()> {
        let event = self.enqueue(&notification).await?;
        tracing::debug!(outbox_id = %event.id, event_type = %event.event_type, "Notification queued");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[tokio::test]
    async fn quiet_notify_swallows_channel_errors() {
        let mut notifier = MockNotifier::new();
        notifier
            .expect_notify()
            .times(1)
            .returning(|_| Err(Error::Internal("channel down".to_string())));

        notify_quietly(
            &notifier,
            Notification::new("exam_message", None, vec![Uuid::new_v4()], json!({})),
        )
        .await;
    }

    #[test]
    fn lapsed_claims_count_as_an_attempt() {
        assert_eq!(reclaimed_status(0, 5), "retrying");
        assert_eq!(reclaimed_status(3, 5), "retrying");
        assert_eq!(reclaimed_status(4, 5), "failed");
        assert_eq!(reclaimed_status(7, 5), "failed");
    }
}
