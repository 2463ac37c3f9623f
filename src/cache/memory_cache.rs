use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::cache::{LiveCache, LiveEntry};
use crate::error::Result;

struct Slot {
    fields: HashMap<String, String>,
    expires_at: Instant,
}

impl Slot {
    fn alive(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// In-process TTL map standing in for Redis in tests and single-node development.
/// The tracker shares the hash's expiry, so one slot models both keys.
#[derive(Clone, Default)]
pub struct MemoryLiveCache {
    slots: Arc<RwLock<HashMap<Uuid, Slot>>>,
}

impl MemoryLiveCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LiveCache for MemoryLiveCache {
    async fn write_entry(
        &self,
        session_id: Uuid,
        entry: &LiveEntry,
        ttl_seconds: u64,
    ) -> Result<()> {
        if ttl_seconds == 0 {
            return Ok(());
        }
        let slot = Slot {
            fields: entry.to_fields().into_iter().collect(),
            expires_at: Instant::now() + Duration::from_secs(ttl_seconds),
        };
        self.slots.write().await.insert(session_id, slot);
        Ok(())
    }

    async fn is_live(&self, session_id: Uuid) -> Result<bool> {
        let now = Instant::now();
        Ok(self
            .slots
            .read()
            .await
            .get(&session_id)
            .map_or(false, |s| s.alive(now)))
    }

    async fn entry(&self, session_id: Uuid) -> Result<Option<LiveEntry>> {
        let now = Instant::now();
        let slots = self.slots.read().await;
        match slots.get(&session_id).filter(|s| s.alive(now)) {
            Some(slot) => Ok(Some(LiveEntry::from_fields(&slot.fields)?)),
            None => Ok(None),
        }
    }

    async fn field(&self, session_id: Uuid, field: &str) -> Result<Option<String>> {
        let now = Instant::now();
        Ok(self
            .slots
            .read()
            .await
            .get(&session_id)
            .filter(|s| s.alive(now))
            .and_then(|s| s.fields.get(field).cloned()))
    }

    async fn set_field(&self, session_id: Uuid, field: &str, value: &str) -> Result<()> {
        let now = Instant::now();
        let mut slots = self.slots.write().await;
        if let Some(slot) = slots.get_mut(&session_id).filter(|s| s.alive(now)) {
            slot.fields.insert(field.to_string(), value.to_string());
        }
        Ok(())
    }

    async fn ttl_seconds(&self, session_id: Uuid) -> Result<Option<i64>> {
        let now = Instant::now();
        Ok(self
            .slots
            .read()
            .await
            .get(&session_id)
            .filter(|s| s.alive(now))
            .map(|s| s.expires_at.duration_since(now).as_secs() as i64))
    }

    async fn evict(&self, session_id: Uuid) -> Result<()> {
        self.slots.write().await.remove(&session_id);
        Ok(())
    }
}
