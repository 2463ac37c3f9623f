use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use uuid::Uuid;

use crate::cache::{entry_key, tracker_key, LiveCache, LiveEntry};
use crate::error::Result;

const SET_IF_PRESENT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
end
return -1
"#;

/// Redis-backed live cache over a multiplexed, auto-reconnecting connection.
#[derive(Clone)]
pub struct RedisLiveCache {
    conn: ConnectionManager,
}

impl RedisLiveCache {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl LiveCache for RedisLiveCache {
    async fn write_entry(
        &self,
        session_id: Uuid,
        entry: &LiveEntry,
        ttl_seconds: u64,
    ) -> Result<()> {
        if ttl_seconds == 0 {
            return Ok(());
        }
        let key = entry_key(session_id);
        let ttl = ttl_seconds as i64;
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .del(&key)
            .ignore()
            .hset_multiple(&key, &entry.to_fields())
            .ignore()
            .expire(&key, ttl)
            .ignore()
            .set_ex(tracker_key(session_id), 1, ttl_seconds)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn is_live(&self, session_id: Uuid) -> Result<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(tracker_key(session_id)).await?;
        Ok(exists)
    }

    async fn entry(&self, session_id: Uuid) -> Result<Option<LiveEntry>> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(entry_key(session_id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(LiveEntry::from_fields(&fields)?))
    }

    async fn field(&self, session_id: Uuid, field: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.hget(entry_key(session_id), field).await?;
        Ok(value)
    }

    async fn set_field(&self, session_id: Uuid, field: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::Script::new(SET_IF_PRESENT)
            .key(entry_key(session_id))
            .arg(field)
            .arg(value)
            .invoke_async::<_, i64>(&mut conn)
            .await?;
        Ok(())
    }

    async fn ttl_seconds(&self, session_id: Uuid) -> Result<Option<i64>> {
        let mut conn = self.conn.clone();
        let ttl: i64 = conn.ttl(tracker_key(session_id)).await?;
        // -2 missing, -1 no expiry
        Ok((ttl >= 0).then_some(ttl))
    }

    async fn evict(&self, session_id: Uuid) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(&[entry_key(session_id), tracker_key(session_id)])
            .await?;
        Ok(())
    }
}
