//! Redis-backed pairing queue and active-flag set

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use uuid::Uuid;

use crate::store::{MatchmakeStore, StoreError};

const QUEUE_KEY: &str = "matchmaking:queue";
const ACTIVE_KEY_PREFIX: &str = "matchmaking:active:";
const ACTIVE_TTL_SECS: u64 = 300;

/// Pops both heads in one server-side step, or nothing. A lone entry is
/// left in place, so no caller can ever observe half a pair.
const DEQUEUE_PAIR_SCRIPT: &str = r#"
if redis.call('LLEN', KEYS[1]) < 2 then
    return {}
end
local first = redis.call('LPOP', KEYS[1])
local second = redis.call('LPOP', KEYS[1])
return {first, second}
"#;

/// Matchmaking store over a shared Redis instance
#[derive(Clone)]
pub struct RedisMatchmakeStore {
    conn: ConnectionManager,
}

impl RedisMatchmakeStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Open a managed connection against the configured URL
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(StoreError::Redis)?;
        let conn = ConnectionManager::new(client).await.map_err(StoreError::Redis)?;
        Ok(Self::new(conn))
    }

    fn active_key(user_id: Uuid) -> String {
        format!("{ACTIVE_KEY_PREFIX}{user_id}")
    }
}

#[async_trait]
impl MatchmakeStore for RedisMatchmakeStore {
    async fn enqueue(&self, user_id: Uuid) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.rpush(QUEUE_KEY, user_id.to_string()).await?;
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<(Uuid, Uuid)>, StoreError> {
        let mut conn = self.conn.clone();
        let popped: Vec<String> = redis::Script::new(DEQUEUE_PAIR_SCRIPT)
            .key(QUEUE_KEY)
            .invoke_async(&mut conn)
            .await?;

        if popped.len() < 2 {
            return Ok(None);
        }

        let first = Uuid::parse_str(&popped[0])
            .map_err(|e| StoreError::Other(format!("bad queue entry: {e}")))?;
        let second = Uuid::parse_str(&popped[1])
            .map_err(|e| StoreError::Other(format!("bad queue entry: {e}")))?;
        Ok(Some((first, second)))
    }

    async fn remove(&self, user_id: Uuid) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.lrem(QUEUE_KEY, 1, user_id.to_string()).await?;
        Ok(())
    }

    async fn set_active(&self, user_id: Uuid) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let created: Option<String> = redis::cmd("SET")
            .arg(Self::active_key(user_id))
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(ACTIVE_TTL_SECS)
            .query_async(&mut conn)
            .await?;
        Ok(created.is_some())
    }

    async fn clear_active(&self, user_id: Uuid) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(Self::active_key(user_id)).await?;
        Ok(())
    }
}
