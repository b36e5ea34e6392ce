use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, Client as RedisClient};
use tokio::sync::RwLock;

use crate::cache::keys::capital_session_key;
use crate::cache::models::session::CachedSession;
use crate::error::AppError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        tracing::error!(error = %err, "Session store failure");
        AppError::Upstream {
            message: "Session store unavailable".into(),
            details: None,
        }
    }
}

/// Keyed session storage with explicit expiry.
///
/// `put` overwrites any previous record for the same user. `get` never
/// returns a record past its `expires_at`.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn put(&self, session: &CachedSession, ttl: Duration) -> Result<(), StoreError>;

    async fn get(&self, username: &str) -> Result<Option<CachedSession>, StoreError>;

    /// Pushes the expiry of an existing record `ttl` into the future.
    async fn touch(&self, username: &str, ttl: Duration) -> Result<(), StoreError>;

    async fn remove(&self, username: &str) -> Result<(), StoreError>;
}

fn stamp(session: &CachedSession, ttl: Duration) -> CachedSession {
    let mut session = session.clone();
    session.expires_at = chrono::Utc::now().timestamp() + ttl.as_secs() as i64;
    session
}

/// Process-local store. Sessions are lost on restart.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, CachedSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn put(&self, session: &CachedSession, ttl: Duration) -> Result<(), StoreError> {
        let session = stamp(session, ttl);
        self.sessions
            .write()
            .await
            .insert(session.username.clone(), session);
        Ok(())
    }

    async fn get(&self, username: &str) -> Result<Option<CachedSession>, StoreError> {
        let now = chrono::Utc::now().timestamp();
        {
            let sessions = self.sessions.read().await;
            match sessions.get(username) {
                Some(session) if !session.is_expired_at(now) => return Ok(Some(session.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }

        // expired: drop it so the map does not grow with dead entries
        let mut sessions = self.sessions.write().await;
        if sessions
            .get(username)
            .is_some_and(|s| s.is_expired_at(now))
        {
            sessions.remove(username);
        }
        Ok(None)
    }

    async fn touch(&self, username: &str, ttl: Duration) -> Result<(), StoreError> {
        if let Some(session) = self.sessions.write().await.get_mut(username) {
            session.expires_at = chrono::Utc::now().timestamp() + ttl.as_secs() as i64;
        }
        Ok(())
    }

    async fn remove(&self, username: &str) -> Result<(), StoreError> {
        self.sessions.write().await.remove(username);
        Ok(())
    }
}

/// `EXPIRE` on the session key. Only the key's TTL changes, so a record
/// removed or replaced in the meantime is never written back.
fn touch_command(username: &str, ttl: Duration) -> redis::Cmd {
    let mut cmd = redis::cmd("EXPIRE");
    cmd.arg(capital_session_key(username))
        .arg(ttl.as_secs().max(1));
    cmd
}

/// Redis-backed store. Expiry is the key's server-side TTL; the
/// `expires_at` in the stored JSON is informational only.
pub struct RedisSessionStore {
    redis: Arc<RedisClient>,
}

impl RedisSessionStore {
    pub fn new(redis: Arc<RedisClient>) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn put(&self, session: &CachedSession, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;

        let session = stamp(session, ttl);
        let json = serde_json::to_string(&session)?;
        let key = capital_session_key(&session.username);
        let _: () = conn.set_ex(key, json, ttl.as_secs().max(1)).await?;

        Ok(())
    }

    async fn get(&self, username: &str) -> Result<Option<CachedSession>, StoreError> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;

        let result: Option<String> = conn.get(capital_session_key(username)).await?;
        match result {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn touch(&self, username: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;
        // 0 when the key is gone; nothing to extend then
        let _: i64 = touch_command(username, ttl).query_async(&mut conn).await?;
        Ok(())
    }

    async fn remove(&self, username: &str) -> Result<(), StoreError> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;
        let _: () = conn.del(capital_session_key(username)).await?;
        Ok(())
    }
}
