//! Redis-backed store.

use super::QueueStore;
use crate::error::MailerError;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

/// Production store over a Redis connection manager.
///
/// The connection manager multiplexes and reconnects internally; it is
/// cloned per call, matching how the rest of the workspace uses it.
#[derive(Clone)]
pub struct RedisStore {
    redis: ConnectionManager,
}

impl RedisStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    /// Get a clone of the underlying connection manager.
    pub fn redis(&self) -> ConnectionManager {
        self.redis.clone()
    }
}

#[async_trait]
impl QueueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, MailerError> {
        let mut conn = self.redis.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), MailerError> {
        let mut conn = self.redis.clone();
        conn.set::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), MailerError> {
        let mut conn = self.redis.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl_secs).await?;
        Ok(())
    }

    async fn set_nx_ex(
        &self,
        key: &str,
        value: &str,
        ttl_secs: u64,
    ) -> Result<bool, MailerError> {
        let mut conn = self.redis.clone();

        // SET key value NX EX ttl -> "OK" on success, nil when the key exists
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await?;

        Ok(result.is_some())
    }

    async fn del(&self, key: &str) -> Result<(), MailerError> {
        let mut conn = self.redis.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, MailerError> {
        let mut conn = self.redis.clone();
        let value: i64 = conn.incr(key, 1).await?;
        Ok(value)
    }

    async fn list_push_back(&self, key: &str, value: &str) -> Result<(), MailerError> {
        let mut conn = self.redis.clone();
        conn.rpush::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn list_range(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, MailerError> {
        let mut conn = self.redis.clone();
        let values: Vec<String> = conn.lrange(key, start, stop).await?;
        Ok(values)
    }

    async fn list_remove(&self, key: &str, value: &str) -> Result<usize, MailerError> {
        let mut conn = self.redis.clone();
        let removed: i64 = conn.lrem(key, 1, value).await?;
        Ok(removed.max(0) as usize)
    }

    async fn list_len(&self, key: &str) -> Result<usize, MailerError> {
        let mut conn = self.redis.clone();
        let len: usize = conn.llen(key).await?;
        Ok(len)
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool, MailerError> {
        let mut conn = self.redis.clone();
        let added: i64 = conn.sadd(key, member).await?;
        Ok(added > 0)
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool, MailerError> {
        let mut conn = self.redis.clone();
        let removed: i64 = conn.srem(key, member).await?;
        Ok(removed > 0)
    }

    async fn set_len(&self, key: &str) -> Result<usize, MailerError> {
        let mut conn = self.redis.clone();
        let len: usize = conn.scard(key).await?;
        Ok(len)
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, MailerError> {
        let mut conn = self.redis.clone();
        let members: Vec<String> = conn.smembers(key).await?;
        Ok(members)
    }
}
