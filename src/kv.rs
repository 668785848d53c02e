//! Ambient key-value coordination store (§5: "never as a source of truth").
//!
//! Cross-replica rate-limit counters, circuit-breaker trip state and
//! short-lived locks live here, backed by `redis::aio::ConnectionManager`
//! the way `RedisCache` wraps it in the pack's media-server example. The
//! database (`db.rs`) stays the system of record; everything in this module
//! is disposable and safe to lose on a Redis restart.

use anyhow::{Context, Result};
use redis::AsyncCommands;
use std::time::Duration;

/// Lua script for an atomic sliding-window counter: increments and prunes a
/// sorted set in one round trip so concurrent replicas never race on the
/// increment-then-check pattern a plain GET/INCR/EXPIRE sequence would need.
const SLIDING_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window_ms = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])

redis.call('ZREMRANGEBYSCORE', key, 0, now - window_ms)
local current = redis.call('ZCARD', key)
if current < limit then
    redis.call('ZADD', key, now, now .. '-' .. math.random())
    redis.call('PEXPIRE', key, window_ms)
    return 1
else
    return 0
end
"#;

#[derive(Clone)]
pub struct KvStore {
    conn: redis::aio::ConnectionManager,
}

impl KvStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("invalid redis url")?;
        let conn = redis::aio::ConnectionManager::new(client)
            .await
            .context("failed to connect to redis")?;
        Ok(Self { conn })
    }

    /// Per-domain fetch rate limit (§4.3 "respect robots/rate limits per
    /// domain"): returns `true` if the caller may proceed, `false` if the
    /// window's quota is exhausted.
    pub async fn allow_fetch(&self, source_domain: &str, window: Duration, limit: u32) -> Result<bool> {
        let mut conn = self.conn.clone();
        let key = format!("ratelimit:fetch:{source_domain}");
        let now_ms = chrono::Utc::now().timestamp_millis();
        let script = redis::Script::new(SLIDING_WINDOW_SCRIPT);
        let allowed: i32 = script
            .key(key)
            .arg(now_ms)
            .arg(window.as_millis() as i64)
            .arg(limit)
            .invoke_async(&mut conn)
            .await
            .context("rate limit script failed")?;
        Ok(allowed == 1)
    }

    /// Records a fetch failure for `source_id`'s circuit breaker, returning
    /// the new consecutive-failure count (§4.3 circuit breaker, mirrored
    /// cross-replica so every pool worker observes the same trip state).
    pub async fn record_circuit_failure(&self, source_id: &str, cooldown: Duration) -> Result<u32> {
        let mut conn = self.conn.clone();
        let key = format!("circuit:failures:{source_id}");
        let count: u32 = conn.incr(&key, 1).await.context("circuit failure incr failed")?;
        let _: () = conn
            .expire(&key, cooldown.as_secs() as i64)
            .await
            .context("circuit failure expire failed")?;
        Ok(count)
    }

    pub async fn reset_circuit(&self, source_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let key = format!("circuit:failures:{source_id}");
        let _: () = conn.del(&key).await.context("circuit reset failed")?;
        Ok(())
    }

    pub async fn trip_circuit(&self, source_id: &str, cooldown: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let key = format!("circuit:open:{source_id}");
        let _: () = conn
            .set_ex(&key, true, cooldown.as_secs())
            .await
            .context("circuit trip failed")?;
        Ok(())
    }

    pub async fn is_circuit_open(&self, source_id: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let key = format!("circuit:open:{source_id}");
        let open: Option<bool> = conn.get(&key).await.context("circuit open check failed")?;
        Ok(open.unwrap_or(false))
    }

    /// Short-lived lock for the Organizer's deferred-canonicalisation sweep
    /// (§4.6): only one replica runs a given merge pass at a time. Returns
    /// `true` if the lock was acquired.
    pub async fn try_acquire_lock(&self, lock_name: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let key = format!("lock:{lock_name}");
        let acquired: bool = redis::cmd("SET")
            .arg(&key)
            .arg(1)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as i64)
            .query_async::<Option<String>>(&mut conn)
            .await
            .context("lock acquire failed")?
            .is_some();
        Ok(acquired)
    }

    pub async fn release_lock(&self, lock_name: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let key = format!("lock:{lock_name}");
        let _: () = conn.del(&key).await.context("lock release failed")?;
        Ok(())
    }
}
