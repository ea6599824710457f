use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{CounterStore, StoreError, WindowOutcome, window_cutoff};

/// Prune, count, and conditionally record in one server-side step.
///
/// KEYS[1] window key
/// ARGV[1] now (score of the new entry)
/// ARGV[2] cutoff; scores at or below it have left the window
/// ARGV[3] limit
/// ARGV[4] unique member for the new entry
/// ARGV[5] idle expiry in seconds
///
/// Returns `{allowed, count, oldest}` where `oldest` is a score string or "".
const CHECK_AND_CONSUME_LUA: &str = r#"
local key = KEYS[1]
local limit = tonumber(ARGV[3])

redis.call('ZREMRANGEBYSCORE', key, '-inf', ARGV[2])
local count = redis.call('ZCARD', key)

local oldest = ''
local head = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
if head[2] then
    oldest = head[2]
end

if count >= limit then
    return {0, count, oldest}
end

redis.call('ZADD', key, ARGV[1], ARGV[4])
redis.call('EXPIRE', key, tonumber(ARGV[5]))
if oldest == '' then
    oldest = ARGV[1]
end
return {1, count + 1, oldest}
"#;

/// Redis-backed sliding windows shared by every process of the deployment.
///
/// Each window is a sorted set scored by Unix time. The connection is
/// established lazily: if Redis is down at startup, the first request after
/// it comes back connects. Once established, `ConnectionManager` handles
/// reconnects itself.
pub struct RedisCounterStore {
    client: Client,
    connection: RwLock<Option<ConnectionManager>>,
    key_prefix: String,
    script: Script,
    available: AtomicBool,
    closed: AtomicBool,
}

impl fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCounterStore")
            .field("key_prefix", &self.key_prefix)
            .field("available", &self.available.load(Ordering::Relaxed))
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl RedisCounterStore {
    /// Open a store for `url` and try to connect within `connect_timeout`.
    ///
    /// Only a malformed URL is an error. An unreachable server is logged and
    /// the connection is retried on later calls.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Redis` if the URL cannot be parsed.
    pub async fn open(
        url: &str,
        key_prefix: impl Into<String>,
        connect_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = Client::open(url)?;
        let store = Self {
            client,
            connection: RwLock::new(None),
            key_prefix: key_prefix.into(),
            script: Script::new(CHECK_AND_CONSUME_LUA),
            available: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        };

        match timeout(connect_timeout, store.ping()).await {
            Ok(Ok(())) => info!("Connected to shared counter store"),
            Ok(Err(e)) => warn!(
                error = %e,
                "Shared counter store unreachable at startup, will retry on demand"
            ),
            Err(_) => warn!(
                timeout_ms = connect_timeout.as_millis() as u64,
                "Shared counter store connection timed out at startup, will retry on demand"
            ),
        }

        Ok(store)
    }

    /// Round-trip a `PING`.
    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let result: Result<String, _> = redis::cmd("PING").query_async(&mut conn).await;
        self.track(result.map(|_| ()))
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    /// Shared connection, connecting first if needed.
    ///
    /// The connect happens outside the lock; a racing connect simply loses.
    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }

        if let Some(conn) = self.connection.read().await.as_ref() {
            return Ok(conn.clone());
        }

        let conn = match ConnectionManager::new(self.client.clone()).await {
            Ok(conn) => conn,
            Err(e) => {
                self.available.store(false, Ordering::Release);
                return Err(e.into());
            }
        };
        debug!("Established shared counter store connection");

        let mut guard = self.connection.write().await;
        Ok(guard.get_or_insert(conn).clone())
    }

    fn track<T>(&self, result: Result<T, redis::RedisError>) -> Result<T, StoreError> {
        self.available.store(result.is_ok(), Ordering::Release);
        result.map_err(StoreError::from)
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn check_and_consume(
        &self,
        key: &str,
        limit: u64,
        window_secs: u64,
        now: f64,
    ) -> Result<WindowOutcome, StoreError> {
        let mut conn = self.connection().await?;
        let member = format!("{now:.6}-{}", Uuid::new_v4().simple());
        let cutoff = window_cutoff(now, window_secs);

        let result: Result<(i64, u64, String), _> = self
            .script
            .key(self.key(key))
            .arg(format!("{now:.6}"))
            .arg(format!("{cutoff:.6}"))
            .arg(limit)
            .arg(member)
            .arg(window_secs + 1)
            .invoke_async(&mut conn)
            .await;

        let (allowed, count, oldest) = self.track(result)?;
        let oldest = oldest.parse::<f64>().ok();

        Ok(if allowed == 1 {
            WindowOutcome::allowed(count, oldest)
        } else {
            WindowOutcome::denied(count, oldest)
        })
    }

    async fn count(&self, key: &str, window_secs: u64, now: f64) -> Result<u64, StoreError> {
        let mut conn = self.connection().await?;
        let key = self.key(key);
        let cutoff = format!("{:.6}", window_cutoff(now, window_secs));

        let result: Result<(u64,), _> = redis::pipe()
            .atomic()
            .zrembyscore(&key, "-inf", cutoff)
            .ignore()
            .zcard(&key)
            .query_async(&mut conn)
            .await;

        let (count,) = self.track(result)?;
        Ok(count)
    }

    fn is_available(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && self.available.load(Ordering::Acquire)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.available.store(false, Ordering::Release);
        self.connection.write().await.take();
        info!("Shared counter store closed");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_rejects_malformed_url() {
        let result =
            RedisCounterStore::open("not a redis url", "rl:", Duration::from_millis(50)).await;
        assert!(matches!(result, Err(StoreError::Redis(_))));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_not_fatal() {
        // Port 1 on localhost refuses connections
        let store = RedisCounterStore::open("redis://127.0.0.1:1/", "rl:", Duration::from_millis(200))
            .await
            .unwrap();

        assert!(!store.is_available());
        let result = store.check_and_consume("ip:a", 5, 60, 1_700_000_000.0).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_closed_store_fails_fast() {
        let store = RedisCounterStore::open("redis://127.0.0.1:1/", "rl:", Duration::from_millis(50))
            .await
            .unwrap();
        store.close().await;

        let result = store.count("ip:a", 60, 1_700_000_000.0).await;
        assert!(matches!(result, Err(StoreError::Closed)));
        assert!(!store.is_available());
    }

    #[tokio::test]
    async fn test_key_prefix_applied() {
        let store = RedisCounterStore::open("redis://127.0.0.1:1/", "rate_limit:", Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(store.key("burst:ip:a"), "rate_limit:burst:ip:a");
    }
}
