//! Backing store abstraction for the rate guard engine.
//!
//! All counters, logs, profiles, and block records live behind the
//! [`BackingStore`] trait: a narrow interface over a shared key-value
//! store with atomic counters, score-ordered sets, and per-key
//! expiration. The Redis implementation backs production deployments;
//! the in-memory implementation backs tests, benches, and single-node
//! setups without an external store.
//!
//! Every Redis operation carries the configured per-operation timeout.
//! The engine converts timeouts and connection failures into fail-open
//! decisions; nothing in this module retries.

use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during store operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Result of an atomic sliding-window reservation.
///
/// `count` is the cardinality of the window log after pruning (and after
/// the insert, when accepted). `oldest_score_ms` is populated only on a
/// rejected reservation, from the oldest surviving entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowReservation {
    pub accepted: bool,
    pub count: u64,
    pub oldest_score_ms: Option<i64>,
}

/// Narrow interface over the shared backing store.
///
/// Scores are epoch milliseconds throughout. `window_reserve` is the one
/// compound operation: prune, count, and conditional insert must execute
/// atomically so concurrent checks for the same key cannot race between
/// the count read and the insert write.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Increment a counter, setting `ttl_if_new` when this call created it.
    async fn atomic_increment(
        &self,
        key: &str,
        ttl_if_new: Option<Duration>,
    ) -> Result<i64, StoreError>;

    async fn sorted_set_add(&self, key: &str, score: i64, member: &str) -> Result<(), StoreError>;

    /// Remove members with scores in `[min, max]`, returning how many.
    async fn sorted_set_remove_range_by_score(
        &self,
        key: &str,
        min: i64,
        max: i64,
    ) -> Result<u64, StoreError>;

    /// Remove members by rank range (negative ranks count from the tail).
    async fn sorted_set_remove_range_by_rank(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<u64, StoreError>;

    async fn sorted_set_cardinality(&self, key: &str) -> Result<u64, StoreError>;

    /// Members and scores for the rank range `[start, stop]`, ascending.
    async fn sorted_set_range_with_scores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<(String, i64)>, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    async fn set_add(&self, set_key: &str, member: &str) -> Result<(), StoreError>;

    async fn set_contains(&self, set_key: &str, member: &str) -> Result<bool, StoreError>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Atomically prune entries scored below `window_start_ms`, count the
    /// survivors, and insert `member` at `now_ms` when the count is below
    /// `limit`. Refreshes the key TTL on accepted reservations.
    async fn window_reserve(
        &self,
        key: &str,
        window_start_ms: i64,
        now_ms: i64,
        member: &str,
        limit: u32,
        ttl: Duration,
    ) -> Result<WindowReservation, StoreError>;
}

/// Server-side script backing `window_reserve` on Redis. Evaluated
/// atomically, which closes the prune/count/insert race entirely.
const WINDOW_RESERVE_SCRIPT: &str = r#"
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', '(' .. ARGV[1])
local count = redis.call('ZCARD', KEYS[1])
local limit = tonumber(ARGV[4])
if count >= limit then
    local oldest = redis.call('ZRANGE', KEYS[1], 0, 0, 'WITHSCORES')
    local oldest_score = 0
    if oldest[2] then
        oldest_score = tonumber(oldest[2])
    end
    return {0, count, oldest_score}
end
redis.call('ZADD', KEYS[1], tonumber(ARGV[2]), ARGV[3])
redis.call('EXPIRE', KEYS[1], tonumber(ARGV[5]))
return {1, count + 1, 0}
"#;

/// Redis-backed store
pub struct RedisStore {
    client: redis::Client,
    op_timeout: Duration,
    window_script: redis::Script,
}

impl RedisStore {
    pub fn new(client: redis::Client, op_timeout: Duration) -> Self {
        Self {
            client,
            op_timeout,
            window_script: redis::Script::new(WINDOW_RESERVE_SCRIPT),
        }
    }

    pub fn from_url(url: &str, op_timeout: Duration) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        Ok(Self::new(client, op_timeout))
    }

    async fn with_timeout<T>(
        &self,
        fut: impl std::future::Future<Output = redis::RedisResult<T>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(StoreError::Redis(err)),
            Err(_) => Err(StoreError::Timeout(self.op_timeout)),
        }
    }

    async fn connection(&self) -> Result<redis::aio::Connection, StoreError> {
        self.with_timeout(self.client.get_async_connection()).await
    }
}

#[async_trait]
impl BackingStore for RedisStore {
    async fn atomic_increment(
        &self,
        key: &str,
        ttl_if_new: Option<Duration>,
    ) -> Result<i64, StoreError> {
        let mut conn = self.connection().await?;
        let count: i64 = self.with_timeout(conn.incr(key, 1)).await?;
        if count == 1 {
            if let Some(ttl) = ttl_if_new {
                let _: bool = self
                    .with_timeout(conn.expire(key, ttl.as_secs() as usize))
                    .await?;
            }
        }
        Ok(count)
    }

    async fn sorted_set_add(&self, key: &str, score: i64, member: &str) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let _: i64 = self.with_timeout(conn.zadd(key, member, score)).await?;
        Ok(())
    }

    async fn sorted_set_remove_range_by_score(
        &self,
        key: &str,
        min: i64,
        max: i64,
    ) -> Result<u64, StoreError> {
        let mut conn = self.connection().await?;
        let removed: u64 = self.with_timeout(conn.zrembyscore(key, min, max)).await?;
        Ok(removed)
    }

    async fn sorted_set_remove_range_by_rank(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<u64, StoreError> {
        let mut conn = self.connection().await?;
        let removed: u64 = self
            .with_timeout(
                redis::cmd("ZREMRANGEBYRANK")
                    .arg(key)
                    .arg(start)
                    .arg(stop)
                    .query_async(&mut conn),
            )
            .await?;
        Ok(removed)
    }

    async fn sorted_set_cardinality(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.connection().await?;
        let count: u64 = self.with_timeout(conn.zcard(key)).await?;
        Ok(count)
    }

    async fn sorted_set_range_with_scores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<(String, i64)>, StoreError> {
        let mut conn = self.connection().await?;
        let entries: Vec<(String, i64)> = self
            .with_timeout(
                redis::cmd("ZRANGE")
                    .arg(key)
                    .arg(start)
                    .arg(stop)
                    .arg("WITHSCORES")
                    .query_async(&mut conn),
            )
            .await?;
        Ok(entries)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection().await?;
        let value: Option<String> = self.with_timeout(conn.get(key)).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        match ttl {
            Some(ttl) => {
                let _: () = self
                    .with_timeout(conn.set_ex(key, value, ttl.as_secs() as usize))
                    .await?;
            }
            None => {
                let _: () = self.with_timeout(conn.set(key, value)).await?;
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let _: i64 = self.with_timeout(conn.del(key)).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let found: bool = self.with_timeout(conn.exists(key)).await?;
        Ok(found)
    }

    async fn set_add(&self, set_key: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let _: i64 = self.with_timeout(conn.sadd(set_key, member)).await?;
        Ok(())
    }

    async fn set_contains(&self, set_key: &str, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let found: bool = self.with_timeout(conn.sismember(set_key, member)).await?;
        Ok(found)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let _: bool = self
            .with_timeout(conn.expire(key, ttl.as_secs() as usize))
            .await?;
        Ok(())
    }

    async fn window_reserve(
        &self,
        key: &str,
        window_start_ms: i64,
        now_ms: i64,
        member: &str,
        limit: u32,
        ttl: Duration,
    ) -> Result<WindowReservation, StoreError> {
        let mut conn = self.connection().await?;
        let (accepted, count, oldest_ms): (i64, u64, i64) = self
            .with_timeout(
                self.window_script
                    .key(key)
                    .arg(window_start_ms)
                    .arg(now_ms)
                    .arg(member)
                    .arg(limit)
                    .arg(ttl.as_secs())
                    .invoke_async(&mut conn),
            )
            .await?;
        Ok(WindowReservation {
            accepted: accepted == 1,
            count,
            oldest_score_ms: if accepted == 1 || oldest_ms == 0 {
                None
            } else {
                Some(oldest_ms)
            },
        })
    }
}

#[derive(Debug)]
struct ValueEntry {
    value: String,
    expires_at_ms: Option<i64>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    entries: HashMap<String, ValueEntry>,
    zsets: HashMap<String, Vec<(String, i64)>>,
    sets: HashMap<String, HashSet<String>>,
}

/// In-memory store. Mirrors the Redis semantics the engine relies on:
/// counters and strings share one keyspace, TTLs are honored lazily,
/// and `window_reserve` runs under the inner mutex, so the whole
/// prune/count/insert sequence is atomic. Sorted sets are bounded by
/// their callers' score pruning and rank trimming rather than TTLs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn wall_now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    fn live_entry<'a>(inner: &'a mut MemoryInner, key: &str) -> Option<&'a mut ValueEntry> {
        let expired = inner
            .entries
            .get(key)
            .and_then(|entry| entry.expires_at_ms)
            .map(|at| at <= Self::wall_now_ms())
            .unwrap_or(false);
        if expired {
            inner.entries.remove(key);
        }
        inner.entries.get_mut(key)
    }

    fn range_bounds(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
        if len == 0 {
            return None;
        }
        let len = len as isize;
        let start = if start < 0 { (len + start).max(0) } else { start };
        let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
        if start > stop || start >= len || stop < 0 {
            return None;
        }
        Some((start as usize, stop as usize))
    }
}

#[async_trait]
impl BackingStore for MemoryStore {
    async fn atomic_increment(
        &self,
        key: &str,
        ttl_if_new: Option<Duration>,
    ) -> Result<i64, StoreError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = Self::live_entry(&mut inner, key) {
            let next = entry.value.parse::<i64>().unwrap_or(0) + 1;
            entry.value = next.to_string();
            return Ok(next);
        }
        inner.entries.insert(
            key.to_string(),
            ValueEntry {
                value: "1".to_string(),
                expires_at_ms: ttl_if_new.map(|ttl| Self::wall_now_ms() + ttl.as_millis() as i64),
            },
        );
        Ok(1)
    }

    async fn sorted_set_add(&self, key: &str, score: i64, member: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let set = inner.zsets.entry(key.to_string()).or_default();
        set.retain(|(m, _)| m != member);
        set.push((member.to_string(), score));
        set.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        Ok(())
    }

    async fn sorted_set_remove_range_by_score(
        &self,
        key: &str,
        min: i64,
        max: i64,
    ) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let Some(set) = inner.zsets.get_mut(key) else {
            return Ok(0);
        };
        let before = set.len();
        set.retain(|(_, score)| *score < min || *score > max);
        Ok((before - set.len()) as u64)
    }

    async fn sorted_set_remove_range_by_rank(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let Some(set) = inner.zsets.get_mut(key) else {
            return Ok(0);
        };
        let Some((start, stop)) = Self::range_bounds(set.len(), start, stop) else {
            return Ok(0);
        };
        let removed = stop - start + 1;
        set.drain(start..=stop);
        Ok(removed as u64)
    }

    async fn sorted_set_cardinality(&self, key: &str) -> Result<u64, StoreError> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner.zsets.get(key).map(|s| s.len()).unwrap_or(0) as u64)
    }

    async fn sorted_set_range_with_scores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<(String, i64)>, StoreError> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let Some(set) = inner.zsets.get(key) else {
            return Ok(Vec::new());
        };
        let Some((start, stop)) = Self::range_bounds(set.len(), start, stop) else {
            return Ok(Vec::new());
        };
        Ok(set[start..=stop].to_vec())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(Self::live_entry(&mut inner, key).map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.entries.insert(
            key.to_string(),
            ValueEntry {
                value: value.to_string(),
                expires_at_ms: ttl.map(|ttl| Self::wall_now_ms() + ttl.as_millis() as i64),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.entries.remove(key);
        inner.zsets.remove(key);
        inner.sets.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if Self::live_entry(&mut inner, key).is_some() {
            return Ok(true);
        }
        Ok(inner.zsets.contains_key(key) || inner.sets.contains_key(key))
    }

    async fn set_add(&self, set_key: &str, member: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .sets
            .entry(set_key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn set_contains(&self, set_key: &str, member: &str) -> Result<bool, StoreError> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner
            .sets
            .get(set_key)
            .map(|s| s.contains(member))
            .unwrap_or(false))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = Self::live_entry(&mut inner, key) {
            entry.expires_at_ms = Some(Self::wall_now_ms() + ttl.as_millis() as i64);
        }
        Ok(())
    }

    async fn window_reserve(
        &self,
        key: &str,
        window_start_ms: i64,
        now_ms: i64,
        member: &str,
        limit: u32,
        _ttl: Duration,
    ) -> Result<WindowReservation, StoreError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let set = inner.zsets.entry(key.to_string()).or_default();
        set.retain(|(_, score)| *score >= window_start_ms);
        let count = set.len() as u64;
        if count >= limit as u64 {
            return Ok(WindowReservation {
                accepted: false,
                count,
                oldest_score_ms: set.first().map(|(_, score)| *score),
            });
        }
        set.push((member.to_string(), now_ms));
        set.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        Ok(WindowReservation {
            accepted: true,
            count: count + 1,
            oldest_score_ms: None,
        })
    }
}
