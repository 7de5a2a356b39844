//! Cache backend implementations.
//!
//! - **InMemoryBackend**: process-local cache on a sharded `DashMap`
//! - **RedisBackend**: shared cache on Redis, namespaced by a key prefix
//!
//! Values are plain strings. Callers own the encoding.

use crate::config::RedisConfig;
use crate::error::{AgoraError, ErrorCode, ErrorContext, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use metrics::{counter, gauge};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

// ═══════════════════════════════════════════════════════════════════════════════
// Cache Statistics
// ═══════════════════════════════════════════════════════════════════════════════

/// Cache statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    /// Total number of cache hits
    pub hits: u64,

    /// Total number of cache misses
    pub misses: u64,

    /// Number of live entries, when the backend can tell cheaply
    pub entries: Option<u64>,

    /// Eviction count
    pub evictions: u64,

    /// Hit rate (0.0 - 1.0)
    pub hit_rate: f64,
}

impl CacheStats {
    /// Calculate the hit rate.
    pub fn calculate_hit_rate(&mut self) {
        let total = self.hits + self.misses;
        self.hit_rate = if total > 0 {
            self.hits as f64 / total as f64
        } else {
            0.0
        };
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Cache Backend Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Trait for cache backends.
///
/// Every operation is individually atomic. Nothing is atomic across calls.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Get a value. Expired entries read as `None`.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store a value, replacing any previous one. `None` means no expiry.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Delete a value. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Delete every value whose key starts with `prefix`.
    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64>;

    /// Check that the backend is reachable.
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    /// Get cache statistics.
    async fn stats(&self) -> Result<CacheStats>;

    /// Backend name for logs and metrics.
    fn name(&self) -> &'static str;
}

// ═══════════════════════════════════════════════════════════════════════════════
// In-Memory Backend
// ═══════════════════════════════════════════════════════════════════════════════

/// Configuration for in-memory cache.
#[derive(Debug, Clone)]
pub struct InMemoryConfig {
    /// Maximum number of entries
    pub max_capacity: u64,

    /// Shard count for concurrent access (power of 2)
    pub shard_count: usize,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            max_capacity: 100_000,
            shard_count: 16,
        }
    }
}

struct InMemoryEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl InMemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// In-memory cache backend.
pub struct InMemoryBackend {
    entries: DashMap<String, InMemoryEntry>,
    config: InMemoryConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl InMemoryBackend {
    /// Create a new in-memory backend.
    pub fn new(config: InMemoryConfig) -> Self {
        Self {
            entries: DashMap::with_shard_amount(config.shard_count),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Remove expired entries. Returns how many were removed.
    pub fn cleanup_expired(&self) -> u64 {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before.saturating_sub(self.entries.len()) as u64;

        if removed > 0 {
            debug!("Cleaned up {} expired cache entries", removed);
        }
        removed
    }

    /// Make room for one more entry. Expired entries go first, then an
    /// arbitrary tenth of the map.
    fn maybe_evict(&self) {
        if (self.entries.len() as u64) < self.config.max_capacity {
            return;
        }

        self.cleanup_expired();
        if (self.entries.len() as u64) < self.config.max_capacity {
            return;
        }

        let to_evict = (self.config.max_capacity / 10).max(1) as usize;
        let victims: Vec<String> = self
            .entries
            .iter()
            .take(to_evict)
            .map(|e| e.key().clone())
            .collect();

        let mut evicted = 0u64;
        for key in victims {
            if self.entries.remove(&key).is_some() {
                evicted += 1;
            }
        }

        self.evictions.fetch_add(evicted, Ordering::Relaxed);
        counter!("cache_evictions_total", "backend" => "in_memory").increment(evicted);
        debug!("Evicted {} entries from cache", evicted);
    }

    fn record_miss(&self, reason: &'static str) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        counter!("cache_misses_total", "backend" => "in_memory", "reason" => reason).increment(1);
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new(InMemoryConfig::default())
    }
}

#[async_trait]
impl CacheBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let found = self.entries.get(key).map(|entry| {
            if entry.is_expired(now) {
                None
            } else {
                Some(entry.value.clone())
            }
        });

        match found {
            Some(Some(value)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                counter!("cache_hits_total", "backend" => "in_memory").increment(1);
                Ok(Some(value))
            }
            Some(None) => {
                self.entries.remove_if(key, |_, entry| entry.is_expired(now));
                self.record_miss("expired");
                Ok(None)
            }
            None => {
                self.record_miss("not_found");
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        if !self.entries.contains_key(key) {
            self.maybe_evict();
        }

        self.entries.insert(
            key.to_string(),
            InMemoryEntry {
                value: value.to_string(),
                expires_at: ttl.and_then(|ttl| Instant::now().checked_add(ttl)),
            },
        );

        counter!("cache_sets_total", "backend" => "in_memory").increment(1);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let removed = self.entries.remove(key).is_some();
        if removed {
            counter!("cache_deletes_total", "backend" => "in_memory").increment(1);
        }
        Ok(removed)
    }

    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64> {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(prefix));
        let deleted = before.saturating_sub(self.entries.len()) as u64;

        counter!("cache_deletes_total", "backend" => "in_memory").increment(deleted);
        Ok(deleted)
    }

    async fn stats(&self) -> Result<CacheStats> {
        let entries = self.entries.len() as u64;
        let mut stats = CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: Some(entries),
            evictions: self.evictions.load(Ordering::Relaxed),
            hit_rate: 0.0,
        };
        stats.calculate_hit_rate();

        gauge!("cache_entries", "backend" => "in_memory").set(entries as f64);
        gauge!("cache_hit_rate", "backend" => "in_memory").set(stats.hit_rate);

        Ok(stats)
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Redis Backend
// ═══════════════════════════════════════════════════════════════════════════════

/// Redis cache backend.
///
/// Holds one auto-reconnecting multiplexed connection shared by every task.
pub struct RedisBackend {
    conn: ConnectionManager,
    key_prefix: String,
    response_timeout: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl RedisBackend {
    /// Connect and verify the server answers `PING`.
    pub async fn new(config: &RedisConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str())
            .error_code(ErrorCode::CacheConnectionFailed, "Failed to create Redis client")?;

        let conn = tokio::time::timeout(config.connect_timeout, ConnectionManager::new(client))
            .await
            .error_code(ErrorCode::CacheConnectionFailed, "Failed to connect to Redis")?
            .error_code(ErrorCode::CacheConnectionFailed, "Failed to connect to Redis")?;

        let backend = Self {
            conn,
            key_prefix: config.key_prefix.clone(),
            response_timeout: config.response_timeout,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        };
        backend.ping().await?;

        info!(prefix = %backend.key_prefix, "Redis cache backend connected");
        Ok(backend)
    }

    /// Build the full key with prefix.
    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    /// Run one command under the response timeout.
    async fn run<T, F>(&self, command: F) -> Result<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.response_timeout, command).await {
            Ok(result) => result.map_err(AgoraError::from),
            Err(_) => Err(AgoraError::with_internal(
                ErrorCode::CacheError,
                "Cache operation timed out",
                format!("no reply within {:?}", self.response_timeout),
            )),
        }
    }
}

/// Escape glob metacharacters so a literal prefix can be used with `MATCH`.
fn escape_glob(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let full_key = self.full_key(key);

        let value: Option<String> = self.run(conn.get(&full_key)).await?;

        if value.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            counter!("cache_hits_total", "backend" => "redis").increment(1);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            counter!("cache_misses_total", "backend" => "redis", "reason" => "not_found")
                .increment(1);
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.conn.clone();
        let full_key = self.full_key(key);

        match ttl {
            Some(ttl) => {
                let millis = (ttl.as_millis() as u64).max(1);
                self.run(conn.pset_ex::<_, _, ()>(&full_key, value, millis))
                    .await?;
            }
            None => {
                self.run(conn.set::<_, _, ()>(&full_key, value)).await?;
            }
        }

        counter!("cache_sets_total", "backend" => "redis").increment(1);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let full_key = self.full_key(key);

        let deleted: i64 = self.run(conn.del(&full_key)).await?;
        if deleted > 0 {
            counter!("cache_deletes_total", "backend" => "redis").increment(1);
        }
        Ok(deleted > 0)
    }

    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", escape_glob(&self.full_key(prefix)));
        let mut cursor: u64 = 0;
        let mut total_deleted = 0u64;

        loop {
            let (next, keys): (u64, Vec<String>) = self
                .run(
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(100)
                        .query_async(&mut conn),
                )
                .await?;

            if !keys.is_empty() {
                let deleted: i64 = self.run(conn.del(&keys)).await?;
                total_deleted += deleted.max(0) as u64;
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        counter!("cache_deletes_total", "backend" => "redis").increment(total_deleted);
        Ok(total_deleted)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = self.run(redis::cmd("PING").query_async(&mut conn)).await?;
        Ok(())
    }

    async fn stats(&self) -> Result<CacheStats> {
        let mut stats = CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: None,
            evictions: 0,
            hit_rate: 0.0,
        };
        stats.calculate_hit_rate();
        Ok(stats)
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_backend() {
        let backend = InMemoryBackend::default();

        backend.set("key1", "3", Some(Duration::from_secs(60))).await.unwrap();
        assert_eq!(backend.get("key1").await.unwrap().as_deref(), Some("3"));

        backend.set("key1", "2", None).await.unwrap();
        assert_eq!(backend.get("key1").await.unwrap().as_deref(), Some("2"));

        assert!(backend.delete("key1").await.unwrap());
        assert!(!backend.delete("key1").await.unwrap());
        assert!(backend.get("key1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_in_memory_expiry() {
        let backend = InMemoryBackend::default();

        backend.set("short", "1", Some(Duration::from_millis(20))).await.unwrap();
        backend.set("long", "1", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(backend.get("short").await.unwrap().is_none());
        assert!(backend.get("long").await.unwrap().is_some());
        assert_eq!(backend.stats().await.unwrap().entries, Some(1));
    }

    #[tokio::test]
    async fn test_in_memory_huge_ttl_never_expires() {
        let backend = InMemoryBackend::default();

        backend.set("forever", "1", Some(Duration::MAX)).await.unwrap();
        assert_eq!(backend.get("forever").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_in_memory_delete_by_prefix() {
        let backend = InMemoryBackend::default();

        backend.set("role:a:1", "1", None).await.unwrap();
        backend.set("role:a:2", "1", None).await.unwrap();
        backend.set("role:b:1", "1", None).await.unwrap();

        assert_eq!(backend.delete_by_prefix("role:a:").await.unwrap(), 2);
        assert!(backend.get("role:a:1").await.unwrap().is_none());
        assert!(backend.get("role:b:1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_in_memory_eviction() {
        let backend = InMemoryBackend::new(InMemoryConfig {
            max_capacity: 5,
            ..Default::default()
        });

        for i in 0..10 {
            backend.set(&format!("key-{}", i), "1", None).await.unwrap();
        }

        let stats = backend.stats().await.unwrap();
        assert!(stats.entries.unwrap() <= 5);
        assert!(stats.evictions > 0);
    }

    #[tokio::test]
    async fn test_eviction_prefers_expired_entries() {
        let backend = InMemoryBackend::new(InMemoryConfig {
            max_capacity: 2,
            ..Default::default()
        });

        backend.set("stale", "1", Some(Duration::from_millis(10))).await.unwrap();
        backend.set("live", "1", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        backend.set("new", "1", None).await.unwrap();

        assert!(backend.get("live").await.unwrap().is_some());
        assert!(backend.get("new").await.unwrap().is_some());
        assert_eq!(backend.stats().await.unwrap().evictions, 0);
    }

    #[tokio::test]
    async fn test_cache_stats() {
        let backend = InMemoryBackend::default();

        backend.set("key1", "1", None).await.unwrap();
        backend.get("key1").await.unwrap(); // Hit
        backend.get("key2").await.unwrap(); // Miss

        let stats = backend.stats().await.unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, Some(1));
        assert!((stats.hit_rate - 0.5).abs() < 0.01);
    }

    #[test]
    fn test_escape_glob() {
        assert_eq!(escape_glob("agora:role:ab:"), "agora:role:ab:");
        assert_eq!(escape_glob("a*b?[c]"), "a\\*b\\?\\[c\\]");
    }
}
