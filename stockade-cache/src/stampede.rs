//! Stampede-safe read-through cache.
//!
//! Wraps a [`KvStore`] with typed get/set helpers and a
//! `get_or_compute` that lets only one caller per key run the expensive
//! computation on a miss. Competing callers take a short lock key in
//! the store; losers poll the cache while the winner computes and
//! backfills.
//!
//! Every store failure degrades to direct computation. A broken cache
//! must never take reads down with it, so `KvError` is logged and
//! swallowed here and callers only ever see errors from their own
//! compute closure.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::store::{KvError, KvStore};

/// Value written under a lock key. Only presence matters.
const LOCK_SENTINEL: &[u8] = b"1";

/// Tuning knobs for the cache front-end.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL applied when a `set` or backfill does not specify one.
    pub default_ttl: Duration,
    /// Lifetime of the per-key compute lock. An expired lock is
    /// reclaimable, so this bounds how long a crashed winner can block
    /// recomputation.
    pub lock_ttl: Duration,
    /// How many times a lock loser re-polls the cache before giving up
    /// and computing directly.
    pub max_retries: u32,
    /// Pause between lock-loser polls.
    pub retry_delay: Duration,
    /// Master switch. When false every read misses and every write is a
    /// no-op, which is useful in tests and during cache incidents.
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(300),
            lock_ttl: Duration::from_secs(10),
            max_retries: 3,
            retry_delay: Duration::from_millis(100),
            enabled: true,
        }
    }
}

impl CacheConfig {
    /// Load configuration from `STOCKADE_CACHE_*` environment variables,
    /// falling back to defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            default_ttl: env_secs("STOCKADE_CACHE_TTL_SECS", defaults.default_ttl),
            lock_ttl: env_secs("STOCKADE_CACHE_LOCK_TTL_SECS", defaults.lock_ttl),
            max_retries: std::env::var("STOCKADE_CACHE_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_retries),
            retry_delay: env_millis("STOCKADE_CACHE_RETRY_DELAY_MS", defaults.retry_delay),
            enabled: std::env::var("STOCKADE_CACHE_ENABLED")
                .ok()
                .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
                .unwrap_or(defaults.enabled),
        }
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

fn env_secs(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn env_millis(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

/// Read-through cache with per-key stampede protection.
pub struct StampedeCache<S: KvStore> {
    store: Arc<S>,
    config: CacheConfig,
}

impl<S: KvStore> Clone for StampedeCache<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
        }
    }
}

impl<S: KvStore> StampedeCache<S> {
    pub fn new(store: Arc<S>, config: CacheConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn lock_key(key: &str) -> String {
        format!("lock:{key}")
    }

    /// Typed cache read. Returns `None` on miss, on deserialization
    /// failure, and on any store error.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if !self.config.enabled {
            return None;
        }
        match self.store.get(key).await {
            Ok(Some(bytes)) => decode(key, &bytes),
            Ok(None) => None,
            Err(e) => {
                warn_degraded("get", key, &e);
                None
            }
        }
    }

    /// Typed cache write. Returns `true` if the value was stored.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) -> bool {
        if !self.config.enabled {
            return false;
        }
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(key, error = %e, "cache set skipped, value not serializable");
                return false;
            }
        };
        let ttl = ttl.or(Some(self.config.default_ttl));
        match self.store.set(key, &bytes, ttl).await {
            Ok(()) => true,
            Err(e) => {
                warn_degraded("set", key, &e);
                false
            }
        }
    }

    /// Remove one key. Returns `true` if a live entry was removed.
    pub async fn delete(&self, key: &str) -> bool {
        if !self.config.enabled {
            return false;
        }
        match self.store.delete(key).await {
            Ok(removed) => removed,
            Err(e) => {
                warn_degraded("delete", key, &e);
                false
            }
        }
    }

    /// Remove every key matching a glob pattern. Returns the number of
    /// entries removed.
    pub async fn delete_pattern(&self, pattern: &str) -> u64 {
        if !self.config.enabled {
            return 0;
        }
        match self.store.delete_pattern(pattern).await {
            Ok(count) => {
                tracing::debug!(pattern, count, "cache pattern invalidation");
                count
            }
            Err(e) => {
                warn_degraded("delete_pattern", pattern, &e);
                0
            }
        }
    }

    /// Read-through with stampede protection.
    ///
    /// On a hit the cached value is returned without running `compute`.
    /// On a miss, callers race for `lock:{key}`; the winner runs
    /// `compute`, backfills the cache, and releases the lock. Losers
    /// sleep `retry_delay` and re-poll the cache up to `max_retries`
    /// times, then fall back to computing directly rather than wait
    /// forever on a winner that may have died.
    ///
    /// Only errors from `compute` itself propagate; the cache never
    /// fails a read on its own behalf.
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.config.enabled {
            return compute().await;
        }

        if let Some(value) = self.get(key).await {
            tracing::trace!(key, "cache hit");
            return Ok(value);
        }

        let lock_key = Self::lock_key(key);
        let mut acquired = false;
        // Exactly max_retries acquisition attempts, each followed by a
        // sleep and a cache re-check when the lock is held elsewhere.
        for _ in 0..self.config.max_retries {
            match self
                .store
                .set_if_absent(&lock_key, LOCK_SENTINEL, self.config.lock_ttl)
                .await
            {
                Ok(true) => {
                    acquired = true;
                    break;
                }
                Ok(false) => {
                    tokio::time::sleep(self.config.retry_delay).await;
                    if let Some(value) = self.get(key).await {
                        tracing::trace!(key, "cache backfilled by lock holder");
                        return Ok(value);
                    }
                }
                Err(e) => {
                    warn_degraded("lock", &lock_key, &e);
                    break;
                }
            }
        }
        if !acquired {
            tracing::warn!(
                key,
                attempts = self.config.max_retries,
                "compute lock not acquired, computing directly"
            );
        }

        if acquired {
            // Another worker may have backfilled between our miss and
            // the lock grant.
            if let Some(value) = self.get(key).await {
                self.delete(&lock_key).await;
                return Ok(value);
            }
        }

        let result = compute().await;

        if let Ok(value) = &result {
            self.set(key, value, ttl).await;
        }
        if acquired {
            self.delete(&lock_key).await;
        }
        result
    }
}

fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Option<T> {
    match serde_json::from_slice(bytes) {
        Ok(value) => Some(value),
        // Values written by other tooling may be raw strings rather
        // than JSON; surface them as such when the caller wants one.
        Err(_) => match std::str::from_utf8(bytes) {
            Ok(raw) => serde_json::from_value(serde_json::Value::String(raw.to_string()))
                .map_err(|e| {
                    tracing::warn!(key, error = %e, "cached value not decodable, treating as miss");
                    e
                })
                .ok(),
            Err(_) => {
                tracing::warn!(key, "cached value not valid UTF-8, treating as miss");
                None
            }
        },
    }
}

fn warn_degraded(op: &str, key: &str, error: &KvError) {
    tracing::warn!(op, key, error = %error, "cache degraded, continuing without it");
}
