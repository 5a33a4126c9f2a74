//! In-process key-value store.
//!
//! Process-local backend for tests and single-worker deployments. All
//! operations run under one mutex, which makes `set_if_absent` atomic
//! by construction. Expired entries are reaped lazily on access.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::store::{glob_to_regex, KvError, KvResult, KvStore};

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(deadline) if deadline <= now)
    }
}

/// In-memory `KvStore` implementation.
///
/// Cloning is cheap and clones share the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct MemoryKvStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl MemoryKvStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries, for tests and diagnostics.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.lock();
        entries.values().filter(|e| !e.is_expired(now)).count()
    }

    /// True when the store holds no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        // Lock poisoning only happens if a holder panicked; the map is
        // still structurally sound, so keep serving it.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> KvResult<Option<Vec<u8>>> {
        let now = Instant::now();
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> KvResult<()> {
        let entry = Entry {
            value: value.to_vec(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.lock().insert(key.to_string(), entry);
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> KvResult<bool> {
        let now = Instant::now();
        let mut entries = self.lock();
        if let Some(existing) = entries.get(key) {
            if !existing.is_expired(now) {
                return Ok(false);
            }
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> KvResult<bool> {
        let now = Instant::now();
        let mut entries = self.lock();
        match entries.remove(key) {
            Some(entry) => Ok(!entry.is_expired(now)),
            None => Ok(false),
        }
    }

    async fn delete_pattern(&self, pattern: &str) -> KvResult<u64> {
        let regex = glob_to_regex(pattern)?;
        let now = Instant::now();
        let mut entries = self.lock();
        let matching: Vec<String> = entries
            .iter()
            .filter(|(key, entry)| !entry.is_expired(now) && regex.is_match(key))
            .map(|(key, _)| key.clone())
            .collect();

        let count = matching.len() as u64;
        for key in matching {
            entries.remove(&key);
        }
        Ok(count)
    }

    async fn ttl(&self, key: &str) -> KvResult<Option<Duration>> {
        let now = Instant::now();
        let entries = self.lock();
        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => Ok(None),
            Some(entry) => Ok(entry.expires_at.map(|deadline| deadline - now)),
            None => Ok(None),
        }
    }

    async fn incr(&self, key: &str, amount: i64) -> KvResult<i64> {
        let now = Instant::now();
        let mut entries = self.lock();
        let current = match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => std::str::from_utf8(&entry.value)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or_else(|| KvError::NotACounter {
                    key: key.to_string(),
                })?,
            _ => 0,
        };

        let next = current + amount;
        let expires_at = entries.get(key).and_then(|e| e.expires_at);
        entries.insert(
            key.to_string(),
            Entry {
                value: next.to_string().into_bytes(),
                expires_at,
            },
        );
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_then_get_round_trips() {
        let store = MemoryKvStore::new();
        store.set("k", b"v", None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn test_entry_expires_after_ttl() {
        let store = MemoryKvStore::new();
        store
            .set("k", b"v", Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(store.get("k").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_if_absent_is_exclusive() {
        let store = MemoryKvStore::new();
        assert!(store
            .set_if_absent("lock", b"1", Duration::from_secs(10))
            .await
            .unwrap());
        assert!(!store
            .set_if_absent("lock", b"1", Duration::from_secs(10))
            .await
            .unwrap());

        store.delete("lock").await.unwrap();
        assert!(store
            .set_if_absent("lock", b"1", Duration::from_secs(10))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_set_if_absent_succeeds_over_expired_entry() {
        let store = MemoryKvStore::new();
        store
            .set_if_absent("lock", b"1", Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(store
            .set_if_absent("lock", b"1", Duration::from_secs(10))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_delete_pattern_removes_matching_batch() {
        let store = MemoryKvStore::new();
        store.set("products:list:skip:0", b"a", None).await.unwrap();
        store
            .set("products:list:skip:10", b"b", None)
            .await
            .unwrap();
        store.set("products:id:1", b"c", None).await.unwrap();

        let deleted = store.delete_pattern("products:list:*").await.unwrap();
        assert_eq!(deleted, 2);
        assert!(store.get("products:id:1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_incr_creates_and_advances_counter() {
        let store = MemoryKvStore::new();
        assert_eq!(store.incr("hits", 1).await.unwrap(), 1);
        assert_eq!(store.incr("hits", 2).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_incr_rejects_non_counter_value() {
        let store = MemoryKvStore::new();
        store.set("k", b"not a number", None).await.unwrap();
        assert!(matches!(
            store.incr("k", 1).await,
            Err(KvError::NotACounter { .. })
        ));
    }
}
