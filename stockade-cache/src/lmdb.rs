//! LMDB-backed key-value store.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a
//! memory-mapped store that is shared across worker processes on the
//! same host, the multi-worker deployment the stampede lock exists
//! for. LMDB serializes write transactions, which makes
//! `set_if_absent` atomic without any extra coordination.
//!
//! # Value layout
//!
//! `[expiry_millis: 8 bytes LE][payload]`. Expiry is a wall-clock Unix
//! timestamp in milliseconds, `0` meaning "never expires". Wall-clock
//! time is used (rather than a process-local monotonic clock) so that
//! every worker process agrees on when an entry dies.
//!
//! Expired entries are treated as absent on read and physically removed
//! on the next write that touches them.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvOpenOptions};

use crate::store::{glob_to_regex, KvError, KvResult, KvStore};

const EXPIRY_HEADER_LEN: usize = 8;

/// LMDB-backed `KvStore` shared across processes.
#[derive(Clone)]
pub struct LmdbKvStore {
    env: Env,
    db: Database<Str, Bytes>,
}

impl LmdbKvStore {
    /// Open (or create) the store under `path` with the given map size.
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> KvResult<Self> {
        std::fs::create_dir_all(&path).map_err(|e| KvError::Unavailable {
            reason: e.to_string(),
        })?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| KvError::Unavailable {
            reason: e.to_string(),
        })?;

        let mut wtxn = env.write_txn().map_err(backend)?;
        let db: Database<Str, Bytes> = env.create_database(&mut wtxn, None).map_err(backend)?;
        wtxn.commit().map_err(backend)?;

        Ok(Self { env, db })
    }

    fn encode(value: &[u8], ttl: Option<Duration>) -> Vec<u8> {
        let expires_at_millis = match ttl {
            Some(ttl) => Utc::now().timestamp_millis() + ttl.as_millis() as i64,
            None => 0,
        };
        let mut bytes = Vec::with_capacity(EXPIRY_HEADER_LEN + value.len());
        bytes.extend_from_slice(&expires_at_millis.to_le_bytes());
        bytes.extend_from_slice(value);
        bytes
    }

    /// Decode a stored value, returning `None` for malformed or expired
    /// entries. The second element is the expiry timestamp (0 = none).
    fn decode(bytes: &[u8]) -> Option<(Vec<u8>, i64)> {
        if bytes.len() < EXPIRY_HEADER_LEN {
            return None;
        }
        let header: [u8; EXPIRY_HEADER_LEN] = bytes[..EXPIRY_HEADER_LEN].try_into().ok()?;
        let expires_at_millis = i64::from_le_bytes(header);
        if expires_at_millis != 0 && expires_at_millis <= Utc::now().timestamp_millis() {
            return None;
        }
        Some((bytes[EXPIRY_HEADER_LEN..].to_vec(), expires_at_millis))
    }
}

fn backend(e: heed::Error) -> KvError {
    KvError::Backend {
        reason: e.to_string(),
    }
}

#[async_trait]
impl KvStore for LmdbKvStore {
    async fn get(&self, key: &str) -> KvResult<Option<Vec<u8>>> {
        let rtxn = self.env.read_txn().map_err(backend)?;
        match self.db.get(&rtxn, key).map_err(backend)? {
            Some(bytes) => Ok(Self::decode(bytes).map(|(value, _)| value)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> KvResult<()> {
        let encoded = Self::encode(value, ttl);
        let mut wtxn = self.env.write_txn().map_err(backend)?;
        self.db.put(&mut wtxn, key, &encoded).map_err(backend)?;
        wtxn.commit().map_err(backend)
    }

    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> KvResult<bool> {
        let mut wtxn = self.env.write_txn().map_err(backend)?;

        // The write transaction is exclusive, so check-then-put here is
        // the atomic test-and-set the stampede lock relies on.
        let live = match self.db.get(&wtxn, key).map_err(backend)? {
            Some(bytes) => Self::decode(bytes).is_some(),
            None => false,
        };
        if live {
            return Ok(false);
        }

        let encoded = Self::encode(value, Some(ttl));
        self.db.put(&mut wtxn, key, &encoded).map_err(backend)?;
        wtxn.commit().map_err(backend)?;
        Ok(true)
    }

    async fn delete(&self, key: &str) -> KvResult<bool> {
        let mut wtxn = self.env.write_txn().map_err(backend)?;
        let was_live = match self.db.get(&wtxn, key).map_err(backend)? {
            Some(bytes) => Self::decode(bytes).is_some(),
            None => false,
        };
        let removed = self.db.delete(&mut wtxn, key).map_err(backend)?;
        wtxn.commit().map_err(backend)?;
        Ok(removed && was_live)
    }

    async fn delete_pattern(&self, pattern: &str) -> KvResult<u64> {
        let regex = glob_to_regex(pattern)?;

        let mut wtxn = self.env.write_txn().map_err(backend)?;
        let matching: Vec<(String, bool)> = {
            let iter = self.db.iter(&wtxn).map_err(backend)?;
            let mut keys = Vec::new();
            for result in iter {
                let (key, bytes) = result.map_err(backend)?;
                if regex.is_match(key) {
                    keys.push((key.to_string(), Self::decode(bytes).is_some()));
                }
            }
            keys
        };

        let mut deleted = 0u64;
        for (key, was_live) in matching {
            if self.db.delete(&mut wtxn, &key).map_err(backend)? && was_live {
                deleted += 1;
            }
        }
        wtxn.commit().map_err(backend)?;
        Ok(deleted)
    }

    async fn ttl(&self, key: &str) -> KvResult<Option<Duration>> {
        let rtxn = self.env.read_txn().map_err(backend)?;
        match self.db.get(&rtxn, key).map_err(backend)? {
            Some(bytes) => match Self::decode(bytes) {
                Some((_, 0)) => Ok(None),
                Some((_, expires_at_millis)) => {
                    let remaining = expires_at_millis - Utc::now().timestamp_millis();
                    Ok(u64::try_from(remaining)
                        .ok()
                        .map(Duration::from_millis))
                }
                None => Ok(None),
            },
            None => Ok(None),
        }
    }

    async fn incr(&self, key: &str, amount: i64) -> KvResult<i64> {
        let mut wtxn = self.env.write_txn().map_err(backend)?;

        let (current, expires_at_millis) = match self.db.get(&wtxn, key).map_err(backend)? {
            Some(bytes) => match Self::decode(bytes) {
                Some((value, expiry)) => {
                    let counter = std::str::from_utf8(&value)
                        .ok()
                        .and_then(|s| s.parse::<i64>().ok())
                        .ok_or_else(|| KvError::NotACounter {
                            key: key.to_string(),
                        })?;
                    (counter, expiry)
                }
                None => (0, 0),
            },
            None => (0, 0),
        };

        let next = current + amount;
        let mut encoded = Vec::with_capacity(EXPIRY_HEADER_LEN + 20);
        encoded.extend_from_slice(&expires_at_millis.to_le_bytes());
        encoded.extend_from_slice(next.to_string().as_bytes());
        self.db.put(&mut wtxn, key, &encoded).map_err(backend)?;
        wtxn.commit().map_err(backend)?;
        Ok(next)
    }
}
