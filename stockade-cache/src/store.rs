//! Key-value store abstraction shared by cache and lock semantics.
//!
//! The same store backs both cached payloads and the transient lock
//! entries used for stampede protection, so the trait carries the full
//! surface both need: plain get/set/delete, TTL handling, pattern
//! deletion for batch invalidation, and an atomic test-and-set used to
//! implement the distributed compute lock.

use async_trait::async_trait;
use regex::Regex;
use std::time::Duration;
use thiserror::Error;

/// Error type for key-value store operations.
///
/// All variants are transient from the caller's point of view: the
/// cache front-end swallows them and degrades to direct computation.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum KvError {
    #[error("Store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Store operation failed: {reason}")]
    Backend { reason: String },

    #[error("Invalid key pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Value for key '{key}' is not a counter")]
    NotACounter { key: String },
}

/// Result type alias for key-value store operations.
pub type KvResult<T> = Result<T, KvError>;

/// Shared key-value store with TTL support.
///
/// Implementations must be safe for concurrent use from multiple tasks,
/// and `set_if_absent` must be atomic with respect to every other write
/// on the same key; it is the primitive the stampede lock is built on.
///
/// Expired entries behave as absent for every operation, including
/// `set_if_absent`; whether they are physically removed eagerly or
/// lazily is implementation-defined.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Get the raw value for a key, or `None` if absent or expired.
    async fn get(&self, key: &str) -> KvResult<Option<Vec<u8>>>;

    /// Store a value, replacing any existing one. `ttl = None` means the
    /// entry never expires.
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> KvResult<()>;

    /// Atomically store a value only if the key is currently absent.
    ///
    /// Returns `true` if the value was stored, `false` if the key
    /// already held a live entry.
    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> KvResult<bool>;

    /// Delete a key. Returns `true` if a live entry was removed.
    async fn delete(&self, key: &str) -> KvResult<bool>;

    /// Delete every key matching a glob pattern (`*` and `?` wildcards).
    /// Returns the number of entries removed as one batch.
    async fn delete_pattern(&self, pattern: &str) -> KvResult<u64>;

    /// Remaining time-to-live for a key, `None` if the key is absent,
    /// expired, or has no expiry.
    async fn ttl(&self, key: &str) -> KvResult<Option<Duration>>;

    /// Increment a counter key by `amount`, creating it at `amount` if
    /// absent. Returns the new value.
    async fn incr(&self, key: &str, amount: i64) -> KvResult<i64>;
}

/// Translate a glob pattern (`*` and `?` wildcards, everything else
/// literal) into an anchored regex.
pub(crate) fn glob_to_regex(pattern: &str) -> KvResult<Regex> {
    let mut regex = String::with_capacity(pattern.len() + 8);
    regex.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            c => regex.push_str(&regex::escape(&c.to_string())),
        }
    }
    regex.push('$');

    Regex::new(&regex).map_err(|e| KvError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_star_matches_prefix() {
        let re = glob_to_regex("products:list:*").unwrap();
        assert!(re.is_match("products:list:skip:0:limit:10"));
        assert!(!re.is_match("products:id:42"));
    }

    #[test]
    fn test_glob_question_mark_matches_single_char() {
        let re = glob_to_regex("order:?").unwrap();
        assert!(re.is_match("order:1"));
        assert!(!re.is_match("order:12"));
    }

    #[test]
    fn test_glob_escapes_regex_metacharacters() {
        let re = glob_to_regex("a.b+c:*").unwrap();
        assert!(re.is_match("a.b+c:x"));
        assert!(!re.is_match("aXb+c:x"));
    }

    #[test]
    fn test_glob_without_wildcards_is_exact() {
        let re = glob_to_regex("products:id:7").unwrap();
        assert!(re.is_match("products:id:7"));
        assert!(!re.is_match("products:id:77"));
    }
}
